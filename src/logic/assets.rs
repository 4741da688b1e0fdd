use log::{debug, warn};
use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};

use crate::error::AppError;

/// An opened static file, ready to stream.
#[derive(Debug)]
pub struct Asset {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub len: u64,
    pub file: tokio::fs::File,
}

/// Serves files below a single root directory.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    root: PathBuf,
    index: String,
}

impl AssetResolver {
    pub fn new(root: impl Into<PathBuf>, index: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            index: index.into(),
        }
    }

    /// Decodes a URL path into a path relative to the root, without touching the filesystem.
    ///
    /// Any `..` component, raw or percent-encoded, is rejected.
    pub fn resolve_path(&self, url_path: &str) -> Result<PathBuf, AppError> {
        let decoded = percent_decode_str(url_path)
            .decode_utf8()
            .map_err(|_| AppError::NotFound)?;
        if decoded.contains('\0') {
            return Err(AppError::NotFound);
        }

        let mut relative = PathBuf::new();
        for component in Path::new(decoded.as_ref()).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(AppError::Forbidden(
                        "path escapes the static root".to_string(),
                    ))
                }
            }
        }
        Ok(relative)
    }

    /// Resolves a URL path to an existing file inside the root. Directories resolve to
    /// their index document.
    pub async fn resolve(&self, url_path: &str) -> Result<PathBuf, AppError> {
        let relative = self.resolve_path(url_path)?;
        let root = tokio::fs::canonicalize(&self.root).await.map_err(|e| {
            warn!("Static root {} is unavailable: {}", self.root.display(), e);
            AppError::NotFound
        })?;

        let mut candidate = root.join(&relative);
        let wants_directory = url_path.ends_with('/') || relative.as_os_str().is_empty();
        if wants_directory || tokio::fs::metadata(&candidate).await.map(|m| m.is_dir()).unwrap_or(false) {
            candidate.push(&self.index);
        }

        // Symlinks may still point outside the root.
        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| AppError::NotFound)?;
        if !resolved.starts_with(&root) {
            return Err(AppError::Forbidden(
                "path escapes the static root".to_string(),
            ));
        }

        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|_| AppError::NotFound)?;
        if !metadata.is_file() {
            return Err(AppError::NotFound);
        }
        Ok(resolved)
    }

    pub async fn open(&self, url_path: &str) -> Result<Asset, AppError> {
        let path = self.resolve(url_path).await?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|_| AppError::NotFound)?;
        let len = file
            .metadata()
            .await
            .map_err(|e| AppError::Internal(format!("failed to read file metadata: {}", e)))?
            .len();
        debug!("Serving static file {}", path.display());

        Ok(Asset {
            content_type: content_type(&path),
            path,
            len,
            file,
        })
    }
}

/// Content type by file extension.
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn fixture() -> (tempfile::TempDir, AssetResolver) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("public");
        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(root.join("docs/index.html"), "<h1>docs</h1>").unwrap();
        std::fs::write(root.join("style.css"), "body {}").unwrap();
        std::fs::write(root.join("my file.txt"), "spaced").unwrap();
        std::fs::write(dir.path().join("secret.txt"), "do not serve").unwrap();
        let resolver = AssetResolver::new(root, "index.html");
        (dir, resolver)
    }

    #[test]
    fn test_lexical_resolution() {
        let resolver = AssetResolver::new("/srv/public", "index.html");
        assert_eq!(resolver.resolve_path("/a/b.css").unwrap(), PathBuf::from("a/b.css"));
        assert_eq!(resolver.resolve_path("/./a//b").unwrap(), PathBuf::from("a/b"));
        assert_eq!(resolver.resolve_path("/").unwrap(), PathBuf::new());
    }

    #[test]
    fn test_traversal_is_rejected_raw_and_encoded() {
        let resolver = AssetResolver::new("/srv/public", "index.html");
        for path in ["/../secret.txt", "/a/../../etc/passwd", "/%2e%2e/secret.txt", "/%2E%2E%2Fsecret.txt"] {
            assert!(
                matches!(resolver.resolve_path(path), Err(AppError::Forbidden(_))),
                "{} should be rejected",
                path
            );
        }
        assert!(matches!(resolver.resolve_path("/%FF"), Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_serves_file_with_content_type() {
        let (_dir, resolver) = fixture();
        let mut asset = resolver.open("/style.css").await.unwrap();
        assert_eq!(asset.content_type, "text/css; charset=utf-8");

        let mut body = String::new();
        asset.file.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "body {}");
        assert_eq!(asset.len, 7);
    }

    #[tokio::test]
    async fn test_percent_encoded_names() {
        let (_dir, resolver) = fixture();
        let asset = resolver.open("/my%20file.txt").await.unwrap();
        assert!(asset.path.ends_with("my file.txt"));
    }

    #[tokio::test]
    async fn test_directories_resolve_to_index() {
        let (_dir, resolver) = fixture();
        assert!(resolver.resolve("/").await.unwrap().ends_with("public/index.html"));
        assert!(resolver.resolve("/docs").await.unwrap().ends_with("docs/index.html"));
        assert!(resolver.resolve("/docs/").await.unwrap().ends_with("docs/index.html"));
    }

    #[tokio::test]
    async fn test_missing_files_and_escapes() {
        let (_dir, resolver) = fixture();
        assert!(matches!(resolver.resolve("/nope.css").await, Err(AppError::NotFound)));
        assert!(matches!(
            resolver.resolve("/../secret.txt").await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_content_type_table() {
        assert_eq!(content_type(Path::new("a/index.HTML")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("app.js")), "text/javascript; charset=utf-8");
        assert_eq!(content_type(Path::new("logo.svg")), "image/svg+xml");
        assert_eq!(content_type(Path::new("archive.bin")), "application/octet-stream");
        assert_eq!(content_type(Path::new("README")), "application/octet-stream");
    }
}
