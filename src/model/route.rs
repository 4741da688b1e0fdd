use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::logic::transform::{Policy, Transform};
use crate::model::View;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Maps an HTTP method onto a routable one. HEAD, OPTIONS and friends are not routable.
    pub fn from_http(method: &axum::http::Method) -> Option<Self> {
        match *method {
            axum::http::Method::GET => Some(Method::Get),
            axum::http::Method::POST => Some(Method::Post),
            axum::http::Method::PUT => Some(Method::Put),
            axum::http::Method::PATCH => Some(Method::Patch),
            axum::http::Method::DELETE => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!(
                "unknown route method '{}', expected GET | POST | PUT | PATCH | DELETE",
                other
            )),
        }
    }
}

/// Splits a request or pattern path into its non-empty segments.
///
/// `""`, `"/"` and `"//"` all yield no segments, and a trailing slash is ignored.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed route pattern such as `/users/:id/posts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        for seg in split_path(raw) {
            match seg.strip_prefix(':') {
                Some("") => {
                    return Err(format!("pattern '{}' has a variable segment without a name", raw))
                }
                Some(name) => {
                    if segments
                        .iter()
                        .any(|s| matches!(s, Segment::Variable(n) if n == name))
                    {
                        return Err(format!(
                            "pattern '{}' binds variable '{}' more than once",
                            raw, name
                        ));
                    }
                    segments.push(Segment::Variable(name.to_string()));
                }
                None => segments.push(Segment::Literal(seg.to_string())),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// The on-disk route file: `{"routes": {"/path/:id": {"GET": {...}}}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteFile {
    #[serde(default)]
    pub routes: BTreeMap<String, BTreeMap<Method, RouteConfig>>,
}

impl RouteFile {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Declared stages of one (pattern, method) pair. Callables are referenced by registry name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub sql: Option<String>,
    pub preprocess: Option<String>,
    pub postprocess: Option<String>,
    #[serde(alias = "set_jwt")]
    pub set_credential: Option<String>,
    pub policy: Option<String>,
    pub view: Option<View>,
}

/// A registered callable together with the name it was resolved from.
pub struct Named<T: ?Sized> {
    pub name: String,
    pub callable: Arc<T>,
}

impl<T: ?Sized> Named<T> {
    pub fn new(name: impl Into<String>, callable: Arc<T>) -> Self {
        Self {
            name: name.into(),
            callable,
        }
    }
}

impl<T: ?Sized> Clone for Named<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            callable: Arc::clone(&self.callable),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Named<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Named({})", self.name)
    }
}

/// A fully resolved route: pattern, method and the pipeline stages it declares.
#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: PathPattern,
    pub method: Method,
    pub sql: Option<String>,
    pub preprocess: Option<Named<dyn Transform>>,
    pub postprocess: Option<Named<dyn Transform>>,
    pub set_credential: Option<Named<dyn Transform>>,
    pub policy: Option<Named<dyn Policy>>,
    pub view: Option<View>,
}

impl Route {
    pub fn new(pattern: PathPattern, method: Method) -> Self {
        Self {
            pattern,
            method,
            sql: None,
            preprocess: None,
            postprocess: None,
            set_credential: None,
            policy: None,
            view: None,
        }
    }

    /// Sets the data function, dropping a trailing `.sql` left over from file names.
    pub fn with_sql(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let name = name.strip_suffix(".sql").map(str::to_string).unwrap_or(name);
        self.sql = Some(name);
        self
    }

    pub fn with_preprocess(mut self, stage: Named<dyn Transform>) -> Self {
        self.preprocess = Some(stage);
        self
    }

    pub fn with_postprocess(mut self, stage: Named<dyn Transform>) -> Self {
        self.postprocess = Some(stage);
        self
    }

    pub fn with_set_credential(mut self, stage: Named<dyn Transform>) -> Self {
        self.set_credential = Some(stage);
        self
    }

    pub fn with_policy(mut self, stage: Named<dyn Policy>) -> Self {
        self.policy = Some(stage);
        self
    }

    pub fn with_view(mut self, view: View) -> Self {
        self.view = Some(view);
        self
    }
}
