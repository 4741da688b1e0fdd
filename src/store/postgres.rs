use anyhow::{bail, Context, Result};
use itertools::Itertools;
use log::{debug, error, info, warn};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, Executor, PgPool, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::model::ParameterSet;
use crate::store::traits::{collapse_rows, Argument, DataError, DataFunction, FunctionStore, ReturnKind};

const CATALOG_QUERY: &str = r#"
    SELECT p.proname::text AS name,
           ARRAY(
               SELECT COALESCE(a.name, '')
               FROM unnest(COALESCE(p.proargnames, ARRAY[]::text[])) WITH ORDINALITY AS a(name, idx)
               WHERE p.proargmodes IS NULL OR p.proargmodes[a.idx] IN ('i', 'b', 'v')
               ORDER BY a.idx
           ) AS arg_names,
           ARRAY(
               SELECT format_type(t.oid, NULL)
               FROM unnest(p.proargtypes::oid[]) WITH ORDINALITY AS t(oid, idx)
               ORDER BY t.idx
           ) AS arg_types,
           p.proretset AS returns_set,
           rt.typtype::text AS return_typtype,
           format_type(p.prorettype, NULL) AS return_type
    FROM pg_proc p
    JOIN pg_namespace n ON n.oid = p.pronamespace
    JOIN pg_type rt ON rt.oid = p.prorettype
    WHERE n.nspname = 'public' AND p.prokind = 'f'
    ORDER BY p.proname
"#;

const MIGRATIONS_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS pico";

const MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS pico.migrations (
        id SERIAL PRIMARY KEY,
        version BIGINT NOT NULL,
        name TEXT NOT NULL,
        applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

/// A schema migration file named `<timestamp>_<name>.sql` (or `<timestamp>:<name>.sql`).
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub path: PathBuf,
}

/// A catalog entry plus the statement used to invoke it.
#[derive(Debug, Clone)]
struct CatalogEntry {
    function: DataFunction,
    statement: String,
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    catalog: HashMap<String, CatalogEntry>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self {
            pool,
            catalog: HashMap::new(),
        })
    }

    /// Apply every migration in `dir` newer than the last one recorded in `pico.migrations`.
    ///
    /// Each migration runs in one transaction with its tracker row. The first failure stops the run.
    pub async fn migrate(&self, dir: &Path) -> Result<usize> {
        self.pool
            .execute(MIGRATIONS_SCHEMA)
            .await
            .context("Failed to create the pico schema")?;
        self.pool
            .execute(MIGRATIONS_TABLE)
            .await
            .context("Failed to create the migration tracker")?;

        let last: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM pico.migrations")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read the last applied migration")?;
        let last = last.unwrap_or(0);

        let pending = pending_migrations(dir, last)?;
        for migration in &pending {
            let sql = std::fs::read_to_string(&migration.path).with_context(|| {
                format!("Failed to read migration {}", migration.path.display())
            })?;

            let mut tx = self.pool.begin().await.context("Failed to start transaction")?;
            if sql.trim().is_empty() {
                warn!("Migration {} is empty", migration.path.display());
            } else {
                (&mut *tx)
                    .execute(sql.as_str())
                    .await
                    .with_context(|| format!("Failed to apply migration {}", migration.path.display()))?;
            }
            sqlx::query("INSERT INTO pico.migrations (version, name) VALUES ($1, $2)")
                .bind(migration.version)
                .bind(&migration.name)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to record migration {}", migration.name))?;
            tx.commit()
                .await
                .with_context(|| format!("Failed to commit migration {}", migration.name))?;
            info!("Applied migration {} ({})", migration.name, migration.version);
        }

        Ok(pending.len())
    }

    /// Install every `*.sql` file in `dir`, in file name order.
    ///
    /// Each file is expected to create one function named after the file. An existing
    /// function with that name is dropped first so signature changes take effect.
    pub async fn install_functions(&self, dir: &Path) -> Result<usize> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read functions directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("sql") {
                files.push(path);
            }
        }
        files.sort();

        for path in &files {
            let sql = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read function file {}", path.display()))?;
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            if is_identifier(name) {
                let drop = format!("DROP FUNCTION IF EXISTS {} CASCADE", quote_ident(name));
                if let Err(e) = self.pool.execute(drop.as_str()).await {
                    debug!("Could not drop function {} (may not exist): {}", name, e);
                }
            } else {
                warn!(
                    "Function file {} is not named like a SQL identifier; skipping drop",
                    path.display()
                );
            }

            self.pool
                .execute(sql.as_str())
                .await
                .with_context(|| format!("Failed to install function from {}", path.display()))?;
            info!("Installed function {}", name);
        }

        Ok(files.len())
    }

    /// Read the callable functions of the `public` schema into the catalog.
    pub async fn load_catalog(&mut self) -> Result<usize> {
        let rows = sqlx::query(CATALOG_QUERY)
            .fetch_all(&self.pool)
            .await
            .context("Failed to read function catalog")?;

        let mut catalog = HashMap::new();
        for row in rows {
            let name: String = row.get("name");
            let arg_names: Vec<String> = row.get("arg_names");
            let arg_types: Vec<String> = row.get("arg_types");
            let returns_set: bool = row.get("returns_set");
            let return_typtype: String = row.get("return_typtype");
            let return_type: String = row.get("return_type");

            if arg_names.len() != arg_types.len() || arg_names.iter().any(|n| n.is_empty()) {
                warn!(
                    "Skipping function {}: every argument needs a name to be bound from a request",
                    name
                );
                continue;
            }

            let returns = if returns_set || return_typtype == "c" || return_type == "record" {
                ReturnKind::Rows
            } else if return_type == "void" {
                ReturnKind::Void
            } else {
                ReturnKind::Scalar
            };

            let function = DataFunction {
                name: name.clone(),
                arguments: arg_names
                    .into_iter()
                    .zip(arg_types)
                    .map(|(name, sql_type)| Argument { name, sql_type })
                    .collect(),
                returns,
            };
            let statement = call_statement(&function);

            if catalog.contains_key(&name) {
                warn!("Function {} is overloaded; using the last definition", name);
            }
            catalog.insert(name, CatalogEntry { function, statement });
        }

        self.catalog = catalog;
        Ok(self.catalog.len())
    }
}

#[async_trait::async_trait]
impl FunctionStore for PostgresStore {
    fn function(&self, name: &str) -> Option<&DataFunction> {
        self.catalog.get(name).map(|entry| &entry.function)
    }

    async fn call(&self, name: &str, params: &ParameterSet) -> Result<Value, DataError> {
        let entry = self
            .catalog
            .get(name)
            .ok_or_else(|| DataError::UnknownFunction(name.to_string()))?;
        let bound = entry.function.bind(params)?;

        let mut query = sqlx::query(&entry.statement);
        for (arg, value) in &bound {
            query = query.bind(to_sql_text(value, &arg.sql_type));
        }
        debug!("Executing SQL: {}", entry.statement);

        match entry.function.returns {
            ReturnKind::Void => {
                query
                    .execute(&self.pool)
                    .await
                    .map_err(|e| data_error(name, e))?;
                Ok(Value::Null)
            }
            ReturnKind::Scalar => {
                let row = query
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| data_error(name, e))?;
                let value: Option<Value> = row.try_get(0).map_err(|e| data_error(name, e))?;
                Ok(value.unwrap_or(Value::Null))
            }
            ReturnKind::Rows => {
                let rows = query
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| data_error(name, e))?;
                let values = rows
                    .iter()
                    .map(|row| row.try_get::<Value, _>(0))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| data_error(name, e))?;
                Ok(collapse_rows(values))
            }
        }
    }
}

/// The migrations in `dir` with a version above `last`, oldest first.
///
/// Files that are not `.sql` or lack a numeric timestamp prefix are skipped with a warning.
pub fn pending_migrations(dir: &Path, last: i64) -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read migrations directory {}", dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let Some((version, name)) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(parse_migration_name)
        else {
            warn!(
                "Skipping {}: migration files are named <timestamp>_<name>.sql",
                path.display()
            );
            continue;
        };
        if version > last {
            migrations.push(Migration {
                version,
                name: name.to_string(),
                path,
            });
        }
    }

    migrations.sort_by_key(|m| m.version);
    if let Some((a, _)) = migrations.iter().tuple_windows().find(|(a, b)| a.version == b.version) {
        bail!("Two migrations share the timestamp {}", a.version);
    }
    Ok(migrations)
}

fn parse_migration_name(stem: &str) -> Option<(i64, &str)> {
    let (version, name) = stem.split_once(|c: char| c == '_' || c == ':')?;
    let version = version.parse().ok()?;
    (!name.is_empty()).then_some((version, name))
}

/// Builds the invocation for a function. Every argument is sent as text and cast to the
/// declared type, so string-valued form input reaches typed arguments.
fn call_statement(function: &DataFunction) -> String {
    let args = function
        .arguments
        .iter()
        .enumerate()
        .map(|(i, arg)| format!("${}::{}", i + 1, arg.sql_type))
        .join(", ");
    let call = format!("{}({})", quote_ident(&function.name), args);

    match function.returns {
        ReturnKind::Rows => format!("SELECT row_to_json(value) FROM {} AS value", call),
        ReturnKind::Scalar => format!("SELECT to_json({}) AS value", call),
        ReturnKind::Void => format!("SELECT {}", call),
    }
}

fn to_sql_text(value: &Value, sql_type: &str) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) if sql_type.ends_with("[]") => Some(array_literal(items)),
        other => Some(other.to_string()),
    }
}

/// Renders a JSON array as a Postgres array literal, e.g. `{1,"two",NULL}`.
fn array_literal(items: &[Value]) -> String {
    let elements = items
        .iter()
        .map(|item| match item {
            Value::Null => "NULL".to_string(),
            Value::Array(nested) => array_literal(nested),
            Value::String(s) => quote_element(s),
            Value::Object(_) => quote_element(&item.to_string()),
            other => other.to_string(),
        })
        .join(",");
    format!("{{{}}}", elements)
}

fn quote_element(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Database errors keep the server's message; anything else is reported generically
/// so connection details never reach a response.
fn data_error(function: &str, err: sqlx::Error) -> DataError {
    match err {
        sqlx::Error::Database(db) => DataError::Failed {
            function: function.to_string(),
            message: db.message().to_string(),
        },
        other => {
            error!("Error executing data function {}: {}", function, other);
            DataError::Unavailable("the database request could not be completed".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn function(returns: ReturnKind) -> DataFunction {
        DataFunction {
            name: "list_users".to_string(),
            arguments: vec![
                Argument {
                    name: "team".to_string(),
                    sql_type: "integer".to_string(),
                },
                Argument {
                    name: "tags".to_string(),
                    sql_type: "text[]".to_string(),
                },
            ],
            returns,
        }
    }

    #[test]
    fn test_call_statement_per_return_kind() {
        assert_eq!(
            call_statement(&function(ReturnKind::Rows)),
            r#"SELECT row_to_json(value) FROM "list_users"($1::integer, $2::text[]) AS value"#
        );
        assert_eq!(
            call_statement(&function(ReturnKind::Scalar)),
            r#"SELECT to_json("list_users"($1::integer, $2::text[])) AS value"#
        );
        assert_eq!(
            call_statement(&function(ReturnKind::Void)),
            r#"SELECT "list_users"($1::integer, $2::text[])"#
        );
    }

    #[test]
    fn test_values_are_sent_as_text() {
        assert_eq!(to_sql_text(&json!(null), "integer"), None);
        assert_eq!(to_sql_text(&json!("42"), "integer"), Some("42".to_string()));
        assert_eq!(to_sql_text(&json!(42), "integer"), Some("42".to_string()));
        assert_eq!(to_sql_text(&json!(true), "boolean"), Some("true".to_string()));
        assert_eq!(
            to_sql_text(&json!({"a": [1, 2]}), "jsonb"),
            Some(r#"{"a":[1,2]}"#.to_string())
        );
    }

    #[test]
    fn test_arrays_become_array_literals_for_array_arguments() {
        assert_eq!(
            to_sql_text(&json!(["a", "b\"c", null, 3]), "text[]"),
            Some(r#"{"a","b\"c",NULL,3}"#.to_string())
        );
        assert_eq!(
            to_sql_text(&json!([[1, 2], [3, 4]]), "integer[]"),
            Some("{{1,2},{3,4}}".to_string())
        );
        assert_eq!(to_sql_text(&json!([1, 2]), "jsonb"), Some("[1,2]".to_string()));
    }

    #[test]
    fn test_migration_names() {
        assert_eq!(parse_migration_name("1700000000_create_users"), Some((1700000000, "create_users")));
        assert_eq!(parse_migration_name("1700000000:create_users"), Some((1700000000, "create_users")));
        assert_eq!(parse_migration_name("create_users"), None);
        assert_eq!(parse_migration_name("1700000000_"), None);
    }

    #[test]
    fn test_pending_migrations_are_ordered_and_skip_applied() {
        let dir = tempfile::tempdir().unwrap();
        for file in [
            "300_add_index.sql",
            "100_create_users.sql",
            "200_add_email.sql",
            "notes.txt",
            "draft.sql",
        ] {
            std::fs::write(dir.path().join(file), "SELECT 1;").unwrap();
        }

        let pending = pending_migrations(dir.path(), 100).unwrap();
        let versions: Vec<_> = pending.iter().map(|m| (m.version, m.name.as_str())).collect();
        assert_eq!(versions, vec![(200, "add_email"), (300, "add_index")]);

        assert!(pending_migrations(dir.path(), 300).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_migration_timestamps_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("100_a.sql"), "").unwrap();
        std::fs::write(dir.path().join("100_b.sql"), "").unwrap();
        assert!(pending_migrations(dir.path(), 0).is_err());
    }

    #[test]
    fn test_identifier_checks() {
        assert!(is_identifier("get_user"));
        assert!(is_identifier("_private2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("drop table"));
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }
}
