use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::RouteTableError;
use crate::logic::transform::TransformRegistry;
use crate::model::{split_path, Method, Named, PathPattern, Route, RouteConfig, RouteFile, Segment};
use crate::store::FunctionStore;

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    variable: Option<Box<Node>>,
    routes: HashMap<Method, Arc<Route>>,
}

impl Node {
    /// Literal children are tried before the variable child at every depth, so the most
    /// literal route wins. Falls back to the variable branch when the literal branch has
    /// no route for this method further down.
    fn find(&self, segments: &[&str], method: Method) -> Option<&Arc<Route>> {
        let Some((head, rest)) = segments.split_first() else {
            return self.routes.get(&method);
        };

        self.literals
            .get(*head)
            .and_then(|child| child.find(rest, method))
            .or_else(|| {
                self.variable
                    .as_ref()
                    .and_then(|child| child.find(rest, method))
            })
    }
}

/// A successful lookup: the route plus its captured path variables.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: HashMap<String, String>,
}

/// Immutable (pattern, method) index built once at startup.
#[derive(Default)]
pub struct RouteTable {
    root: Node,
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route. Two routes for the same method whose patterns differ only in variable
    /// names occupy the same trie slot and are rejected.
    pub fn insert(&mut self, route: Route) -> Result<(), RouteTableError> {
        let mut node = &mut self.root;
        for segment in route.pattern.segments() {
            node = match segment {
                Segment::Literal(text) => node.literals.entry(text.clone()).or_default(),
                Segment::Variable(_) => node.variable.get_or_insert_with(Box::default).as_mut(),
            };
        }

        if let Some(existing) = node.routes.get(&route.method) {
            return Err(RouteTableError::Conflict {
                method: route.method,
                pattern: route.pattern.to_string(),
                existing: existing.pattern.to_string(),
            });
        }

        let route = Arc::new(route);
        node.routes.insert(route.method, Arc::clone(&route));
        self.routes.push(route);
        Ok(())
    }

    pub fn lookup(&self, method: Method, path: &str) -> Option<RouteMatch> {
        let segments = split_path(path);
        let route = self.root.find(&segments, method)?;

        let params = route
            .pattern
            .segments()
            .iter()
            .zip(&segments)
            .filter_map(|(segment, value)| match segment {
                Segment::Variable(name) => Some((name.clone(), value.to_string())),
                Segment::Literal(_) => None,
            })
            .collect();

        Some(RouteMatch {
            route: Arc::clone(route),
            params,
        })
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolves a parsed route file against the registry.
    pub fn from_file(file: &RouteFile, registry: &TransformRegistry) -> Result<Self, RouteTableError> {
        let mut table = Self::new();
        for (raw, methods) in &file.routes {
            let pattern = PathPattern::parse(raw).map_err(RouteTableError::InvalidPattern)?;
            for (method, config) in methods {
                let route = build_route(pattern.clone(), *method, config, registry)?;
                debug!("Registered route {} {}", method, pattern);
                table.insert(route)?;
            }
        }
        Ok(table)
    }

    pub fn load(path: &Path, registry: &TransformRegistry) -> Result<Self, RouteTableError> {
        let display = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(|source| RouteTableError::Io {
            path: display.clone(),
            source,
        })?;
        let file = RouteFile::from_json(&json).map_err(|source| RouteTableError::Parse {
            path: display.clone(),
            source,
        })?;

        let table = Self::from_file(&file, registry)?;
        info!("Loaded {} routes from {}", table.len(), display);
        Ok(table)
    }

    /// Routes whose data function is not in the store's catalog, as `METHOD pattern -> name`.
    pub fn missing_functions<S: FunctionStore + ?Sized>(&self, store: &S) -> Vec<String> {
        self.routes
            .iter()
            .filter_map(|route| {
                let name = route.sql.as_deref()?;
                store
                    .function(name)
                    .is_none()
                    .then(|| format!("{} {} -> {}", route.method, route.pattern, name))
            })
            .collect()
    }
}

fn build_route(
    pattern: PathPattern,
    method: Method,
    config: &RouteConfig,
    registry: &TransformRegistry,
) -> Result<Route, RouteTableError> {
    let unknown = |stage: &'static str, name: &str| RouteTableError::UnknownCallable {
        method,
        pattern: pattern.to_string(),
        stage,
        name: name.to_string(),
    };
    let resolve = |stage: &'static str, name: &Option<String>| match name {
        Some(name) => registry
            .transform(name)
            .map(|callable| Some(Named::new(name.clone(), callable)))
            .ok_or_else(|| unknown(stage, name)),
        None => Ok(None),
    };

    let preprocess = resolve("preprocess", &config.preprocess)?;
    let postprocess = resolve("postprocess", &config.postprocess)?;
    let set_credential = resolve("set_credential", &config.set_credential)?;
    let policy = match &config.policy {
        Some(name) => Some(
            registry
                .policy(name)
                .map(|callable| Named::new(name.clone(), callable))
                .ok_or_else(|| unknown("policy", name))?,
        ),
        None => None,
    };

    let mut route = Route::new(pattern.clone(), method);
    if let Some(sql) = &config.sql {
        route = route.with_sql(sql.clone());
    }
    if let Some(stage) = preprocess {
        route = route.with_preprocess(stage);
    }
    if let Some(stage) = postprocess {
        route = route.with_postprocess(stage);
    }
    if let Some(stage) = set_credential {
        route = route.with_set_credential(stage);
    }
    if let Some(stage) = policy {
        route = route.with_policy(stage);
    }
    if let Some(view) = &config.view {
        route = route.with_view(view.clone());
    }
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn table(patterns: &[(&str, Method)]) -> RouteTable {
        let mut table = RouteTable::new();
        for (pattern, method) in patterns {
            table
                .insert(Route::new(PathPattern::parse(pattern).unwrap(), *method))
                .unwrap();
        }
        table
    }

    #[test]
    fn test_variable_capture_uses_declared_names() {
        let table = table(&[("/users/:id/posts/:post", Method::Get)]);
        let found = table.lookup(Method::Get, "/users/42/posts/a%20b").unwrap();
        assert_eq!(found.route.pattern.as_str(), "/users/:id/posts/:post");
        assert_eq!(found.params["id"], "42");
        assert_eq!(found.params["post"], "a%20b");
    }

    #[test]
    fn test_literal_outranks_variable() {
        let table = table(&[("/users/:id", Method::Get), ("/users/me", Method::Get)]);
        let me = table.lookup(Method::Get, "/users/me").unwrap();
        assert_eq!(me.route.pattern.as_str(), "/users/me");
        assert!(me.params.is_empty());

        let other = table.lookup(Method::Get, "/users/7").unwrap();
        assert_eq!(other.route.pattern.as_str(), "/users/:id");
    }

    #[test]
    fn test_falls_back_to_variable_when_literal_branch_has_no_route() {
        let table = table(&[("/a/b/c", Method::Get), ("/a/:x/d", Method::Get)]);
        let found = table.lookup(Method::Get, "/a/b/d").unwrap();
        assert_eq!(found.params["x"], "b");
    }

    #[test]
    fn test_segment_count_and_method_must_match() {
        let table = table(&[("/users/:id", Method::Get)]);
        assert!(table.lookup(Method::Get, "/users").is_none());
        assert!(table.lookup(Method::Get, "/users/1/extra").is_none());
        assert!(table.lookup(Method::Post, "/users/1").is_none());
    }

    #[test]
    fn test_root_and_trailing_slash() {
        let table = table(&[("/", Method::Get), ("/about", Method::Get)]);
        assert_eq!(table.lookup(Method::Get, "").unwrap().route.pattern.as_str(), "/");
        assert_eq!(table.lookup(Method::Get, "/").unwrap().route.pattern.as_str(), "/");
        assert_eq!(
            table.lookup(Method::Get, "/about/").unwrap().route.pattern.as_str(),
            "/about"
        );
    }

    #[test]
    fn test_patterns_differing_only_by_variable_name_conflict() {
        let mut table = table(&[("/users/:id", Method::Get)]);
        let err = table
            .insert(Route::new(PathPattern::parse("/users/:name").unwrap(), Method::Get))
            .unwrap_err();
        assert!(matches!(err, RouteTableError::Conflict { .. }));

        table
            .insert(Route::new(PathPattern::parse("/users/:name").unwrap(), Method::Delete))
            .unwrap();
    }

    #[test]
    fn test_from_file_resolves_callables() {
        let file = RouteFile::from_json(
            r#"{ "routes": {
                "/login": { "POST": { "sql": "login.sql", "set_jwt": "identity" } },
                "/me": { "GET": { "policy": "authenticated", "view": [{ "type": "OBJECT" }] } }
            } }"#,
        )
        .unwrap();
        let table = RouteTable::from_file(&file, &TransformRegistry::with_builtins()).unwrap();
        assert_eq!(table.len(), 2);

        let login = table.lookup(Method::Post, "/login").unwrap().route;
        assert_eq!(login.sql.as_deref(), Some("login"));
        assert_eq!(login.set_credential.as_ref().unwrap().name, "identity");

        let me = table.lookup(Method::Get, "/me").unwrap().route;
        assert!(me.policy.is_some());
        assert!(me.view.is_some());
    }

    #[test]
    fn test_from_file_rejects_unknown_callable() {
        let file = RouteFile::from_json(r#"{ "routes": { "/": { "GET": { "postprocess": "nope" } } } }"#)
            .unwrap();
        match RouteTable::from_file(&file, &TransformRegistry::with_builtins()) {
            Err(RouteTableError::UnknownCallable { stage, name, .. }) => {
                assert_eq!(stage, "postprocess");
                assert_eq!(name, "nope");
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an unknown callable error"),
        }
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = RouteTable::load(Path::new("/nonexistent/routes.json"), &TransformRegistry::new());
        assert!(matches!(err, Err(RouteTableError::Io { .. })));
    }

    #[test]
    fn test_missing_functions() {
        let mut table = RouteTable::new();
        table
            .insert(Route::new(PathPattern::parse("/a").unwrap(), Method::Get).with_sql("known"))
            .unwrap();
        table
            .insert(Route::new(PathPattern::parse("/b").unwrap(), Method::Get).with_sql("unknown"))
            .unwrap();
        let store = MemoryStore::new().with_scalar("known", &[], |_| Ok(json!(1)));

        assert_eq!(table.missing_functions(&store), vec!["GET /b -> unknown".to_string()]);
    }
}
