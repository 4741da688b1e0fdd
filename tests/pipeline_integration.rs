use pico_db_rust::api::routes::create_router;
use pico_db_rust::config::AppConfig;
use pico_db_rust::logic::transform_with_claims;
use pico_db_rust::{build_engine, MemoryStore, RouteFile, RouteTable, TransformRegistry};
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

const ROUTES: &str = r#"{
    "routes": {
        "/users": {
            "GET": { "sql": "list_users", "view": [{ "type": "TABLE" }] }
        },
        "/users/:id": {
            "GET": { "sql": "get_user.sql", "view": [{ "type": "OBJECT" }] }
        },
        "/echo": {
            "POST": { "sql": "echo_x" }
        },
        "/login": {
            "POST": { "sql": "login", "set_jwt": "identity" }
        },
        "/logout": {
            "POST": { "set_credential": "clear_claims" }
        },
        "/me": {
            "GET": { "policy": "authenticated", "postprocess": "whoami" }
        }
    }
}"#;

// Test client wrapper for making API calls
struct TestClient {
    client: Client,
    base_url: String,
}

impl TestClient {
    fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(&format!("{}{}", self.base_url, path))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(&format!("{}{}", self.base_url, path))
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.client.delete(&format!("{}{}", self.base_url, path))
    }

    async fn get_json(&self, path: &str) -> reqwest::Response {
        self.get(path)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .expect("request failed")
    }
}

struct TestApp {
    client: TestClient,
    store: Arc<MemoryStore>,
    _dir: TempDir,
}

fn store() -> MemoryStore {
    MemoryStore::new()
        .with_rows("list_users", &[], |_| {
            Ok(vec![json!({ "id": 1, "name": "Ada" }), json!({ "id": 2 })])
        })
        .with_rows("get_user", &["id"], |p| Ok(vec![json!({ "id": p["id"], "name": "Ada" })]))
        .with_scalar("echo_x", &["x"], |p| Ok(p["x"].clone()))
        .with_rows("login", &["username"], |p| Ok(vec![json!({ "user": p["username"] })]))
}

async fn spawn_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let public = dir.path().join("public");
    std::fs::create_dir_all(&public).unwrap();
    std::fs::write(public.join("index.html"), "<h1>welcome</h1>").unwrap();
    std::fs::write(public.join("style.css"), "body { color: red; }").unwrap();
    std::fs::write(dir.path().join("secret.txt"), "top secret").unwrap();

    let registry = TransformRegistry::with_builtins().register_transform(
        "whoami",
        transform_with_claims(|_, claims| Ok(claims.cloned().unwrap_or(Value::Null))),
    );
    let routes = RouteTable::from_file(&RouteFile::from_json(ROUTES).unwrap(), &registry).unwrap();

    let mut config = AppConfig::default();
    config.assets.root = public;
    config.session.secret_key = Some("integration-secret".to_string());

    let store = Arc::new(store());
    assert!(routes.missing_functions(store.as_ref()).is_empty());

    let app = create_router().with_state(build_engine(&config, Arc::clone(&store), routes).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        client: TestClient::new(format!("http://{}", address)),
        store,
        _dir: dir,
    }
}

fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let response = app.client.get("/_health").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_path_variable_reaches_data_function() {
    let app = spawn_app().await;
    let response = app.client.get_json("/users/42").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "id": "42", "name": "Ada" }));
    assert_eq!(app.store.calls("get_user"), 1);
}

#[tokio::test]
async fn test_body_overrides_query_string() {
    let app = spawn_app().await;
    let response = app
        .client
        .post("/echo?x=1")
        .header(header::ACCEPT, "application/json")
        .json(&json!({ "x": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!(2));
}

#[tokio::test]
async fn test_table_view_for_browsers() {
    let app = spawn_app().await;
    let response = app
        .client
        .get("/users")
        .header(header::ACCEPT, "text/html")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));

    let html = response.text().await.unwrap();
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("htmx.org"));
    assert!(html.contains("<thead><tr><th>id</th><th>name</th></tr></thead>"));
    assert!(html.contains("<tr><td>1</td><td>Ada</td></tr>"));
    assert!(html.contains("<tr><td>2</td><td></td></tr>"));
}

#[tokio::test]
async fn test_htmx_requests_get_the_view() {
    let app = spawn_app().await;
    let response = app
        .client
        .get("/users/7")
        .header(header::ACCEPT, "application/json")
        .header("HX-Request", "true")
        .send()
        .await
        .unwrap();
    let html = response.text().await.unwrap();
    assert!(html.starts_with("<dl>"));
    assert!(!html.contains("<html"));
    assert!(html.contains("<dt>id</dt><dd>7</dd>"));
}

#[tokio::test]
async fn test_login_sets_session_and_policy_uses_it() {
    let app = spawn_app().await;

    let anonymous = app.client.get_json("/me").await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let login = app
        .client
        .post("/login")
        .header(header::ACCEPT, "application/json")
        .form(&[("username", "ada")])
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    let cookie = session_cookie(&login).expect("login should set a session cookie");
    assert!(cookie.starts_with("pico_jwt="));
    assert!(cookie.contains("HttpOnly"));

    let token_pair = cookie.split(';').next().unwrap().to_string();
    let me = app
        .client
        .get("/me")
        .header(header::ACCEPT, "application/json")
        .header(header::COOKIE, &token_pair)
        .send()
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);
    assert!(session_cookie(&me).is_none());
    let body: Value = me.json().await.unwrap();
    assert_eq!(body, json!({ "user": "ada" }));

    let logout = app
        .client
        .post("/logout")
        .header(header::COOKIE, &token_pair)
        .send()
        .await
        .unwrap();
    let cleared = session_cookie(&logout).expect("logout should clear the session");
    assert!(cleared.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_forged_session_is_anonymous() {
    let app = spawn_app().await;
    let response = app
        .client
        .get("/me")
        .header(header::ACCEPT, "application/json")
        .header(header::COOKIE, "pico_jwt=eyJhbGciOiJIUzI1NiJ9.e30.forged")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_static_files() {
    let app = spawn_app().await;

    let css = app.client.get("/style.css").send().await.unwrap();
    assert_eq!(css.status(), StatusCode::OK);
    assert_eq!(css.headers()[header::CONTENT_TYPE], "text/css; charset=utf-8");
    assert_eq!(css.text().await.unwrap(), "body { color: red; }");

    let index = app.client.get("/").send().await.unwrap();
    assert_eq!(index.status(), StatusCode::OK);
    assert_eq!(index.text().await.unwrap(), "<h1>welcome</h1>");
}

#[tokio::test]
async fn test_encoded_traversal_is_rejected() {
    let app = spawn_app().await;
    let response = app.client.get("/%2E%2E%2Fsecret.txt").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!response.text().await.unwrap().contains("top secret"));
}

#[tokio::test]
async fn test_client_errors() {
    let app = spawn_app().await;

    let missing = app
        .client
        .post("/echo")
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    let body: Value = missing.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("'x'"));
    assert_eq!(app.store.calls("echo_x"), 0);

    let invalid = app
        .client
        .post("/echo")
        .header(header::CONTENT_TYPE, "application/json")
        .body("{oops")
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_paths_are_not_found() {
    let app = spawn_app().await;
    assert_eq!(
        app.client.get_json("/does/not/exist").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.client.delete("/users/1").send().await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
}
