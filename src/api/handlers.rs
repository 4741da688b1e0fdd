use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method as HttpMethod, StatusCode, Uri},
    response::{Html, IntoResponse, Json, Response},
};
use log::{debug, error};
use serde::Serialize;
use serde_json::Value;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::api::session_extractor::Session;
use crate::api::state::{AppState, Engine};
use crate::error::AppError;
use crate::logic::{assemble, parse_body, parse_query, PipelineInput, RouteMatch};
use crate::model::{Claims, Method};
use crate::store::FunctionStore;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Entry point for every request that is not a fixed endpoint.
///
/// Matched routes run through the pipeline. Unmatched GET and HEAD requests fall back to
/// the static root; anything else is a 404.
pub async fn dispatch<S: FunctionStore + 'static>(
    State(engine): State<AppState<S>>,
    Session(claims): Session,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4();
    debug!("[{}] {} {}", request_id, method, uri.path());

    let matched = Method::from_http(&method).and_then(|m| engine.routes.lookup(m, uri.path()));
    let outcome = match matched {
        Some(matched) => run_route(&engine, matched, claims, &uri, &headers, &body).await,
        None if method == HttpMethod::GET || method == HttpMethod::HEAD => {
            serve_asset(&engine, uri.path(), method == HttpMethod::HEAD).await
        }
        None => Err(AppError::NotFound),
    };

    match outcome {
        Ok(response) => response,
        Err(e) => {
            if e.status().is_server_error() {
                error!("[{}] {} {} failed: {}", request_id, method, uri.path(), e);
            } else {
                debug!("[{}] {} {} -> {}", request_id, method, uri.path(), e.status());
            }
            e.into_response()
        }
    }
}

async fn run_route<S: FunctionStore + 'static>(
    engine: &Engine<S>,
    matched: RouteMatch,
    claims: Option<Claims>,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let body = parse_body(content_type, body)?;
    let params = assemble(parse_query(uri.query()), &matched.params, body);

    let output = engine
        .pipeline
        .execute(
            &matched.route,
            PipelineInput {
                params,
                claims,
                render_view: wants_html(headers),
            },
        )
        .await?;

    let mut response = match output.document {
        Some(fragment) if is_htmx(headers) => Html(fragment).into_response(),
        Some(fragment) => {
            let page = engine
                .layout
                .page(&fragment)
                .map_err(|e| AppError::Internal(format!("failed to render page: {}", e)))?;
            Html(page).into_response()
        }
        None => match output.result {
            Value::String(text) => text.into_response(),
            result => Json(result).into_response(),
        },
    };

    let cookie = engine
        .sessions
        .outbound(&output.claims)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if let Some(cookie) = cookie {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| AppError::Internal(format!("invalid session cookie: {}", e)))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }

    Ok(response)
}

async fn serve_asset<S>(engine: &Engine<S>, path: &str, head_only: bool) -> Result<Response, AppError> {
    let asset = engine.assets.open(path).await?;
    let body = if head_only {
        Body::empty()
    } else {
        Body::from_stream(ReaderStream::new(asset.file))
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, asset.content_type)
        .header(header::CONTENT_LENGTH, asset.len)
        .body(body)
        .map_err(|e| AppError::Internal(format!("failed to build response: {}", e)))
}

/// htmx swaps the response into an existing page, so it gets the bare fragment.
pub fn is_htmx(headers: &HeaderMap) -> bool {
    headers
        .get("hx-request")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// A view is rendered for browsers and htmx, and JSON is returned to everyone else.
pub fn wants_html(headers: &HeaderMap) -> bool {
    if is_htmx(headers) {
        return true;
    }

    match headers.get(header::ACCEPT).and_then(|value| value.to_str().ok()) {
        None => true,
        Some(accept) => accept.contains("text/html") || accept.contains("*/*"),
    }
}
