use serde_json::Value;
use std::collections::HashMap;

use crate::error::AppError;
use crate::model::ParameterSet;

/// A decoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(ParameterSet),
    Form(Vec<(String, String)>),
}

/// Decodes a body according to its declared content type.
///
/// An empty body is never an error. A body without a content type is read as JSON.
pub fn parse_body(content_type: Option<&str>, bytes: &[u8]) -> Result<Body, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Body::Empty);
    }

    let media_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match media_type.as_deref() {
        None | Some("application/json") => parse_json(bytes),
        Some(ct) if ct.ends_with("+json") => parse_json(bytes),
        Some("application/x-www-form-urlencoded") => Ok(Body::Form(
            url::form_urlencoded::parse(bytes).into_owned().collect(),
        )),
        Some(other) => Err(AppError::BadRequest(format!(
            "unsupported content type '{}', expected application/json or application/x-www-form-urlencoded",
            other
        ))),
    }
}

fn parse_json(bytes: &[u8]) -> Result<Body, AppError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(Body::Json(map)),
        Ok(_) => Err(AppError::BadRequest(
            "JSON body must be an object".to_string(),
        )),
        Err(e) => Err(AppError::BadRequest(format!("invalid JSON body: {}", e))),
    }
}

/// Decodes a query string into ordered pairs. Repeated keys keep the last value.
pub fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// Builds the parameter set for one request.
///
/// Sources are overlaid lowest priority first: query string, then path variables, then body.
/// JSON body values are passed through verbatim; everything else arrives as strings.
pub fn assemble(query: Vec<(String, String)>, path: &HashMap<String, String>, body: Body) -> ParameterSet {
    let mut params = ParameterSet::new();

    for (key, value) in query {
        params.insert(key, Value::String(value));
    }
    for (key, value) in path {
        params.insert(key.clone(), Value::String(value.clone()));
    }
    match body {
        Body::Empty => {}
        Body::Json(map) => params.extend(map),
        Body::Form(pairs) => {
            for (key, value) in pairs {
                params.insert(key, Value::String(value));
            }
        }
    }

    params
}
