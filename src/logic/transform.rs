use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::model::Claims;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    Unauthorized(String),
}

/// A PREPROCESS, POSTPROCESS or SETCREDENTIAL callable.
///
/// Receives the stage's primary value and the current claims (`None` when the request carries
/// no valid session) and returns the stage's output.
pub trait Transform: Send + Sync {
    fn apply(&self, input: Value, claims: Option<&Claims>) -> Result<Value, TransformError>;
}

/// A guard evaluated against the data-call result and the current claims.
pub trait Policy: Send + Sync {
    fn allows(&self, result: &Value, claims: Option<&Claims>) -> bool;
}

impl<F> Policy for F
where
    F: Fn(&Value, Option<&Claims>) -> bool + Send + Sync,
{
    fn allows(&self, result: &Value, claims: Option<&Claims>) -> bool {
        self(result, claims)
    }
}

/// A callable that only looks at its primary value.
struct Unary<F>(F);

impl<F> Transform for Unary<F>
where
    F: Fn(Value) -> Result<Value, TransformError> + Send + Sync,
{
    fn apply(&self, input: Value, _claims: Option<&Claims>) -> Result<Value, TransformError> {
        (self.0)(input)
    }
}

/// A callable that also reads the current claims.
struct Binary<F>(F);

impl<F> Transform for Binary<F>
where
    F: Fn(Value, Option<&Claims>) -> Result<Value, TransformError> + Send + Sync,
{
    fn apply(&self, input: Value, claims: Option<&Claims>) -> Result<Value, TransformError> {
        (self.0)(input, claims)
    }
}

/// Wraps a one-argument function as a transform.
pub fn transform<F>(f: F) -> Arc<dyn Transform>
where
    F: Fn(Value) -> Result<Value, TransformError> + Send + Sync + 'static,
{
    Arc::new(Unary(f))
}

/// Wraps a two-argument function as a transform.
pub fn transform_with_claims<F>(f: F) -> Arc<dyn Transform>
where
    F: Fn(Value, Option<&Claims>) -> Result<Value, TransformError> + Send + Sync + 'static,
{
    Arc::new(Binary(f))
}

pub fn policy<F>(f: F) -> Arc<dyn Policy>
where
    F: Fn(&Value, Option<&Claims>) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Name-addressed callables that route files refer to.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
    policies: HashMap<String, Arc<dyn Policy>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in callables:
    ///
    /// - `identity`: returns its input
    /// - `keep_claims`: returns the current claims unchanged
    /// - `clear_claims`: returns null, which clears the session when used as SETCREDENTIAL
    /// - `authenticated` (policy): a session is present
    /// - `has_result` (policy): the data call produced something
    pub fn with_builtins() -> Self {
        Self::new()
            .register_transform("identity", transform(Ok))
            .register_transform(
                "keep_claims",
                transform_with_claims(|_, claims| Ok(claims.cloned().unwrap_or(Value::Null))),
            )
            .register_transform("clear_claims", transform(|_| Ok(Value::Null)))
            .register_policy(
                "authenticated",
                policy(|_, claims| matches!(claims, Some(c) if !c.is_null())),
            )
            .register_policy("has_result", policy(|result, _| !is_empty(result)))
    }

    pub fn register_transform(mut self, name: impl Into<String>, callable: Arc<dyn Transform>) -> Self {
        self.transforms.insert(name.into(), callable);
        self
    }

    pub fn register_policy(mut self, name: impl Into<String>, callable: Arc<dyn Policy>) -> Self {
        self.policies.insert(name.into(), callable);
        self
    }

    pub fn transform(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(name).cloned()
    }

    pub fn policy(&self, name: &str) -> Option<Arc<dyn Policy>> {
        self.policies.get(name).cloned()
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
