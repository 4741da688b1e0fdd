use serde_json::Value;
use thiserror::Error;

use crate::model::ParameterSet;

/// How a data function's result is shaped before it enters the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// Set-returning, composite or record functions: zero, one or many rows.
    Rows,
    /// A single scalar value.
    Scalar,
    /// No result at all.
    Void,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub sql_type: String,
}

/// A callable server-side function, as declared in the database catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFunction {
    pub name: String,
    pub arguments: Vec<Argument>,
    pub returns: ReturnKind,
}

impl DataFunction {
    /// Picks the declared arguments out of `params`, in declaration order.
    ///
    /// Parameters the function does not declare are ignored.
    pub fn bind<'a>(&self, params: &'a ParameterSet) -> Result<Vec<(&Argument, &'a Value)>, DataError> {
        self.arguments
            .iter()
            .map(|arg| match params.get(&arg.name) {
                Some(value) => Ok((arg, value)),
                None => Err(DataError::MissingParameter {
                    function: self.name.clone(),
                    parameter: arg.name.clone(),
                }),
            })
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("data function '{0}' does not exist")]
    UnknownFunction(String),
    #[error("missing required parameter '{parameter}' for data function '{function}'")]
    MissingParameter { function: String, parameter: String },
    #[error("data function '{function}' failed: {message}")]
    Failed { function: String, message: String },
    #[error("database unavailable: {0}")]
    Unavailable(String),
}

/// Collapses function rows into a result value: none is null, one is the row itself,
/// more than one is an array.
pub fn collapse_rows(mut rows: Vec<Value>) -> Value {
    match rows.len() {
        0 => Value::Null,
        1 => rows.remove(0),
        _ => Value::Array(rows),
    }
}

/// Call-by-name access to the database's functions.
#[async_trait::async_trait]
pub trait FunctionStore: Send + Sync {
    /// Look up a function in the loaded catalog
    fn function(&self, name: &str) -> Option<&DataFunction>;
    /// Invoke a function with named parameters
    async fn call(&self, name: &str, params: &ParameterSet) -> Result<Value, DataError>;
}
