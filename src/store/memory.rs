use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::model::ParameterSet;
use crate::store::traits::{collapse_rows, Argument, DataError, DataFunction, FunctionStore, ReturnKind};

type Handler = Arc<dyn Fn(&ParameterSet) -> Result<Value, String> + Send + Sync>;

struct Entry {
    function: DataFunction,
    handler: Handler,
    calls: AtomicUsize,
}

/// In-process function store. Functions are Rust closures over the bound parameters.
///
/// Used for tests and for running routes without a database.
#[derive(Default)]
pub struct MemoryStore {
    functions: HashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a row-returning function. The handler's rows are collapsed the same way
    /// database rows are.
    pub fn with_rows<F>(self, name: &str, arguments: &[&str], handler: F) -> Self
    where
        F: Fn(&ParameterSet) -> Result<Vec<Value>, String> + Send + Sync + 'static,
    {
        self.insert(name, arguments, ReturnKind::Rows, Arc::new(move |params| {
            handler(params).map(collapse_rows)
        }))
    }

    /// Register a scalar-returning function.
    pub fn with_scalar<F>(self, name: &str, arguments: &[&str], handler: F) -> Self
    where
        F: Fn(&ParameterSet) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.insert(name, arguments, ReturnKind::Scalar, Arc::new(handler))
    }

    fn insert(mut self, name: &str, arguments: &[&str], returns: ReturnKind, handler: Handler) -> Self {
        let function = DataFunction {
            name: name.to_string(),
            arguments: arguments
                .iter()
                .map(|arg| Argument {
                    name: arg.to_string(),
                    sql_type: "text".to_string(),
                })
                .collect(),
            returns,
        };
        self.functions.insert(
            name.to_string(),
            Entry {
                function,
                handler,
                calls: AtomicUsize::new(0),
            },
        );
        self
    }

    /// Number of times `name` has been invoked.
    pub fn calls(&self, name: &str) -> usize {
        self.functions
            .get(name)
            .map(|entry| entry.calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl FunctionStore for MemoryStore {
    fn function(&self, name: &str) -> Option<&DataFunction> {
        self.functions.get(name).map(|entry| &entry.function)
    }

    async fn call(&self, name: &str, params: &ParameterSet) -> Result<Value, DataError> {
        let entry = self
            .functions
            .get(name)
            .ok_or_else(|| DataError::UnknownFunction(name.to_string()))?;
        let bound: ParameterSet = entry
            .function
            .bind(params)?
            .into_iter()
            .map(|(arg, value)| (arg.name.clone(), value.clone()))
            .collect();

        entry.calls.fetch_add(1, Ordering::SeqCst);
        (entry.handler)(&bound).map_err(|message| DataError::Failed {
            function: name.to_string(),
            message,
        })
    }
}
