pub mod route;
pub mod view;

pub use route::*;
pub use view::*;

/// Name-keyed request parameters handed to the data function.
pub type ParameterSet = serde_json::Map<String, serde_json::Value>;

/// Authenticated session state carried in the signed session token.
pub type Claims = serde_json::Value;
