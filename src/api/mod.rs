pub mod handlers;
pub mod routes;
pub mod session_extractor;
pub mod state;

pub use handlers::*;
pub use routes::*;
pub use session_extractor::Session;
pub use state::{AppState, Engine};
