pub mod assets;
pub mod matcher;
pub mod params;
pub mod pipeline;
pub mod render;
pub mod session;
pub mod transform;

pub use assets::{content_type, Asset, AssetResolver};
pub use matcher::{RouteMatch, RouteTable};
pub use params::{assemble, parse_body, parse_query, Body};
pub use pipeline::{Pipeline, PipelineInput, PipelineOutput};
pub use render::{render, Layout, Shape, TableModel};
pub use session::{ClaimsChange, SessionError, SessionManager};
pub use transform::{
    policy, transform, transform_with_claims, Policy, Transform, TransformError, TransformRegistry,
};
