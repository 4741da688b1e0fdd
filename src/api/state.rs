use std::sync::Arc;

use crate::logic::{AssetResolver, Layout, Pipeline, RouteTable, SessionManager};
use crate::store::FunctionStore;

/// Everything a request needs, built once at startup and never mutated.
pub struct Engine<S> {
    pub routes: RouteTable,
    pub sessions: SessionManager,
    pub assets: AssetResolver,
    pub layout: Layout,
    pub pipeline: Pipeline<S>,
}

pub type AppState<S> = Arc<Engine<S>>;

impl<S: FunctionStore + 'static> Engine<S> {
    pub fn new(
        store: Arc<S>,
        routes: RouteTable,
        sessions: SessionManager,
        assets: AssetResolver,
        layout: Layout,
    ) -> Self {
        Self {
            routes,
            sessions,
            assets,
            layout,
            pipeline: Pipeline::new(store),
        }
    }
}
