use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

use crate::api::state::AppState;
use crate::model::Claims;
use crate::store::FunctionStore;

/// Claims carried by the request's session cookie.
///
/// A missing, expired or forged token yields `Session(None)`; extraction never fails.
#[derive(Debug, Clone, PartialEq)]
pub struct Session(pub Option<Claims>);

#[async_trait]
impl<S> FromRequestParts<AppState<S>> for Session
where
    S: FunctionStore + 'static,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        Ok(Session(state.sessions.claims_from_headers(&parts.headers)))
    }
}
