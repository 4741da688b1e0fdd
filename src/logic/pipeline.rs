use log::{debug, error, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::error::AppError;
use crate::logic::render::render;
use crate::logic::session::ClaimsChange;
use crate::logic::transform::{Transform, TransformError};
use crate::model::{Claims, Named, ParameterSet, Route};
use crate::store::FunctionStore;

/// What a request brings into the pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineInput {
    pub params: ParameterSet,
    pub claims: Option<Claims>,
    /// Whether the client will accept a rendered view.
    pub render_view: bool,
}

/// The outcome of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub result: Value,
    pub claims: ClaimsChange,
    /// Rendered view, when the route declares one and rendering was requested.
    pub document: Option<String>,
}

/// Per-request state threaded through the stages. Owned by exactly one request.
#[derive(Debug)]
struct PipelineContext {
    params: ParameterSet,
    result: Value,
    claims: Option<Claims>,
    change: ClaimsChange,
}

/// Runs a route's stages in a fixed order:
/// PREPROCESS, DATA-CALL, POLICY, POSTPROCESS, SETCREDENTIAL, VIEW.
///
/// Undeclared stages pass their input through. The first failing stage aborts the run.
pub struct Pipeline<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> Pipeline<S>
where
    S: FunctionStore + ?Sized + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, route: &Route, input: PipelineInput) -> Result<PipelineOutput, AppError> {
        let mut ctx = PipelineContext {
            params: input.params,
            result: Value::Null,
            claims: input.claims,
            change: ClaimsChange::Unchanged,
        };

        self.preprocess(route, &mut ctx)?;
        self.data_call(route, &mut ctx).await?;
        self.check_policy(route, &ctx)?;
        self.postprocess(route, &mut ctx)?;
        self.set_credential(route, &mut ctx)?;

        let document = match &route.view {
            Some(view) if input.render_view => Some(render(view, &ctx.result)),
            _ => None,
        };

        Ok(PipelineOutput {
            result: ctx.result,
            claims: ctx.change,
            document,
        })
    }

    fn preprocess(&self, route: &Route, ctx: &mut PipelineContext) -> Result<(), AppError> {
        let Some(stage) = &route.preprocess else {
            return Ok(());
        };

        let params = std::mem::take(&mut ctx.params);
        match run_stage(route, "preprocess", stage, Value::Object(params), ctx.claims.as_ref())? {
            Value::Object(params) => {
                ctx.params = params;
                Ok(())
            }
            other => {
                warn!(
                    "{} {}: preprocess '{}' returned {} instead of an object",
                    route.method, route.pattern, stage.name, other
                );
                Err(AppError::Internal(format!(
                    "preprocess '{}' must return an object",
                    stage.name
                )))
            }
        }
    }

    /// Calls the data function. The call runs on its own task so a dropped request does
    /// not cancel a statement that is already in flight.
    async fn data_call(&self, route: &Route, ctx: &mut PipelineContext) -> Result<(), AppError> {
        let Some(name) = &route.sql else {
            ctx.result = Value::Object(ctx.params.clone());
            return Ok(());
        };

        debug!("{} {}: calling data function {}", route.method, route.pattern, name);
        let store = Arc::clone(&self.store);
        let function = name.clone();
        let params = ctx.params.clone();
        let call = tokio::spawn(async move { store.call(&function, &params).await });

        ctx.result = match call.await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!("{} {}: {}", route.method, route.pattern, e);
                return Err(e.into());
            }
            Err(e) => {
                error!("{} {}: data call task failed: {}", route.method, route.pattern, e);
                return Err(AppError::Internal("data call did not complete".to_string()));
            }
        };
        Ok(())
    }

    fn check_policy(&self, route: &Route, ctx: &PipelineContext) -> Result<(), AppError> {
        let Some(policy) = &route.policy else {
            return Ok(());
        };
        if policy.callable.allows(&ctx.result, ctx.claims.as_ref()) {
            return Ok(());
        }

        debug!("{} {}: policy '{}' denied the request", route.method, route.pattern, policy.name);
        match ctx.claims {
            None => Err(AppError::Unauthorized("authentication required".to_string())),
            Some(_) => Err(AppError::Forbidden(format!(
                "denied by policy '{}'",
                policy.name
            ))),
        }
    }

    fn postprocess(&self, route: &Route, ctx: &mut PipelineContext) -> Result<(), AppError> {
        if let Some(stage) = &route.postprocess {
            let result = std::mem::take(&mut ctx.result);
            ctx.result = run_stage(route, "postprocess", stage, result, ctx.claims.as_ref())?;
        }
        Ok(())
    }

    fn set_credential(&self, route: &Route, ctx: &mut PipelineContext) -> Result<(), AppError> {
        if let Some(stage) = &route.set_credential {
            let output = run_stage(
                route,
                "set_credential",
                stage,
                ctx.result.clone(),
                ctx.claims.as_ref(),
            )?;
            ctx.change = ClaimsChange::from_stage(ctx.claims.as_ref(), output);
        }
        Ok(())
    }
}

fn run_stage(
    route: &Route,
    stage: &str,
    callable: &Named<dyn Transform>,
    input: Value,
    claims: Option<&Claims>,
) -> Result<Value, AppError> {
    callable.callable.apply(input, claims).map_err(|e| {
        match &e {
            TransformError::Failed(message) => warn!(
                "{} {}: {} '{}' failed: {}",
                route.method, route.pattern, stage, callable.name, message
            ),
            TransformError::Unauthorized(message) => debug!(
                "{} {}: {} '{}' rejected the request: {}",
                route.method, route.pattern, stage, callable.name, message
            ),
        }
        AppError::from(e)
    })
}
