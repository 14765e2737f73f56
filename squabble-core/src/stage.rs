//! Staged command pipeline.
//!
//! Every inbound command passes through three stages in order: PARSE
//! (attach typed arguments), LOG (observe) and ACTION (side effects).
//! Handlers are registered per `(stage, code)` pair and run in
//! registration order; the wildcard code `*` is a separate bucket.

use crate::error::HandlerError;
use futures::future::BoxFuture;
use squabble_protocol::{parameters_to_arguments, ArgSpec, Command};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Parse,
    Log,
    Action,
}

impl Stage {
    /// All stages in execution order.
    pub const ORDER: [Stage; 3] = [Stage::Parse, Stage::Log, Stage::Action];

    fn index(self) -> usize {
        match self {
            Stage::Parse => 0,
            Stage::Log => 1,
            Stage::Action => 2,
        }
    }
}

/// What a handler did with the command it was given.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Pass the command on as it was.
    Unchanged,
    /// Pass this command on instead.
    Replace(Command),
    /// Stop processing this command.
    Reject,
}

/// State of a command between handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue(Command),
    Rejected,
}

impl Flow {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Flow::Rejected)
    }

    pub fn into_command(self) -> Option<Command> {
        match self {
            Flow::Continue(command) => Some(command),
            Flow::Rejected => None,
        }
    }
}

/// A stage handler for connections of type `C`.
///
/// Implemented for any `Fn(Arc<C>, Command) -> impl Future<Output =
/// Result<Outcome, HandlerError>>`, so plain `async fn`s can be registered.
pub trait Handler<C>: Send + Sync {
    fn apply(&self, conn: Arc<C>, command: Command) -> HandlerFuture;
}

/// Boxed future returned by [`Handler::apply`].
pub type HandlerFuture = BoxFuture<'static, Result<Outcome, HandlerError>>;

impl<C, F, Fut> Handler<C> for F
where
    F: Fn(Arc<C>, Command) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Outcome, HandlerError>> + Send + 'static,
{
    fn apply(&self, conn: Arc<C>, command: Command) -> HandlerFuture {
        Box::pin(self(conn, command))
    }
}

/// Returns a PARSE handler that attaches arguments typed by `schema`.
pub fn typed<C: 'static>(schema: &'static [ArgSpec]) -> impl Handler<C> + 'static {
    move |_conn: Arc<C>, command: Command| async move {
        let args = parameters_to_arguments(&command.parameters, schema);
        Ok::<_, HandlerError>(Outcome::Replace(command.with_args(args)))
    }
}

type Bucket<C> = HashMap<String, Vec<Arc<dyn Handler<C>>>>;

/// Handlers keyed by stage and command code.
pub struct StageTable<C> {
    stages: [Bucket<C>; 3],
}

impl<C: Send + Sync + 'static> StageTable<C> {
    pub fn new() -> Self {
        Self {
            stages: [HashMap::new(), HashMap::new(), HashMap::new()],
        }
    }

    /// Appends `handler` after any existing handlers for `(stage, code)`.
    pub fn stage(
        &mut self,
        stage: Stage,
        code: &str,
        handler: impl Handler<C> + 'static,
    ) -> &mut Self {
        self.stages[stage.index()]
            .entry(code.to_string())
            .or_default()
            .push(Arc::new(handler));
        self
    }

    /// Returns the number of handlers registered for `(stage, code)`.
    pub fn handler_count(&self, stage: Stage, code: &str) -> usize {
        self.stages[stage.index()]
            .get(code)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Runs the handlers for one stage.
    ///
    /// A rejected flow is returned untouched. Otherwise each handler gets
    /// the command produced by the previous one; the first `Reject` ends
    /// the stage.
    pub async fn run_stage(
        &self,
        conn: &Arc<C>,
        stage: Stage,
        code: &str,
        flow: Flow,
    ) -> Result<Flow, HandlerError> {
        let Flow::Continue(mut command) = flow else {
            return Ok(Flow::Rejected);
        };
        let Some(handlers) = self.stages[stage.index()].get(code) else {
            return Ok(Flow::Continue(command));
        };

        for handler in handlers {
            match handler.apply(conn.clone(), command.clone()).await? {
                Outcome::Unchanged => {}
                Outcome::Replace(next) => command = next,
                Outcome::Reject => return Ok(Flow::Rejected),
            }
        }
        Ok(Flow::Continue(command))
    }

    /// Runs PARSE, LOG and ACTION for `code` in order.
    pub async fn run_stages(
        &self,
        conn: &Arc<C>,
        code: &str,
        flow: Flow,
    ) -> Result<Flow, HandlerError> {
        let mut flow = flow;
        for stage in Stage::ORDER {
            flow = self.run_stage(conn, stage, code, flow).await?;
        }
        Ok(flow)
    }
}

impl<C: Send + Sync + 'static> Default for StageTable<C> {
    fn default() -> Self {
        Self::new()
    }
}
