use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{ApiError, RemoteApi};
use crate::conversation::{ConversationGraph, NodeId, StateNode};
use crate::deps::Dependencies;
use crate::dispatcher::Shared;
use crate::types::{SubjectId, Update, UpdateExt};

/// Side-effecting body of a node or command handler.
///
/// Implemented for every `Fn(ActionContext) -> impl Future<Output =
/// anyhow::Result<()>>`, so plain `async fn`s can be registered directly.
pub trait Action: Send + Sync + 'static {
    fn call(&self, ctx: ActionContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> Action for F
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, ctx: ActionContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(self(ctx))
    }
}

pub type SharedAction = Arc<dyn Action>;

/// Action that does nothing, for pure routing nodes.
pub async fn noop(_ctx: ActionContext) -> anyhow::Result<()> {
    Ok(())
}

/// Everything an action can see and do while handling one update.
pub struct ActionContext {
    update: Arc<Update>,
    subject: SubjectId,
    node: NodeId,
    via_command: bool,
    hold: bool,
    shared: Arc<Shared>,
}

impl ActionContext {
    pub(crate) fn new(
        update: Arc<Update>,
        subject: SubjectId,
        node: NodeId,
        via_command: bool,
        hold: bool,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            update,
            subject,
            node,
            via_command,
            hold,
            shared,
        }
    }

    pub fn update(&self) -> &Update {
        &self.update
    }

    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    pub fn text(&self) -> Option<&str> {
        self.update.text()
    }

    /// The node whose action is running.
    pub fn node(&self) -> &StateNode {
        self.shared.graph.node(self.node)
    }

    /// True when a command trigger routed this update here, as opposed to
    /// the subject already sitting on this node.
    pub fn entered_by_command(&self) -> bool {
        self.via_command
    }

    /// The subject's recorded position, which moves when `next_state`
    /// transitions.
    pub fn current_state(&self) -> &StateNode {
        let id = self
            .shared
            .states
            .get(self.subject)
            .unwrap_or_else(|| self.shared.graph.reset());
        self.shared.graph.node(id)
    }

    pub fn graph(&self) -> &ConversationGraph {
        &self.shared.graph
    }

    pub fn api(&self) -> &dyn RemoteApi {
        self.shared.api.as_ref()
    }

    pub fn deps(&self) -> &Dependencies {
        &self.shared.deps
    }

    /// Shorthand for `deps().get::<T>()`.
    pub fn dep<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.shared.deps.get::<T>()
    }

    /// Advance the subject along the graph using this update's text.
    /// Returns true when the subject moved.
    pub fn next_state(&mut self) -> bool {
        if self.hold {
            self.hold = false;
            debug!(
                "Subject {} first contact: staying at '{}'",
                self.subject,
                self.current_state().name()
            );
            return false;
        }

        let graph = &self.shared.graph;
        let current = self
            .shared
            .states
            .get(self.subject)
            .unwrap_or_else(|| graph.reset());

        match graph.transition(current, self.update.text()) {
            Some(next) => {
                self.shared.states.set(self.subject, next);
                debug!(
                    "Subject {}: '{}' -> '{}'",
                    self.subject,
                    graph.node(current).name(),
                    graph.node(next).name()
                );
                true
            }
            None => false,
        }
    }

    pub async fn invoke(&self, method: &str, params: Value) -> Result<Value, ApiError> {
        self.shared.api.invoke_method(method, params).await
    }

    /// `sendMessage` to the subject's chat.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<Value, ApiError> {
        self.invoke(
            "sendMessage",
            json!({ "chat_id": self.subject.0, "text": text.into() }),
        )
        .await
    }
}
