//! Per-update routing.
//!
//! Each update goes to a command target when its text matches a registered
//! trigger, otherwise to the action of the subject's current node. Updates
//! are queued per subject and drained by one worker task per subject, so
//! a subject's updates run one at a time in arrival order while different
//! subjects run in parallel. A worker exits as soon as its queue is empty.

mod context;
mod error;

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::conversation::{
    CommandRegistry, CommandTarget, ConversationGraph, FirstContact, NodeId, SubjectStateStore,
};
use crate::deps::Dependencies;
use crate::types::{SubjectId, Update, UpdateExt};

pub use context::{noop, Action, ActionContext, SharedAction};
pub use error::{DispatchError, ErrorSink, LoggingErrorSink};

/// How a dispatched update was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A command moved the subject to `node` and ran its action.
    Command { node: NodeId },
    /// A command handler ran; conversation state untouched.
    Handler,
    /// The action of the subject's current `node` ran.
    Conversation { node: NodeId },
}

/// Optional wiring for [`Dispatcher::new`].
pub struct DispatchOptions {
    pub deps: Dependencies,
    pub first_contact: FirstContact,
    pub error_sink: Arc<dyn ErrorSink>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            deps: Dependencies::new(),
            first_contact: FirstContact::default(),
            error_sink: Arc::new(LoggingErrorSink),
        }
    }
}

/// State shared by every dispatch task and action context.
pub(crate) struct Shared {
    pub(crate) api: Arc<dyn RemoteApi>,
    pub(crate) graph: Arc<ConversationGraph>,
    pub(crate) commands: CommandRegistry,
    pub(crate) states: SubjectStateStore,
    pub(crate) deps: Dependencies,
    pub(crate) first_contact: FirstContact,
    pub(crate) error_sink: Arc<dyn ErrorSink>,
}

struct Queues {
    senders: Mutex<HashMap<SubjectId, mpsc::UnboundedSender<Update>>>,
    tracker: TaskTracker,
}

#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    queues: Arc<Queues>,
}

impl Dispatcher {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        graph: ConversationGraph,
        commands: CommandRegistry,
        options: DispatchOptions,
    ) -> Self {
        let shared = Shared {
            api,
            graph: Arc::new(graph),
            commands,
            states: SubjectStateStore::new(),
            deps: options.deps,
            first_contact: options.first_contact,
            error_sink: options.error_sink,
        };

        Self {
            shared: Arc::new(shared),
            queues: Arc::new(Queues {
                senders: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn graph(&self) -> &ConversationGraph {
        &self.shared.graph
    }

    pub fn states(&self) -> &SubjectStateStore {
        &self.shared.states
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.shared.commands
    }

    /// Handle one update on the calling task.
    ///
    /// Bypasses the per-subject queues; callers mixing this with
    /// [`submit`](Self::submit) for the same subject lose the ordering
    /// guarantee.
    pub async fn dispatch(&self, update: Update) -> Result<Outcome, DispatchError> {
        let update_id = update.update_id();
        let Some(subject) = update.subject() else {
            return Err(DispatchError::UnresolvedSubject { update_id });
        };

        match AssertUnwindSafe(self.route(subject, Arc::new(update)))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(DispatchError::Panicked {
                update_id,
                subject,
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    async fn route(
        &self,
        subject: SubjectId,
        update: Arc<Update>,
    ) -> Result<Outcome, DispatchError> {
        let shared = &self.shared;

        let command = update
            .text()
            .and_then(|text| shared.commands.lookup(text))
            .cloned();

        match command {
            Some(CommandTarget::Node(node)) => {
                debug!(
                    "Update {}: command moves subject {} to '{}'",
                    update.update_id(),
                    subject,
                    shared.graph.node(node).name()
                );
                shared.states.set(subject, node);
                self.run(node, subject, update, true, false).await?;
                Ok(Outcome::Command { node })
            }
            Some(CommandTarget::Handler(handler)) => {
                debug!(
                    "Update {}: command handler for subject {}",
                    update.update_id(), subject
                );
                let recorded = shared.states.get(subject);
                let node = recorded.unwrap_or_else(|| shared.graph.reset());
                // An unseen subject is on first contact here too.
                let hold = recorded.is_none() && shared.first_contact == FirstContact::Hold;
                let ctx =
                    ActionContext::new(update, subject, node, true, hold, Arc::clone(shared));
                handler.call(ctx).await.map_err(|error| DispatchError::Action {
                    subject,
                    node: "command handler".to_string(),
                    error,
                })?;
                Ok(Outcome::Handler)
            }
            None => {
                let (node, first_contact) =
                    shared.states.get_or_insert(subject, shared.graph.reset());
                if first_contact {
                    debug!(
                        "Subject {} first seen, starting at '{}'",
                        subject,
                        shared.graph.node(node).name()
                    );
                }
                let hold = first_contact && shared.first_contact == FirstContact::Hold;
                self.run(node, subject, update, false, hold).await?;
                Ok(Outcome::Conversation { node })
            }
        }
    }

    async fn run(
        &self,
        node: NodeId,
        subject: SubjectId,
        update: Arc<Update>,
        via_command: bool,
        hold: bool,
    ) -> Result<(), DispatchError> {
        let state = self.shared.graph.node(node);
        let ctx = ActionContext::new(
            update,
            subject,
            node,
            via_command,
            hold,
            Arc::clone(&self.shared),
        );
        state
            .action()
            .call(ctx)
            .await
            .map_err(|error| DispatchError::Action {
                subject,
                node: state.name().to_string(),
                error,
            })
    }

    /// Queue an update behind earlier ones for the same subject. Never
    /// waits. Returns false when the update was dropped: it has no subject
    /// or the dispatcher is shut down.
    pub fn submit(&self, update: Update) -> bool {
        let Some(subject) = update.subject() else {
            debug!(
                "Dropping update {} ({}): no subject",
                update.update_id(),
                update.kind_name()
            );
            return false;
        };

        let mut senders = self
            .queues
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.queues.tracker.is_closed() {
            warn!("Dispatcher shut down, dropping update {}", update.update_id());
            return false;
        }

        let update = match senders.get(&subject) {
            Some(tx) => match tx.send(update) {
                Ok(()) => return true,
                Err(mpsc::error::SendError(update)) => update,
            },
            None => update,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive until the worker below exits.
        let _ = tx.send(update);
        senders.insert(subject, tx);

        let dispatcher = self.clone();
        self.queues
            .tracker
            .spawn(async move { dispatcher.drain(subject, rx).await });
        true
    }

    /// Queue a whole batch in order. Returns how many updates were queued.
    pub fn submit_batch(&self, updates: Vec<Update>) -> usize {
        updates
            .into_iter()
            .map(|update| self.submit(update))
            .filter(|queued| *queued)
            .count()
    }

    async fn drain(self, subject: SubjectId, mut rx: mpsc::UnboundedReceiver<Update>) {
        debug!("Worker for subject {} started", subject);
        while let Some(update) = self.next_queued(subject, &mut rx) {
            if let Err(e) = self.dispatch(update).await {
                self.shared.error_sink.report(&e);
            }
        }
        debug!("Worker for subject {} finished", subject);
    }

    /// Next update for the worker, or `None` once the queue is empty and
    /// the worker has been retired. Retiring happens under the senders
    /// lock, where `submit` also sends, so no update can slip in between
    /// the last check and the removal. The next update for the subject
    /// starts a fresh worker.
    fn next_queued(
        &self,
        subject: SubjectId,
        rx: &mut mpsc::UnboundedReceiver<Update>,
    ) -> Option<Update> {
        match rx.try_recv() {
            Ok(update) => return Some(update),
            Err(mpsc::error::TryRecvError::Disconnected) => return None,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        let mut senders = self
            .queues
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match rx.try_recv() {
            Ok(update) => Some(update),
            Err(_) => {
                senders.remove(&subject);
                None
            }
        }
    }

    /// Stop accepting updates and wait until every queued one is handled.
    pub async fn shutdown(&self) {
        {
            let mut senders = self
                .queues
                .senders
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.queues.tracker.close();
            senders.clear();
        }
        info!(
            "Waiting for {} dispatch worker(s) to finish",
            self.queues.tracker.len()
        );
        self.queues.tracker.wait().await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
