//! Long-polling Telegram update ingestion with tree-shaped conversations.
//!
//! A [`Poller`] pulls updates from the Bot API and hands them to a
//! [`Dispatcher`], which routes each one to a command or to the action of
//! the sender's current node in a [`ConversationGraph`].

pub mod api;
pub mod bot;
pub mod config;
pub mod conversation;
pub mod deps;
pub mod dispatcher;
pub mod poller;
pub mod types;

pub use api::{ApiError, RemoteApi, TelegramApi};
pub use bot::{Bot, BotBuilder};
pub use config::Config;
pub use conversation::{
    CommandRegistry, CommandTarget, ConversationGraph, FirstContact, GraphBuilder, GraphError,
    NodeId, StateNode, SubjectStateStore,
};
pub use deps::Dependencies;
pub use dispatcher::{
    noop, Action, ActionContext, DispatchError, DispatchOptions, Dispatcher, ErrorSink,
    LoggingErrorSink, Outcome,
};
pub use poller::{Handoff, Poller};
pub use types::{SubjectId, Update, UpdateExt, UpdateKind};
