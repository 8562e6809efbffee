use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{ApiError, RemoteApi, TelegramApi};
use crate::config::{Config, PollingConfig};
use crate::conversation::{CommandRegistry, CommandTarget, FirstContact, GraphBuilder, GraphError, NodeId};
use crate::deps::Dependencies;
use crate::dispatcher::{Action, DispatchOptions, Dispatcher, ErrorSink, LoggingErrorSink};
use crate::poller::{Handoff, Poller};
use crate::types::{Update, User};

/// Collects the conversation graph, commands and dependencies before the
/// bot starts. [`build`](Self::build) consumes it.
pub struct BotBuilder {
    api: Arc<dyn RemoteApi>,
    polling: PollingConfig,
    first_contact: FirstContact,
    graph: GraphBuilder,
    commands: CommandRegistry,
    deps: Dependencies,
    error_sink: Arc<dyn ErrorSink>,
}

impl BotBuilder {
    pub fn new(api: Arc<dyn RemoteApi>, config: &Config) -> Self {
        Self {
            api,
            polling: config.polling.clone(),
            first_contact: config.conversation.first_contact,
            graph: GraphBuilder::new(),
            commands: CommandRegistry::new(),
            deps: Dependencies::new(),
            error_sink: Arc::new(LoggingErrorSink),
        }
    }

    /// Builder talking to the Bot API described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api = TelegramApi::new(&config.telegram, &config.polling)?;
        Ok(Self::new(Arc::new(api), config))
    }

    pub fn add_node<A: Action>(
        &mut self,
        name: impl Into<String>,
        condition: Option<&str>,
        action: A,
    ) -> NodeId {
        self.graph.add_node(name, condition, action)
    }

    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.graph.add_child(parent, child)
    }

    /// Route `trigger` to `node`, overriding whatever state the subject is in.
    pub fn command(&mut self, trigger: impl Into<String>, node: NodeId) -> &mut Self {
        self.commands.register(trigger, CommandTarget::Node(node));
        self
    }

    /// Route `trigger` to a standalone action that leaves state alone.
    pub fn handler<A: Action>(&mut self, trigger: impl Into<String>, action: A) -> &mut Self {
        self.commands
            .register(trigger, CommandTarget::Handler(Arc::new(action)));
        self
    }

    pub fn provide<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.deps.provide(value);
        self
    }

    pub fn error_sink(&mut self, sink: Arc<dyn ErrorSink>) -> &mut Self {
        self.error_sink = sink;
        self
    }

    pub fn build(self, start: NodeId, reset: NodeId) -> Result<Bot, GraphError> {
        let graph = self.graph.build(start, reset)?;
        self.commands.check_targets(&graph)?;

        info!(
            "Bot built: {} state(s), {} command(s), {} dependency(ies)",
            graph.len(),
            self.commands.len(),
            self.deps.len()
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.api),
            graph,
            self.commands,
            DispatchOptions {
                deps: self.deps,
                first_contact: self.first_contact,
                error_sink: self.error_sink,
            },
        );

        Ok(Bot {
            api: self.api,
            dispatcher,
            polling: self.polling,
            cancel: CancellationToken::new(),
        })
    }
}

/// A built bot: immutable graph, live state store, polling lifecycle.
pub struct Bot {
    api: Arc<dyn RemoteApi>,
    dispatcher: Dispatcher,
    polling: PollingConfig,
    cancel: CancellationToken,
}

impl Bot {
    pub fn api(&self) -> Arc<dyn RemoteApi> {
        Arc::clone(&self.api)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Token that stops polling when cancelled, e.g. from a signal handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Identity of the bot behind the token.
    pub async fn get_me(&self) -> Result<User, ApiError> {
        let value = self.api.invoke_method("getMe", json!({})).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Polling only works while no webhook is set.
    pub async fn delete_webhook(&self) -> Result<(), ApiError> {
        self.api
            .invoke_method("deleteWebhook", json!({ "drop_pending_updates": false }))
            .await?;
        Ok(())
    }

    /// Poll and dispatch until [`stop`](Self::stop), then wait for queued
    /// updates to be handled.
    pub async fn run(&self) {
        let mut poller = Poller::new(
            Arc::clone(&self.api),
            Handoff::Dispatcher(self.dispatcher.clone()),
            &self.polling,
        );
        poller.run(self.cancel.clone()).await;
        self.dispatcher.shutdown().await;
        info!("Bot stopped");
    }

    pub fn stop(&self) {
        info!("Stop requested");
        self.cancel.cancel();
    }

    /// Poll in the background and hand raw updates to the caller instead of
    /// the dispatcher. The channel closes after [`stop`](Self::stop).
    ///
    /// Use this or [`run`](Self::run), not both: each keeps its own offset.
    pub fn updates_channel(&self) -> mpsc::Receiver<Update> {
        let (tx, rx) = mpsc::channel(self.polling.updates_capacity);
        let mut poller = Poller::new(Arc::clone(&self.api), Handoff::Channel(tx), &self.polling);
        let cancel = self.cancel.clone();
        tokio::spawn(async move { poller.run(cancel).await });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{text_update, wait_until, MockApi};
    use crate::dispatcher::{noop, ActionContext};
    use crate::types::{SubjectId, UpdateExt};

    fn config() -> Config {
        let mut config = Config::with_token("test-token");
        config.polling.retry_delay_secs = 0;
        config
    }

    async fn ask(mut ctx: ActionContext) -> anyhow::Result<()> {
        if !ctx.entered_by_command() {
            ctx.next_state();
        }
        let prompt = format!("at {}", ctx.current_state().name());
        ctx.send_message(prompt).await?;
        Ok(())
    }

    #[test]
    fn test_build_rejects_unreachable_nodes() {
        let api = Arc::new(MockApi::new());
        let mut builder = BotBuilder::new(api, &config());
        let start = builder.add_node("start", None, noop);
        builder.add_node("floating", None, noop);
        assert!(matches!(
            builder.build(start, start),
            Err(GraphError::Unreachable(name)) if name == "floating"
        ));
    }

    #[tokio::test]
    async fn test_get_me_decodes_user() {
        struct Me;

        #[async_trait::async_trait]
        impl RemoteApi for Me {
            async fn fetch_updates(&self, _: i64, _: u32, _: u32) -> Result<Vec<Update>, ApiError> {
                Ok(Vec::new())
            }

            async fn invoke_method(
                &self,
                name: &str,
                _: serde_json::Value,
            ) -> Result<serde_json::Value, ApiError> {
                assert_eq!(name, "getMe");
                Ok(json!({ "id": 1, "is_bot": true, "first_name": "Flow", "username": "flow_bot" }))
            }
        }

        let mut builder = BotBuilder::new(Arc::new(Me), &config());
        let start = builder.add_node("start", None, noop);
        let bot = builder.build(start, start).unwrap();

        let me = bot.get_me().await.unwrap();
        assert!(me.is_bot);
        assert_eq!(me.username.as_deref(), Some("flow_bot"));
    }

    #[tokio::test]
    async fn test_run_dispatches_until_stopped() {
        let api = Arc::new(MockApi::new());
        api.push_batch(vec![text_update(1, 42, "/start"), text_update(2, 42, "John")]);
        api.push_batch(vec![text_update(3, 42, "john@example.com")]);

        let mut builder = BotBuilder::new(api.clone(), &config());
        let start = builder.add_node("start", None, ask);
        let name = builder.add_node("name", None, ask);
        let mail = builder.add_node("mail", None, ask);
        builder.add_child(start, name).unwrap();
        builder.add_child(name, mail).unwrap();
        builder.command("/start", start);
        let bot = Arc::new(builder.build(start, start).unwrap());

        let running = {
            let bot = Arc::clone(&bot);
            tokio::spawn(async move { bot.run().await })
        };

        wait_until(|| api.fetch_offsets().len() == 3).await;
        bot.stop();
        running.await.unwrap();

        assert_eq!(api.fetch_offsets(), vec![0, 3, 4]);
        assert_eq!(api.sent_texts(42), vec!["at start", "at name", "at mail"]);
        let state = bot.dispatcher().states().get(SubjectId(42)).unwrap();
        assert_eq!(state, mail);
    }

    #[tokio::test]
    async fn test_updates_channel_closes_on_stop() {
        let api = Arc::new(MockApi::new());
        api.push_batch(vec![text_update(7, 1, "a"), text_update(8, 2, "b")]);

        let mut builder = BotBuilder::new(api.clone(), &config());
        let start = builder.add_node("start", None, noop);
        let bot = builder.build(start, start).unwrap();

        let mut updates = bot.updates_channel();
        assert_eq!(updates.recv().await.unwrap().update_id(), 7);
        assert_eq!(updates.recv().await.unwrap().update_id(), 8);

        wait_until(|| api.fetch_offsets().len() == 2).await;
        bot.stop();
        assert!(updates.recv().await.is_none());
        assert_eq!(api.fetch_offsets(), vec![0, 9]);
    }
}
