//! Application assembly and the serve loop.
//!
//! Every component is built exactly once, in dependency order:
//!
//! ```text
//! TetherConfig ─▶ ConnectionManager ─▶ Correlator ─▶ OneBotBot
//!                                                      │
//!            Dispatcher (Superusers, TetherConfig) ◀───┤
//!                          │                           │
//!                          └──────▶ OneBotAdapter ◀────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tether_runtime::TetherApp;
//! use tether_framework::MessageEvent;
//! use tether_core::{BoxedBot, BotExt};
//!
//! let app = TetherApp::load()?;
//! app.dispatcher().register(app.command(["ping"]).handler(
//!     |event: MessageEvent, bot: BoxedBot| async move { bot.reply(&event, "pong").await.map(drop) },
//! ));
//! app.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tether_adapter_onebot::{Correlator, OneBotAdapter, OneBotBot};
use tether_framework::{DependencyRegistry, Dispatcher, Matcher, Permission, Superusers, permission};
use tether_transport::{ConnectionManager, ServerState, router, serve};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoader, TetherConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// The assembled bridge.
pub struct TetherApp {
    config: TetherConfig,
    manager: ConnectionManager,
    bot: Arc<OneBotBot>,
    dispatcher: Arc<Dispatcher>,
    adapter: Arc<OneBotAdapter>,
    shutdown: CancellationToken,
}

impl TetherApp {
    /// Builds every component from `config`. Does not touch logging or the network.
    pub fn new(config: TetherConfig) -> Self {
        let manager = ConnectionManager::new(config.connection.to_manager_config());
        let correlator = Arc::new(Correlator::new(manager.clone()));
        let bot = Arc::new(OneBotBot::new(correlator, config.api.timeout()));

        let dependencies = DependencyRegistry::with_defaults();
        dependencies.singleton(Superusers(config.bot.superusers.clone()));
        dependencies.singleton(config.clone());
        let dispatcher = Arc::new(Dispatcher::with_dependencies(dependencies));

        let adapter = Arc::new(OneBotAdapter::new(Arc::clone(&bot), Arc::clone(&dispatcher)));

        debug!(
            superusers = config.bot.superusers.len(),
            api_timeout = ?config.api.timeout(),
            "Application assembled"
        );

        Self {
            config,
            manager,
            bot,
            dispatcher,
            adapter,
            shutdown: CancellationToken::new(),
        }
    }

    /// Loads configuration from the default locations, initializes logging and builds the app.
    pub fn load() -> RuntimeResult<Self> {
        Self::builder().build()
    }

    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    /// Where plugins register matchers and middleware before [`run`](Self::run).
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn bot(&self) -> &Arc<OneBotBot> {
        &self.bot
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn adapter(&self) -> &Arc<OneBotAdapter> {
        &self.adapter
    }

    /// Permission passing for the configured superusers.
    pub fn superuser(&self) -> Permission {
        permission::superuser(self.config.bot.superusers.iter().copied())
    }

    /// A command matcher honouring the configured case sensitivity.
    pub fn command<I, S>(&self, commands: I) -> Matcher
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Matcher::on_command(self.config.bot.command_case_sensitive, commands)
    }

    /// Cancelling this token stops a running server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serves until ctrl-c, SIGTERM or the [shutdown token](Self::shutdown_token).
    pub async fn run(&self) -> RuntimeResult<()> {
        info!("tether is starting. Press Ctrl+C to stop.");
        self.run_until(wait_for_signal()).await
    }

    /// Binds the configured address and serves until `shutdown` completes or the shutdown token
    /// is cancelled.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.config.server.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RuntimeError::Bind {
                addr: addr.clone(),
                source,
            })?;
        self.serve_until(listener, shutdown).await
    }

    /// Like [`run_until`](Self::run_until) on an already bound listener.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let state = ServerState::new(self.manager.clone(), self.adapter.clone())
            .with_access_token(self.config.server.access_token.clone());
        let app = router(state, &self.config.server.ws_path);
        info!(
            ws_path = %self.config.server.ws_path,
            auth = self.config.server.access_token.is_some(),
            "Serving OneBot v11 reverse WebSocket"
        );

        let server = serve(listener, app, self.shutdown.clone());
        tokio::pin!(server);
        let finished = tokio::select! {
            result = &mut server => Some(result),
            () = shutdown => None,
        };
        let result = match finished {
            Some(result) => result,
            None => {
                self.shutdown.cancel();
                server.await
            }
        };

        self.manager.close().await;
        info!("tether stopped");
        result.map_err(RuntimeError::Serve)
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(error) => {
                warn!(%error, "Cannot listen for SIGTERM");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(error) => warn!(%error, "Cannot listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// AppBuilder
// =============================================================================

/// Loads configuration, initializes logging and builds a [`TetherApp`].
pub struct AppBuilder {
    config_loader: ConfigLoader,
    init_logging: bool,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            init_logging: true,
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Applies `f` to the loader, e.g. to add overrides.
    pub fn configure(mut self, f: impl FnOnce(ConfigLoader) -> ConfigLoader) -> Self {
        self.config_loader = f(self.config_loader);
        self
    }

    /// Leaves the global subscriber alone.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    pub fn build(self) -> RuntimeResult<TetherApp> {
        let config = self.config_loader.load()?;
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }
        info!(
            log_level = %config.logging.level,
            bind = %config.server.bind_addr(),
            "Configuration loaded"
        );
        Ok(TetherApp::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_core::BoxedBot;
    use tether_framework::{MessageEvent, Shared};
    use tether_transport::memory;
    use tokio::sync::mpsc;

    fn local_config() -> TetherConfig {
        let mut config = TetherConfig::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        config.bot.superusers = vec![1];
        config
    }

    fn group_message(user_id: i64, text: &str) -> String {
        json!({
            "post_type": "message",
            "message_type": "group",
            "self_id": 10000,
            "user_id": user_id,
            "group_id": 300,
            "raw_message": text,
            "sender": { "user_id": user_id, "role": "member" },
        })
        .to_string()
    }

    #[test]
    fn singletons_are_registered() {
        let app = TetherApp::new(local_config());
        let deps = app.dispatcher().dependencies();

        assert_eq!(
            deps.get_singleton::<Superusers>().as_deref(),
            Some(&Superusers(vec![1]))
        );
        assert_eq!(
            deps.get_singleton::<TetherConfig>().map(|c| c.server.port),
            Some(0)
        );
    }

    #[tokio::test]
    async fn superuser_commands_reach_handlers() {
        let app = TetherApp::new(local_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        app.dispatcher().register(
            app.command(["/reload"])
                .permission(app.superuser())
                .handler(move |event: MessageEvent, config: Shared<TetherConfig>, _bot: BoxedBot| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send((event.payload().user_id, config.api.timeout_secs));
                    }
                }),
        );

        let (session, peer) = memory::pair("app");
        app.manager().accept(session, app.adapter().clone()).await;
        peer.push_text(group_message(2, "/reload"));
        peer.push_text(group_message(1, "/RELOAD now"));

        assert_eq!(rx.recv().await, Some((1, 10)));
    }

    #[tokio::test]
    async fn run_until_returns_when_the_signal_fires() {
        let app = TetherApp::new(local_config());
        assert!(app.run_until(async {}).await.is_ok());
        assert!(!app.manager().is_connected());
    }

    #[tokio::test]
    async fn shutdown_token_stops_the_server() {
        let app = Arc::new(TetherApp::new(local_config()));
        let token = app.shutdown_token();
        let server = tokio::spawn({
            let app = Arc::clone(&app);
            async move { app.run_until(std::future::pending()).await }
        });

        token.cancel();
        assert!(server.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = local_config();
        config.server.port = taken.local_addr().unwrap().port();

        let result = TetherApp::new(config).run_until(async {}).await;
        assert!(matches!(result, Err(RuntimeError::Bind { .. })));
    }
}
