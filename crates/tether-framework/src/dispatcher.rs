//! Event dispatcher.
//!
//! The [`Dispatcher`] owns the matcher registry, the middleware list and the dependency
//! registry. One call to [`Dispatcher::dispatch`] is one dispatch cycle:
//!
//! 1. A [`DispatchContext`] is created for the event
//! 2. The middleware chain runs, outermost first
//! 3. The innermost step scans matchers by descending priority; for every matcher whose
//!    rules and permissions pass, its handlers run in order with resolved parameters
//! 4. The scan stops after a blocking matcher matches or after a handler calls
//!    [`DispatchContext::stop_propagation`]
//!
//! Handler errors do not stop the scan. The last error is returned once the scan ends;
//! [`DispatchError::NoMatchingRule`] is returned when nothing matched.
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new();
//! dispatcher.middleware(middleware::recovery());
//! dispatcher.register(Matcher::on_command(false, ["/ping"]).handler(pong));
//!
//! dispatcher.dispatch(event, Some(bot)).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tether_core::{BoxedBot, InboundEvent};
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};
use tracing::{Instrument, debug, debug_span, trace, warn};

use crate::condition::{Permission, Rule};
use crate::context::DispatchContext;
use crate::dependency::{DependencyRegistry, ResolveScope};
use crate::error::{DispatchError, DispatchResult};
use crate::handler::Handler;
use crate::matcher::Matcher;
use crate::middleware::{self, Middleware, Next};
use crate::registry::{MatcherHandle, MatcherRegistry};
use crate::rule::{CommandArgs, RegexMatch};

/// Summary of a successful dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub cycle: u64,
    /// Matchers whose rules and permissions passed.
    pub matched: usize,
    /// Handlers that ran to completion without error.
    pub handled: usize,
}

/// Routes events through middlewares to matchers.
pub struct Dispatcher {
    matchers: Arc<MatcherRegistry>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    dependencies: Arc<DependencyRegistry>,
    cycles: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// A dispatcher with the default dependency providers.
    pub fn new() -> Self {
        Self::with_dependencies(DependencyRegistry::with_defaults())
    }

    pub fn with_dependencies(dependencies: DependencyRegistry) -> Self {
        Self {
            matchers: Arc::new(MatcherRegistry::new()),
            middlewares: RwLock::new(Vec::new()),
            dependencies: Arc::new(dependencies),
            cycles: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers a matcher.
    ///
    /// # Panics
    ///
    /// Panics if a matcher with the same name is already registered.
    pub fn register(&self, matcher: Matcher) -> MatcherHandle {
        self.matchers.register(matcher)
    }

    /// Registers a matcher from its parts.
    pub fn on(
        &self,
        rule: Rule,
        permission: Permission,
        priority: i32,
        block: bool,
        handlers: impl IntoIterator<Item = Handler>,
    ) -> MatcherHandle {
        let matcher = handlers.into_iter().fold(
            Matcher::new()
                .rule(rule)
                .permission(permission)
                .priority(priority)
                .block(block),
            Matcher::handler_boxed,
        );
        self.register(matcher)
    }

    /// Removes a matcher; returns whether it was registered.
    pub fn unregister(&self, handle: MatcherHandle) -> bool {
        self.matchers.unregister(handle).is_some()
    }

    /// Appends a middleware; the first one registered runs first.
    pub fn middleware(&self, middleware: impl Middleware) {
        debug!(middleware = middleware.name(), "Middleware registered");
        self.middlewares.write().push(Arc::new(middleware));
    }

    /// Appends a middleware built from a closure.
    pub fn middleware_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Arc<DispatchContext>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<DispatchOutcome>> + Send + 'static,
    {
        self.middleware(middleware::from_fn(name, f));
    }

    /// Singletons and providers used to resolve handler parameters.
    pub fn dependencies(&self) -> &DependencyRegistry {
        &self.dependencies
    }

    pub fn matchers(&self) -> &MatcherRegistry {
        &self.matchers
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Runs one dispatch cycle for `event`.
    pub async fn dispatch(
        &self,
        event: Arc<InboundEvent>,
        bot: Option<BoxedBot>,
    ) -> DispatchResult<DispatchOutcome> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let span = debug_span!("dispatch", cycle, kind = event.kind().as_str());
        let ctx = Arc::new(DispatchContext::new(cycle, event, bot));

        let scan = MatcherScan {
            matchers: Arc::clone(&self.matchers),
            dependencies: Arc::clone(&self.dependencies),
        };
        let chain = {
            let middlewares = self.middlewares.read();
            middleware::compose(&middlewares, BoxCloneSyncService::new(scan))
        };

        chain.oneshot(ctx).instrument(span).await
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("matchers", &self.matchers.len())
            .field("middlewares", &self.middlewares.read().len())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

// ============================================================================
// Matcher scan (innermost service)
// ============================================================================

#[derive(Clone)]
struct MatcherScan {
    matchers: Arc<MatcherRegistry>,
    dependencies: Arc<DependencyRegistry>,
}

impl Service<Arc<DispatchContext>> for MatcherScan {
    type Response = DispatchOutcome;
    type Error = DispatchError;
    type Future = BoxFuture<'static, DispatchResult<DispatchOutcome>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<DispatchContext>) -> Self::Future {
        let matchers = self.matchers.snapshot();
        let scope = ResolveScope::new(Arc::clone(&self.dependencies), Arc::clone(&ctx));
        Box::pin(scan(matchers, scope, ctx))
    }
}

async fn scan(
    matchers: Vec<Matcher>,
    scope: ResolveScope,
    ctx: Arc<DispatchContext>,
) -> DispatchResult<DispatchOutcome> {
    let mut outcome = DispatchOutcome {
        cycle: ctx.cycle(),
        ..Default::default()
    };
    let mut last_error = None;

    for matcher in &matchers {
        let name = matcher.get_name().unwrap_or("unnamed");
        if !ctx.is_propagating() {
            debug!(matcher = name, "Propagation stopped, skipping remaining matchers");
            break;
        }

        // Values extracted by rules belong to the matcher that evaluated them.
        ctx.take_state::<CommandArgs>();
        ctx.take_state::<RegexMatch>();

        if !matcher.matches(&ctx) {
            trace!(matcher = name, "Matcher check failed, skipping");
            continue;
        }
        outcome.matched += 1;
        debug!(
            matcher = name,
            priority = matcher.get_priority(),
            handler_count = matcher.handler_count(),
            "Matcher check passed, executing handlers"
        );

        for handler in matcher.handlers() {
            match handler.run(&scope).await {
                Ok(()) => outcome.handled += 1,
                Err(error) => {
                    warn!(matcher = name, handler = handler.name(), %error, "Handler failed");
                    last_error = Some(error);
                }
            }
        }

        if matcher.is_blocking() {
            debug!(matcher = name, "Blocking matcher matched, stopping dispatch");
            break;
        }
    }

    match last_error {
        Some(error) => Err(error),
        None if outcome.matched == 0 => Err(DispatchError::NoMatchingRule),
        None => Ok(outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Predicate;
    use crate::dependency::Capability;
    use crate::inject::{MessageEvent, Shared};
    use crate::middleware::{rate_limit, recovery, timeout};
    use crate::testing::{RecordingBot, notice, private_message};
    use std::time::Duration;
    use tether_core::{BotExt, InboundEvent};

    type Log = Arc<parking_lot::Mutex<Vec<String>>>;

    fn recorder(log: &Log, label: &'static str) -> Handler {
        let log = Arc::clone(log);
        Handler::named(label, move || {
            let log = Arc::clone(&log);
            async move { log.lock().push(label.to_string()) }
        })
    }

    #[tokio::test]
    async fn priority_order_and_blocking() {
        let dispatcher = Dispatcher::new();
        let log: Log = Arc::default();

        dispatcher.register(
            Matcher::new()
                .name("p10")
                .priority(10)
                .block(true)
                .handler_boxed(recorder(&log, "p10")),
        );
        dispatcher.register(Matcher::new().name("p50").priority(50).handler_boxed(recorder(&log, "p50")));
        dispatcher.register(Matcher::new().name("p5").priority(5).handler_boxed(recorder(&log, "p5")));

        let outcome = dispatcher.dispatch(private_message(1, "hi"), None).await.unwrap();

        assert_eq!(*log.lock(), ["p50", "p10"]);
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.handled, 2);
    }

    #[tokio::test]
    async fn event_and_message_event_share_one_instance() {
        let dispatcher = Dispatcher::new();
        let same = Arc::new(parking_lot::Mutex::new(None));
        let probe = Arc::clone(&same);
        dispatcher.register(Matcher::new().handler(
            move |event: Arc<InboundEvent>, message: MessageEvent| {
                let probe = Arc::clone(&probe);
                async move {
                    *probe.lock() = Some(Arc::ptr_eq(&event, message.event()));
                }
            },
        ));

        dispatcher.dispatch(private_message(1, "hi"), None).await.unwrap();
        assert_eq!(*same.lock(), Some(true));

        let err = dispatcher.dispatch(notice("poke"), None).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::UnresolvedDependency { capability: Capability::MessageEvent, .. }
        ));
    }

    #[tokio::test]
    async fn nothing_matched() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(Matcher::on_notice().handler(|| async {}));

        let err = dispatcher.dispatch(private_message(1, "hi"), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoMatchingRule));
    }

    #[tokio::test]
    async fn handler_errors_do_not_stop_the_scan() {
        let dispatcher = Dispatcher::new();
        let log: Log = Arc::default();
        dispatcher.register(
            Matcher::new()
                .priority(20)
                .handler(|| async { Err::<(), _>(anyhow::anyhow!("first")) }),
        );
        dispatcher.register(Matcher::new().priority(10).handler_boxed(recorder(&log, "after")));

        let err = dispatcher.dispatch(private_message(1, "hi"), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler { .. }));
        assert_eq!(*log.lock(), ["after"]);
    }

    #[tokio::test]
    async fn stop_propagation_ends_scan_after_current_matcher() {
        let dispatcher = Dispatcher::new();
        let log: Log = Arc::default();
        dispatcher.register(
            Matcher::new()
                .priority(20)
                .handler(|ctx: Arc<DispatchContext>| async move { ctx.stop_propagation() })
                .handler_boxed(recorder(&log, "same_matcher")),
        );
        dispatcher.register(Matcher::new().priority(10).handler_boxed(recorder(&log, "lower")));

        dispatcher.dispatch(private_message(1, "hi"), None).await.unwrap();
        assert_eq!(*log.lock(), ["same_matcher"]);
    }

    #[tokio::test]
    async fn command_args_reach_handler() {
        let dispatcher = Dispatcher::new();
        let got = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        dispatcher.register(Matcher::on_command(false, ["/echo"]).handler(
            move |args: CommandArgs| {
                let sink = Arc::clone(&sink);
                async move { sink.lock().push(args.raw_args) }
            },
        ));
        dispatcher.register(
            Matcher::new()
                .priority(1)
                .handler(|args: Option<CommandArgs>| async move { assert!(args.is_none()) }),
        );

        dispatcher.dispatch(private_message(1, "/ECHO a b"), None).await.unwrap();
        assert_eq!(*got.lock(), ["a b"]);
    }

    #[tokio::test]
    async fn singletons_and_bot_are_injected() {
        let dispatcher = Dispatcher::new();
        dispatcher.dependencies().singleton(String::from("prefix"));
        let bot = RecordingBot::new();
        let calls = bot.calls();
        dispatcher.register(Matcher::on_message().handler(
            |prefix: Shared<String>, bot: tether_core::BoxedBot, event: MessageEvent| async move {
                bot.reply(&event, prefix.as_str()).await.map(|_| ())
            },
        ));

        dispatcher
            .dispatch(private_message(9, "hi"), Some(Arc::new(bot)))
            .await
            .unwrap();

        let calls = calls.lock();
        assert_eq!(calls[0].0, "send_private_msg");
        assert_eq!(calls[0].1["user_id"], 9);
    }

    #[tokio::test]
    async fn middleware_order_and_short_circuit() {
        let dispatcher = Dispatcher::new();
        let log: Log = Arc::default();

        let outer = Arc::clone(&log);
        dispatcher.middleware_fn("outer", move |ctx, next: Next| {
            let outer = Arc::clone(&outer);
            async move {
                outer.lock().push("outer:before".into());
                let result = next.run(ctx).await;
                outer.lock().push("outer:after".into());
                result
            }
        });
        let inner = Arc::clone(&log);
        dispatcher.middleware_fn("inner", move |ctx: Arc<DispatchContext>, next: Next| {
            let inner = Arc::clone(&inner);
            async move {
                inner.lock().push("inner".into());
                if ctx.event().raw_text() == "blocked" {
                    return Err(DispatchError::middleware("inner", "blocked text"));
                }
                next.run(ctx).await
            }
        });
        dispatcher.register(Matcher::new().handler_boxed(recorder(&log, "handler")));

        dispatcher.dispatch(private_message(1, "hi"), None).await.unwrap();
        assert_eq!(*log.lock(), ["outer:before", "inner", "handler", "outer:after"]);

        log.lock().clear();
        let err = dispatcher.dispatch(private_message(1, "blocked"), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::Middleware { .. }));
        assert_eq!(*log.lock(), ["outer:before", "inner", "outer:after"]);
    }

    async fn explode() {
        panic!("boom");
    }

    #[tokio::test]
    async fn recovery_catches_panics() {
        let dispatcher = Dispatcher::new();
        dispatcher.middleware(recovery());
        dispatcher.register(Matcher::new().handler(explode));

        let err = dispatcher.dispatch(private_message(1, "hi"), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::Panicked(ref m) if m == "boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_the_cycle() {
        let dispatcher = Dispatcher::new();
        dispatcher.middleware(timeout(Duration::from_secs(1)));
        dispatcher.register(
            Matcher::new().handler(|| async { tokio::time::sleep(Duration::from_secs(5)).await }),
        );

        let err = dispatcher.dispatch(private_message(1, "hi"), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::TimedOut(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_per_user() {
        let dispatcher = Dispatcher::new();
        dispatcher.middleware(rate_limit(2, Duration::from_secs(10)));
        dispatcher.register(Matcher::new().rule(Predicate::always()).handler(|| async {}));

        assert!(dispatcher.dispatch(private_message(1, "a"), None).await.is_ok());
        assert!(dispatcher.dispatch(private_message(1, "b"), None).await.is_ok());
        let err = dispatcher.dispatch(private_message(1, "c"), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::RateLimited { user_id: 1 }));
        assert!(dispatcher.dispatch(private_message(2, "d"), None).await.is_ok());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(dispatcher.dispatch(private_message(1, "e"), None).await.is_ok());
    }

    #[tokio::test]
    async fn rate_limit_ignores_notices() {
        let dispatcher = Dispatcher::new();
        dispatcher.middleware(rate_limit(1, Duration::from_secs(10)));
        dispatcher.register(Matcher::new().rule(Predicate::always()).handler(|| async {}));

        for _ in 0..3 {
            assert!(dispatcher.dispatch(notice("poke"), None).await.is_ok());
        }
        assert!(dispatcher.dispatch(private_message(5, "a"), None).await.is_ok());
        let err = dispatcher.dispatch(private_message(5, "b"), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::RateLimited { user_id: 5 }));
    }

    #[tokio::test]
    async fn on_registers_from_parts_and_unregisters() {
        let dispatcher = Dispatcher::new();
        let log: Log = Arc::default();
        let handle = dispatcher.on(
            crate::rule::keyword(["hi"]),
            crate::permission::everyone(),
            10,
            false,
            [recorder(&log, "a"), recorder(&log, "b")],
        );

        dispatcher.dispatch(private_message(1, "hi"), None).await.unwrap();
        assert_eq!(*log.lock(), ["a", "b"]);

        assert!(dispatcher.unregister(handle));
        assert!(!dispatcher.unregister(handle));
        assert!(dispatcher.matchers().is_empty());
    }
}
