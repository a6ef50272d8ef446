//! Middleware chain around the matcher scan.
//!
//! Middlewares are composed as tower services, each wrapping the rest of the chain:
//!
//! ```text
//! first ──▶ second ──▶ … ──▶ matcher scan
//!   ◀──────────◀──────────────────┘
//! ```
//!
//! The first registered middleware is the outermost one. A middleware continues the chain
//! with [`Next::run`] and can short-circuit by returning without calling it.
//!
//! ```rust,ignore
//! dispatcher.middleware_fn("only_groups", |ctx, next| async move {
//!     if !ctx.event().is_to_group() {
//!         return Err(DispatchError::middleware("only_groups", "private chat"));
//!     }
//!     next.run(ctx).await
//! });
//! ```

pub mod builtin;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};

use crate::context::DispatchContext;
use crate::dispatcher::DispatchOutcome;
use crate::error::{DispatchError, DispatchResult};

pub use builtin::{logging, rate_limit, recovery, timeout};

/// The type-erased remainder of the chain.
pub type ChainService = BoxCloneSyncService<Arc<DispatchContext>, DispatchOutcome, DispatchError>;

/// The continuation handed to a middleware.
pub struct Next {
    inner: ChainService,
}

impl Next {
    /// Runs the rest of the chain.
    pub async fn run(self, ctx: Arc<DispatchContext>) -> DispatchResult<DispatchOutcome> {
        self.inner.oneshot(ctx).await
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next")
    }
}

/// A step of the dispatch chain.
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn process(
        &self,
        ctx: Arc<DispatchContext>,
        next: Next,
    ) -> BoxFuture<'static, DispatchResult<DispatchOutcome>>;
}

/// A middleware built from a closure, see [`from_fn`].
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Arc<DispatchContext>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult<DispatchOutcome>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(
        &self,
        ctx: Arc<DispatchContext>,
        next: Next,
    ) -> BoxFuture<'static, DispatchResult<DispatchOutcome>> {
        Box::pin((self.f)(ctx, next))
    }
}

/// Creates a middleware from an async closure.
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(Arc<DispatchContext>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult<DispatchOutcome>> + Send + 'static,
{
    FnMiddleware {
        name: name.into(),
        f,
    }
}

// ============================================================================
// Composition
// ============================================================================

#[derive(Clone)]
struct MiddlewareService {
    middleware: Arc<dyn Middleware>,
    inner: ChainService,
}

impl Service<Arc<DispatchContext>> for MiddlewareService {
    type Response = DispatchOutcome;
    type Error = DispatchError;
    type Future = BoxFuture<'static, DispatchResult<DispatchOutcome>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<DispatchContext>) -> Self::Future {
        let next = Next {
            inner: self.inner.clone(),
        };
        self.middleware.process(ctx, next)
    }
}

/// Wraps `innermost` so that `middlewares[0]` runs first.
pub(crate) fn compose(middlewares: &[Arc<dyn Middleware>], innermost: ChainService) -> ChainService {
    middlewares.iter().rev().fold(innermost, |inner, middleware| {
        BoxCloneSyncService::new(MiddlewareService {
            middleware: Arc::clone(middleware),
            inner,
        })
    })
}
