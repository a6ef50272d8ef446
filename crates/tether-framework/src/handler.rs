//! Handlers: async functions whose parameters are resolved per dispatch cycle.
//!
//! Any `async fn` (or closure returning a future) taking up to eight [`Inject`] parameters
//! and returning `()` or `Result<(), E>` is a handler:
//!
//! ```rust,ignore
//! async fn echo(event: MessageEvent, bot: BoxedBot) -> anyhow::Result<()> {
//!     bot.reply(&event, event.payload().message().clone()).await?;
//!     Ok(())
//! }
//!
//! dispatcher.register(Matcher::on_command(false, ["/echo"]).handler(echo));
//! ```
//!
//! The parameter list is read from the function signature once, when the handler is built.
//! At dispatch time every parameter is resolved first; if a required one cannot be resolved
//! the handler is skipped with [`DispatchError::UnresolvedDependency`].

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::dependency::{Dependency, ResolveScope};
use crate::error::{DispatchError, DispatchResult};
use crate::inject::{Inject, Param};

// ============================================================================
// Return values
// ============================================================================

/// Return types accepted from handler functions.
pub trait HandlerResult: Send + 'static {
    fn into_result(self) -> anyhow::Result<()>;
}

impl HandlerResult for () {
    fn into_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E> HandlerResult for Result<(), E>
where
    E: Into<anyhow::Error> + Send + 'static,
{
    fn into_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

// ============================================================================
// HandlerFn
// ============================================================================

/// Implemented for functions usable as handlers; `T` is the tuple of parameter types.
pub trait HandlerFn<T>: Clone + Send + Sync + 'static {
    /// Parameters in declaration order.
    fn params() -> Vec<Param>;

    /// Calls the function with resolved values, one per parameter.
    fn invoke(self, dependencies: Vec<Option<Dependency>>) -> BoxFuture<'static, anyhow::Result<()>>;
}

macro_rules! impl_handler_fn {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, Fut, Out, $($ty,)*> HandlerFn<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Out> + Send + 'static,
            Out: HandlerResult,
            $( $ty: Inject, )*
        {
            fn params() -> Vec<Param> {
                vec![$($ty::param(),)*]
            }

            fn invoke(
                self,
                dependencies: Vec<Option<Dependency>>,
            ) -> BoxFuture<'static, anyhow::Result<()>> {
                let mut dependencies = dependencies.into_iter();
                $(
                    let Some($ty) = dependencies.next().and_then($ty::inject) else {
                        return Box::pin(async {
                            Err(anyhow::anyhow!(
                                "resolved value does not fit parameter {}",
                                type_name::<$ty>()
                            ))
                        });
                    };
                )*

                Box::pin(async move { (self)($($ty,)*).await.into_result() })
            }
        }
    };
}

impl_handler_fn!();
impl_handler_fn!(T1);
impl_handler_fn!(T1, T2);
impl_handler_fn!(T1, T2, T3);
impl_handler_fn!(T1, T2, T3, T4);
impl_handler_fn!(T1, T2, T3, T4, T5);
impl_handler_fn!(T1, T2, T3, T4, T5, T6);
impl_handler_fn!(T1, T2, T3, T4, T5, T6, T7);
impl_handler_fn!(T1, T2, T3, T4, T5, T6, T7, T8);

// ============================================================================
// Handler
// ============================================================================

type ErasedCall =
    dyn Fn(Vec<Option<Dependency>>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A type-erased handler with its declared parameters.
#[derive(Clone)]
pub struct Handler {
    name: Arc<str>,
    params: Arc<[Param]>,
    call: Arc<ErasedCall>,
}

impl Handler {
    /// Wraps a handler function, named after its type.
    pub fn new<F, T>(f: F) -> Self
    where
        F: HandlerFn<T>,
        T: 'static,
    {
        Self::named(type_name::<F>(), f)
    }

    pub fn named<F, T>(name: impl Into<String>, f: F) -> Self
    where
        F: HandlerFn<T>,
        T: 'static,
    {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            params: Arc::from(F::params()),
            call: Arc::new(move |deps: Vec<Option<Dependency>>| f.clone().invoke(deps)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Resolves every parameter, then calls the function.
    pub(crate) async fn run(&self, scope: &ResolveScope) -> DispatchResult<()> {
        let mut dependencies = Vec::with_capacity(self.params.len());
        for param in self.params.iter() {
            let resolved = scope.resolve(&param.capability);
            if resolved.is_none() && !param.optional {
                return Err(DispatchError::UnresolvedDependency {
                    handler: self.name.to_string(),
                    capability: param.capability.clone(),
                });
            }
            dependencies.push(resolved);
        }

        (self.call)(dependencies)
            .await
            .map_err(|error| DispatchError::Handler {
                handler: self.name.to_string(),
                error,
            })
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DispatchContext;
    use crate::dependency::{Capability, DependencyRegistry};
    use crate::inject::{MessageEvent, NoticeEvent};
    use crate::testing::private_message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_core::InboundEvent;

    fn scope_for(event: Arc<InboundEvent>) -> ResolveScope {
        let ctx = Arc::new(DispatchContext::new(1, event, None));
        ResolveScope::new(Arc::new(DependencyRegistry::with_defaults()), ctx)
    }

    #[test]
    fn params_follow_signature() {
        let handler = Handler::new(|_e: Arc<InboundEvent>, _m: Option<MessageEvent>| async {});

        assert_eq!(handler.params().len(), 2);
        assert_eq!(handler.params()[0].capability, Capability::Event);
        assert!(handler.params()[1].optional);
    }

    #[test]
    fn runs_with_resolved_values() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handler = Handler::named("count", move |event: MessageEvent| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(event.payload().raw_message.len(), Ordering::SeqCst);
            }
        });

        tokio_test::block_on(handler.run(&scope_for(private_message(1, "abc")))).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn missing_parameter_skips_handler() {
        let handler = Handler::named("notice_only", |_n: NoticeEvent| async {});
        let err = tokio_test::block_on(handler.run(&scope_for(private_message(1, "x"))))
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::UnresolvedDependency { capability: Capability::NoticeEvent, .. }
        ));
    }

    #[test]
    fn errors_are_wrapped() {
        let handler = Handler::named("fails", || async { Err::<(), _>(anyhow::anyhow!("boom")) });
        let err = tokio_test::block_on(handler.run(&scope_for(private_message(1, "x"))))
            .unwrap_err();

        assert_eq!(err.to_string(), "handler 'fails' failed: boom");
    }
}
