//! Dependency resolution for handler parameters.
//!
//! Handlers declare what they need as [`Capability`] tags (derived from their parameter types,
//! see [`Inject`](crate::inject::Inject)). For each dispatch cycle a [`ResolveScope`] answers
//! those requests:
//!
//! ```text
//! Capability ──▶ singletons (Value tags only, exact type)
//!            └─▶ providers, in registration order; first result that satisfies the tag wins
//!                  └─▶ memoized for the rest of the cycle
//! ```
//!
//! The default providers, in order, supply the context, the event, the bot, and the
//! [`CommandArgs`] left by a command rule.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tether_core::{BoxedBot, EventKind, InboundEvent};
use tracing::trace;

use crate::context::DispatchContext;
use crate::rule::CommandArgs;

// =============================================================================
// Capability
// =============================================================================

/// What a handler parameter asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    Context,
    /// Any event.
    Event,
    /// The event, only if it is a message.
    MessageEvent,
    NoticeEvent,
    RequestEvent,
    MetaEvent,
    Bot,
    CommandArgs,
    /// A value of a specific type, from a singleton or a custom provider.
    Value {
        type_id: TypeId,
        type_name: &'static str,
    },
}

impl Capability {
    pub fn of<T: 'static>() -> Self {
        Self::Value {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Command args depend on the matcher being evaluated, so they are never memoized.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Self::CommandArgs)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context => f.write_str("Context"),
            Self::Event => f.write_str("Event"),
            Self::MessageEvent => f.write_str("MessageEvent"),
            Self::NoticeEvent => f.write_str("NoticeEvent"),
            Self::RequestEvent => f.write_str("RequestEvent"),
            Self::MetaEvent => f.write_str("MetaEvent"),
            Self::Bot => f.write_str("Bot"),
            Self::CommandArgs => f.write_str("CommandArgs"),
            Self::Value { type_name, .. } => write!(f, "Value<{type_name}>"),
        }
    }
}

// =============================================================================
// Dependency
// =============================================================================

/// A resolved value.
#[derive(Clone)]
pub enum Dependency {
    Context(Arc<DispatchContext>),
    Event(Arc<InboundEvent>),
    Bot(BoxedBot),
    CommandArgs(CommandArgs),
    Value(Arc<dyn Any + Send + Sync>),
}

impl Dependency {
    /// Wraps a value for a [`Capability::Value`] request.
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Self::Value(Arc::new(value))
    }

    /// Whether this value can be handed to a parameter asking for `capability`.
    pub fn satisfies(&self, capability: &Capability) -> bool {
        match (self, capability) {
            (Self::Context(_), Capability::Context) => true,
            (Self::Event(_), Capability::Event) => true,
            (Self::Event(e), Capability::MessageEvent) => e.kind() == EventKind::Message,
            (Self::Event(e), Capability::NoticeEvent) => e.kind() == EventKind::Notice,
            (Self::Event(e), Capability::RequestEvent) => e.kind() == EventKind::Request,
            (Self::Event(e), Capability::MetaEvent) => e.kind() == EventKind::Meta,
            (Self::Bot(_), Capability::Bot) => true,
            (Self::CommandArgs(_), Capability::CommandArgs) => true,
            (Self::Value(v), Capability::Value { type_id, .. }) => (**v).type_id() == *type_id,
            _ => false,
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context(ctx) => f.debug_tuple("Context").field(&ctx.cycle()).finish(),
            Self::Event(e) => f.debug_tuple("Event").field(&e.kind()).finish(),
            Self::Bot(bot) => f.debug_tuple("Bot").field(&bot.self_id()).finish(),
            Self::CommandArgs(args) => f.debug_tuple("CommandArgs").field(args).finish(),
            Self::Value(_) => f.write_str("Value(..)"),
        }
    }
}

// =============================================================================
// Providers
// =============================================================================

/// Produces a dependency from the dispatch context, or nothing.
pub trait Provider: Send + Sync + 'static {
    fn provide(&self, ctx: &Arc<DispatchContext>) -> Option<Dependency>;
}

impl<F> Provider for F
where
    F: Fn(&Arc<DispatchContext>) -> Option<Dependency> + Send + Sync + 'static,
{
    fn provide(&self, ctx: &Arc<DispatchContext>) -> Option<Dependency> {
        self(ctx)
    }
}

fn provide_context(ctx: &Arc<DispatchContext>) -> Option<Dependency> {
    Some(Dependency::Context(Arc::clone(ctx)))
}

fn provide_event(ctx: &Arc<DispatchContext>) -> Option<Dependency> {
    Some(Dependency::Event(Arc::clone(ctx.event_arc())))
}

fn provide_bot(ctx: &Arc<DispatchContext>) -> Option<Dependency> {
    ctx.bot().cloned().map(Dependency::Bot)
}

fn provide_command_args(ctx: &Arc<DispatchContext>) -> Option<Dependency> {
    ctx.get_state::<CommandArgs>().map(Dependency::CommandArgs)
}

// =============================================================================
// Registry
// =============================================================================

/// Singletons and providers, populated at startup.
pub struct DependencyRegistry {
    singletons: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    providers: RwLock<Vec<(String, Arc<dyn Provider>)>>,
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl DependencyRegistry {
    /// An empty registry without the default providers.
    pub fn new() -> Self {
        Self {
            singletons: RwLock::new(HashMap::new()),
            providers: RwLock::new(Vec::new()),
        }
    }

    /// A registry with the context, event, bot and command-args providers.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.provider("context", provide_context);
        registry.provider("event", provide_event);
        registry.provider("bot", provide_bot);
        registry.provider("command_args", provide_command_args);
        registry
    }

    /// Registers a static value shared by every handler.
    ///
    /// # Panics
    ///
    /// Panics if a singleton of the same type is already registered.
    pub fn singleton<T: Send + Sync + 'static>(&self, value: T) {
        self.singleton_arc(Arc::new(value));
    }

    /// Like [`singleton`](Self::singleton) for a value that is already shared.
    ///
    /// # Panics
    ///
    /// Panics if a singleton of the same type is already registered.
    pub fn singleton_arc<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        let mut singletons = self.singletons.write();
        if singletons.contains_key(&TypeId::of::<T>()) {
            panic!("duplicate singleton registration for {}", type_name::<T>());
        }
        singletons.insert(TypeId::of::<T>(), value);
    }

    pub fn get_singleton<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.singletons
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Appends a provider; providers are consulted in registration order.
    pub fn provider(&self, name: impl Into<String>, provider: impl Provider) {
        self.providers.write().push((name.into(), Arc::new(provider)));
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.read().iter().map(|(n, _)| n.clone()).collect()
    }

    fn lookup(&self, capability: &Capability, ctx: &Arc<DispatchContext>) -> Option<Dependency> {
        if let Capability::Value { type_id, .. } = capability {
            if let Some(value) = self.singletons.read().get(type_id) {
                return Some(Dependency::Value(Arc::clone(value)));
            }
        }

        // Clone the list so providers run without the lock held.
        let providers: Vec<(String, Arc<dyn Provider>)> = self.providers.read().clone();
        providers.iter().find_map(|(name, provider)| {
            provider
                .provide(ctx)
                .filter(|dep| dep.satisfies(capability))
                .inspect(|_| trace!(provider = %name, %capability, "Dependency resolved"))
        })
    }
}

impl fmt::Debug for DependencyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyRegistry")
            .field("singletons", &self.singletons.read().len())
            .field("providers", &self.provider_names())
            .finish()
    }
}

// =============================================================================
// Scope
// =============================================================================

/// Resolution for one dispatch cycle, with memoization.
pub struct ResolveScope {
    registry: Arc<DependencyRegistry>,
    ctx: Arc<DispatchContext>,
    cache: Mutex<HashMap<Capability, Option<Dependency>>>,
}

impl ResolveScope {
    pub fn new(registry: Arc<DependencyRegistry>, ctx: Arc<DispatchContext>) -> Self {
        Self {
            registry,
            ctx,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<DispatchContext> {
        &self.ctx
    }

    pub fn resolve(&self, capability: &Capability) -> Option<Dependency> {
        if !capability.is_cacheable() {
            return self.registry.lookup(capability, &self.ctx);
        }
        if let Some(hit) = self.cache.lock().get(capability) {
            return hit.clone();
        }

        let resolved = self.registry.lookup(capability, &self.ctx);
        self.cache
            .lock()
            .insert(capability.clone(), resolved.clone());
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{notice, private_message};

    fn scope(registry: DependencyRegistry, event: Arc<InboundEvent>) -> ResolveScope {
        let ctx = Arc::new(DispatchContext::new(1, event, None));
        ResolveScope::new(Arc::new(registry), ctx)
    }

    #[test]
    fn event_capabilities_follow_kind() {
        let scope = scope(DependencyRegistry::with_defaults(), private_message(1, "hi"));

        assert!(scope.resolve(&Capability::Event).is_some());
        assert!(scope.resolve(&Capability::MessageEvent).is_some());
        assert!(scope.resolve(&Capability::NoticeEvent).is_none());
        assert!(scope.resolve(&Capability::Context).is_some());
        assert!(scope.resolve(&Capability::Bot).is_none());
    }

    #[test]
    fn singletons_win_over_providers() {
        let registry = DependencyRegistry::with_defaults();
        registry.provider("late", |_: &Arc<DispatchContext>| {
            Some(Dependency::value(1u32))
        });
        registry.singleton(7u32);
        let scope = scope(registry, notice("poke"));

        let Some(Dependency::Value(v)) = scope.resolve(&Capability::of::<u32>()) else {
            panic!("u32 not resolved");
        };
        assert_eq!(v.downcast_ref::<u32>(), Some(&7));
    }

    #[test]
    fn first_compatible_provider_wins() {
        let registry = DependencyRegistry::new();
        registry.provider("wrong", |_: &Arc<DispatchContext>| {
            Some(Dependency::value("str"))
        });
        registry.provider("first", |_: &Arc<DispatchContext>| Some(Dependency::value(1i64)));
        registry.provider("second", |_: &Arc<DispatchContext>| Some(Dependency::value(2i64)));
        let scope = scope(registry, notice("poke"));

        let Some(Dependency::Value(v)) = scope.resolve(&Capability::of::<i64>()) else {
            panic!("i64 not resolved");
        };
        assert_eq!(v.downcast_ref::<i64>(), Some(&1));
    }

    #[test]
    fn results_are_memoized_per_scope() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let registry = DependencyRegistry::new();
        let counter = Arc::clone(&calls);
        registry.provider("counting", move |_: &Arc<DispatchContext>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(Dependency::value(5u8))
        });
        let scope = scope(registry, notice("poke"));

        scope.resolve(&Capability::of::<u8>());
        scope.resolve(&Capability::of::<u8>());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "duplicate singleton")]
    fn duplicate_singleton_panics() {
        let registry = DependencyRegistry::new();
        registry.singleton(1u32);
        registry.singleton(2u32);
    }
}
