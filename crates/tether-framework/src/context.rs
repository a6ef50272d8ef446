//! Per-cycle dispatch context.
//!
//! One [`DispatchContext`] is created for every inbound event and shared (as an `Arc`) by the
//! middleware chain, rule evaluation, and every handler of that cycle. It owns:
//!
//! - the event and the bot that received it,
//! - the propagation flag ([`stop_propagation`](DispatchContext::stop_propagation)),
//! - a type-keyed state map that rules use to hand data to handlers (for example
//!   [`CommandArgs`](crate::rule::CommandArgs)).
//!
//! Nothing in the context outlives the cycle.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tether_core::{BoxedBot, InboundEvent};

pub struct DispatchContext {
    cycle: u64,
    event: Arc<InboundEvent>,
    bot: Option<BoxedBot>,
    is_propagating: AtomicBool,
    state: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    started: Instant,
}

impl DispatchContext {
    pub fn new(cycle: u64, event: Arc<InboundEvent>, bot: Option<BoxedBot>) -> Self {
        Self {
            cycle,
            event,
            bot,
            is_propagating: AtomicBool::new(true),
            state: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// Sequence number of this dispatch cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn event(&self) -> &InboundEvent {
        &self.event
    }

    /// The shared event handle; every consumer of this cycle sees the same instance.
    pub fn event_arc(&self) -> &Arc<InboundEvent> {
        &self.event
    }

    pub fn bot(&self) -> Option<&BoxedBot> {
        self.bot.as_ref()
    }

    /// Time since the cycle started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_propagating(&self) -> bool {
        self.is_propagating.load(Ordering::SeqCst)
    }

    /// Stops the matcher scan after the current matcher finishes.
    pub fn stop_propagation(&self) {
        self.is_propagating.store(false, Ordering::SeqCst);
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Stores a value, replacing any previous value of the same type.
    pub fn set_state<T: Send + Sync + 'static>(&self, value: T) {
        self.state.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a clone of the stored value of type `T`.
    pub fn get_state<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn has_state<T: Send + Sync + 'static>(&self) -> bool {
        self.state.lock().contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns the stored value of type `T`.
    pub fn take_state<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("cycle", &self.cycle)
            .field("kind", &self.event.kind())
            .field("is_propagating", &self.is_propagating())
            .finish_non_exhaustive()
    }
}
