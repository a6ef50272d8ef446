//! Handler parameter types.
//!
//! Every type that can appear as a handler parameter implements [`Inject`]: it names the
//! [`Capability`] it needs and converts the resolved [`Dependency`] back into itself.
//!
//! | Parameter | Capability |
//! |-----------|------------|
//! | `Arc<InboundEvent>` | `Event` |
//! | [`MessageEvent`], [`NoticeEvent`], [`RequestEvent`], [`MetaEvent`] | matching event kind |
//! | `Arc<DispatchContext>` | `Context` |
//! | [`BoxedBot`] | `Bot` |
//! | [`CommandArgs`] | `CommandArgs` |
//! | [`Shared<T>`] | `Value(T)` |
//! | `Option<P>` | same as `P`, but never fails to resolve |

use std::ops::Deref;
use std::sync::Arc;

use tether_core::{
    BoxedBot, InboundEvent, MessagePayload, MetaPayload, NoticePayload, RequestPayload,
};

use crate::context::DispatchContext;
use crate::dependency::{Capability, Dependency};
use crate::rule::CommandArgs;

/// A declared handler parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub capability: Capability,
    /// Optional parameters receive `None` instead of skipping the handler.
    pub optional: bool,
}

impl Param {
    pub fn required(capability: Capability) -> Self {
        Self {
            capability,
            optional: false,
        }
    }
}

/// A type that can be supplied to a handler.
pub trait Inject: Sized + Send + 'static {
    fn param() -> Param;

    /// Converts a resolved dependency; `None` if it does not fit.
    fn inject(dependency: Option<Dependency>) -> Option<Self>;
}

impl Inject for Arc<InboundEvent> {
    fn param() -> Param {
        Param::required(Capability::Event)
    }

    fn inject(dependency: Option<Dependency>) -> Option<Self> {
        match dependency? {
            Dependency::Event(event) => Some(event),
            _ => None,
        }
    }
}

impl Inject for Arc<DispatchContext> {
    fn param() -> Param {
        Param::required(Capability::Context)
    }

    fn inject(dependency: Option<Dependency>) -> Option<Self> {
        match dependency? {
            Dependency::Context(ctx) => Some(ctx),
            _ => None,
        }
    }
}

impl Inject for BoxedBot {
    fn param() -> Param {
        Param::required(Capability::Bot)
    }

    fn inject(dependency: Option<Dependency>) -> Option<Self> {
        match dependency? {
            Dependency::Bot(bot) => Some(bot),
            _ => None,
        }
    }
}

impl Inject for CommandArgs {
    fn param() -> Param {
        Param::required(Capability::CommandArgs)
    }

    fn inject(dependency: Option<Dependency>) -> Option<Self> {
        match dependency? {
            Dependency::CommandArgs(args) => Some(args),
            _ => None,
        }
    }
}

impl<T: Inject> Inject for Option<T> {
    fn param() -> Param {
        Param {
            optional: true,
            ..T::param()
        }
    }

    fn inject(dependency: Option<Dependency>) -> Option<Self> {
        Some(dependency.and_then(|d| T::inject(Some(d))))
    }
}

// =============================================================================
// Kind-restricted events
// =============================================================================

macro_rules! event_param {
    ($(#[$meta:meta])* $name:ident, $capability:ident, $payload:ty, $accessor:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name(Arc<InboundEvent>);

        impl $name {
            /// The shared event handle.
            pub fn event(&self) -> &Arc<InboundEvent> {
                &self.0
            }

            pub fn payload(&self) -> &$payload {
                match self.0.$accessor() {
                    Some(payload) => payload,
                    None => unreachable!("{} holds an event of another kind", stringify!($name)),
                }
            }
        }

        impl Deref for $name {
            type Target = InboundEvent;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl Inject for $name {
            fn param() -> Param {
                Param::required(Capability::$capability)
            }

            fn inject(dependency: Option<Dependency>) -> Option<Self> {
                match dependency? {
                    Dependency::Event(event) if event.$accessor().is_some() => Some(Self(event)),
                    _ => None,
                }
            }
        }
    };
}

event_param!(
    /// The event, when it is a message.
    MessageEvent,
    MessageEvent,
    MessagePayload,
    as_message
);
event_param!(
    /// The event, when it is a notice.
    NoticeEvent,
    NoticeEvent,
    NoticePayload,
    as_notice
);
event_param!(
    /// The event, when it is a request.
    RequestEvent,
    RequestEvent,
    RequestPayload,
    as_request
);
event_param!(
    /// The event, when it is a meta event.
    MetaEvent,
    MetaEvent,
    MetaPayload,
    as_meta
);

// =============================================================================
// Shared values
// =============================================================================

/// A value registered as a singleton or produced by a custom provider.
#[derive(Debug)]
pub struct Shared<T>(pub Arc<T>);

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Send + Sync + 'static> Inject for Shared<T> {
    fn param() -> Param {
        Param::required(Capability::of::<T>())
    }

    fn inject(dependency: Option<Dependency>) -> Option<Self> {
        match dependency? {
            Dependency::Value(value) => value.downcast::<T>().ok().map(Shared),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{notice, private_message};

    #[test]
    fn optional_params_never_fail() {
        assert!(Option::<MessageEvent>::param().optional);
        assert_eq!(
            Option::<MessageEvent>::param().capability,
            Capability::MessageEvent
        );
        assert!(matches!(Option::<BoxedBot>::inject(None), Some(None)));
    }

    #[test]
    fn kind_restricted_events() {
        let msg = Dependency::Event(private_message(1, "hi"));
        let note = Dependency::Event(notice("poke"));

        let event = MessageEvent::inject(Some(msg)).unwrap();
        assert_eq!(event.payload().raw_message, "hi");
        assert!(MessageEvent::inject(Some(note.clone())).is_none());
        assert_eq!(NoticeEvent::inject(Some(note)).unwrap().payload().notice_type, "poke");
    }

    #[test]
    fn shared_downcasts() {
        let value = Shared::<u32>::inject(Some(Dependency::value(3u32))).unwrap();
        assert_eq!(*value, 3);
        assert!(Shared::<u64>::inject(Some(Dependency::value(3u32))).is_none());
    }
}
