//! # Tether Framework
//!
//! The dispatch pipeline: every decoded event runs through middlewares, then matchers, then
//! handlers whose parameters are resolved from the event.
//!
//! ```text
//! InboundEvent ──▶ Dispatcher::dispatch
//!                    │
//!                    ├─▶ middleware chain (first registered = outermost)
//!                    │     └─▶ matcher scan, descending priority
//!                    │           ├─ rules (all) + permissions (any)
//!                    │           ├─ handlers, parameters from the ResolveScope
//!                    │           └─ stop on block / stop_propagation
//!                    └─▶ DispatchOutcome | DispatchError (last error wins)
//! ```
//!
//! - [`Matcher`] / [`MatcherRegistry`]: rule + permission + priority + handlers
//! - [`rule`] and [`permission`]: built-in predicates, composable with [`all`], [`any`], [`not`]
//! - [`Middleware`]: tower-composed steps around the scan, with built-ins in [`middleware`]
//! - [`DependencyRegistry`] / [`Inject`]: capability-based parameter resolution

pub mod condition;
pub mod context;
pub mod dependency;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod inject;
pub mod matcher;
pub mod middleware;
pub mod permission;
pub mod registry;
pub mod rule;

pub use condition::{Condition, Permission, Predicate, Rule, all, any, not};
pub use context::DispatchContext;
pub use dependency::{Capability, Dependency, DependencyRegistry, Provider, ResolveScope};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{DispatchError, DispatchResult};
pub use handler::{Handler, HandlerFn, HandlerResult};
pub use inject::{Inject, MessageEvent, MetaEvent, NoticeEvent, Param, RequestEvent, Shared};
pub use matcher::{DEFAULT_PRIORITY, Matcher};
pub use middleware::{Middleware, Next, from_fn};
pub use permission::Superusers;
pub use registry::{MatcherHandle, MatcherRegistry};
pub use rule::{CommandArgs, RegexMatch};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tether_core::{ApiResult, Bot, Decoded, InboundEvent, decode};

    fn event(frame: Value) -> Arc<InboundEvent> {
        match decode(frame.to_string().as_bytes()) {
            Ok(Decoded::Event(event)) => Arc::new(event),
            other => panic!("not an event: {other:?}"),
        }
    }

    pub fn private_message(user_id: i64, text: &str) -> Arc<InboundEvent> {
        event(json!({
            "post_type": "message",
            "message_type": "private",
            "sub_type": "friend",
            "self_id": 10000,
            "time": 1_700_000_000,
            "message_id": 1,
            "user_id": user_id,
            "raw_message": text,
            "message": [{ "type": "text", "data": { "text": text } }],
            "sender": { "user_id": user_id, "nickname": "tester" },
        }))
    }

    pub fn group_message(user_id: i64, group_id: i64, role: &str, text: &str) -> Arc<InboundEvent> {
        event(json!({
            "post_type": "message",
            "message_type": "group",
            "sub_type": "normal",
            "self_id": 10000,
            "message_id": 2,
            "user_id": user_id,
            "group_id": group_id,
            "raw_message": text,
            "sender": { "user_id": user_id, "nickname": "tester", "role": role },
        }))
    }

    pub fn notice(notice_type: &str) -> Arc<InboundEvent> {
        event(json!({
            "post_type": "notice",
            "notice_type": notice_type,
            "self_id": 10000,
            "user_id": 5,
        }))
    }

    type Calls = Arc<Mutex<Vec<(String, Value)>>>;

    /// A bot that records calls and answers with a fixed payload.
    #[derive(Default)]
    pub struct RecordingBot {
        calls: Calls,
    }

    impl RecordingBot {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Calls {
            Arc::clone(&self.calls)
        }
    }

    #[async_trait]
    impl Bot for RecordingBot {
        fn self_id(&self) -> Option<i64> {
            Some(10000)
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value> {
            self.calls.lock().push((action.to_string(), params));
            Ok(json!({ "message_id": 1 }))
        }
    }
}
