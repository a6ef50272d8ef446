//! Built-in permissions.
//!
//! Group-role permissions read the sender role attached to message events, so they never pass
//! for notices, requests, meta events, or private messages.

use std::collections::HashSet;
use std::sync::Arc;

use tether_core::{InboundEvent, Role};

use crate::condition::{Permission, Predicate, any};
use crate::context::DispatchContext;

/// The configured superuser ids, registered as a dependency singleton by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Superusers(pub Vec<i64>);

impl Superusers {
    pub fn contains(&self, user_id: i64) -> bool {
        self.0.contains(&user_id)
    }
}

/// Always passes.
pub fn everyone() -> Permission {
    Predicate::always()
}

/// Passes for message events sent by one of `ids`.
pub fn superuser(ids: impl IntoIterator<Item = i64>) -> Permission {
    let ids: Arc<HashSet<i64>> = Arc::new(ids.into_iter().collect());
    Predicate::new(move |_: &DispatchContext, event: &InboundEvent| {
        event.as_message().is_some_and(|m| ids.contains(&m.user_id))
    })
}

fn role_is(role: Role) -> Permission {
    Predicate::new(move |_: &DispatchContext, event: &InboundEvent| {
        event.as_message().and_then(|m| m.sender.role()) == Some(role)
    })
}

pub fn group_owner() -> Permission {
    role_is(Role::Owner)
}

pub fn group_admin() -> Permission {
    role_is(Role::Admin)
}

pub fn group_member() -> Permission {
    role_is(Role::Member)
}

/// Superusers, the group owner, or group admins.
pub fn group_admin_or_owner(superusers: impl IntoIterator<Item = i64>) -> Permission {
    any([superuser(superusers), group_owner(), group_admin()])
}
