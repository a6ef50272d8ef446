//! Request/reply correlation over the live session.
//!
//! Every call is tagged with a fresh `echo` token and parked in the pending table until the
//! matching reply arrives, the call times out, or its session ends:
//!
//! ```text
//! call ──▶ register(echo) ──▶ manager.send ──▶ await reply (timeout)
//!                                                   ▲
//! receive loop ──▶ decode ──▶ Reply{echo} ──▶ resolve(echo)
//! ```
//!
//! The token is registered before the request is sent, so a fast reply cannot be lost. The
//! entry is removed on every exit path of [`Correlator::call`], including cancellation of the
//! calling future.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tether_core::{ApiError, ApiRequest, ApiResponse, ApiResult};
use tether_transport::{ConnectionManager, Frame, SessionId};
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, trace};
use uuid::Uuid;

struct PendingCall {
    /// Session whose queue took the request; unset until the send succeeds.
    session: Option<SessionId>,
    reply: oneshot::Sender<ApiResult<ApiResponse>>,
}

type PendingTable = Mutex<HashMap<String, PendingCall>>;

/// Turns the fire-and-forget session into awaited calls.
pub struct Correlator {
    manager: ConnectionManager,
    pending: PendingTable,
}

impl Correlator {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Number of calls waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sends `action` and waits up to `timeout` for its reply.
    ///
    /// The reply is returned as received; a failure status is not an error at this level.
    pub async fn call(
        &self,
        action: &str,
        params: Value,
        timeout: Duration,
    ) -> ApiResult<ApiResponse> {
        let echo = format!("{action}-{}", Uuid::new_v4().simple());
        let payload = ApiRequest {
            action: action.to_string(),
            params,
            echo: echo.clone(),
        }
        .to_json()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            echo.clone(),
            PendingCall {
                session: None,
                reply: tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            echo: &echo,
        };

        let sent_on = self.manager.send(Frame::Text(payload))?;
        let recorded = match self.pending.lock().get_mut(&echo) {
            Some(call) => {
                call.session = Some(sent_on);
                true
            }
            None => false,
        };
        // A session that ended before the entry was tagged will never fail it.
        if recorded && self.manager.session_id() != Some(sent_on) {
            return Err(ApiError::NotConnected);
        }
        debug!(action, %echo, session = %sent_on, "API request sent");

        match time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ApiError::NotConnected),
            Err(_) => {
                debug!(action, %echo, ?timeout, "API call timed out");
                Err(ApiError::Timeout {
                    action: action.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Hands a reply to its waiter. Returns `false` when nobody is waiting for it, which is
    /// the normal outcome for a reply that arrives after its call timed out.
    pub fn resolve(&self, response: ApiResponse) -> bool {
        let Some(call) = self.pending.lock().remove(&response.echo) else {
            debug!(echo = %response.echo, "Dropping reply without a pending call");
            return false;
        };
        trace!(echo = %response.echo, retcode = response.retcode, "Reply delivered");
        call.reply.send(Ok(response)).is_ok()
    }

    /// Fails every call issued on `session` with `error`; returns how many were failed.
    pub fn fail_session(&self, session: SessionId, error: ApiError) -> usize {
        let failed: Vec<PendingCall> = {
            let mut pending = self.pending.lock();
            let tokens: Vec<String> = pending
                .iter()
                .filter(|(_, call)| call.session == Some(session))
                .map(|(echo, _)| echo.clone())
                .collect();
            tokens.iter().filter_map(|echo| pending.remove(echo)).collect()
        };

        let count = failed.len();
        for call in failed {
            let _ = call.reply.send(Err(error.clone()));
        }
        if count > 0 {
            debug!(%session, count, %error, "Failed pending calls of closed session");
        }
        count
    }
}

/// Removes the pending entry when the call returns or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    echo: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.echo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tether_transport::memory::{self, MemoryPeer};
    use tether_transport::{FrameHandler, ManagerConfig};

    struct Noop;

    impl FrameHandler for Noop {
        fn on_frame(&self, _session: SessionId, _payload: &[u8]) {}
    }

    fn config(queue_capacity: usize) -> ManagerConfig {
        ManagerConfig {
            queue_capacity,
            heartbeat_interval: Duration::from_secs(3600),
            read_timeout: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    async fn connected(queue_capacity: usize) -> (Arc<Correlator>, MemoryPeer) {
        let manager = ConnectionManager::new(config(queue_capacity));
        let (session, peer) = memory::pair("test");
        manager.accept(session, Arc::new(Noop)).await;
        (Arc::new(Correlator::new(manager)), peer)
    }

    fn request(text: &str) -> ApiRequest {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn reply_reaches_its_caller() {
        let (correlator, mut peer) = connected(8).await;
        let caller = Arc::clone(&correlator);
        let call = tokio::spawn(async move {
            caller
                .call("get_status", json!({}), Duration::from_secs(5))
                .await
        });

        let sent = request(&peer.next_text().await.unwrap());
        assert_eq!(sent.action, "get_status");
        assert!(sent.echo.starts_with("get_status-"));

        assert!(correlator.resolve(ApiResponse {
            status: "ok".into(),
            data: json!({ "online": true }),
            echo: sent.echo,
            ..Default::default()
        }));

        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply.data["online"], true);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_the_token_and_late_reply_is_dropped() {
        let (correlator, mut peer) = connected(8).await;
        let caller = Arc::clone(&correlator);
        let call = tokio::spawn(async move {
            caller
                .call("slow", Value::Null, Duration::from_secs(1))
                .await
        });

        let sent = request(&peer.next_text().await.unwrap());
        let result = call.await.unwrap();

        assert!(matches!(result, Err(ApiError::Timeout { ref action, .. }) if action == "slow"));
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.resolve(ApiResponse {
            echo: sent.echo,
            ..Default::default()
        }));
    }

    #[tokio::test]
    async fn full_queue_fails_the_call_without_leaking() {
        let (correlator, _peer) = connected(2).await;
        let manager = correlator.manager();
        manager.send(Frame::Text("a".into())).unwrap();
        manager.send(Frame::Text("b".into())).unwrap();

        let result = correlator
            .call("send_msg", json!({}), Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(ApiError::QueueFull)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn not_connected() {
        let correlator = Correlator::new(ConnectionManager::new(config(4)));
        let result = correlator
            .call("send_msg", json!({}), Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(ApiError::NotConnected)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn fail_session_only_touches_that_session() {
        let (correlator, mut peer) = connected(8).await;
        let session = correlator.manager().session_id().unwrap();
        let caller = Arc::clone(&correlator);
        let call = tokio::spawn(async move {
            caller
                .call("get_status", json!({}), Duration::from_secs(5))
                .await
        });
        peer.next_text().await.unwrap();

        assert_eq!(correlator.fail_session(session, ApiError::SessionReplaced), 1);
        assert!(matches!(call.await.unwrap(), Err(ApiError::SessionReplaced)));
        assert_eq!(correlator.fail_session(session, ApiError::SessionReplaced), 0);
    }

    #[tokio::test]
    async fn call_belongs_to_the_session_that_carried_it() {
        let (correlator, mut peer) = connected(8).await;
        let first = correlator.manager().session_id().unwrap();
        let caller = Arc::clone(&correlator);
        let call = tokio::spawn(async move {
            caller
                .call("get_status", json!({}), Duration::from_secs(5))
                .await
        });
        peer.next_text().await.unwrap();

        let (session, _second_peer) = memory::pair("second");
        let second = correlator.manager().accept(session, Arc::new(Noop)).await;

        assert_eq!(correlator.fail_session(second, ApiError::NotConnected), 0);
        assert_eq!(correlator.fail_session(first, ApiError::SessionReplaced), 1);
        assert!(matches!(call.await.unwrap(), Err(ApiError::SessionReplaced)));
    }
}
