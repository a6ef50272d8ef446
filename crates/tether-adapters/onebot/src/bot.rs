//! The OneBot call surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tether_core::{ApiResult, Bot};
use tracing::info;

use crate::correlator::Correlator;

/// Default time to wait for an API reply.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`Bot`] that issues calls through the [`Correlator`].
pub struct OneBotBot {
    correlator: Arc<Correlator>,
    /// 0 until the first event reveals the account id.
    self_id: AtomicI64,
    timeout: Duration,
}

impl OneBotBot {
    pub fn new(correlator: Arc<Correlator>, timeout: Duration) -> Self {
        Self {
            correlator,
            self_id: AtomicI64::new(0),
            timeout,
        }
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Records the account id from an inbound event; the first non-zero id wins.
    pub fn observe_self_id(&self, self_id: i64) {
        if self_id == 0 {
            return;
        }
        if self
            .self_id
            .compare_exchange(0, self_id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!(self_id, "Bot identity learned");
        }
    }

    /// Like [`Bot::call_api`] with an explicit timeout.
    pub async fn call_with_timeout(
        &self,
        action: &str,
        params: Value,
        timeout: Duration,
    ) -> ApiResult<Value> {
        self.correlator
            .call(action, params, timeout)
            .await?
            .into_result(action)
    }
}

#[async_trait]
impl Bot for OneBotBot {
    fn self_id(&self) -> Option<i64> {
        match self.self_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    fn is_connected(&self) -> bool {
        self.correlator.manager().is_connected()
    }

    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value> {
        self.call_with_timeout(action, params, self.timeout).await
    }
}
