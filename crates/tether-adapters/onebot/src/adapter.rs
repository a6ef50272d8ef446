//! Routes decoded frames from the live session.
//!
//! Replies go to the [`Correlator`](crate::correlator::Correlator); events are dispatched on a
//! fresh task each, so a slow handler never stalls the receive loop. Frames that fail to
//! decode are logged and dropped.

use std::sync::Arc;

use tether_core::{ApiError, BoxedBot, Decoded, decode};
use tether_framework::{DispatchError, Dispatcher};
use tether_transport::{CloseReason, FrameHandler, SessionId};
use tracing::{debug, info, trace, warn};

use crate::bot::OneBotBot;

/// [`FrameHandler`] for OneBot v11 sessions.
pub struct OneBotAdapter {
    bot: Arc<OneBotBot>,
    dispatcher: Arc<Dispatcher>,
}

impl OneBotAdapter {
    pub fn new(bot: Arc<OneBotBot>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { bot, dispatcher }
    }

    pub fn bot(&self) -> &Arc<OneBotBot> {
        &self.bot
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl FrameHandler for OneBotAdapter {
    fn on_frame(&self, session: SessionId, payload: &[u8]) {
        match decode(payload) {
            Ok(Decoded::Reply(response)) => {
                self.bot.correlator().resolve(response);
            }
            Ok(Decoded::Event(event)) => {
                self.bot.observe_self_id(event.self_id());
                trace!(%session, kind = event.kind().as_str(), "Event received");

                let event = Arc::new(event);
                let bot: BoxedBot = self.bot.clone();
                let dispatcher = Arc::clone(&self.dispatcher);
                tokio::spawn(async move {
                    match dispatcher.dispatch(event, Some(bot)).await {
                        Ok(outcome) => trace!(
                            cycle = outcome.cycle,
                            matched = outcome.matched,
                            "Event handled"
                        ),
                        Err(DispatchError::NoMatchingRule) => trace!("Event not handled"),
                        Err(error) => warn!(%error, "Event dispatch failed"),
                    }
                });
            }
            Err(error) => {
                warn!(%session, %error, len = payload.len(), "Dropping undecodable frame");
            }
        }
    }

    fn on_session_closed(&self, session: SessionId, reason: &CloseReason) {
        let error = match reason {
            CloseReason::Replaced => ApiError::SessionReplaced,
            _ => ApiError::NotConnected,
        };
        let failed = self.bot.correlator().fail_session(session, error);
        info!(%session, %reason, failed_calls = failed, "Session closed");
        if failed == 0 {
            debug!(%session, "No calls were pending");
        }
    }
}
