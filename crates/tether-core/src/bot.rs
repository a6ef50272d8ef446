//! The outbound call surface.
//!
//! [`Bot`] is the object-safe seam adapters implement; [`BotExt`] layers typed helpers on top of
//! it for every bot, including `dyn Bot`.
//!
//! ```rust,ignore
//! use tether_core::{BotExt, BoxedBot};
//!
//! async fn greet(bot: BoxedBot, user: i64) -> tether_core::ApiResult<()> {
//!     bot.send_private_msg(user, "hello").await?;
//!     let info: LoginInfo = bot.call("get_login_info", &serde_json::json!({})).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ApiError, ApiResult};
use crate::event::{InboundEvent, MessageType};
use crate::message::Message;

/// A connected bot account that can issue API calls.
#[async_trait]
pub trait Bot: Send + Sync {
    /// The account id, once known.
    fn self_id(&self) -> Option<i64>;

    /// Whether a session is currently live.
    fn is_connected(&self) -> bool;

    /// Issues `action` and waits for its reply, returning the reply's `data` on success.
    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value>;
}

/// Shared, type-erased bot handle.
pub type BoxedBot = Arc<dyn Bot>;

/// `data` of message-sending actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageId {
    pub message_id: i64,
}

/// `data` of `get_login_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    pub user_id: i64,
    pub nickname: String,
}

/// Typed helpers available on every [`Bot`].
#[async_trait]
pub trait BotExt: Bot {
    /// Calls `action` with typed parameters and decodes the reply data into `R`.
    ///
    /// Both directions go through the generic JSON envelope.
    async fn call<P, R>(&self, action: &str, params: &P) -> ApiResult<R>
    where
        P: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send,
    {
        let params = serde_json::to_value(params)?;
        let data = self.call_api(action, params).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn send_private_msg<M>(&self, user_id: i64, message: M) -> ApiResult<i64>
    where
        M: Into<Message> + Send,
    {
        let params = json!({ "user_id": user_id, "message": message.into() });
        let reply: MessageId = self.call("send_private_msg", &params).await?;
        Ok(reply.message_id)
    }

    async fn send_group_msg<M>(&self, group_id: i64, message: M) -> ApiResult<i64>
    where
        M: Into<Message> + Send,
    {
        let params = json!({ "group_id": group_id, "message": message.into() });
        let reply: MessageId = self.call("send_group_msg", &params).await?;
        Ok(reply.message_id)
    }

    /// The generic `send_msg` action: `message_type` picks the chat, `group_id` is only sent
    /// when given.
    async fn send_msg<M>(
        &self,
        message_type: MessageType,
        user_id: i64,
        group_id: Option<i64>,
        message: M,
    ) -> ApiResult<i64>
    where
        M: Into<Message> + Send,
    {
        let mut params = json!({
            "message_type": message_type,
            "user_id": user_id,
            "message": message.into(),
        });
        if let Some(group_id) = group_id {
            params["group_id"] = json!(group_id);
        }
        let reply: MessageId = self.call("send_msg", &params).await?;
        Ok(reply.message_id)
    }

    async fn delete_msg(&self, message_id: i64) -> ApiResult<()> {
        self.call_api("delete_msg", json!({ "message_id": message_id }))
            .await
            .map(drop)
    }

    async fn get_login_info(&self) -> ApiResult<LoginInfo> {
        self.call("get_login_info", &json!({})).await
    }

    /// Answers in the chat an event came from: the group for group events, otherwise the user.
    async fn reply<M>(&self, event: &InboundEvent, message: M) -> ApiResult<i64>
    where
        M: Into<Message> + Send,
    {
        if event.is_to_group() {
            let group_id = event.group_id().ok_or(ApiError::MissingTarget)?;
            self.send_group_msg(group_id, message).await
        } else {
            let user_id = event.user_id().ok_or(ApiError::MissingTarget)?;
            self.send_private_msg(user_id, message).await
        }
    }
}

impl<B: Bot + ?Sized> BotExt for B {}
