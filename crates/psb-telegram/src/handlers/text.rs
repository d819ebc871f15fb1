use std::sync::Arc;

use teloxide::{prelude::*, types::ChatAction};
use tracing::error;

use psb_core::domain::UserId;

use crate::handlers::commands::send_reply;
use crate::router::AppState;

pub async fn handle_text(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(message_text) = msg.text() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);

    // Best-effort typing indicator while the fetch runs.
    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

    match state.coordinator.handle_text(user_id, message_text).await {
        Ok(reply) => send_reply(&bot, msg.chat.id, &reply).await,
        Err(err) => {
            error!(user = user_id.0, error = %err, "message handling failed");
            bot.send_message(msg.chat.id, "❌ Something went wrong. Please try again.")
                .await?;
            Ok(())
        }
    }
}
