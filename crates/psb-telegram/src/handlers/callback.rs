use std::sync::Arc;

use teloxide::prelude::*;
use tracing::error;

use psb_core::{coordinator::Command, domain::UserId};

use crate::handlers::commands::send_reply;
use crate::router::AppState;

/// Inline-keyboard buttons carry short tags that map onto the same command
/// intents as slash commands.
fn command_for_data(data: &str) -> Option<Command> {
    match data {
        "help" => Some(Command::Help),
        "saves" => Some(Command::Saves),
        "status" => Some(Command::Status),
        "premium" => Some(Command::Premium),
        "clear" => Some(Command::Clear),
        _ => None,
    }
}

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let chat_id = q.message.as_ref().map(|m| m.chat.id);
    let command = q.data.as_deref().and_then(command_for_data);

    let (Some(chat_id), Some(command)) = (chat_id, command) else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    bot.answer_callback_query(q.id).await?;

    let user_id = UserId(q.from.id.0 as i64);
    match state.coordinator.handle_command(user_id, command).await {
        Ok(reply) => send_reply(&bot, chat_id, &reply).await,
        Err(err) => {
            error!(user = user_id.0, error = %err, "callback handling failed");
            bot.send_message(chat_id, "❌ Something went wrong. Please try again.")
                .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_map_to_commands() {
        assert_eq!(command_for_data("saves"), Some(Command::Saves));
        assert_eq!(command_for_data("premium"), Some(Command::Premium));
        assert_eq!(command_for_data("bogus"), None);
    }
}
