use std::sync::Arc;

use teloxide::{prelude::*, types::ParseMode};
use tracing::error;

use psb_core::{
    coordinator::{Command, Reply},
    domain::UserId,
};

use crate::{render, router::AppState};

pub(super) fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn command_for(cmd: &str, arg: &str) -> Result<Command, String> {
    match cmd {
        "start" => Ok(Command::Start),
        "help" => Ok(Command::Help),
        "login" => Ok(Command::Login),
        "logout" => Ok(Command::Logout),
        "status" | "stats" => Ok(Command::Status),
        "token" => {
            if arg.is_empty() {
                Err("Usage: <code>/token &lt;code&gt;</code>".to_string())
            } else {
                Ok(Command::Token(arg.to_string()))
            }
        }
        "owner" => Ok(Command::Owner),
        "saves" => Ok(Command::Saves),
        "delete" => arg
            .parse::<u64>()
            .map(Command::Delete)
            .map_err(|_| "Usage: <code>/delete &lt;id&gt;</code>".to_string()),
        "clear" => Ok(Command::Clear),
        "premium" => Ok(Command::Premium),
        other => Err(format!("Unknown command: /{}", render::escape_html(other))),
    }
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(message_text) = msg.text() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);

    let (cmd, arg) = parse_command(message_text);
    let command = match command_for(&cmd, &arg) {
        Ok(command) => command,
        Err(usage) => {
            bot.send_message(msg.chat.id, usage)
                .parse_mode(ParseMode::Html)
                .await?;
            return Ok(());
        }
    };

    match state.coordinator.handle_command(user_id, command).await {
        Ok(reply) => send_reply(&bot, msg.chat.id, &reply).await,
        Err(err) => {
            error!(user = user_id.0, command = %cmd, error = %err, "command failed");
            bot.send_message(msg.chat.id, "❌ Something went wrong. Please try again.")
                .await?;
            Ok(())
        }
    }
}

pub(super) async fn send_reply(
    bot: &Bot,
    chat_id: teloxide::types::ChatId,
    reply: &Reply,
) -> ResponseResult<()> {
    let mut req = bot
        .send_message(chat_id, render::render(reply))
        .parse_mode(ParseMode::Html)
        .disable_web_page_preview(true);
    if let Some(kb) = render::keyboard(reply) {
        req = req.reply_markup(kb);
    }
    req.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bot_mention_and_lowercases() {
        assert_eq!(
            parse_command("/Token@PostSaverBot ABC-123"),
            ("token".to_string(), "ABC-123".to_string())
        );
        assert_eq!(parse_command("/start"), ("start".to_string(), String::new()));
    }

    #[test]
    fn maps_commands_with_arguments() {
        assert_eq!(
            command_for("token", "ABC"),
            Ok(Command::Token("ABC".to_string()))
        );
        assert_eq!(command_for("delete", "3"), Ok(Command::Delete(3)));
        assert!(command_for("delete", "x").is_err());
        assert!(command_for("token", "").is_err());
        assert!(command_for("frobnicate", "").is_err());
    }

    #[test]
    fn stats_is_an_alias_for_status() {
        assert_eq!(command_for("stats", ""), Ok(Command::Status));
    }
}
