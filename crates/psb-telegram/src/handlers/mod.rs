//! Telegram update handlers.
//!
//! Each handler maps one update shape onto a core intent, runs it through the
//! coordinator and renders the reply.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use crate::router::AppState;

mod callback;
mod commands;
mod text;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(message_text) = msg.text() else {
        // Media without text carries no link or login input.
        return Ok(());
    };

    if message_text.starts_with('/') {
        return commands::handle_command(bot, msg, state).await;
    }
    text::handle_text(bot, msg, state).await
}

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}
