use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::info;

use psb_core::{config::Config, coordinator::Coordinator};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

pub async fn run_polling(cfg: Arc<Config>, coordinator: Arc<Coordinator>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        info!(username = %me.username(), "post-saver bot started");
    }
    info!(
        data_dir = %cfg.data_dir.display(),
        owner_configured = cfg.owner_id.is_some(),
        premium_tokens = cfg.premium_tokens.len(),
        "configuration loaded"
    );

    let state = Arc::new(AppState { coordinator });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
