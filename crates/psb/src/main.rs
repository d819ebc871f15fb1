use std::sync::Arc;

use psb_core::{
    access::AccessController,
    auth::AuthMachine,
    config::Config,
    coordinator::Coordinator,
    domain::UserId,
    saves::SaveStore,
    session::SessionStore,
};
use psb_gateway::{GatewayClient, GatewayConfig};

#[tokio::main]
async fn main() -> Result<(), psb_core::Error> {
    psb_core::logging::init("psb");

    let cfg = Arc::new(Config::load()?);

    let gateway = Arc::new(GatewayClient::new(GatewayConfig {
        base_url: cfg.gateway_base_url.clone(),
        api_token: cfg.gateway_api_token.clone(),
    }));

    let coordinator = Arc::new(Coordinator::new(
        Arc::new(SessionStore::new(cfg.owner_id.map(UserId))),
        AuthMachine::new(gateway.clone(), cfg.login_code_length),
        AccessController::new(cfg.quota_policy(), cfg.premium_tokens.clone()),
        gateway,
        SaveStore::new(cfg.data_dir.clone())?,
    ));

    psb_telegram::router::run_polling(cfg, coordinator)
        .await
        .map_err(|e| psb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
