//! HTTP adapter for the userbot gateway sidecar.
//!
//! The gateway wraps a real Telegram user client behind a small REST surface:
//! per-user login sessions (`/v1/sessions`) and message retrieval
//! (`/v1/messages`). This crate implements both `psb-core` ports against it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use psb_core::{
    links::PostReference,
    ports::{
        ContentFetcher, FetchError, FetchedPost, IdentityError, IdentityHandle, IdentityProvider,
        SignInOutcome,
    },
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_token: Option<String>,
}

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    cfg: GatewayConfig,
}

impl GatewayClient {
    pub fn new(cfg: GatewayConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("psb/0.1")
            .build()
            .expect("reqwest client build");
        Self { http, cfg }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), suffix)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[derive(Deserialize)]
struct SessionCreated {
    session_id: String,
}

#[derive(Deserialize)]
struct SignInResponse {
    status: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    text: String,
    channel_title: Option<String>,
}

#[derive(Deserialize)]
struct GatewayError {
    error: String,
}

#[async_trait]
impl IdentityProvider for GatewayClient {
    async fn connect(&self) -> Result<Box<dyn IdentityHandle>, IdentityError> {
        let resp = self
            .authorize(self.http.post(self.url("/v1/sessions")))
            .send()
            .await
            .map_err(connection_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(identity_failure(status.as_u16(), read_error_code(resp).await));
        }
        let created: SessionCreated = resp.json().await.map_err(protocol_err)?;
        debug!(session = %created.session_id, "gateway session opened");

        Ok(Box::new(GatewaySession {
            client: self.clone(),
            session_id: created.session_id,
        }))
    }
}

pub struct GatewaySession {
    client: GatewayClient,
    session_id: String,
}

impl GatewaySession {
    fn session_url(&self, suffix: &str) -> String {
        self.client
            .url(&format!("/v1/sessions/{}{}", self.session_id, suffix))
    }
}

#[async_trait]
impl IdentityHandle for GatewaySession {
    async fn request_code(&mut self, phone: &str) -> Result<(), IdentityError> {
        let resp = self
            .client
            .authorize(self.client.http.post(self.session_url("/code")))
            .json(&serde_json::json!({ "phone": phone }))
            .send()
            .await
            .map_err(connection_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(identity_failure(status.as_u16(), read_error_code(resp).await));
        }
        Ok(())
    }

    async fn submit_code(&mut self, code: &str) -> Result<SignInOutcome, IdentityError> {
        let resp = self
            .client
            .authorize(self.client.http.post(self.session_url("/sign-in")))
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .map_err(connection_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(identity_failure(status.as_u16(), read_error_code(resp).await));
        }
        let body: SignInResponse = resp.json().await.map_err(protocol_err)?;
        parse_sign_in_status(&body.status)
    }

    async fn submit_second_factor(&mut self, secret: &str) -> Result<(), IdentityError> {
        let resp = self
            .client
            .authorize(self.client.http.post(self.session_url("/password")))
            .json(&serde_json::json!({ "password": secret }))
            .send()
            .await
            .map_err(connection_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(identity_failure(status.as_u16(), read_error_code(resp).await));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), IdentityError> {
        let resp = self
            .client
            .authorize(self.client.http.delete(self.session_url("")))
            .send()
            .await
            .map_err(connection_err)?;

        let status = resp.status();
        // A session the gateway already dropped counts as disconnected.
        if !status.is_success() && status.as_u16() != 404 {
            return Err(identity_failure(status.as_u16(), read_error_code(resp).await));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentFetcher for GatewayClient {
    async fn fetch(&self, reference: &PostReference) -> Result<FetchedPost, FetchError> {
        let message_id = reference.message_id.to_string();
        let resp = self
            .authorize(self.http.get(self.url("/v1/messages")))
            .query(&[
                ("channel", reference.channel.as_str()),
                ("message_id", message_id.as_str()),
                ("private", if reference.private { "1" } else { "0" }),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Upstream(e.to_string()))?;

        match resp.status().as_u16() {
            200 => {
                let body: MessageResponse = resp
                    .json()
                    .await
                    .map_err(|e| FetchError::Upstream(e.to_string()))?;
                Ok(FetchedPost {
                    channel_title: body.channel_title,
                    text: body.text,
                })
            }
            404 => Err(FetchError::NotFound),
            401 | 403 => Err(FetchError::Denied),
            status => Err(FetchError::Upstream(format!("gateway status {status}"))),
        }
    }
}

async fn read_error_code(resp: reqwest::Response) -> Option<String> {
    resp.json::<GatewayError>().await.ok().map(|e| e.error)
}

fn connection_err(e: reqwest::Error) -> IdentityError {
    IdentityError::Connection(e.to_string())
}

fn protocol_err(e: reqwest::Error) -> IdentityError {
    IdentityError::Protocol(e.to_string())
}

/// Map an unsuccessful gateway response onto the identity-error taxonomy.
/// 4xx with a recognized code is a credential rejection; everything else is
/// a protocol failure that tears the login down.
fn identity_failure(status: u16, code: Option<String>) -> IdentityError {
    if (400..500).contains(&status) {
        match code.as_deref() {
            Some("phone_rejected") | Some("phone_invalid") => {
                return IdentityError::PhoneRejected
            }
            Some("code_invalid") | Some("code_expired") => return IdentityError::CodeRejected,
            Some("password_invalid") => return IdentityError::SecondFactorRejected,
            _ => {}
        }
    }
    IdentityError::Protocol(format!(
        "gateway status {status}{}",
        code.map(|c| format!(" ({c})")).unwrap_or_default()
    ))
}

fn parse_sign_in_status(status: &str) -> Result<SignInOutcome, IdentityError> {
    match status {
        "authorized" => Ok(SignInOutcome::Authenticated),
        "password_required" => Ok(SignInOutcome::SecondFactorRequired),
        other => Err(IdentityError::Protocol(format!(
            "unexpected sign-in status: {other}"
        ))),
    }
}
