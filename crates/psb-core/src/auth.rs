//! Login state machine: phone → verification code → optional second factor.
//!
//! The identity handshake is multi-round-trip while chat delivery is
//! turn-based, so each inbound text must be routed to the session's *current*
//! step. Provider I/O is awaited with the record lock released; a commit only
//! lands if the session's auth epoch is unchanged, which is how a `/logout`
//! issued during a slow handshake makes the late result a no-op.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::warn;

use crate::{
    ports::{IdentityError, IdentityHandle, IdentityProvider, SignInOutcome},
    session::{AuthState, SessionHandle},
};

/// What the state machine wants the transport to tell the user.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthReply {
    PhonePrompt,
    AlreadyAuthenticated,
    CodeSent { phone: String },
    MalformedPhone,
    PhoneRejected,
    MalformedCode { expected_len: usize },
    CodeRejected,
    SecondFactorPrompt,
    SecondFactorRejected,
    SignedIn,
    /// Connectivity or protocol failure; the session was reverted to
    /// Unauthenticated and needs a fresh `/login`.
    ProviderUnavailable,
    LoggedOut,
    NotLoggedIn,
    /// A logout raced the handshake; the provider's answer was discarded.
    Superseded,
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+\d{10,15}$").expect("valid pattern"))
}

pub struct AuthMachine {
    provider: Arc<dyn IdentityProvider>,
    code_length: usize,
}

impl AuthMachine {
    pub fn new(provider: Arc<dyn IdentityProvider>, code_length: usize) -> Self {
        Self {
            provider,
            code_length,
        }
    }

    /// `/login`: enter (or restart) the flow. Restarting abandons any
    /// half-open provider connection.
    pub async fn begin_login(&self, session: &SessionHandle) -> AuthReply {
        let client = {
            let mut rec = session.record().await;
            if rec.auth == AuthState::Authenticated {
                return AuthReply::AlreadyAuthenticated;
            }
            rec.auth = AuthState::AwaitingPhone;
            rec.phone = None;
            rec.auth_epoch += 1;
            rec.client.take()
        };
        if let Some(mut client) = client {
            let _ = client.disconnect().await;
        }
        AuthReply::PhonePrompt
    }

    /// `/logout`: close the provider connection and clear auth fields. Tier
    /// and usage counters are untouched.
    pub async fn logout(&self, session: &SessionHandle) -> AuthReply {
        let client = {
            let mut rec = session.record().await;
            if rec.auth == AuthState::Unauthenticated {
                return AuthReply::NotLoggedIn;
            }
            rec.auth = AuthState::Unauthenticated;
            rec.phone = None;
            rec.auth_epoch += 1;
            rec.client.take()
        };
        if let Some(mut client) = client {
            let _ = client.disconnect().await;
        }
        AuthReply::LoggedOut
    }

    /// Route a plain-text message to the current login step. Returns `None`
    /// when the session is not mid-login, in which case the caller is free to
    /// treat the text as a potential link.
    pub async fn handle_text(&self, session: &SessionHandle, text: &str) -> Option<AuthReply> {
        let state = session.record().await.auth;
        match state {
            AuthState::AwaitingPhone => Some(self.submit_phone(session, text.trim()).await),
            AuthState::AwaitingCode => Some(self.submit_code(session, text.trim()).await),
            AuthState::AwaitingSecondFactor => Some(self.submit_second_factor(session, text).await),
            AuthState::Unauthenticated | AuthState::Authenticated => None,
        }
    }

    async fn submit_phone(&self, session: &SessionHandle, phone: &str) -> AuthReply {
        if !phone_re().is_match(phone) {
            return AuthReply::MalformedPhone;
        }
        let epoch = session.record().await.auth_epoch;

        let mut client = match self.provider.connect().await {
            Ok(client) => client,
            Err(err) => return self.provider_failure(session, epoch, err).await,
        };
        if let Err(err) = client.request_code(phone).await {
            let _ = client.disconnect().await;
            return self.provider_failure(session, epoch, err).await;
        }

        {
            let mut rec = session.record().await;
            if rec.auth_epoch == epoch {
                rec.client = Some(client);
                rec.phone = Some(phone.to_string());
                rec.auth = AuthState::AwaitingCode;
                return AuthReply::CodeSent {
                    phone: phone.to_string(),
                };
            }
        }
        let _ = client.disconnect().await;
        AuthReply::Superseded
    }

    async fn submit_code(&self, session: &SessionHandle, code: &str) -> AuthReply {
        if code.len() != self.code_length || !code.bytes().all(|b| b.is_ascii_digit()) {
            return AuthReply::MalformedCode {
                expected_len: self.code_length,
            };
        }
        let Some((mut client, epoch)) = self.take_client(session).await else {
            return AuthReply::ProviderUnavailable;
        };

        match client.submit_code(code).await {
            Ok(SignInOutcome::Authenticated) => {
                self.commit(session, epoch, client, AuthState::Authenticated, AuthReply::SignedIn)
                    .await
            }
            Ok(SignInOutcome::SecondFactorRequired) => {
                self.commit(
                    session,
                    epoch,
                    client,
                    AuthState::AwaitingSecondFactor,
                    AuthReply::SecondFactorPrompt,
                )
                .await
            }
            Err(err) if err.is_credential() => {
                self.commit(session, epoch, client, AuthState::AwaitingCode, AuthReply::CodeRejected)
                    .await
            }
            Err(err) => {
                let _ = client.disconnect().await;
                self.provider_failure(session, epoch, err).await
            }
        }
    }

    async fn submit_second_factor(&self, session: &SessionHandle, secret: &str) -> AuthReply {
        let Some((mut client, epoch)) = self.take_client(session).await else {
            return AuthReply::ProviderUnavailable;
        };

        match client.submit_second_factor(secret).await {
            Ok(()) => {
                self.commit(session, epoch, client, AuthState::Authenticated, AuthReply::SignedIn)
                    .await
            }
            Err(err) if err.is_credential() => {
                self.commit(
                    session,
                    epoch,
                    client,
                    AuthState::AwaitingSecondFactor,
                    AuthReply::SecondFactorRejected,
                )
                .await
            }
            Err(err) => {
                let _ = client.disconnect().await;
                self.provider_failure(session, epoch, err).await
            }
        }
    }

    /// Pull the live connection out of the record for the duration of one
    /// provider call. An Awaiting state without a client is unrecoverable, so
    /// the flow is torn down.
    async fn take_client(
        &self,
        session: &SessionHandle,
    ) -> Option<(Box<dyn IdentityHandle>, u64)> {
        let mut rec = session.record().await;
        match rec.client.take() {
            Some(client) => Some((client, rec.auth_epoch)),
            None => {
                rec.auth = AuthState::Unauthenticated;
                rec.phone = None;
                None
            }
        }
    }

    /// Apply a handshake result, unless a logout bumped the epoch while the
    /// provider call was in flight.
    async fn commit(
        &self,
        session: &SessionHandle,
        epoch: u64,
        client: Box<dyn IdentityHandle>,
        next: AuthState,
        reply: AuthReply,
    ) -> AuthReply {
        {
            let mut rec = session.record().await;
            if rec.auth_epoch == epoch {
                rec.client = Some(client);
                rec.auth = next;
                return reply;
            }
        }
        let mut client = client;
        let _ = client.disconnect().await;
        AuthReply::Superseded
    }

    /// Credential rejections hold the current step; anything else reverts the
    /// session to Unauthenticated.
    async fn provider_failure(
        &self,
        session: &SessionHandle,
        epoch: u64,
        err: IdentityError,
    ) -> AuthReply {
        if err.is_credential() {
            return match err {
                IdentityError::PhoneRejected => AuthReply::PhoneRejected,
                IdentityError::CodeRejected => AuthReply::CodeRejected,
                _ => AuthReply::SecondFactorRejected,
            };
        }

        warn!(error = %err, "identity provider failure, tearing down login");
        let mut rec = session.record().await;
        if rec.auth_epoch != epoch {
            return AuthReply::Superseded;
        }
        rec.auth = AuthState::Unauthenticated;
        rec.phone = None;
        rec.client = None;
        AuthReply::ProviderUnavailable
    }
}
