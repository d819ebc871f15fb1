//! Capability ports for the two external collaborators: the identity
//! provider (user-client login) and the content fetcher.
//!
//! The gateway adapter crate implements both; tests use in-module fakes.

use async_trait::async_trait;

use crate::links::PostReference;

/// Failures reported by the identity provider.
///
/// Credential rejections hold the login flow at its current step; connection
/// and protocol failures tear the session down to Unauthenticated.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("phone number rejected")]
    PhoneRejected,

    #[error("verification code rejected")]
    CodeRejected,

    #[error("second factor rejected")]
    SecondFactorRejected,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl IdentityError {
    pub fn is_credential(&self) -> bool {
        matches!(
            self,
            Self::PhoneRejected | Self::CodeRejected | Self::SecondFactorRejected
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("content not found")]
    NotFound,

    #[error("access denied by source")]
    Denied,

    #[error("fetch failed: {0}")]
    Upstream(String),
}

/// Result of submitting a verification code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignInOutcome {
    Authenticated,
    SecondFactorRequired,
}

/// Opens per-user connections to the identity backend.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn IdentityHandle>, IdentityError>;
}

/// One user's live connection to the identity backend.
///
/// Exclusively owned by that user's session; dropped connections must be
/// re-established with a fresh login.
#[async_trait]
pub trait IdentityHandle: Send + Sync {
    async fn request_code(&mut self, phone: &str) -> Result<(), IdentityError>;
    async fn submit_code(&mut self, code: &str) -> Result<SignInOutcome, IdentityError>;
    async fn submit_second_factor(&mut self, secret: &str) -> Result<(), IdentityError>;
    async fn disconnect(&mut self) -> Result<(), IdentityError>;
}

/// Remote post content as returned by the fetcher.
#[derive(Clone, Debug)]
pub struct FetchedPost {
    pub channel_title: Option<String>,
    pub text: String,
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, reference: &PostReference) -> Result<FetchedPost, FetchError>;
}
