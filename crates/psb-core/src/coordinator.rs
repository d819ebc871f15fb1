//! Request orchestration: one entry point per inbound intent.
//!
//! Every operation for one user runs inside that user's op queue, so the
//! login steps, quota arithmetic and save recording never interleave.
//! `/logout` is the single exception: it bypasses the queue so it can cancel
//! a handshake stuck on a slow provider.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    access::{AccessController, AccessDecision, TokenOutcome, UsageView},
    auth::{AuthMachine, AuthReply},
    domain::UserId,
    links::{self, PostReference},
    ports::ContentFetcher,
    saves::{SaveStore, SavedPost},
    session::{AuthState, SessionStore, Tier},
    Result,
};

/// Transport-independent command intents. The chat adapter owns the mapping
/// from slash commands and callback buttons to these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Login,
    Logout,
    Status,
    Token(String),
    Owner,
    Saves,
    Delete(u64),
    Clear,
    Premium,
}

/// Status snapshot for rendering.
#[derive(Clone, Debug)]
pub struct StatusView {
    pub auth: AuthState,
    pub phone: Option<String>,
    pub usage: UsageView,
    pub total_saves: usize,
}

/// Transport-independent outcome of one inbound message. The chat adapter
/// renders these; no user-facing copy lives in this crate.
#[derive(Debug)]
pub enum Reply {
    Welcome { tier: Tier },
    Help,
    Auth(AuthReply),
    NotALink,
    LoginRequired { reference: PostReference },
    QuotaExceeded {
        used: u32,
        ceiling: u32,
        resets_in: chrono::Duration,
    },
    Saved {
        post: SavedPost,
        /// `None` for the unbounded owner tier.
        remaining: Option<u32>,
    },
    FetchFailed,
    Status(StatusView),
    Token(TokenOutcome),
    OwnerReport {
        users: usize,
        authenticated: usize,
        total_saves: usize,
    },
    NotOwner,
    SavesList { posts: Vec<SavedPost> },
    DeleteResult { id: u64, deleted: bool },
    Cleared,
    Premium { usage: UsageView },
}

pub struct Coordinator {
    store: Arc<SessionStore>,
    auth: AuthMachine,
    access: AccessController,
    fetcher: Arc<dyn ContentFetcher>,
    saves: SaveStore,
}

impl Coordinator {
    pub fn new(
        store: Arc<SessionStore>,
        auth: AuthMachine,
        access: AccessController,
        fetcher: Arc<dyn ContentFetcher>,
        saves: SaveStore,
    ) -> Self {
        Self {
            store,
            auth,
            access,
            fetcher,
            saves,
        }
    }

    pub async fn handle_command(&self, user: UserId, cmd: Command) -> Result<Reply> {
        self.handle_command_at(user, cmd, Utc::now()).await
    }

    pub async fn handle_command_at(
        &self,
        user: UserId,
        cmd: Command,
        now: DateTime<Utc>,
    ) -> Result<Reply> {
        let session = self.store.get_or_create(user).await;

        if cmd == Command::Logout {
            return Ok(Reply::Auth(self.auth.logout(&session).await));
        }

        let _op = session.begin_op().await;
        match cmd {
            Command::Start => {
                let tier = session.record().await.tier;
                info!(user = user.0, "session started");
                Ok(Reply::Welcome { tier })
            }
            Command::Help => Ok(Reply::Help),
            Command::Login => Ok(Reply::Auth(self.auth.begin_login(&session).await)),
            Command::Logout => Ok(Reply::Auth(self.auth.logout(&session).await)),
            Command::Status => {
                let (auth, phone, usage) = {
                    let mut rec = session.record().await;
                    let usage = self.access.usage_view(&mut rec, now);
                    (rec.auth, rec.phone.clone(), usage)
                };
                let total_saves = self.saves.count(user)?;
                Ok(Reply::Status(StatusView {
                    auth,
                    phone,
                    usage,
                    total_saves,
                }))
            }
            Command::Token(token) => {
                let mut rec = session.record().await;
                Ok(Reply::Token(self.access.redeem(&mut rec, &token, now)))
            }
            Command::Owner => {
                if session.record().await.tier != Tier::Owner {
                    return Ok(Reply::NotOwner);
                }
                let stats = self.store.stats().await;
                let total_saves = self.saves.total_count()?;
                Ok(Reply::OwnerReport {
                    users: stats.users,
                    authenticated: stats.authenticated,
                    total_saves,
                })
            }
            Command::Saves => Ok(Reply::SavesList {
                posts: self.saves.list(user)?,
            }),
            Command::Delete(id) => Ok(Reply::DeleteResult {
                id,
                deleted: self.saves.delete(user, id)?,
            }),
            Command::Clear => {
                self.saves.clear(user)?;
                Ok(Reply::Cleared)
            }
            Command::Premium => {
                let mut rec = session.record().await;
                let usage = self.access.usage_view(&mut rec, now);
                Ok(Reply::Premium { usage })
            }
        }
    }

    pub async fn handle_text(&self, user: UserId, text: &str) -> Result<Reply> {
        self.handle_text_at(user, text, Utc::now()).await
    }

    pub async fn handle_text_at(
        &self,
        user: UserId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Reply> {
        let session = self.store.get_or_create(user).await;
        let _op = session.begin_op().await;

        // Login input always takes precedence over link detection.
        if let Some(reply) = self.auth.handle_text(&session, text).await {
            return Ok(Reply::Auth(reply));
        }

        let Some(reference) = links::parse(text) else {
            return Ok(Reply::NotALink);
        };

        {
            let mut rec = session.record().await;
            if reference.private && rec.auth != AuthState::Authenticated {
                return Ok(Reply::LoginRequired { reference });
            }
            match self.access.can_proceed(&mut rec, now) {
                AccessDecision::Allowed { .. } => {}
                AccessDecision::Denied {
                    used,
                    ceiling,
                    resets_in,
                } => {
                    return Ok(Reply::QuotaExceeded {
                        used,
                        ceiling,
                        resets_in,
                    });
                }
            }
        }

        // Failed attempts are free: nothing is charged unless the fetch lands.
        let fetched = match self.fetcher.fetch(&reference).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(user = user.0, link = %reference.url(), error = %err, "content fetch failed");
                return Ok(Reply::FetchFailed);
            }
        };

        let post = self.saves.append(user, &reference, fetched, now)?;
        let remaining = {
            let mut rec = session.record().await;
            self.access.record_use(&mut rec, now);
            let view = self.access.usage_view(&mut rec, now);
            view.ceiling.map(|c| c.saturating_sub(view.used))
        };
        info!(user = user.0, link = %post.link, "post saved");
        Ok(Reply::Saved { post, remaining })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::QuotaPolicy;
    use crate::ports::{
        FetchError, FetchedPost, IdentityError, IdentityHandle, IdentityProvider, SignInOutcome,
    };
    use async_trait::async_trait;
    use chrono::{Duration, FixedOffset};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct InstantProvider {
        /// When set, `submit_code` signals the first notify then parks on the
        /// second.
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    struct InstantHandle {
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl IdentityProvider for InstantProvider {
        async fn connect(&self) -> Result<Box<dyn IdentityHandle>, IdentityError> {
            Ok(Box::new(InstantHandle {
                gate: self.gate.clone(),
            }))
        }
    }

    #[async_trait]
    impl IdentityHandle for InstantHandle {
        async fn request_code(&mut self, _phone: &str) -> Result<(), IdentityError> {
            Ok(())
        }

        async fn submit_code(&mut self, _code: &str) -> Result<SignInOutcome, IdentityError> {
            if let Some((entered, gate)) = &self.gate {
                entered.notify_one();
                gate.notified().await;
            }
            Ok(SignInOutcome::Authenticated)
        }

        async fn submit_second_factor(&mut self, _secret: &str) -> Result<(), IdentityError> {
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), IdentityError> {
            Ok(())
        }
    }

    struct CountingFetcher {
        fail: bool,
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn ok() -> Self {
            Self {
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ContentFetcher for CountingFetcher {
        async fn fetch(&self, reference: &PostReference) -> Result<FetchedPost, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::Upstream("boom".to_string()));
            }
            Ok(FetchedPost {
                channel_title: Some(reference.channel.clone()),
                text: format!("post {} from {}", reference.message_id, reference.channel),
            })
        }
    }

    struct Fixture {
        coordinator: Arc<Coordinator>,
        fetcher: Arc<CountingFetcher>,
    }

    fn fixture(tag: &str, fetcher: CountingFetcher, owner: Option<i64>) -> Fixture {
        fixture_with_provider(tag, fetcher, owner, InstantProvider { gate: None })
    }

    fn fixture_with_provider(
        tag: &str,
        fetcher: CountingFetcher,
        owner: Option<i64>,
        provider: InstantProvider,
    ) -> Fixture {
        let dir = std::env::temp_dir().join(format!("psb-coord-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let policy = QuotaPolicy {
            free_daily: 10,
            premium_daily: 100,
            grant: Duration::hours(3),
            day_offset: FixedOffset::east_opt(0).unwrap(),
        };
        let fetcher = Arc::new(fetcher);
        let coordinator = Coordinator::new(
            Arc::new(SessionStore::new(owner.map(UserId))),
            AuthMachine::new(Arc::new(provider), 5),
            AccessController::new(policy, vec!["TOKEN-A".to_string()]),
            fetcher.clone(),
            SaveStore::new(dir).unwrap(),
        );
        Fixture {
            coordinator: Arc::new(coordinator),
            fetcher,
        }
    }

    async fn sign_in(f: &Fixture, user: UserId) {
        f.coordinator
            .handle_command(user, Command::Login)
            .await
            .unwrap();
        f.coordinator
            .handle_text(user, "+12025550123")
            .await
            .unwrap();
        let reply = f.coordinator.handle_text(user, "12345").await.unwrap();
        assert!(matches!(reply, Reply::Auth(AuthReply::SignedIn)));
    }

    #[tokio::test]
    async fn unrecognized_text_is_not_a_link() {
        let f = fixture("nolink", CountingFetcher::ok(), None);
        let reply = f.coordinator.handle_text(UserId(1), "hello world").await.unwrap();
        assert!(matches!(reply, Reply::NotALink));
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn private_link_requires_login() {
        let f = fixture("private", CountingFetcher::ok(), None);
        let reply = f
            .coordinator
            .handle_text(UserId(1), "https://t.me/c/555/42")
            .await
            .unwrap();
        assert!(matches!(reply, Reply::LoginRequired { .. }));
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn public_link_is_saved_and_charged() {
        let f = fixture("save", CountingFetcher::ok(), None);
        let reply = f
            .coordinator
            .handle_text(UserId(1), "https://t.me/news/42")
            .await
            .unwrap();

        match reply {
            Reply::Saved { post, remaining } => {
                assert_eq!(post.channel, "news");
                assert_eq!(post.message_id, 42);
                assert_eq!(remaining, Some(9));
            }
            other => panic!("expected save, got {other:?}"),
        }
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_free() {
        let f = fixture("fail", CountingFetcher::failing(), None);
        let reply = f
            .coordinator
            .handle_text(UserId(1), "https://t.me/news/42")
            .await
            .unwrap();
        assert!(matches!(reply, Reply::FetchFailed));

        // A later successful-looking check still sees an untouched counter.
        let status = f
            .coordinator
            .handle_command(UserId(1), Command::Status)
            .await
            .unwrap();
        match status {
            Reply::Status(view) => {
                assert_eq!(view.usage.used, 0);
                assert_eq!(view.total_saves, 0);
            }
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_quota_skips_the_fetch() {
        let f = fixture("quota", CountingFetcher::ok(), None);
        for _ in 0..10 {
            let reply = f
                .coordinator
                .handle_text(UserId(1), "https://t.me/news/42")
                .await
                .unwrap();
            assert!(matches!(reply, Reply::Saved { .. }));
        }

        let reply = f
            .coordinator
            .handle_text(UserId(1), "https://t.me/news/43")
            .await
            .unwrap();
        match reply {
            Reply::QuotaExceeded { used, ceiling, .. } => {
                assert_eq!(used, 10);
                assert_eq!(ceiling, 10);
            }
            other => panic!("expected quota denial, got {other:?}"),
        }
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn login_input_takes_precedence_over_links() {
        let f = fixture("precedence", CountingFetcher::ok(), None);
        f.coordinator
            .handle_command(UserId(1), Command::Login)
            .await
            .unwrap();

        // A link sent mid-login is consumed as (malformed) phone input.
        let reply = f
            .coordinator
            .handle_text(UserId(1), "https://t.me/news/42")
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Auth(AuthReply::MalformedPhone)));
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authenticated_user_can_save_private_posts() {
        let f = fixture("privok", CountingFetcher::ok(), None);
        sign_in(&f, UserId(1)).await;

        let reply = f
            .coordinator
            .handle_text(UserId(1), "https://t.me/c/555/42")
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Saved { .. }));
    }

    #[tokio::test]
    async fn owner_report_is_owner_only() {
        let f = fixture("owner", CountingFetcher::ok(), Some(9));
        let denied = f
            .coordinator
            .handle_command(UserId(1), Command::Owner)
            .await
            .unwrap();
        assert!(matches!(denied, Reply::NotOwner));

        let report = f
            .coordinator
            .handle_command(UserId(9), Command::Owner)
            .await
            .unwrap();
        match report {
            Reply::OwnerReport { users, .. } => assert_eq!(users, 2),
            other => panic!("expected owner report, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_user_messages_apply_in_arrival_order() {
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let f = fixture_with_provider(
            "order",
            CountingFetcher::ok(),
            None,
            InstantProvider {
                gate: Some((entered.clone(), gate.clone())),
            },
        );
        f.coordinator
            .handle_command(UserId(1), Command::Login)
            .await
            .unwrap();
        f.coordinator
            .handle_text(UserId(1), "+12025550123")
            .await
            .unwrap();

        // First message: the verification code, parked inside the provider.
        let first = {
            let coordinator = f.coordinator.clone();
            tokio::spawn(async move { coordinator.handle_text(UserId(1), "12345").await })
        };
        entered.notified().await;

        // Second message: a private link. It must observe the Authenticated
        // state produced by the first message, never the mid-login state.
        let second = {
            let coordinator = f.coordinator.clone();
            tokio::spawn(
                async move { coordinator.handle_text(UserId(1), "https://t.me/c/555/42").await },
            )
        };
        tokio::task::yield_now().await;
        gate.notify_one();

        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, Reply::Auth(AuthReply::SignedIn)));
        let second = second.await.unwrap().unwrap();
        assert!(matches!(second, Reply::Saved { .. }), "got {second:?}");
    }

    #[tokio::test]
    async fn logout_bypasses_a_hung_handshake() {
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let f = fixture_with_provider(
            "bypass",
            CountingFetcher::ok(),
            None,
            InstantProvider {
                gate: Some((entered.clone(), gate.clone())),
            },
        );
        f.coordinator
            .handle_command(UserId(1), Command::Login)
            .await
            .unwrap();
        f.coordinator
            .handle_text(UserId(1), "+12025550123")
            .await
            .unwrap();

        let pending = {
            let coordinator = f.coordinator.clone();
            tokio::spawn(async move { coordinator.handle_text(UserId(1), "12345").await })
        };
        entered.notified().await;

        // The op queue is busy with the code submission, yet logout returns.
        let reply = f
            .coordinator
            .handle_command(UserId(1), Command::Logout)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Auth(AuthReply::LoggedOut)));

        gate.notify_one();
        let late = pending.await.unwrap().unwrap();
        assert!(matches!(late, Reply::Auth(AuthReply::Superseded)));
    }
}
