//! Per-user session records and the concurrency-safe store that owns them.
//!
//! Two locks per user: an *op lock* that serializes whole logical operations
//! in arrival order (tokio mutexes queue fairly), and a *record lock* that
//! guards field access and is never held across provider or fetcher I/O. The
//! top-level map lock covers only insertion and removal.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use crate::{domain::UserId, ports::IdentityHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingPhone,
    AwaitingCode,
    AwaitingSecondFactor,
    Authenticated,
}

impl AuthState {
    /// Mid-login states consume the next plain-text message before link
    /// detection gets a look at it.
    pub fn is_awaiting(&self) -> bool {
        matches!(
            self,
            Self::AwaitingPhone | Self::AwaitingCode | Self::AwaitingSecondFactor
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Free,
    Premium,
    Owner,
}

pub struct UserSession {
    pub user_id: UserId,
    pub auth: AuthState,
    pub phone: Option<String>,
    /// Live identity-provider connection, exclusively owned by this session.
    pub client: Option<Box<dyn IdentityHandle>>,
    /// Bumped on logout; an in-flight handshake whose epoch no longer matches
    /// must discard its result.
    pub auth_epoch: u64,
    pub tier: Tier,
    /// Absent means the premium grant never expires (owner, lifetime grants).
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub daily_used: u32,
    /// Calendar date (in the configured quota offset) the counter applies to.
    pub usage_day: NaiveDate,
}

impl UserSession {
    fn new(user_id: UserId, tier: Tier) -> Self {
        Self {
            user_id,
            auth: AuthState::Unauthenticated,
            phone: None,
            client: None,
            auth_epoch: 0,
            tier,
            premium_expires_at: None,
            daily_used: 0,
            // Epoch date: the first access check rolls the window forward.
            usage_day: NaiveDate::default(),
        }
    }
}

struct SessionSlot {
    ops: Arc<Mutex<()>>,
    record: Arc<Mutex<UserSession>>,
}

/// Cloneable handle to one user's session.
#[derive(Clone)]
pub struct SessionHandle {
    ops: Arc<Mutex<()>>,
    record: Arc<Mutex<UserSession>>,
}

impl SessionHandle {
    /// Enter this user's operation queue. Held across the whole logical
    /// operation, including awaited I/O.
    pub async fn begin_op(&self) -> OwnedMutexGuard<()> {
        self.ops.clone().lock_owned().await
    }

    /// Lock the record for field access. Never hold this guard across
    /// provider or fetcher calls.
    pub async fn record(&self) -> MutexGuard<'_, UserSession> {
        self.record.lock().await
    }
}

pub struct StoreStats {
    pub users: usize,
    pub authenticated: usize,
}

pub struct SessionStore {
    owner_id: Option<UserId>,
    slots: Mutex<HashMap<UserId, SessionSlot>>,
}

impl SessionStore {
    pub fn new(owner_id: Option<UserId>) -> Self {
        Self {
            owner_id,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Look up or lazily create the session for `user_id`.
    ///
    /// Creation happens exactly once per user even under concurrent first
    /// contact; the owner tier is resolved here and nowhere else.
    pub async fn get_or_create(&self, user_id: UserId) -> SessionHandle {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(user_id).or_insert_with(|| {
            let tier = if self.owner_id == Some(user_id) {
                Tier::Owner
            } else {
                Tier::Free
            };
            SessionSlot {
                ops: Arc::new(Mutex::new(())),
                record: Arc::new(Mutex::new(UserSession::new(user_id, tier))),
            }
        });
        SessionHandle {
            ops: slot.ops.clone(),
            record: slot.record.clone(),
        }
    }

    pub async fn remove(&self, user_id: UserId) -> bool {
        self.slots.lock().await.remove(&user_id).is_some()
    }

    pub async fn stats(&self) -> StoreStats {
        let slots = self.slots.lock().await;
        let mut authenticated = 0usize;
        for slot in slots.values() {
            if slot.record.lock().await.auth == AuthState::Authenticated {
                authenticated += 1;
            }
        }
        StoreStats {
            users: slots.len(),
            authenticated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = SessionStore::new(None);
        let a = store.get_or_create(UserId(1)).await;
        a.record().await.daily_used = 7;

        let b = store.get_or_create(UserId(1)).await;
        assert_eq!(b.record().await.daily_used, 7);
        assert_eq!(store.stats().await.users, 1);
    }

    #[tokio::test]
    async fn owner_tier_is_resolved_at_creation() {
        let store = SessionStore::new(Some(UserId(99)));
        let owner = store.get_or_create(UserId(99)).await;
        let other = store.get_or_create(UserId(1)).await;
        assert_eq!(owner.record().await.tier, Tier::Owner);
        assert_eq!(other.record().await.tier, Tier::Free);
    }

    #[tokio::test]
    async fn concurrent_first_contact_creates_one_session() {
        let store = Arc::new(SessionStore::new(None));

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let handle = store.get_or_create(UserId(42)).await;
                handle.record().await.daily_used += 1;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let handle = store.get_or_create(UserId(42)).await;
        assert_eq!(handle.record().await.daily_used, 50);
        assert_eq!(store.stats().await.users, 1);
    }

    #[tokio::test]
    async fn remove_forgets_the_session() {
        let store = SessionStore::new(None);
        let handle = store.get_or_create(UserId(5)).await;
        handle.record().await.daily_used = 3;

        assert!(store.remove(UserId(5)).await);
        assert!(!store.remove(UserId(5)).await);

        let fresh = store.get_or_create(UserId(5)).await;
        assert_eq!(fresh.record().await.daily_used, 0);
    }
}
