//! Tiered access control: daily quotas, premium grants, owner bypass.
//!
//! The day boundary is a calendar-day rollover in a configured UTC offset,
//! evaluated lazily at first access after the boundary. Premium demotion on
//! expiry is also lazy and one-way.

use chrono::{DateTime, Days, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::session::{Tier, UserSession};

#[derive(Clone, Copy, Debug)]
pub struct QuotaPolicy {
    pub free_daily: u32,
    pub premium_daily: u32,
    /// Validity of one premium-token redemption.
    pub grant: Duration,
    /// Offset defining the calendar day used for quota windows.
    pub day_offset: FixedOffset,
}

impl QuotaPolicy {
    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.day_offset).date_naive()
    }

    /// Time until the next local midnight, i.e. until the quota resets.
    fn resets_in(&self, now: DateTime<Utc>) -> Duration {
        let local_midnight = (self.local_date(now) + Days::new(1)).and_time(NaiveTime::MIN);
        match self.day_offset.from_local_datetime(&local_midnight) {
            chrono::LocalResult::Single(next) => next.with_timezone(&Utc) - now,
            _ => Duration::hours(24),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    /// `remaining` is `None` for the unbounded owner tier.
    Allowed { remaining: Option<u32> },
    Denied {
        used: u32,
        ceiling: u32,
        resets_in: Duration,
    },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenOutcome {
    Granted { expires_at: DateTime<Utc> },
    Invalid,
    OwnerUnlimited,
}

/// Snapshot of a session's effective tier and usage, for status rendering.
#[derive(Clone, Copy, Debug)]
pub struct UsageView {
    pub tier: Tier,
    pub used: u32,
    /// `None` for the unbounded owner tier.
    pub ceiling: Option<u32>,
    pub premium_expires_at: Option<DateTime<Utc>>,
}

pub struct AccessController {
    policy: QuotaPolicy,
    tokens: Vec<String>,
}

impl AccessController {
    pub fn new(policy: QuotaPolicy, tokens: Vec<String>) -> Self {
        Self { policy, tokens }
    }

    /// May this session perform a save right now? Mutates the session only to
    /// apply the lazy day rollover and the lazy premium demotion.
    pub fn can_proceed(&self, session: &mut UserSession, now: DateTime<Utc>) -> AccessDecision {
        if session.tier == Tier::Owner {
            return AccessDecision::Allowed { remaining: None };
        }

        self.roll_window(session, now);
        self.demote_if_expired(session, now);

        let ceiling = self.ceiling_for(session.tier);
        if session.daily_used < ceiling {
            AccessDecision::Allowed {
                remaining: Some(ceiling - session.daily_used),
            }
        } else {
            AccessDecision::Denied {
                used: session.daily_used,
                ceiling,
                resets_in: self.policy.resets_in(now),
            }
        }
    }

    /// Charge one use. Called only after the operation succeeded; no-op for
    /// the owner.
    pub fn record_use(&self, session: &mut UserSession, _now: DateTime<Utc>) {
        if session.tier == Tier::Owner {
            return;
        }
        session.daily_used += 1;
    }

    /// Redeem a premium token against the fixed allow-list. Every successful
    /// redemption overwrites the expiry, it never extends it.
    pub fn redeem(&self, session: &mut UserSession, token: &str, now: DateTime<Utc>) -> TokenOutcome {
        if session.tier == Tier::Owner {
            return TokenOutcome::OwnerUnlimited;
        }
        if !self.tokens.iter().any(|t| t == token) {
            tracing::info!(user = session.user_id.0, token = %digest(token), "premium token rejected");
            return TokenOutcome::Invalid;
        }

        let expires_at = now + self.policy.grant;
        session.tier = Tier::Premium;
        session.premium_expires_at = Some(expires_at);
        tracing::info!(user = session.user_id.0, token = %digest(token), %expires_at, "premium token redeemed");
        TokenOutcome::Granted { expires_at }
    }

    /// Effective tier and usage after applying the lazy rollover/demotion.
    pub fn usage_view(&self, session: &mut UserSession, now: DateTime<Utc>) -> UsageView {
        if session.tier != Tier::Owner {
            self.roll_window(session, now);
            self.demote_if_expired(session, now);
        }
        UsageView {
            tier: session.tier,
            used: session.daily_used,
            ceiling: match session.tier {
                Tier::Owner => None,
                tier => Some(self.ceiling_for(tier)),
            },
            premium_expires_at: session.premium_expires_at,
        }
    }

    fn ceiling_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Premium => self.policy.premium_daily,
            _ => self.policy.free_daily,
        }
    }

    fn roll_window(&self, session: &mut UserSession, now: DateTime<Utc>) {
        let today = self.policy.local_date(now);
        if session.usage_day != today {
            session.daily_used = 0;
            session.usage_day = today;
        }
    }

    fn demote_if_expired(&self, session: &mut UserSession, now: DateTime<Utc>) {
        if session.tier != Tier::Premium {
            return;
        }
        let Some(expires_at) = session.premium_expires_at else {
            return;
        };
        if expires_at <= now {
            session.tier = Tier::Free;
            session.premium_expires_at = None;
        }
    }
}

/// Log-safe token digest; raw tokens never reach the log stream.
fn digest(token: &str) -> String {
    let mut h = Sha256::new();
    h.update(token.as_bytes());
    let out = h.finalize();
    out.iter().take(8).map(|b| format!("{b:02x}")).collect()
}
