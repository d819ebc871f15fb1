use std::{
    env, fs,
    path::{Path, PathBuf},
};

use chrono::{Duration, FixedOffset};

use crate::{access::QuotaPolicy, errors::Error, Result};

/// Typed configuration, sourced from the environment (with `.env` honored).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    /// Distinguished owner user id; compared once at session creation.
    pub owner_id: Option<i64>,

    // Quotas & premium
    pub premium_tokens: Vec<String>,
    pub free_daily_limit: u32,
    pub premium_daily_limit: u32,
    pub premium_grant_hours: i64,
    /// Offset defining the calendar day used for quota windows. The source
    /// deployment used implicit server-local days; here the zone is explicit.
    pub quota_utc_offset_minutes: i32,

    // Login
    pub login_code_length: usize,

    // Storage
    pub data_dir: PathBuf,

    // Userbot gateway
    pub gateway_base_url: String,
    pub gateway_api_token: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let gateway_base_url = env_str("GATEWAY_BASE_URL").unwrap_or_default();
        if gateway_base_url.trim().is_empty() {
            return Err(Error::Config(
                "GATEWAY_BASE_URL environment variable is required".to_string(),
            ));
        }

        let owner_id = env_str("OWNER_ID").and_then(|s| s.trim().parse::<i64>().ok());
        let premium_tokens = parse_csv(env_str("PREMIUM_TOKENS"));

        let free_daily_limit = env_u32("FREE_DAILY_LIMIT").unwrap_or(10);
        let premium_daily_limit = env_u32("PREMIUM_DAILY_LIMIT").unwrap_or(100);
        let premium_grant_hours = env_u32("PREMIUM_GRANT_HOURS").unwrap_or(3) as i64;
        let quota_utc_offset_minutes = env_str("QUOTA_UTC_OFFSET_MINUTES")
            .and_then(|s| s.trim().parse::<i32>().ok())
            .unwrap_or(0);
        if quota_utc_offset_minutes.abs() >= 24 * 60 {
            return Err(Error::Config(format!(
                "QUOTA_UTC_OFFSET_MINUTES out of range: {quota_utc_offset_minutes}"
            )));
        }

        let login_code_length = env_u32("LOGIN_CODE_LENGTH").unwrap_or(5) as usize;
        let data_dir = PathBuf::from(env_str("DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let gateway_api_token = env_str("GATEWAY_API_TOKEN").and_then(non_empty);

        Ok(Self {
            bot_token,
            owner_id,
            premium_tokens,
            free_daily_limit,
            premium_daily_limit,
            premium_grant_hours,
            quota_utc_offset_minutes,
            login_code_length,
            data_dir,
            gateway_base_url,
            gateway_api_token,
        })
    }

    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            free_daily: self.free_daily_limit,
            premium_daily: self.premium_daily_limit,
            grant: Duration::hours(self.premium_grant_hours),
            day_offset: FixedOffset::east_opt(self.quota_utc_offset_minutes * 60)
                .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset")),
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_parsing_skips_blanks() {
        assert_eq!(
            parse_csv(Some("a, b,,c ".to_string())),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_csv(None).is_empty());
    }
}
