//! Telegram post-link recognition.
//!
//! Pure text → reference extraction; no network access and no state. A link
//! may be embedded anywhere in a larger message (search semantics); when a
//! message contains several links only the first match is acted on.

use std::sync::OnceLock;

use regex::Regex;

/// A parsed (channel, message) pair extracted from a post link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostReference {
    /// Channel username, or the numeric internal id for private channels.
    pub channel: String,
    pub message_id: i64,
    /// Private references require an authenticated user client to resolve.
    pub private: bool,
}

impl PostReference {
    pub fn url(&self) -> String {
        if self.private {
            format!("https://t.me/c/{}/{}", self.channel, self.message_id)
        } else {
            format!("https://t.me/{}/{}", self.channel, self.message_id)
        }
    }
}

// Telegram usernames are at least two characters, which keeps the `/c/`
// internal-id prefix out of the public pattern.
fn public_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:https?://)?t\.me/([A-Za-z0-9_]{2,})/(\d+)").expect("valid pattern")
    })
}

fn private_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:https?://)?t\.me/c/(\d+)/(\d+)").expect("valid pattern"))
}

fn alias_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:https?://)?telegram\.me/([A-Za-z0-9_]{2,})/(\d+)").expect("valid pattern")
    })
}

/// Extract the first post reference from `text`, or `None` if it contains no
/// recognizable link.
///
/// Patterns are tried in a fixed order: public `t.me/<name>/<id>`, private
/// `t.me/c/<id>/<id>`, then the `telegram.me` alias of the public form. A
/// channel token that is purely numeric always yields a private reference,
/// whatever shape it arrived in.
pub fn parse(text: &str) -> Option<PostReference> {
    for (re, private_form) in [
        (public_re(), false),
        (private_re(), true),
        (alias_re(), false),
    ] {
        let Some(caps) = re.captures(text) else {
            continue;
        };
        let channel = caps[1].to_string();
        let Ok(message_id) = caps[2].parse::<i64>() else {
            continue;
        };
        let private = private_form || channel.bytes().all(|b| b.is_ascii_digit());
        return Some(PostReference {
            channel,
            message_id,
            private,
        });
    }
    None
}
