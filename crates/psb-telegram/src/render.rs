//! All user-facing copy lives here: core replies → Telegram HTML.

use chrono::{DateTime, Duration, Utc};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use psb_core::{
    auth::AuthReply,
    coordinator::{Reply, StatusView},
    saves::SavedPost,
    session::{AuthState, Tier},
};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render(reply: &Reply) -> String {
    match reply {
        Reply::Welcome { tier } => welcome(*tier),
        Reply::Help => help(),
        Reply::Auth(auth) => render_auth(auth),
        Reply::NotALink => "🔗 <b>Send me a Telegram post link!</b>\n\n\
             Example: <code>t.me/channel/123</code> or <code>t.me/c/123456/789</code>\n\n\
             Use /help for more information."
            .to_string(),
        Reply::LoginRequired { reference } => format!(
            "🔐 <code>{}</code> points into a private channel.\n\n\
             Use /login to connect your account first.",
            escape_html(&reference.url())
        ),
        Reply::QuotaExceeded {
            used,
            ceiling,
            resets_in,
        } => format!(
            "⚠️ <b>Daily limit reached!</b> ({used}/{ceiling})\n\n\
             Your quota resets in {}.\n\
             Upgrade with /premium for a higher limit.",
            fmt_duration(*resets_in)
        ),
        Reply::Saved { post, remaining } => {
            let usage = match remaining {
                Some(remaining) => format!("{remaining} saves left today"),
                None => "unlimited".to_string(),
            };
            format!(
                "✅ <b>Post saved!</b>\n\n\
                 📺 Channel: {}\n\
                 🆔 Save #{}\n\
                 🔗 <a href=\"{}\">View original</a>\n\
                 📊 {}\n\n\
                 {}",
                escape_html(channel_label(post)),
                post.id,
                escape_html(&post.link),
                usage,
                escape_html(&preview(&post.text, 200)),
            )
        }
        Reply::FetchFailed => "❌ <b>Error processing link</b>\n\n\
             Please try again or contact support if the issue persists.\n\
             Failed attempts don't count against your quota."
            .to_string(),
        Reply::Status(view) => status(view),
        Reply::Token(outcome) => token(outcome),
        Reply::OwnerReport {
            users,
            authenticated,
            total_saves,
        } => format!(
            "👑 <b>Owner report</b>\n\n\
             Users seen: {users}\n\
             Logged-in accounts: {authenticated}\n\
             Saved posts (all users): {total_saves}"
        ),
        Reply::NotOwner => "This command is reserved for the bot owner.".to_string(),
        Reply::SavesList { posts } => saves_list(posts),
        Reply::DeleteResult { id, deleted } => {
            if *deleted {
                format!("🗑️ Save #{id} deleted.")
            } else {
                format!("Save #{id} not found. Use /saves to list your posts.")
            }
        }
        Reply::Cleared => "🗑️ <b>All saves cleared!</b>\n\n\
             Start fresh by sending new post links."
            .to_string(),
        Reply::Premium { usage } => premium(usage.tier, usage.premium_expires_at),
    }
}

/// Inline keyboard to attach, mirroring the original bot's menus.
pub fn keyboard(reply: &Reply) -> Option<InlineKeyboardMarkup> {
    let rows: Vec<Vec<(&str, &str)>> = match reply {
        Reply::Welcome { .. } => vec![
            vec![("📋 Help", "help"), ("💾 My Saves", "saves")],
            vec![("⭐ Premium", "premium")],
        ],
        Reply::Saved { .. } => vec![vec![("💾 My Saves", "saves"), ("📊 Status", "status")]],
        Reply::SavesList { posts } if !posts.is_empty() => {
            vec![vec![("📊 Status", "status"), ("🗑️ Clear All", "clear")]]
        }
        Reply::QuotaExceeded { .. } => vec![vec![("⭐ Premium", "premium")]],
        _ => return None,
    };

    Some(InlineKeyboardMarkup::new(rows.into_iter().map(|row| {
        row.into_iter()
            .map(|(label, data)| InlineKeyboardButton::callback(label, data))
            .collect::<Vec<_>>()
    })))
}

fn welcome(tier: Tier) -> String {
    let tier_line = match tier {
        Tier::Owner => "\n👑 You are the bot owner: unlimited saves.\n",
        Tier::Premium => "\n⭐ Premium is active on your account.\n",
        Tier::Free => "",
    };
    format!(
        "🚀 <b>Welcome to Post Saver Bot!</b>\n\n\
         ✨ Save posts from channels where forwarding is restricted\n\
         ✨ Send a public post link to save it instantly\n\
         ✨ Use /login to reach private channels\n\
         {tier_line}\n\
         📌 Send a post link like <code>t.me/channel/123</code> to get started, \
         or type /help for all commands."
    )
}

fn help() -> String {
    "📖 <b>Commands</b>\n\n\
     🔗 Send any Telegram post link and I'll save it for you.\n\n\
     /start - Welcome message and main menu\n\
     /help - This message\n\
     /login - Connect your account for private channels\n\
     /logout - Disconnect your account\n\
     /status - Session, tier and quota\n\
     /token &lt;code&gt; - Redeem a premium token\n\
     /saves - List your saved posts\n\
     /delete &lt;id&gt; - Delete one saved post\n\
     /clear - Delete all saved posts\n\
     /premium - Premium info\n\n\
     <b>Supported links</b>\n\
     <code>t.me/channel/123</code> - public posts\n\
     <code>t.me/c/123456/789</code> - private posts (login required)"
        .to_string()
}

fn render_auth(reply: &AuthReply) -> String {
    match reply {
        AuthReply::PhonePrompt => "📱 Send your phone number in international format, \
             e.g. <code>+12025550123</code>."
            .to_string(),
        AuthReply::AlreadyAuthenticated => {
            "Already logged in. Use /logout first to switch accounts.".to_string()
        }
        AuthReply::CodeSent { phone } => format!(
            "📨 Verification code sent to <code>{}</code>.\n\
             Reply with the code you received.",
            escape_html(phone)
        ),
        AuthReply::MalformedPhone => "That doesn't look like a phone number. \
             Use international format: <code>+</code> followed by 10-15 digits."
            .to_string(),
        AuthReply::PhoneRejected => {
            "The login service rejected that phone number. Try another one.".to_string()
        }
        AuthReply::MalformedCode { expected_len } => format!(
            "The verification code is {expected_len} digits. Try again."
        ),
        AuthReply::CodeRejected => "❌ Wrong code. Check the message you received and try again."
            .to_string(),
        AuthReply::SecondFactorPrompt => "🔐 Two-step verification is enabled on this account.\n\
             Send your password."
            .to_string(),
        AuthReply::SecondFactorRejected => "❌ Wrong password. Try again.".to_string(),
        AuthReply::SignedIn => "✅ <b>Logged in!</b>\n\n\
             You can now save posts from private channels."
            .to_string(),
        AuthReply::ProviderUnavailable => "🚧 The login service is unavailable right now.\n\
             Your login was reset; start again with /login."
            .to_string(),
        AuthReply::LoggedOut => "👋 Logged out. Your account connection was closed.".to_string(),
        AuthReply::NotLoggedIn => "You are not logged in.".to_string(),
        AuthReply::Superseded => "Login cancelled.".to_string(),
    }
}

fn status(view: &StatusView) -> String {
    let auth_line = match view.auth {
        AuthState::Authenticated => match &view.phone {
            Some(phone) => format!("✅ Logged in as <code>{}</code>", escape_html(phone)),
            None => "✅ Logged in".to_string(),
        },
        AuthState::Unauthenticated => "⚪ Not logged in".to_string(),
        _ => "⏳ Login in progress".to_string(),
    };

    let tier_line = match view.usage.tier {
        Tier::Owner => "👑 Owner (unlimited)".to_string(),
        Tier::Premium => match view.usage.premium_expires_at {
            Some(at) => format!("⭐ Premium until {}", at.format("%Y-%m-%d %H:%M UTC")),
            None => "⭐ Premium (lifetime)".to_string(),
        },
        Tier::Free => "Free plan".to_string(),
    };

    let quota_line = match view.usage.ceiling {
        Some(ceiling) => format!("📊 Today: {}/{}", view.usage.used, ceiling),
        None => "📊 Today: unlimited".to_string(),
    };

    format!(
        "📊 <b>Your status</b>\n\n{auth_line}\n{tier_line}\n{quota_line}\n💾 Total saves: {}",
        view.total_saves
    )
}

fn token(outcome: &psb_core::access::TokenOutcome) -> String {
    use psb_core::access::TokenOutcome;
    match outcome {
        TokenOutcome::Granted { expires_at } => format!(
            "⭐ <b>Premium activated!</b>\n\nValid until {}.",
            expires_at.format("%Y-%m-%d %H:%M UTC")
        ),
        TokenOutcome::Invalid => "❌ That token is not valid.".to_string(),
        TokenOutcome::OwnerUnlimited => {
            "You are the owner: saves are already unlimited.".to_string()
        }
    }
}

fn premium(tier: Tier, expires_at: Option<DateTime<Utc>>) -> String {
    let current = match tier {
        Tier::Owner => "👑 Owner (unlimited)".to_string(),
        Tier::Premium => match expires_at {
            Some(at) => format!("⭐ Premium until {}", at.format("%Y-%m-%d %H:%M UTC")),
            None => "⭐ Premium (lifetime)".to_string(),
        },
        Tier::Free => "Free (10 saves/day)".to_string(),
    };
    format!(
        "⭐ <b>Premium</b>\n\n\
         🚀 100 saves per day instead of 10\n\
         🔐 Private channel access with /login\n\n\
         Redeem a premium token with <code>/token &lt;code&gt;</code>.\n\n\
         Current plan: {current}"
    )
}

fn saves_list(posts: &[SavedPost]) -> String {
    if posts.is_empty() {
        return "📭 <b>No saved posts yet!</b>\n\n\
             Send me a Telegram post link to get started."
            .to_string();
    }

    let mut out = format!("💾 <b>Your saved posts ({} total)</b>\n\n", posts.len());
    let shown = posts.iter().rev().take(10);
    for post in shown {
        out.push_str(&format!(
            "<b>#{}</b> {} — {}\n{}\n🔗 <a href=\"{}\">View original</a>\n\n",
            post.id,
            escape_html(channel_label(post)),
            post.saved_at.format("%Y-%m-%d %H:%M"),
            escape_html(&preview(&post.text, 50)),
            escape_html(&post.link),
        ));
    }
    if posts.len() > 10 {
        out.push_str(&format!("… and {} more\n", posts.len() - 10));
    }
    out.push_str("Delete one with /delete &lt;id&gt; or everything with /clear.");
    out
}

fn channel_label(post: &SavedPost) -> &str {
    post.channel_title.as_deref().unwrap_or(&post.channel)
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    format!("{}...", text.chars().take(max_chars).collect::<String>())
}

fn fmt_duration(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    if hours > 0 {
        return format!("{hours}h {mins}m");
    }
    if mins > 0 {
        return format!("{mins}m");
    }
    format!("{secs}s")
}
