//! Saved-post records, one JSON file per user.
//!
//! The deployment this replaces kept `user_<id>_posts.json` files next to the
//! process when no key-value store was configured; the layout is preserved so
//! existing data keeps working. All calls for one user happen inside that
//! user's op queue, so plain read-modify-write files are safe here.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::UserId, links::PostReference, ports::FetchedPost, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SavedPost {
    pub id: u64,
    pub link: String,
    pub channel: String,
    /// Display name reported by the fetcher, when it knows one.
    #[serde(default)]
    pub channel_title: Option<String>,
    pub message_id: i64,
    pub private: bool,
    pub text: String,
    pub saved_at: DateTime<Utc>,
}

pub struct SaveStore {
    dir: PathBuf,
}

impl SaveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn user_file(&self, user: UserId) -> PathBuf {
        self.dir.join(format!("user_{}_posts.json", user.0))
    }

    pub fn list(&self, user: UserId) -> Result<Vec<SavedPost>> {
        load_posts(&self.user_file(user))
    }

    pub fn count(&self, user: UserId) -> Result<usize> {
        Ok(self.list(user)?.len())
    }

    pub fn append(
        &self,
        user: UserId,
        reference: &PostReference,
        fetched: FetchedPost,
        now: DateTime<Utc>,
    ) -> Result<SavedPost> {
        let path = self.user_file(user);
        let mut posts = load_posts(&path)?;
        let id = posts.iter().map(|p| p.id).max().unwrap_or(0) + 1;

        let post = SavedPost {
            id,
            link: reference.url(),
            channel: reference.channel.clone(),
            channel_title: fetched.channel_title,
            message_id: reference.message_id,
            private: reference.private,
            text: fetched.text,
            saved_at: now,
        };
        posts.push(post.clone());
        store_posts(&path, &posts)?;
        Ok(post)
    }

    pub fn delete(&self, user: UserId, id: u64) -> Result<bool> {
        let path = self.user_file(user);
        let mut posts = load_posts(&path)?;
        let before = posts.len();
        posts.retain(|p| p.id != id);
        if posts.len() == before {
            return Ok(false);
        }
        store_posts(&path, &posts)?;
        Ok(true)
    }

    pub fn clear(&self, user: UserId) -> Result<()> {
        let path = self.user_file(user);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Total saves across all users (owner report).
    pub fn total_count(&self) -> Result<usize> {
        let mut total = 0usize;
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("user_") && name.ends_with("_posts.json") {
                total += load_posts(&entry.path())?.len();
            }
        }
        Ok(total)
    }
}

fn load_posts(path: &Path) -> Result<Vec<SavedPost>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&txt)?)
}

fn store_posts(path: &Path, posts: &[SavedPost]) -> Result<()> {
    let txt = serde_json::to_string(posts)?;
    fs::write(path, txt)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links;

    fn temp_store(tag: &str) -> SaveStore {
        let dir = std::env::temp_dir().join(format!("psb-saves-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        SaveStore::new(dir).unwrap()
    }

    fn reference() -> PostReference {
        links::parse("https://t.me/news/42").unwrap()
    }

    fn fetched(text: &str) -> FetchedPost {
        FetchedPost {
            channel_title: Some("News Channel".to_string()),
            text: text.to_string(),
        }
    }

    #[test]
    fn append_assigns_sequential_ids() {
        let store = temp_store("seq");
        let user = UserId(1);

        let a = store
            .append(user, &reference(), fetched("first"), Utc::now())
            .unwrap();
        let b = store
            .append(user, &reference(), fetched("second"), Utc::now())
            .unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(store.count(user).unwrap(), 2);
        assert_eq!(a.link, "https://t.me/news/42");
        assert_eq!(a.channel_title.as_deref(), Some("News Channel"));
    }

    #[test]
    fn delete_and_clear() {
        let store = temp_store("del");
        let user = UserId(2);
        store
            .append(user, &reference(), fetched("x"), Utc::now())
            .unwrap();
        store
            .append(user, &reference(), fetched("y"), Utc::now())
            .unwrap();

        assert!(store.delete(user, 1).unwrap());
        assert!(!store.delete(user, 1).unwrap());
        assert_eq!(store.count(user).unwrap(), 1);

        store.clear(user).unwrap();
        assert_eq!(store.count(user).unwrap(), 0);
    }

    #[test]
    fn users_are_isolated() {
        let store = temp_store("iso");
        store
            .append(UserId(1), &reference(), fetched("a"), Utc::now())
            .unwrap();
        store
            .append(UserId(2), &reference(), fetched("b"), Utc::now())
            .unwrap();

        assert_eq!(store.count(UserId(1)).unwrap(), 1);
        assert_eq!(store.count(UserId(2)).unwrap(), 1);
        assert_eq!(store.total_count().unwrap(), 2);
    }

    #[test]
    fn list_round_trips_through_disk() {
        let store = temp_store("rt");
        let user = UserId(3);
        store
            .append(user, &reference(), fetched("hello"), Utc::now())
            .unwrap();

        let posts = store.list(user).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].channel, "news");
        assert_eq!(posts[0].message_id, 42);
        assert!(!posts[0].private);
        assert_eq!(posts[0].text, "hello");
    }
}
