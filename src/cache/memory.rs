use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::CacheResult;
use super::CacheStore;

/// In-process TTL store.
///
/// Expired entries are invisible to reads immediately and are physically
/// dropped by [`CacheStore::purge_expired`]. Uses the tokio clock so a paused
/// test runtime controls expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Compile a Redis-style key glob: `*` matches any run of characters
/// (including `/` and `:`), `?` one character, `[...]` a class with an
/// optional leading `^` for negation, and `\x` a literal `x`.
fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => match chars.next() {
                Some(next) => re.push_str(&regex::escape(&next.to_string())),
                None => re.push_str(&regex::escape("\\")),
            },
            '[' => {
                re.push('[');
                let mut first = true;
                loop {
                    match chars.next() {
                        Some(']') if !first => {
                            re.push(']');
                            break;
                        }
                        Some('^') if first => {
                            re.push('^');
                            continue;
                        }
                        Some('-') => re.push('-'),
                        Some('\\') => {
                            if let Some(next) = chars.next() {
                                re.push_str(&regex::escape(&next.to_string()));
                            }
                        }
                        Some(ch) => re.push_str(&regex::escape(&ch.to_string())),
                        // Unterminated class; let the regex compiler reject it
                        None => break,
                    }
                    first = false;
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn raw_len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Remaining time-to-live of a live entry
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        entry.is_live(now).then(|| entry.expires_at - now)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str { "memory" }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let expires_at = Instant::now() + ttl;
        self.entries.lock().insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let matcher = glob_regex(pattern)?;
        let now = Instant::now();
        let entries = self.entries.lock();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| e.is_live(now) && matcher.is_match(k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn purge_expired(&self) -> CacheResult<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_hidden_then_purged() {
        let store = MemoryStore::new();
        store.set("a", "1".into(), Duration::from_secs(5)).await.unwrap();
        store.set("b", "2".into(), Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.keys("*").await.unwrap(), vec!["b".to_string()]);
        assert_eq!(store.raw_len(), 2);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.raw_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_resets_expiry() {
        let store = MemoryStore::new();
        store.set("k", "old".into(), Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        store.set("k", "new".into(), Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn glob_patterns_respect_segments() {
        let store = MemoryStore::new();
        for key in ["ns:user:1", "ns:user:2", "ns:session:1", "other:user:1"] {
            store.set(key, "x".into(), Duration::from_secs(60)).await.unwrap();
        }

        assert_eq!(
            store.keys("ns:user:*").await.unwrap(),
            vec!["ns:user:1".to_string(), "ns:user:2".to_string()]
        );
        assert_eq!(store.keys("ns:*").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn star_spans_slashes_in_route_keys() {
        let store = MemoryStore::new();
        for key in ["ns:api:/api/articles?page=1", "ns:api:quizzes", "ns:user:/7"] {
            store.set(key, "x".into(), Duration::from_secs(60)).await.unwrap();
        }

        assert_eq!(
            store.keys("ns:api:*").await.unwrap(),
            vec!["ns:api:/api/articles?page=1".to_string(), "ns:api:quizzes".to_string()]
        );
        assert_eq!(store.keys("ns:*").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn question_mark_classes_and_escapes() {
        let store = MemoryStore::new();
        for key in ["user:1", "user:2", "user:12", "user:a", "lit:*", "lit:x"] {
            store.set(key, "x".into(), Duration::from_secs(60)).await.unwrap();
        }

        assert_eq!(store.keys("user:?").await.unwrap().len(), 3);
        assert_eq!(
            store.keys("user:[0-9]").await.unwrap(),
            vec!["user:1".to_string(), "user:2".to_string()]
        );
        assert_eq!(store.keys("user:[^0-9]").await.unwrap(), vec!["user:a".to_string()]);
        assert_eq!(store.keys(r"lit:\*").await.unwrap(), vec!["lit:*".to_string()]);
        // Regex metacharacters in keys are literal
        assert!(store.keys("user.1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unterminated_class_is_a_pattern_error() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.keys("user:[abc").await,
            Err(crate::error::CacheError::Pattern(_))
        ));
    }

    #[tokio::test]
    async fn deleting_missing_key_reports_false() {
        let store = MemoryStore::new();
        assert!(!store.delete("nope").await.unwrap());
    }
}
