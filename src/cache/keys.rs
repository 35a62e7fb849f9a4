use serde::de::DeserializeOwned;
use serde::Serialize;

use super::CacheLayer;

/// Domain object families with a fixed key template and default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    User,
    Session,
    ApiResponse,
    Stats,
    LearningRecords,
}

impl KeyKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            KeyKind::User => "user",
            KeyKind::Session => "session",
            KeyKind::ApiResponse => "api",
            KeyKind::Stats => "stats",
            KeyKind::LearningRecords => "learning_records",
        }
    }

    /// Default time-to-live in seconds
    pub fn default_ttl(&self) -> u64 {
        match self {
            KeyKind::User => 600,
            KeyKind::Session => 3600,
            KeyKind::ApiResponse => 300,
            KeyKind::Stats => 900,
            KeyKind::LearningRecords => 600,
        }
    }

    pub fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix(), id)
    }
}

/// Convenience wrappers; expiry is still handled by [`CacheLayer::set`].
impl CacheLayer {
    pub async fn get_for<T: DeserializeOwned>(&self, kind: KeyKind, id: &str) -> Option<T> {
        self.get(&kind.key(id)).await
    }

    pub async fn set_for<T: Serialize + ?Sized>(&self, kind: KeyKind, id: &str, value: &T) -> bool {
        self.set(&kind.key(id), value, Some(kind.default_ttl())).await
    }

    pub async fn delete_for(&self, kind: KeyKind, id: &str) -> usize {
        self.delete(&kind.key(id)).await
    }

    /// Drop every entry of one family (e.g. all user profiles).
    pub async fn invalidate_kind(&self, kind: KeyKind) -> usize {
        self.delete_pattern(&format!("{}:*", kind.prefix())).await
    }

    pub async fn get_user<T: DeserializeOwned>(&self, user_id: &str) -> Option<T> {
        self.get_for(KeyKind::User, user_id).await
    }

    pub async fn set_user<T: Serialize + ?Sized>(&self, user_id: &str, profile: &T) -> bool {
        self.set_for(KeyKind::User, user_id, profile).await
    }

    /// Drops the profile and everything scoped under it (`user:<id>:*`).
    pub async fn invalidate_user(&self, user_id: &str) -> usize {
        self.delete_for(KeyKind::User, user_id).await
            + self.delete_pattern(&format!("{}:*", KeyKind::User.key(user_id))).await
    }

    pub async fn get_session<T: DeserializeOwned>(&self, session_id: &str) -> Option<T> {
        self.get_for(KeyKind::Session, session_id).await
    }

    pub async fn set_session<T: Serialize + ?Sized>(&self, session_id: &str, session: &T) -> bool {
        self.set_for(KeyKind::Session, session_id, session).await
    }

    pub async fn delete_session(&self, session_id: &str) -> usize {
        self.delete_for(KeyKind::Session, session_id).await
    }

    pub async fn get_api_response<T: DeserializeOwned>(&self, route: &str) -> Option<T> {
        self.get_for(KeyKind::ApiResponse, route).await
    }

    pub async fn set_api_response<T: Serialize + ?Sized>(&self, route: &str, body: &T) -> bool {
        self.set_for(KeyKind::ApiResponse, route, body).await
    }

    pub async fn get_stats<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.get_for(KeyKind::Stats, name).await
    }

    pub async fn set_stats<T: Serialize + ?Sized>(&self, name: &str, stats: &T) -> bool {
        self.set_for(KeyKind::Stats, name, stats).await
    }

    pub async fn get_learning_records<T: DeserializeOwned>(&self, user_id: &str) -> Option<T> {
        self.get_for(KeyKind::LearningRecords, user_id).await
    }

    pub async fn set_learning_records<T: Serialize + ?Sized>(&self, user_id: &str, records: &T) -> bool {
        self.set_for(KeyKind::LearningRecords, user_id, records).await
    }
}
