/// Errors raised by a cache backing store.
///
/// These never escape [`crate::cache::CacheLayer`]: the layer logs them and
/// degrades to a miss or a no-op, so callers only ever see `None`/`false`/`0`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing store could not be reached.
    #[error("Cache: backing store unavailable: {0}")]
    Unavailable(String),

    /// A value could not be encoded or decoded.
    #[error("Cache: serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A key pattern could not be compiled.
    #[error("Cache: invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Any other store-specific failure.
    #[error("Cache: {0}")]
    Backend(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
