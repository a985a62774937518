//! Cache key schema
//!
//! Key format: v{VERSION}:{entity}:{identifier}

use std::fmt::Display;

/// Cache schema version - increment when changing key formats or entry layout
pub const CACHE_VERSION: u32 = 1;

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Single post entry
    /// Format: v1:post:{post_id}
    pub fn post(post_id: impl Display) -> String {
        format!("v{}:post:{}", CACHE_VERSION, post_id)
    }

    /// Extract entity type from key
    pub fn entity_type(key: &str) -> Option<&str> {
        let mut parts = key.splitn(3, ':');
        match (parts.next(), parts.next()) {
            (Some(_), Some(entity)) if !entity.is_empty() => Some(entity),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_key() {
        let key = CacheKey::post("018f3c1e-7b5a-7c1d-9a2b-3c4d5e6f7a8b");
        assert_eq!(key, "v1:post:018f3c1e-7b5a-7c1d-9a2b-3c4d5e6f7a8b");
    }

    #[test]
    fn test_entity_type() {
        assert_eq!(CacheKey::entity_type("v1:post:123"), Some("post"));
        assert_eq!(CacheKey::entity_type("invalid"), None);
    }
}
