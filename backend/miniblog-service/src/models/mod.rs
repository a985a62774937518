/// Data models for miniblog-service
///
/// - `PostId`: time-sortable post identifier (UUIDv7)
/// - `Post`: authoritative post as stored in the post store
/// - `FeedItem`: a subscriber's denormalized copy of a post
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

/// Post identifier. Ordering of ids is creation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PostId(Uuid);

impl PostId {
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PostId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Issues strictly increasing post ids.
///
/// UUIDv7 only orders by millisecond; ids drawn within the same millisecond
/// fall back to `last + 1`.
///
/// The guarantee holds per generator, i.e. per process. Several API processes
/// sharing one database issue ids that are ordered by millisecond only, so two
/// posts created in the same millisecond on different processes may list in
/// either order. Each id is still unique and listing stays stable.
#[derive(Debug)]
pub struct IdGenerator {
    last: Mutex<Uuid>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Uuid::nil()),
        }
    }

    pub fn next_id(&self) -> PostId {
        let fresh = Uuid::now_v7();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let id = if fresh > *last {
            fresh
        } else {
            Uuid::from_u128(last.as_u128().wrapping_add(1))
        };
        *last = id;
        PostId(id)
    }
}

/// A post as committed to the post store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub author_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    /// Starts at 0, incremented by exactly one per successful edit
    pub version: i64,
}

/// A post as materialized in one subscriber's feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    /// Id of the post this item copies
    pub id: PostId,
    pub author_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub version: i64,
}

impl From<&Post> for FeedItem {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id,
            author_id: post.author_id.clone(),
            text: post.text.clone(),
            created_at: post.created_at,
            last_modified_at: post.last_modified_at,
            version: post.version,
        }
    }
}
