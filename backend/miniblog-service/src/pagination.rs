//! Keyset pagination shared by author listings and feeds.
//!
//! Collections are ordered by post id, newest first. A page request carries an
//! optional cursor (the first id of the wanted page, inclusive) and a size.
//! Stores fetch `size + 1` rows with `id <= cursor` and hand them to
//! [`paginate`], which splits off the extra row as the next cursor.

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{FeedItem, Post, PostId};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Option<PostId>,
    pub size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            cursor: None,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(cursor: Option<PostId>, size: u32) -> Result<Self> {
        if !(1..=MAX_PAGE_SIZE).contains(&size) {
            return Err(AppError::BadRequest(format!(
                "size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(Self { cursor, size })
    }

    /// Build from raw `page` / `size` query values.
    pub fn from_query(page: Option<&str>, size: Option<&str>) -> Result<Self> {
        let cursor = page
            .map(|raw| {
                raw.parse::<PostId>()
                    .map_err(|_| AppError::BadRequest(format!("invalid page cursor: {}", raw)))
            })
            .transpose()?;

        let size = match size {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| AppError::BadRequest(format!("invalid size: {}", raw)))?,
            None => DEFAULT_PAGE_SIZE,
        };

        Self::new(cursor, size)
    }

    /// Rows a store must fetch to serve this request.
    pub fn fetch_limit(&self) -> i64 {
        i64::from(self.size) + 1
    }

    pub fn after(&self, cursor: PostId) -> Self {
        Self {
            cursor: Some(cursor),
            size: self.size,
        }
    }
}

/// Anything ordered by post id.
pub trait Keyed {
    fn key(&self) -> PostId;
}

impl Keyed for Post {
    fn key(&self) -> PostId {
        self.id
    }
}

impl Keyed for FeedItem {
    fn key(&self) -> PostId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<PostId>,
}

/// Turn `rows` (id descending, at most `size + 1`, all `<= cursor`) into a page.
///
/// An explicit cursor must be the id of the first row; a cursor that matches
/// no row is a client error.
pub fn paginate<T: Keyed>(request: &PageRequest, mut rows: Vec<T>) -> Result<Page<T>> {
    if let Some(cursor) = request.cursor {
        match rows.first() {
            Some(first) if first.key() == cursor => {}
            _ => {
                return Err(AppError::BadRequest(format!(
                    "page cursor {} does not match any item",
                    cursor
                )))
            }
        }
    }

    let size = request.size as usize;
    let next_cursor = if rows.len() > size {
        let next = rows[size].key();
        rows.truncate(size);
        Some(next)
    } else {
        None
    };

    Ok(Page {
        items: rows,
        next_cursor,
    })
}

/// HTTP body for paginated collections.
#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub posts: Vec<T>,
    #[serde(rename = "nextPage", skip_serializing_if = "Option::is_none")]
    pub next_page: Option<PostId>,
}

impl<T> From<Page<T>> for PageResponse<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            posts: page.items,
            next_page: page.next_cursor,
        }
    }
}
