use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::api::models::PhotoRecord;

/// Pixel dimensions; both sides are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// One feed item. `liked` is the only field that ever changes, and it
/// changes by replacing the whole value (see [`Photo::with_liked`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub id: String,
    pub size: Size,
    pub created_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub thumb_url: String,
    pub full_url: String,
    pub liked: bool,
}

impl Photo {
    pub fn with_liked(&self, liked: bool) -> Self {
        Self {
            liked,
            ..self.clone()
        }
    }
}

#[derive(Debug, Error)]
#[error("Photo {id} has invalid size {width}x{height}")]
pub struct InvalidPhoto {
    pub id: String,
    pub width: u32,
    pub height: u32,
}

impl TryFrom<PhotoRecord> for Photo {
    type Error = InvalidPhoto;

    fn try_from(record: PhotoRecord) -> Result<Self, Self::Error> {
        if record.width == 0 || record.height == 0 {
            return Err(InvalidPhoto {
                id: record.id,
                width: record.width,
                height: record.height,
            });
        }

        Ok(Self {
            created_at: record.created_at.as_deref().and_then(parse_timestamp),
            id: record.id,
            size: Size {
                width: record.width,
                height: record.height,
            },
            description: record.description,
            thumb_url: record.urls.thumb,
            full_url: record.urls.full,
            liked: record.liked_by_user,
        })
    }
}

/// RFC 3339 timestamp normalized to UTC; anything unparseable is `None`.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!(raw = %raw, error = %e, "Ignoring unparseable created_at");
            None
        }
    }
}
