//! Tandem core types: the swipeable candidate model and deck decisions.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod gesture;

/// Stable identifier for a swipeable item (a group or a profile).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(pub i64);

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One swipeable item. The sequence a deck session is built from is
/// immutable; the controller only moves a cursor over it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: CandidateId,
    pub title: String,
    pub location: Option<String>,
    /// Cost/requirement chips. Render-only, never drives control flow.
    pub tags: Vec<String>,
    /// Raw media references in display order. Resolution into fetchable
    /// URLs happens in the media layer, not here.
    pub media: Vec<String>,
}

impl Candidate {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id: CandidateId(id),
            title: title.into(),
            location: None,
            tags: Vec::new(),
            media: Vec::new(),
        }
    }

    pub fn with_media(mut self, media: Vec<String>) -> Self {
        self.media = media;
        self
    }
}

/// Discrete outcome of a gesture or button press.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Tier attached to an accept. Superlike rides the same endpoint with a
/// different payload tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestTier {
    Like,
    Superlike,
}

pub mod prelude {
    pub use super::gesture::{DragOffset, Direction};
    pub use super::{Candidate, CandidateId, Decision, RequestTier};
}
