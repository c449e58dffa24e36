//! State store errors.

use thiserror::Error;
use tubeflow_firestore::FirestoreError;
use tubeflow_models::{TransitionError, VideoId, VideoStatus};

/// Result type for state store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("video {0} not found")]
    NotFound(VideoId),

    /// The stored status was not one the caller expected.
    #[error("video {id} is {actual}, expected one of [{}]", join_statuses(.expected))]
    Conflict {
        id: VideoId,
        expected: Vec<VideoStatus>,
        actual: VideoStatus,
    },

    #[error("video {0} already exists")]
    AlreadyExists(VideoId),

    #[error("invalid mutation: {0}")]
    Invariant(#[from] TransitionError),

    #[error("stored record is unreadable: {0}")]
    Corrupt(String),

    #[error("state backend error: {0}")]
    Backend(String),
}

fn join_statuses(statuses: &[VideoStatus]) -> String {
    statuses.iter().map(VideoStatus::as_str).collect::<Vec<_>>().join(", ")
}

impl StateError {
    pub fn conflict(id: &VideoId, expected: &[VideoStatus], actual: VideoStatus) -> Self {
        Self::Conflict {
            id: id.clone(),
            expected: expected.to_vec(),
            actual,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<FirestoreError> for StateError {
    fn from(e: FirestoreError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}
