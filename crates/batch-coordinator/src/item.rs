//! Request items and per-item results

use inference_engine::ClassId;
use serde::{Deserialize, Serialize};

/// One uploaded image with its caller-supplied name and upload position
///
/// Positions are only assigned by [`RequestItem::from_uploads`], so a request
/// always carries positions `0..N-1` in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestItem {
    position: usize,
    name: String,
    payload: Vec<u8>,
}

impl RequestItem {
    /// Number uploads in arrival order
    pub fn from_uploads<I, N>(uploads: I) -> Vec<RequestItem>
    where
        I: IntoIterator<Item = (N, Vec<u8>)>,
        N: Into<String>,
    {
        uploads
            .into_iter()
            .enumerate()
            .map(|(position, (name, payload))| RequestItem {
                position,
                name: name.into(),
                payload,
            })
            .collect()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn into_parts(self) -> (usize, String, Vec<u8>) {
        (self.position, self.name, self.payload)
    }
}

/// Final outcome for one item
///
/// Serializes as `{position, name, predicted_class}` or `{position, name, error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemResult {
    Prediction {
        position: usize,
        name: String,
        predicted_class: ClassId,
    },
    Error {
        position: usize,
        name: String,
        error: String,
    },
}

impl ItemResult {
    pub fn prediction(position: usize, name: String, predicted_class: ClassId) -> Self {
        ItemResult::Prediction {
            position,
            name,
            predicted_class,
        }
    }

    pub fn error(position: usize, name: String, error: impl Into<String>) -> Self {
        ItemResult::Error {
            position,
            name,
            error: error.into(),
        }
    }

    pub fn position(&self) -> usize {
        match self {
            ItemResult::Prediction { position, .. } | ItemResult::Error { position, .. } => *position,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ItemResult::Prediction { name, .. } | ItemResult::Error { name, .. } => name,
        }
    }

    pub fn predicted_class(&self) -> Option<ClassId> {
        match self {
            ItemResult::Prediction { predicted_class, .. } => Some(*predicted_class),
            ItemResult::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ItemResult::Error { error, .. } => Some(error),
            ItemResult::Prediction { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ItemResult::Error { .. })
    }
}

/// Results in upload order, one per request item
pub type ResponseList = Vec<ItemResult>;
