//! Position-indexed result merge

use crate::item::{ItemResult, ResponseList};
use crate::MergeError;

/// Collects exactly one result per position and emits them in position order
#[derive(Debug)]
pub struct ResultMerger {
    slots: Vec<Option<ItemResult>>,
}

impl ResultMerger {
    /// Merger for a request of `len` items
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    /// Place a result at its own position
    pub fn place(&mut self, result: ItemResult) -> Result<(), MergeError> {
        let position = result.position();
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(position)
            .ok_or(MergeError::OutOfRange { position, len })?;

        if slot.is_some() {
            return Err(MergeError::Duplicate(position));
        }
        *slot = Some(result);
        Ok(())
    }

    /// Positions that have not received a result yet
    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(position, _)| position)
            .collect()
    }

    /// Ordered results, failing if any position is unfilled
    pub fn finish(self) -> Result<ResponseList, MergeError> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(MergeError::Missing(missing));
        }
        Ok(self.slots.into_iter().flatten().collect())
    }

    /// Ordered results with any unfilled position replaced by `fill(position)`
    pub fn finish_with<F>(self, mut fill: F) -> ResponseList
    where
        F: FnMut(usize) -> ItemResult,
    {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| slot.unwrap_or_else(|| fill(position)))
            .collect()
    }
}
