//! Per-item outcome tracking for batch mutations.
//!
//! # Responsibility
//! - Run every item of a batch even when earlier items fail.
//! - Report one aggregated error naming what succeeded and what failed.
//!
//! # Invariants
//! - Only the first failure is kept in full; later failures only flip their
//!   index to failed.
//! - Successful items stay committed: aggregation is reporting, not rollback.

use crate::error::{AccessError, AccessResult, ErrorKind, MutationKind};
use crate::model::entity::EntityId;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Aggregated failure of a batch mutation.
#[derive(Debug)]
pub struct BatchError {
    mutation: MutationKind,
    first_error: AccessError,
    succeeded_names: Vec<String>,
    failed_names: Vec<String>,
    outcomes: Vec<bool>,
    succeeded_ids: Vec<EntityId>,
}

impl BatchError {
    /// Kind of the first captured failure.
    pub fn kind(&self) -> ErrorKind {
        self.first_error.kind()
    }

    pub fn mutation(&self) -> MutationKind {
        self.mutation
    }

    pub fn first_error(&self) -> &AccessError {
        &self.first_error
    }

    /// Success flag per input index.
    pub fn outcomes(&self) -> &[bool] {
        &self.outcomes
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, succeeded)| (!succeeded).then_some(index))
            .collect()
    }

    /// Ids of the items that were committed, in input order.
    pub fn succeeded_ids(&self) -> &[EntityId] {
        &self.succeeded_ids
    }

    pub fn succeeded_names(&self) -> &[String] {
        &self.succeeded_names
    }

    pub fn failed_names(&self) -> &[String] {
        &self.failed_names
    }

    /// The `Couldn't ... Successfully ...` sentence appended to the first error.
    pub fn summary(&self) -> String {
        let succeeded = if self.succeeded_names.is_empty() {
            "none".to_string()
        } else {
            self.succeeded_names.join(", ")
        };
        format!(
            "Couldn't {} {}. Successfully {}: {}",
            self.mutation.verb(),
            self.failed_names.join(", "),
            self.mutation.past_tense(),
            succeeded
        )
    }
}

impl Display for BatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.first_error, self.summary())
    }
}

impl Error for BatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.first_error)
    }
}

/// Collects per-item outcomes of one batch.
#[derive(Debug)]
pub struct ErrorsTracker {
    mutation: MutationKind,
    outcomes: Vec<bool>,
    first_error: Option<AccessError>,
}

impl ErrorsTracker {
    pub fn new(mutation: MutationKind, count: usize) -> Self {
        Self {
            mutation,
            outcomes: Vec::with_capacity(count),
            first_error: None,
        }
    }

    /// Runs one item, recording its outcome. Returns the value on success.
    pub fn try_call<T>(&mut self, func: impl FnOnce() -> AccessResult<T>) -> Option<T> {
        match func() {
            Ok(value) => {
                self.outcomes.push(true);
                Some(value)
            }
            Err(err) => {
                if self.first_error.is_none() {
                    self.first_error = Some(err);
                }
                self.outcomes.push(false);
                None
            }
        }
    }

    pub fn has_errors(&self) -> bool {
        self.first_error.is_some()
    }

    pub fn outcomes(&self) -> &[bool] {
        &self.outcomes
    }

    /// Finishes the batch.
    ///
    /// `name_of(index)` renders the label of item `index` and is only called
    /// when at least one item failed.
    ///
    /// # Errors
    /// - `BatchError` carrying the first failure plus the name summary.
    pub fn finish(
        self,
        succeeded_ids: Vec<EntityId>,
        name_of: impl Fn(usize) -> String,
    ) -> Result<Vec<EntityId>, BatchError> {
        let Some(first_error) = self.first_error else {
            return Ok(succeeded_ids);
        };

        let mut succeeded_names = Vec::new();
        let mut failed_names = Vec::new();
        for (index, succeeded) in self.outcomes.iter().enumerate() {
            if *succeeded {
                succeeded_names.push(name_of(index));
            } else {
                failed_names.push(name_of(index));
            }
        }

        Err(BatchError {
            mutation: self.mutation,
            first_error,
            succeeded_names,
            failed_names,
            outcomes: self.outcomes,
            succeeded_ids,
        })
    }
}
