//! Time-series error types
//!
//! Errors raised while validating ingest payloads and running queries.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Per-field validation messages, keyed by field path (`values.c3`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Record a message. The first message for a field wins.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }

    /// `Ok(())` when nothing was recorded
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, message)| format!("{}: {}", field, message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Errors on the bulk write path
#[derive(Error, Debug)]
pub enum IngestError {
    /// The payload is malformed
    #[error("Validation error: {0}")]
    Validation(FieldErrors),

    /// Storage layer error (NotFound, Conflict, ...)
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

impl From<FieldErrors> for IngestError {
    fn from(errors: FieldErrors) -> Self {
        IngestError::Validation(errors)
    }
}

/// Errors on the query path
#[derive(Error, Debug)]
pub enum QueryError {
    /// A query parameter could not be understood
    #[error("Validation error: {0}")]
    Validation(FieldErrors),

    /// The requested page lies beyond the last page
    #[error("Invalid page.")]
    InvalidPage,

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

impl From<FieldErrors> for QueryError {
    fn from(errors: FieldErrors) -> Self {
        QueryError::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_errors_keep_first_message() {
        let mut errors = FieldErrors::new();
        errors.add("timestamps", "This list may not be empty.");
        errors.add("timestamps", "ignored");
        errors.add("measure", "This field may not be blank.");

        assert_eq!(errors.get("timestamps"), Some("This list may not be empty."));
        assert_eq!(
            errors.to_string(),
            "measure: This field may not be blank.; timestamps: This list may not be empty."
        );
        assert!(errors.into_result().is_err());
        assert!(FieldErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_invalid_page_message() {
        assert_eq!(QueryError::InvalidPage.to_string(), "Invalid page.");
    }
}
