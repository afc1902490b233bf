//! Defines the app level error type and the phase each upload error belongs to.

use std::fmt::Display;

/// The errors that may occur in the application.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum Error {
    /// The user entered something that cannot be submitted.
    ///
    /// Validation happens before any request is made, so this error never
    /// reaches the network layer.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The expense list could not be fetched.
    ///
    /// The cache is never modified when a fetch fails.
    #[error("Failed to fetch: {0}")]
    Fetch(String),

    /// The server rejected (or never answered) a create or delete.
    ///
    /// The optimistic change has been rolled back by the time the caller sees
    /// this error. The string is the server's message when it sent one,
    /// otherwise a generic fallback.
    #[error("{0}")]
    Confirm(String),

    /// The signing service did not return a usable upload destination.
    #[error("{0}")]
    Sign(String),

    /// The file bytes could not be stored at the signed destination.
    #[error("{0}")]
    Transfer(String),

    /// The file was stored but the expense could not be updated to reference it.
    ///
    /// The stored object is orphaned. Nothing attempts to clean it up.
    #[error("{0}")]
    Commit(String),

    /// An upload phase was started while the session was in another phase.
    #[error("cannot start {attempted} while the upload is {current}")]
    UploadOutOfOrder {
        /// The phase the caller tried to run.
        attempted: UploadPhase,
        /// The phase the session was actually in.
        current: UploadPhase,
    },

    /// The client could not be configured, e.g. the base URL does not parse.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// The upload phase this error happened in, or `None` for errors that
    /// do not come from the upload protocol.
    pub fn phase(&self) -> Option<UploadPhase> {
        match self {
            Error::Sign(_) => Some(UploadPhase::Signing),
            Error::Transfer(_) => Some(UploadPhase::Transferring),
            Error::Commit(_) => Some(UploadPhase::Committing),
            _ => None,
        }
    }
}

/// Problems with user input that block a submission.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The title was empty or only whitespace.
    #[error("Title is required")]
    EmptyTitle,

    /// The amount was not a number, or was not greater than zero.
    #[error("Amount must be greater than 0")]
    InvalidAmount(String),

    /// An upload was submitted without a file.
    #[error("Please select a file.")]
    NoFileSelected,
}

/// The phases of a receipt upload, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadPhase {
    /// Nothing has been submitted yet.
    Idle,
    /// Asking the signing service for an upload destination.
    Signing,
    /// Sending the file bytes to the signed destination.
    Transferring,
    /// Pointing the expense at the stored file.
    Committing,
    /// The file is stored and referenced by the expense.
    Done,
    /// A phase failed. The error says which one.
    Failed,
}

impl Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UploadPhase::Idle => "idle",
            UploadPhase::Signing => "signing",
            UploadPhase::Transferring => "transferring",
            UploadPhase::Committing => "committing",
            UploadPhase::Done => "done",
            UploadPhase::Failed => "failed",
        };

        write!(f, "{name}")
    }
}

#[cfg(test)]
mod error_tests {
    use crate::{Error, UploadPhase, ValidationError};

    #[test]
    fn upload_errors_report_their_phase() {
        assert_eq!(
            Error::Sign("nope".to_owned()).phase(),
            Some(UploadPhase::Signing)
        );
        assert_eq!(
            Error::Transfer("nope".to_owned()).phase(),
            Some(UploadPhase::Transferring)
        );
        assert_eq!(
            Error::Commit("nope".to_owned()).phase(),
            Some(UploadPhase::Committing)
        );
    }

    #[test]
    fn other_errors_have_no_phase() {
        assert_eq!(Error::Confirm("nope".to_owned()).phase(), None);
        assert_eq!(Error::Fetch("nope".to_owned()).phase(), None);
        assert_eq!(Error::from(ValidationError::EmptyTitle).phase(), None);
    }

    #[test]
    fn validation_errors_display_the_form_message() {
        let error = Error::from(ValidationError::InvalidAmount("-5".to_owned()));

        assert_eq!(error.to_string(), "Amount must be greater than 0");
    }
}
