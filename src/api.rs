//! The calls this client makes against the expense API and object storage.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{Expense, ExpenseId, NewExpense};

/// A transport-level failure of one call.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body as text, possibly empty.
        body: String,
    },

    /// No response arrived before the request timeout.
    #[error("the request timed out")]
    Timeout,

    /// The request could not be sent or the response could not be read.
    #[error("{0}")]
    Transport(String),

    /// The server answered with a success status but a body that could not
    /// be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ApiError {
    /// The server's own explanation, if it sent a non-empty one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { body, .. } if !body.trim().is_empty() => Some(body.trim()),
            _ => None,
        }
    }

    /// The server's message, or the status code when the body was empty, or
    /// the transport error otherwise.
    pub fn message_or_status(&self) -> String {
        match self {
            ApiError::Status { status, body } if body.trim().is_empty() => status.to_string(),
            ApiError::Status { body, .. } => body.trim().to_owned(),
            error => error.to_string(),
        }
    }
}

/// The body of `POST /api/upload/sign`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    /// The name of the file being uploaded.
    pub filename: String,
    /// The media type the file will be uploaded with.
    #[serde(rename = "type")]
    pub media_type: String,
}

/// What the signing service answered.
///
/// Both fields are optional here because the service is not trusted to send
/// them. The upload coordinator rejects a response with either one missing or
/// empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignResponse {
    /// Where to `PUT` the file bytes.
    #[serde(rename = "uploadUrl", default)]
    pub upload_url: Option<String>,
    /// The storage key to attach to the expense once the bytes are stored.
    #[serde(default)]
    pub key: Option<String>,
}

/// What object storage answered to a direct upload.
///
/// Whether the status counts as success is up to the caller because object
/// stores disagree on which success status they return.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response body as text, possibly empty.
    pub body: String,
}

/// The external expense API, signing service, and object storage.
///
/// None of these calls are retried by the caller. An implementation may retry
/// [ExpenseApi::list_expenses] because it is idempotent, but must send every
/// other call exactly once.
pub trait ExpenseApi {
    /// `GET /api/expenses`
    fn list_expenses(&self) -> impl Future<Output = Result<Vec<Expense>, ApiError>> + Send;

    /// `POST /api/expenses`
    fn create_expense(
        &self,
        expense: &NewExpense,
    ) -> impl Future<Output = Result<Expense, ApiError>> + Send;

    /// `DELETE /api/expenses/{id}`
    fn delete_expense(
        &self,
        id: ExpenseId,
    ) -> impl Future<Output = Result<ExpenseId, ApiError>> + Send;

    /// `PATCH /api/expenses/{id}` with `{fileKey}`.
    fn attach_file(
        &self,
        id: ExpenseId,
        file_key: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// `POST /api/upload/sign`
    fn sign_upload(
        &self,
        request: &SignRequest,
    ) -> impl Future<Output = Result<SignResponse, ApiError>> + Send;

    /// `PUT {upload_url}` with the raw file bytes.
    ///
    /// Returns `Ok` for any status the server answered with. Only failing to
    /// get an answer at all is an error.
    fn upload_object(
        &self,
        upload_url: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<StorageResponse, ApiError>> + Send;
}

#[cfg(test)]
mod api_error_tests {
    use crate::{ApiError, SignResponse};

    #[test]
    fn server_message_uses_non_empty_body() {
        let error = ApiError::Status {
            status: 400,
            body: " Title is required \n".to_owned(),
        };

        assert_eq!(error.server_message(), Some("Title is required"));
    }

    #[test]
    fn server_message_is_none_for_empty_body_and_transport_errors() {
        let empty = ApiError::Status {
            status: 500,
            body: String::new(),
        };

        assert_eq!(empty.server_message(), None);
        assert_eq!(ApiError::Timeout.server_message(), None);
    }

    #[test]
    fn message_or_status_falls_back_to_status_code() {
        let error = ApiError::Status {
            status: 502,
            body: "  ".to_owned(),
        };

        assert_eq!(error.message_or_status(), "502");
    }

    #[test]
    fn sign_response_tolerates_missing_fields() {
        let response: SignResponse = serde_json::from_str(r#"{"key": "k1"}"#).unwrap();

        assert_eq!(
            response,
            SignResponse {
                upload_url: None,
                key: Some("k1".to_owned())
            }
        );
    }
}
