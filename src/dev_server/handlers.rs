//! Route handlers for the dev server.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    AttachFileRequest, Expense, ExpenseEnvelope, ExpenseId, ExpenseList, SignRequest,
    SignResponse, ValidationError,
};

use super::{DevServerState, ServerError, StoredObject};

/// The body of a create request.
#[derive(Debug, Deserialize)]
pub(super) struct CreateExpenseRequest {
    title: String,
    amount: f64,
}

pub(super) async fn get_root() -> Json<Value> {
    Json(json!({"message": "OK"}))
}

pub(super) async fn get_health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

pub(super) async fn get_api_test() -> Json<Value> {
    Json(json!({"message": "test"}))
}

/// List every expense, with file references expanded into download URLs.
pub(super) async fn list_expenses(
    State(state): State<DevServerState>,
) -> Result<Json<ExpenseList>, ServerError> {
    let store = state.lock()?;

    let expenses = store
        .expenses
        .iter()
        .map(|expense| with_file_url(&state, expense))
        .collect();

    Ok(Json(ExpenseList { expenses }))
}

pub(super) async fn create_expense(
    State(state): State<DevServerState>,
    Json(request): Json<CreateExpenseRequest>,
) -> Result<(StatusCode, Json<ExpenseEnvelope>), ServerError> {
    let title = request.title.trim();

    if title.is_empty() {
        return Err(ValidationError::EmptyTitle.into());
    }

    if !request.amount.is_finite() || request.amount <= 0.0 {
        return Err(ValidationError::InvalidAmount(request.amount.to_string()).into());
    }

    let mut store = state.lock()?;
    let expense = Expense {
        id: store.next_id,
        title: title.to_owned(),
        amount: request.amount,
        file_reference: None,
    };
    store.next_id += 1;
    store.expenses.push(expense.clone());

    tracing::info!("created expense {}", expense.id);

    Ok((StatusCode::CREATED, Json(ExpenseEnvelope { expense })))
}

pub(super) async fn delete_expense(
    State(state): State<DevServerState>,
    Path(expense_id): Path<ExpenseId>,
) -> Result<Json<Value>, ServerError> {
    let mut store = state.lock()?;

    let position = store
        .expenses
        .iter()
        .position(|expense| expense.id == expense_id)
        .ok_or(ServerError::ExpenseNotFound(expense_id))?;
    store.expenses.remove(position);

    tracing::info!("deleted expense {expense_id}");

    Ok(Json(json!({"id": expense_id})))
}

/// Point an expense at an uploaded object.
///
/// The key is not checked against stored objects, the same as a real API that
/// cannot see into storage.
pub(super) async fn attach_file(
    State(state): State<DevServerState>,
    Path(expense_id): Path<ExpenseId>,
    Json(request): Json<AttachFileRequest>,
) -> Result<Json<ExpenseEnvelope>, ServerError> {
    if request.file_key.trim().is_empty() {
        return Err(ServerError::MissingField("fileKey"));
    }

    let mut store = state.lock()?;

    let expense = store
        .expenses
        .iter_mut()
        .find(|expense| expense.id == expense_id)
        .ok_or(ServerError::ExpenseNotFound(expense_id))?;
    expense.file_reference = Some(request.file_key);
    let expense = with_file_url(&state, expense);

    Ok(Json(ExpenseEnvelope { expense }))
}

/// Issue an upload URL on this server for the requested file.
pub(super) async fn sign_upload(
    State(state): State<DevServerState>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, ServerError> {
    if request.filename.trim().is_empty() {
        return Err(ServerError::MissingField("filename"));
    }

    let mut store = state.lock()?;
    let key = format!(
        "{}-{}",
        store.signed_keys.len() + 1,
        sanitize_filename(&request.filename)
    );
    store.signed_keys.insert(key.clone());

    tracing::debug!("signed {key} for {}", request.media_type);

    Ok(Json(SignResponse {
        upload_url: Some(state.object_url(&key)),
        key: Some(key),
    }))
}

pub(super) async fn put_object(
    State(state): State<DevServerState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_owned();

    let mut store = state.lock()?;

    if !store.signed_keys.contains(&key) {
        return Err(ServerError::UnsignedUpload);
    }

    tracing::info!("stored {} bytes under {key}", body.len());
    store.objects.insert(
        key,
        StoredObject {
            content_type,
            bytes: body.to_vec(),
        },
    );

    Ok(StatusCode::OK)
}

pub(super) async fn get_object(
    State(state): State<DevServerState>,
    Path(key): Path<String>,
) -> Result<Response, ServerError> {
    let store = state.lock()?;
    let object = store.objects.get(&key).ok_or(ServerError::ObjectNotFound)?;

    Ok((
        [(CONTENT_TYPE, object.content_type.clone())],
        object.bytes.clone(),
    )
        .into_response())
}

fn with_file_url(state: &DevServerState, expense: &Expense) -> Expense {
    Expense {
        file_reference: expense
            .file_reference
            .as_deref()
            .map(|key| state.object_url(key)),
        ..expense.clone()
    }
}

/// Keep letters, digits, dots, dashes and underscores so the key fits in a
/// single path segment.
fn sanitize_filename(filename: &str) -> String {
    filename
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod sanitize_filename_tests {
    use super::sanitize_filename;

    #[test]
    fn keeps_safe_characters() {
        assert_eq!(sanitize_filename("receipt-01_a.png"), "receipt-01_a.png");
    }

    #[test]
    fn replaces_separators_and_spaces() {
        assert_eq!(sanitize_filename(" ../my receipt.pdf"), ".._my_receipt.pdf");
    }
}
