//! A client for tracking expenses and attaching receipt files to them.
//!
//! Creates and deletes are shown straight away and confirmed with the server
//! in the background. If the server rejects a change, the list goes back to
//! exactly what it was before. Receipts are uploaded in three steps: the
//! server signs an upload destination, the file goes straight to storage, and
//! the expense is then updated to point at the stored file.
//!
//! The crate also ships a small in-memory server that speaks the same API,
//! for trying the client out locally.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use tokio::signal;

mod api;
mod cache;
mod config;
pub mod dev_server;
pub mod endpoints;
mod error;
mod expense;
mod http_client;
mod logging;
mod mutation;
mod upload;

#[cfg(test)]
mod test_utils;

pub use api::{ApiError, ExpenseApi, SignRequest, SignResponse, StorageResponse};
pub use cache::{CollectionKey, ExpenseCache, FetchTicket};
pub use config::{
    ClientConfig, DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_STALE_TIME, MAX_LIST_RETRIES,
};
pub use error::{Error, UploadPhase, ValidationError};
pub use expense::{AttachFileRequest, Expense, ExpenseEnvelope, ExpenseId, ExpenseList, NewExpense};
pub use http_client::HttpExpenseApi;
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use mutation::{
    MutationEngine, MutationKind, MutationOutcome, MutationStatus, PendingMutation,
};
pub use upload::{SelectedFile, SignedDestination, UploadSession};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(error) => {
                tracing::error!("failed to install terminate handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}
