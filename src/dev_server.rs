//! An in-memory server that speaks the expense API.
//!
//! Expenses and uploaded objects live in memory and are lost when the server
//! stops. The server also plays the part of object storage: signed upload URLs
//! point back at its own `/uploads/{key}` route.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use axum::{
    Router,
    extract::Request,
    http::{
        HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;

use crate::{
    Error, Expense, ExpenseId, ValidationError, endpoints, logging::logging_middleware,
};

mod handlers;

use handlers::{
    attach_file, create_expense, delete_expense, get_api_test, get_health, get_object, get_root,
    list_expenses, put_object, sign_upload,
};

/// The header that reports how long the server took to answer.
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// An object stored through a signed upload URL.
#[derive(Debug, Clone, PartialEq)]
struct StoredObject {
    content_type: String,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct Store {
    expenses: Vec<Expense>,
    next_id: ExpenseId,
    signed_keys: HashSet<String>,
    objects: HashMap<String, StoredObject>,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            expenses: Vec::new(),
            next_id: 1,
            signed_keys: HashSet::new(),
            objects: HashMap::new(),
        }
    }
}

/// The state of the dev server.
#[derive(Debug, Clone)]
pub struct DevServerState {
    store: Arc<Mutex<Store>>,
    public_url: String,
    allowed_origin: HeaderValue,
}

impl DevServerState {
    /// Create an empty server state.
    ///
    /// `public_url` is the URL clients reach the server at, used to build
    /// upload and file URLs. `allowed_origin` is the frontend origin that may
    /// make credentialed cross-origin requests.
    ///
    /// # Errors
    ///
    /// Returns an [Error::InvalidConfig] if `allowed_origin` is not a valid
    /// header value.
    pub fn new(public_url: &str, allowed_origin: &str) -> Result<Self, Error> {
        let allowed_origin = HeaderValue::from_str(allowed_origin).map_err(|error| {
            Error::InvalidConfig(format!("invalid allowed origin \"{allowed_origin}\": {error}"))
        })?;

        Ok(Self {
            store: Arc::new(Mutex::new(Store::default())),
            public_url: public_url.trim_end_matches('/').to_owned(),
            allowed_origin,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>, ServerError> {
        self.store.lock().map_err(|error| {
            tracing::error!("could not acquire the store lock: {error}");
            ServerError::StoreLock
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}{}",
            self.public_url,
            endpoints::format_endpoint(endpoints::UPLOAD_OBJECT, key)
        )
    }
}

/// The errors the dev server answers with.
///
/// Every error becomes a plain text response, which is what the client shows
/// to the user.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ServerError {
    /// The request body did not describe a valid expense.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A required request field was empty.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// No expense has the requested ID.
    #[error("Expense {0} not found")]
    ExpenseNotFound(ExpenseId),

    /// No object is stored under the requested key.
    #[error("Object not found")]
    ObjectNotFound,

    /// An upload was attempted for a key that was never signed.
    #[error("Upload URL is not signed")]
    UnsignedUpload,

    /// The store mutex was poisoned.
    #[error("could not acquire the store lock")]
    StoreLock,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match self {
            ServerError::Validation(_) | ServerError::MissingField(_) => StatusCode::BAD_REQUEST,
            ServerError::ExpenseNotFound(_) | ServerError::ObjectNotFound => StatusCode::NOT_FOUND,
            ServerError::UnsignedUpload => StatusCode::FORBIDDEN,
            ServerError::StoreLock => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}

/// Return a router with all the dev server's routes.
pub fn build_router(state: DevServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(state.allowed_origin.clone())
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    Router::new()
        .route(endpoints::ROOT, get(get_root))
        .route(endpoints::HEALTH, get(get_health))
        .route(endpoints::API_TEST, get(get_api_test))
        .route(
            endpoints::EXPENSES,
            get(list_expenses).post(create_expense),
        )
        .route(
            endpoints::EXPENSE,
            delete(delete_expense).patch(attach_file),
        )
        .route(endpoints::SIGN_UPLOAD, post(sign_upload))
        .route(endpoints::UPLOAD_OBJECT, get(get_object).put(put_object))
        .layer(middleware::from_fn(logging_middleware))
        .layer(cors)
        .layer(middleware::from_fn(response_time))
        .with_state(state)
}

/// Add a header with the time taken to produce the response.
async fn response_time(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = format!("{}ms", start.elapsed().as_millis());

    match HeaderValue::from_str(&elapsed) {
        Ok(value) => {
            response.headers_mut().insert(RESPONSE_TIME_HEADER, value);
        }
        Err(error) => tracing::warn!("could not set {RESPONSE_TIME_HEADER}: {error}"),
    }

    response
}
