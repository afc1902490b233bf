//! An [ExpenseApi] that talks HTTP with `reqwest`.

use reqwest::{Response, header::CONTENT_TYPE};
use serde::de::DeserializeOwned;

use crate::{
    ApiError, AttachFileRequest, ClientConfig, Error, Expense, ExpenseApi, ExpenseEnvelope,
    ExpenseId, ExpenseList, MAX_LIST_RETRIES, NewExpense, SignRequest, SignResponse,
    StorageResponse,
    endpoints::{self, format_endpoint},
};

/// The HTTP client for the expense API.
///
/// Cookies set by the API are stored and sent back on later requests, so a
/// session established by the server carries over between calls.
#[derive(Debug, Clone)]
pub struct HttpExpenseApi {
    client: reqwest::Client,
    base_url: String,
    list_retries: u32,
}

impl HttpExpenseApi {
    /// Create a client for the API described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an [Error::InvalidConfig] if the base URL does not parse or the
    /// underlying HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let base_url = config.base_url.trim_end_matches('/').to_owned();

        reqwest::Url::parse(&base_url).map_err(|error| {
            Error::InvalidConfig(format!("could not parse base URL \"{base_url}\": {error}"))
        })?;

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| Error::InvalidConfig(error.to_string()))?;

        Ok(Self {
            client,
            base_url,
            list_retries: config.list_retries.min(MAX_LIST_RETRIES),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn list_expenses_once(&self) -> Result<Vec<Expense>, ApiError> {
        let response = self
            .client
            .get(self.url(endpoints::EXPENSES))
            .send()
            .await
            .map_err(transport_error)?;

        let list: ExpenseList = read_json(ensure_success(response).await?).await?;

        Ok(list.expenses)
    }
}

impl ExpenseApi for HttpExpenseApi {
    async fn list_expenses(&self) -> Result<Vec<Expense>, ApiError> {
        let mut attempt = 0;

        loop {
            match self.list_expenses_once().await {
                Ok(expenses) => return Ok(expenses),
                Err(error) if attempt < self.list_retries => {
                    attempt += 1;
                    tracing::warn!("listing expenses failed, retrying ({attempt}): {error}");
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn create_expense(&self, expense: &NewExpense) -> Result<Expense, ApiError> {
        let response = self
            .client
            .post(self.url(endpoints::EXPENSES))
            .json(expense)
            .send()
            .await
            .map_err(transport_error)?;

        let envelope: ExpenseEnvelope = read_json(ensure_success(response).await?).await?;

        Ok(envelope.expense)
    }

    async fn delete_expense(&self, id: ExpenseId) -> Result<ExpenseId, ApiError> {
        let response = self
            .client
            .delete(self.url(&format_endpoint(endpoints::EXPENSE, id)))
            .send()
            .await
            .map_err(transport_error)?;

        ensure_success(response).await?;

        Ok(id)
    }

    async fn attach_file(&self, id: ExpenseId, file_key: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .patch(self.url(&format_endpoint(endpoints::EXPENSE, id)))
            .json(&AttachFileRequest {
                file_key: file_key.to_owned(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        ensure_success(response).await?;

        Ok(())
    }

    async fn sign_upload(&self, request: &SignRequest) -> Result<SignResponse, ApiError> {
        let response = self
            .client
            .post(self.url(endpoints::SIGN_UPLOAD))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        read_json(ensure_success(response).await?).await
    }

    async fn upload_object(
        &self,
        upload_url: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StorageResponse, ApiError> {
        let response = self
            .client
            .put(upload_url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        Ok(StorageResponse { status, body })
    }
}

/// Turn a non-success response into an [ApiError::Status] carrying the body text.
async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await.map_err(transport_error)?;

    serde_json::from_slice(&bytes).map_err(|error| ApiError::MalformedResponse(error.to_string()))
}

fn transport_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(error.to_string())
    }
}
