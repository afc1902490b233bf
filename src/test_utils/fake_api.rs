use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::Notify;

use crate::{
    ApiError, Expense, ExpenseApi, ExpenseId, NewExpense, SignRequest, SignResponse,
    StorageResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Endpoint {
    List,
    Create,
    Delete,
    AttachFile,
    Sign,
    Upload,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApiCall {
    List,
    Create {
        title: String,
        amount: f64,
    },
    Delete(ExpenseId),
    AttachFile(ExpenseId, String),
    Sign(SignRequest),
    Upload {
        url: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug)]
struct FakeState {
    expenses: Vec<Expense>,
    next_id: ExpenseId,
    calls: Vec<ApiCall>,
    failures: HashMap<Endpoint, VecDeque<ApiError>>,
    gates: HashMap<Endpoint, Arc<Notify>>,
    sign_response: Option<SignResponse>,
    signed: usize,
    upload_status: u16,
    objects: Vec<String>,
}

/// An in-memory [ExpenseApi] that records every call.
///
/// Failures can be queued per endpoint with [FakeExpenseApi::fail_next] and
/// calls can be held until released with [FakeExpenseApi::hold].
#[derive(Debug)]
pub(crate) struct FakeExpenseApi {
    state: Mutex<FakeState>,
}

impl FakeExpenseApi {
    pub(crate) fn with_expenses(expenses: Vec<Expense>) -> Self {
        let next_id = expenses.iter().map(|expense| expense.id).max().unwrap_or(0) + 1;

        Self {
            state: Mutex::new(FakeState {
                expenses,
                next_id,
                calls: Vec::new(),
                failures: HashMap::new(),
                gates: HashMap::new(),
                sign_response: None,
                signed: 0,
                upload_status: 200,
                objects: Vec::new(),
            }),
        }
    }

    /// Make the next call to `endpoint` fail with `error`.
    pub(crate) fn fail_next(&self, endpoint: Endpoint, error: ApiError) {
        self.lock()
            .failures
            .entry(endpoint)
            .or_default()
            .push_back(error);
    }

    /// Make calls to `endpoint` wait for a notification on the returned gate.
    pub(crate) fn hold(&self, endpoint: Endpoint) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().gates.insert(endpoint, gate.clone());
        gate
    }

    pub(crate) fn release(&self, endpoint: Endpoint) {
        self.lock().gates.remove(&endpoint);
    }

    pub(crate) fn set_next_id(&self, id: ExpenseId) {
        self.lock().next_id = id;
    }

    pub(crate) fn set_sign_response(&self, response: SignResponse) {
        self.lock().sign_response = Some(response);
    }

    pub(crate) fn set_upload_status(&self, status: u16) {
        self.lock().upload_status = status;
    }

    pub(crate) fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub(crate) fn server_expenses(&self) -> Vec<Expense> {
        self.lock().expenses.clone()
    }

    /// The upload URLs that storage accepted bytes for.
    pub(crate) fn stored_objects(&self) -> Vec<String> {
        self.lock().objects.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("Could not lock fake API state")
    }

    async fn enter(&self, endpoint: Endpoint, call: ApiCall) -> Result<(), ApiError> {
        let gate = {
            let mut state = self.lock();
            state.calls.push(call);
            state.gates.get(&endpoint).cloned()
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }

        match self
            .lock()
            .failures
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn not_found() -> ApiError {
    ApiError::Status {
        status: 404,
        body: "Expense not found".to_owned(),
    }
}

impl ExpenseApi for FakeExpenseApi {
    async fn list_expenses(&self) -> Result<Vec<Expense>, ApiError> {
        self.enter(Endpoint::List, ApiCall::List).await?;

        Ok(self.server_expenses())
    }

    async fn create_expense(&self, expense: &NewExpense) -> Result<Expense, ApiError> {
        let call = ApiCall::Create {
            title: expense.title().to_owned(),
            amount: expense.amount(),
        };
        self.enter(Endpoint::Create, call).await?;

        let mut state = self.lock();
        let created = Expense {
            id: state.next_id,
            title: expense.title().to_owned(),
            amount: expense.amount(),
            file_reference: None,
        };
        state.next_id += 1;
        state.expenses.push(created.clone());

        Ok(created)
    }

    async fn delete_expense(&self, id: ExpenseId) -> Result<ExpenseId, ApiError> {
        self.enter(Endpoint::Delete, ApiCall::Delete(id)).await?;

        let mut state = self.lock();
        let position = state
            .expenses
            .iter()
            .position(|expense| expense.id == id)
            .ok_or_else(not_found)?;
        state.expenses.remove(position);

        Ok(id)
    }

    async fn attach_file(&self, id: ExpenseId, file_key: &str) -> Result<(), ApiError> {
        let call = ApiCall::AttachFile(id, file_key.to_owned());
        self.enter(Endpoint::AttachFile, call).await?;

        let mut state = self.lock();
        let expense = state
            .expenses
            .iter_mut()
            .find(|expense| expense.id == id)
            .ok_or_else(not_found)?;
        expense.file_reference = Some(file_key.to_owned());

        Ok(())
    }

    async fn sign_upload(&self, request: &SignRequest) -> Result<SignResponse, ApiError> {
        self.enter(Endpoint::Sign, ApiCall::Sign(request.clone()))
            .await?;

        let mut state = self.lock();
        state.signed += 1;

        let response = state.sign_response.clone().unwrap_or_else(|| SignResponse {
            upload_url: Some(format!("https://storage.test/upload/{}", state.signed)),
            key: Some(format!("receipts/{}-{}", state.signed, request.filename)),
        });

        Ok(response)
    }

    async fn upload_object(
        &self,
        upload_url: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StorageResponse, ApiError> {
        let call = ApiCall::Upload {
            url: upload_url.to_owned(),
            content_type: content_type.to_owned(),
            bytes,
        };
        self.enter(Endpoint::Upload, call).await?;

        let mut state = self.lock();
        let status = state.upload_status;

        if (200..300).contains(&status) {
            state.objects.push(upload_url.to_owned());
        }

        Ok(StorageResponse {
            status,
            body: String::new(),
        })
    }
}
