//! Attaching a receipt file to an expense.
//!
//! An upload goes through three phases, each a separate request that can fail
//! on its own:
//!
//! ```text
//! IDLE -> SIGNING -> TRANSFERRING -> COMMITTING -> DONE
//!                \-> FAILED (from any phase, carrying which phase failed)
//! ```
//!
//! Nothing is retried automatically. A failed commit leaves the file in
//! storage with nothing pointing at it.

use crate::{
    Error, ExpenseApi, ExpenseId, SignRequest, SignResponse, UploadPhase, ValidationError,
};

/// A file picked by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFile {
    /// The file name, without any directories.
    pub name: String,
    /// The media type to upload the file with, e.g. `image/png`.
    pub media_type: String,
    /// The file contents.
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    /// Create a selected file.
    pub fn new(name: &str, media_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_owned(),
            media_type: media_type.to_owned(),
            bytes,
        }
    }
}

/// A write-authorized upload target issued by the signing service.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedDestination {
    /// Where to `PUT` the file bytes.
    pub upload_url: String,
    /// The key that refers to the stored file.
    pub storage_key: String,
}

impl SignedDestination {
    /// Check that the signing service sent both a usable URL and a key.
    fn from_response(response: SignResponse) -> Result<Self, Error> {
        let invalid = || Error::Sign("Invalid signing response".to_owned());

        let upload_url = response
            .upload_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(invalid)?;
        let storage_key = response
            .key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(invalid)?;

        reqwest::Url::parse(&upload_url).map_err(|_| invalid())?;

        Ok(Self {
            upload_url,
            storage_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Idle,
    Signing,
    Transferring(SignedDestination),
    Committing(SignedDestination),
    Done { storage_key: String },
    Failed { phase: UploadPhase },
}

/// One attempt at attaching a file to an expense.
///
/// Each phase has its own transition ([UploadSession::sign],
/// [UploadSession::transfer], [UploadSession::commit]) that only runs from the
/// phase before it. [UploadSession::run] drives all three in order.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    expense_id: ExpenseId,
    file: Option<SelectedFile>,
    state: State,
    destination: Option<SignedDestination>,
    last_error: Option<Error>,
}

impl UploadSession {
    /// Start a session for attaching a file to the expense `expense_id`.
    pub fn new(expense_id: ExpenseId) -> Self {
        Self {
            expense_id,
            file: None,
            state: State::Idle,
            destination: None,
            last_error: None,
        }
    }

    /// The expense the file will be attached to.
    pub fn expense_id(&self) -> ExpenseId {
        self.expense_id
    }

    /// The current phase.
    pub fn phase(&self) -> UploadPhase {
        match self.state {
            State::Idle => UploadPhase::Idle,
            State::Signing => UploadPhase::Signing,
            State::Transferring(_) => UploadPhase::Transferring,
            State::Committing(_) => UploadPhase::Committing,
            State::Done { .. } => UploadPhase::Done,
            State::Failed { .. } => UploadPhase::Failed,
        }
    }

    /// The phase that failed, if the session is [UploadPhase::Failed].
    pub fn failed_phase(&self) -> Option<UploadPhase> {
        match self.state {
            State::Failed { phase } => Some(phase),
            _ => None,
        }
    }

    /// Whether an upload has started and not yet finished or failed.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.state,
            State::Signing | State::Transferring(_) | State::Committing(_)
        )
    }

    /// The file that will be uploaded.
    pub fn selected_file(&self) -> Option<&SelectedFile> {
        self.file.as_ref()
    }

    /// The destination from the last successful signing, kept after a
    /// failure so an orphaned object can be identified.
    pub fn destination(&self) -> Option<&SignedDestination> {
        self.destination.as_ref()
    }

    /// The error from the last failed attempt.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// The storage key attached to the expense, once the upload is done.
    pub fn committed_key(&self) -> Option<&str> {
        match &self.state {
            State::Done { storage_key } => Some(storage_key),
            _ => None,
        }
    }

    /// Choose the file to upload, clearing the outcome of any earlier attempt.
    ///
    /// # Errors
    ///
    /// Returns an [Error::UploadOutOfOrder] if an upload is in progress.
    pub fn select_file(&mut self, file: SelectedFile) -> Result<(), Error> {
        if self.is_in_progress() {
            return Err(Error::UploadOutOfOrder {
                attempted: UploadPhase::Idle,
                current: self.phase(),
            });
        }

        self.file = Some(file);
        self.state = State::Idle;
        self.destination = None;
        self.last_error = None;

        Ok(())
    }

    /// Forget the selected file and any outcome.
    pub fn reset(&mut self) {
        self.file = None;
        self.state = State::Idle;
        self.destination = None;
        self.last_error = None;
    }

    /// Upload the selected file and attach it to the expense.
    ///
    /// A session that failed earlier starts over from signing, since a
    /// signature cannot be reused. Returns the committed storage key.
    ///
    /// # Errors
    ///
    /// Returns a [ValidationError::NoFileSelected] without making any request
    /// if no file is selected, otherwise the error of the phase that failed.
    pub async fn run<A: ExpenseApi>(&mut self, api: &A) -> Result<String, Error> {
        if self.file.is_none() {
            return Err(self.no_file_selected());
        }

        if let State::Failed { .. } = self.state {
            self.state = State::Idle;
        }

        self.sign(api).await?;
        self.transfer(api).await?;
        self.commit(api).await
    }

    /// Ask the signing service where to upload the selected file.
    ///
    /// # Errors
    ///
    /// Returns an [Error::Sign] if the service fails or its answer is
    /// missing the upload URL or key.
    pub async fn sign<A: ExpenseApi>(&mut self, api: &A) -> Result<(), Error> {
        self.expect_phase(UploadPhase::Idle, UploadPhase::Signing)?;

        let request = match &self.file {
            Some(file) => SignRequest {
                filename: file.name.clone(),
                media_type: file.media_type.clone(),
            },
            None => return Err(self.no_file_selected()),
        };

        self.state = State::Signing;
        self.last_error = None;
        tracing::debug!(
            "signing upload of {:?} for expense {}",
            request.filename,
            self.expense_id
        );

        let destination = api
            .sign_upload(&request)
            .await
            .map_err(|error| {
                Error::Sign(format!(
                    "Failed to sign upload URL: {}",
                    error.message_or_status()
                ))
            })
            .and_then(SignedDestination::from_response);

        match destination {
            Ok(destination) => {
                self.destination = Some(destination.clone());
                self.state = State::Transferring(destination);
                Ok(())
            }
            Err(error) => Err(self.fail(UploadPhase::Signing, error)),
        }
    }

    /// Send the file bytes to the signed destination.
    ///
    /// # Errors
    ///
    /// Returns an [Error::Transfer] if storage answers with anything other
    /// than a success status, or does not answer.
    pub async fn transfer<A: ExpenseApi>(&mut self, api: &A) -> Result<(), Error> {
        self.expect_phase(UploadPhase::Transferring, UploadPhase::Transferring)?;

        let Some(file) = self.file.clone() else {
            return Err(self.no_file_selected());
        };
        let State::Transferring(destination) = self.state.clone() else {
            return Err(Error::UploadOutOfOrder {
                attempted: UploadPhase::Transferring,
                current: self.phase(),
            });
        };

        tracing::debug!(
            "uploading {} bytes to {}",
            file.bytes.len(),
            destination.upload_url
        );

        let result = api
            .upload_object(
                &destination.upload_url,
                &file.media_type,
                file.bytes,
            )
            .await;

        match result {
            Ok(response) if is_transfer_success(response.status) => {
                self.state = State::Committing(destination);
                Ok(())
            }
            Ok(response) => {
                let error = Error::Transfer(
                    format!("File upload failed: {} {}", response.status, response.body)
                        .trim_end()
                        .to_owned(),
                );
                Err(self.fail(UploadPhase::Transferring, error))
            }
            Err(error) => {
                let error = Error::Transfer(format!("File upload failed: {error}"));
                Err(self.fail(UploadPhase::Transferring, error))
            }
        }
    }

    /// Point the expense at the stored file.
    ///
    /// Returns the storage key now attached to the expense.
    ///
    /// # Errors
    ///
    /// Returns an [Error::Commit] if the expense could not be updated. The
    /// stored file is left in place.
    pub async fn commit<A: ExpenseApi>(&mut self, api: &A) -> Result<String, Error> {
        let storage_key = match &self.state {
            State::Committing(destination) => destination.storage_key.clone(),
            _ => {
                return Err(Error::UploadOutOfOrder {
                    attempted: UploadPhase::Committing,
                    current: self.phase(),
                });
            }
        };

        match api.attach_file(self.expense_id, &storage_key).await {
            Ok(()) => {
                tracing::info!("attached {storage_key} to expense {}", self.expense_id);
                self.file = None;
                self.last_error = None;
                self.state = State::Done {
                    storage_key: storage_key.clone(),
                };
                Ok(storage_key)
            }
            Err(error) => {
                tracing::error!(
                    "{storage_key} is stored but expense {} does not reference it: {error}",
                    self.expense_id
                );
                let error = Error::Commit(format!(
                    "Failed to update expense: {}",
                    error.message_or_status()
                ));
                Err(self.fail(UploadPhase::Committing, error))
            }
        }
    }

    fn expect_phase(&self, required: UploadPhase, attempted: UploadPhase) -> Result<(), Error> {
        if self.phase() == required {
            Ok(())
        } else {
            Err(Error::UploadOutOfOrder {
                attempted,
                current: self.phase(),
            })
        }
    }

    /// Record that there is no file to upload, without changing phase.
    fn no_file_selected(&mut self) -> Error {
        let error = Error::from(ValidationError::NoFileSelected);
        self.last_error = Some(error.clone());
        error
    }

    fn fail(&mut self, phase: UploadPhase, error: Error) -> Error {
        tracing::warn!(
            "upload for expense {} failed while {phase}: {error}",
            self.expense_id
        );
        self.state = State::Failed { phase };
        self.last_error = Some(error.clone());
        error
    }
}

/// Object stores disagree on the success status for a `PUT`, so any 2xx
/// counts, 200 and 204 included.
fn is_transfer_success(status: u16) -> bool {
    (200..300).contains(&status)
}
