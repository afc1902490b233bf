//! Core expense domain types and the JSON envelopes used on the wire.

use serde::{Deserialize, Serialize};

use crate::{Error, ValidationError};

/// Alias for the integer type used for expense IDs.
///
/// Server-assigned IDs are positive. Placeholder IDs for records that have
/// not been confirmed yet are negative.
pub type ExpenseId = i64;

/// Money spent on something, optionally with a receipt attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    /// The ID of the expense.
    pub id: ExpenseId,
    /// What the money was spent on.
    pub title: String,
    /// How much was spent. Always greater than zero.
    pub amount: f64,
    /// Where the receipt lives, if one has been uploaded.
    #[serde(rename = "fileUrl", default)]
    pub file_reference: Option<String>,
}

impl Expense {
    /// Whether this record was created locally and has not been confirmed by
    /// the server yet.
    pub fn is_placeholder(&self) -> bool {
        self.id < 0
    }
}

/// The validated payload for creating an expense.
///
/// To create a new `NewExpense` from user input, use [NewExpense::parse].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewExpense {
    title: String,
    amount: f64,
}

impl NewExpense {
    /// Validate raw form input.
    ///
    /// The title is trimmed and must not be empty. The amount is parsed from
    /// text and must be a finite number greater than zero.
    ///
    /// # Errors
    ///
    /// This function will return a:
    /// - [ValidationError::EmptyTitle] if `title` is empty or whitespace,
    /// - or [ValidationError::InvalidAmount] if `amount` is not a positive number.
    pub fn parse(title: &str, amount: &str) -> Result<Self, Error> {
        let title = title.trim();

        if title.is_empty() {
            return Err(ValidationError::EmptyTitle.into());
        }

        let parsed: f64 = amount
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidAmount(amount.to_owned()))?;

        if !parsed.is_finite() || parsed <= 0.0 {
            return Err(ValidationError::InvalidAmount(amount.to_owned()).into());
        }

        Ok(Self {
            title: title.to_owned(),
            amount: parsed,
        })
    }

    /// The trimmed title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The parsed amount.
    pub fn amount(&self) -> f64 {
        self.amount
    }
}

/// The body of `GET /api/expenses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseList {
    /// The expenses in display order.
    pub expenses: Vec<Expense>,
}

/// The body of a successful `POST /api/expenses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseEnvelope {
    /// The expense as stored by the server.
    pub expense: Expense,
}

/// The body of `PATCH /api/expenses/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachFileRequest {
    /// The storage key returned by the signing service.
    #[serde(rename = "fileKey")]
    pub file_key: String,
}
