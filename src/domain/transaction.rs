use super::receipt::{Receipt, ValidationToken};
use crate::error::{PurchaseError, Result};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    #[default]
    UserPerformingPurchase,
    Deferred,
    ReadyToCollect,
    Failed,
    Completed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::UserPerformingPurchase => "user_performing_purchase",
            TransactionState::Deferred => "deferred",
            TransactionState::ReadyToCollect => "ready_to_collect",
            TransactionState::Failed => "failed",
            TransactionState::Completed => "completed",
        }
    }

    /// Completed and Failed end the attempt; the registry drops the entry on reaching them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Completed | TransactionState::Failed)
    }

    /// States from which `complete_transaction` is legal.
    pub fn is_collectable(&self) -> bool {
        matches!(
            self,
            TransactionState::ReadyToCollect | TransactionState::Deferred
        )
    }

    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (UserPerformingPurchase, ReadyToCollect | Deferred | Failed)
                | (ReadyToCollect, Completed | Failed)
                | (Deferred, Completed | Failed | ReadyToCollect)
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    #[default]
    None,
    PurchasingUnavailable,
    ExistingPurchasePending,
    ProductUnavailable,
    SignatureInvalid,
    UserCancelled,
    PaymentDeclined,
    DuplicateTransaction,
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::None => "none",
            FailureReason::PurchasingUnavailable => "purchasing_unavailable",
            FailureReason::ExistingPurchasePending => "existing_purchase_pending",
            FailureReason::ProductUnavailable => "product_unavailable",
            FailureReason::SignatureInvalid => "signature_invalid",
            FailureReason::UserCancelled => "user_cancelled",
            FailureReason::PaymentDeclined => "payment_declined",
            FailureReason::DuplicateTransaction => "duplicate_transaction",
            FailureReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One purchase attempt for a product.
///
/// Instances handed out by the service are snapshots; the live entry is owned by
/// the `TransactionRegistry` and re-read through `get_transaction` or the change
/// notifications.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct Transaction {
    /// Locally assigned, unique per attempt.
    pub attempt_id: u64,
    pub product_id: String,
    pub state: TransactionState,
    pub failure_reason: FailureReason,
    pub receipt: Option<Receipt>,
    /// Identifier assigned by the store provider.
    pub transaction_id: Option<String>,
    pub token: ValidationToken,
}

impl Transaction {
    pub fn new(attempt_id: u64, product_id: impl Into<String>) -> Self {
        Self {
            attempt_id,
            product_id: product_id.into(),
            state: TransactionState::UserPerformingPurchase,
            failure_reason: FailureReason::None,
            receipt: None,
            transaction_id: None,
            token: ValidationToken::invalid(),
        }
    }

    /// Applies every field set on `update` at once.
    ///
    /// Returns the diff of the fields whose value actually changed, or `None` when the
    /// update was a no-op. A state change outside the transition table is rejected and
    /// nothing is modified.
    pub fn apply(&mut self, update: TransactionUpdate) -> Result<Option<TransactionChange>> {
        if let Some(next) = update.state
            && next != self.state
            && !self.state.can_transition_to(next)
        {
            return Err(PurchaseError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let mut change = TransactionChange::default();

        if let Some(state) = update.state
            && state != self.state
        {
            change.state = Some((self.state, state));
            self.state = state;
        }
        if let Some(reason) = update.failure_reason
            && reason != self.failure_reason
        {
            change.failure_reason = Some((self.failure_reason, reason));
            self.failure_reason = reason;
        }
        if let Some(receipt) = update.receipt
            && self.receipt.as_ref() != Some(&receipt)
        {
            change.receipt = true;
            self.receipt = Some(receipt);
        }
        if let Some(transaction_id) = update.transaction_id
            && self.transaction_id.as_deref() != Some(transaction_id.as_str())
        {
            change.transaction_id = Some((self.transaction_id.clone(), transaction_id.clone()));
            self.transaction_id = Some(transaction_id);
        }
        if let Some(token) = update.token
            && token != self.token
        {
            change.token = true;
            self.token = token;
        }

        Ok((!change.is_empty()).then_some(change))
    }
}

/// A batch of field assignments applied atomically by `Transaction::apply`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransactionUpdate {
    pub state: Option<TransactionState>,
    pub failure_reason: Option<FailureReason>,
    pub receipt: Option<Receipt>,
    pub transaction_id: Option<String>,
    pub token: Option<ValidationToken>,
}

impl TransactionUpdate {
    pub fn state(state: TransactionState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn failed(reason: FailureReason) -> Self {
        Self {
            state: Some(TransactionState::Failed),
            failure_reason: Some(reason),
            ..Self::default()
        }
    }

    pub fn with_receipt(mut self, receipt: Option<Receipt>) -> Self {
        self.receipt = receipt;
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: Option<String>) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    pub fn with_token(mut self, token: ValidationToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// Summary of the fields modified by a single update.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransactionChange {
    pub state: Option<(TransactionState, TransactionState)>,
    pub failure_reason: Option<(FailureReason, FailureReason)>,
    pub receipt: bool,
    pub transaction_id: Option<(Option<String>, String)>,
    pub token: bool,
}

impl TransactionChange {
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.failure_reason.is_none()
            && !self.receipt
            && self.transaction_id.is_none()
            && !self.token
    }
}

impl fmt::Display for TransactionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some((old, new)) = self.state {
            parts.push(format!("state: '{old}' -> '{new}'"));
        }
        if let Some((old, new)) = self.failure_reason {
            parts.push(format!("failure_reason: '{old}' -> '{new}'"));
        }
        if self.receipt {
            parts.push("receipt".to_string());
        }
        if let Some((old, new)) = &self.transaction_id {
            parts.push(format!(
                "transaction_id: '{}' -> '{new}'",
                old.as_deref().unwrap_or("")
            ));
        }
        if self.token {
            parts.push("validation_token".to_string());
        }
        f.write_str(&parts.join(", "))
    }
}
