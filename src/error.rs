use crate::domain::transaction::TransactionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PurchaseError {
    #[error("In-app purchasing is not available: {0}")]
    InvalidOperation(String),
    #[error("A transaction for product '{product_id}' already exists. Complete that one first.")]
    DuplicateTransaction { product_id: String },
    #[error("Product with ID '{product_id}' not found")]
    UnknownProduct { product_id: String },
    #[error("Transaction for product '{product_id}' cannot be completed from state {state}")]
    CompletionState {
        product_id: String,
        state: TransactionState,
    },
    #[error("Transaction for product '{product_id}' is no longer active")]
    TransactionNotActive { product_id: String },
    #[error("Invalid transaction transition: {from} -> {to}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },
    #[error("Malformed receipt: {0}")]
    MalformedReceipt(String),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PurchaseError>;

/// Why an initialization attempt ended in `InitializeFailed`.
///
/// Never returned to the caller of `initialize` as an error; it is retained by the
/// coordinator and exposed for diagnostics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitializationFailure {
    #[error("Backend services are not initialized and automatic initialization is disabled")]
    ServicesNotInitialized,
    #[error("Backend services failed to initialize: {0}")]
    ServicesFailed(String),
    #[error("Failed to create the purchasing module: {0}")]
    ModuleConstruction(String),
    #[error("Failed to modify the store configuration: {0}")]
    Configuration(String),
    #[error("Store initialization failed ({reason:?}): {message}")]
    Provider {
        reason: crate::domain::ports::InitializeFailureReason,
        message: String,
    },
    #[error("Initialization attempt ended without reporting an outcome")]
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_product() {
        let err = PurchaseError::DuplicateTransaction {
            product_id: "gems_100".to_string(),
        };
        assert!(err.to_string().contains("gems_100"));

        let err = PurchaseError::CompletionState {
            product_id: "gems_100".to_string(),
            state: TransactionState::UserPerformingPurchase,
        };
        assert!(err.to_string().contains("user_performing_purchase"));
    }
}
