pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod logging;

pub use application::initialization::{InitializeOptions, InitializeResult, InitializeState};
pub use application::purchasing::InAppPurchasing;
pub use domain::transaction::{FailureReason, Transaction, TransactionState};
pub use error::{InitializationFailure, PurchaseError, Result};
