//! Application layer orchestrating purchases.
//!
//! [`purchasing::InAppPurchasing`] is the entry point. It gates every transactional
//! call behind a one-shot [`initialization::InitializationCoordinator`], keeps the
//! live transactions in a [`registry::TransactionRegistry`], and applies store
//! callbacks only when drained from a [`callback_queue::DeferredCallbackQueue`].

pub mod callback_queue;
pub mod initialization;
pub mod purchasing;
pub mod registry;
