//! In-process adapters for the store ports.

pub mod fake_store;
pub mod services;
