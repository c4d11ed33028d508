//! CSV adapters used by the command-line driver.

pub mod catalog_reader;
pub mod event_writer;
