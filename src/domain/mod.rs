//! Domain layer: purchase transactions, products, receipts and the ports through
//! which the store provider is reached.

pub mod ports;
pub mod product;
pub mod receipt;
pub mod transaction;
