//! Core types shared by every dnslb component

pub mod error;

pub use error::{BalanceError, BalanceResult};
