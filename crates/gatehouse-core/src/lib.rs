//! Gatehouse Core - Domain types, errors and key utilities for the federation broker

pub mod error;
pub mod keys;
pub mod models;

pub use error::*;
pub use keys::*;
pub use models::*;
