//! Splitlah bill splitter
//!
//! Splits a restaurant bill between a group of diners:
//! - An AI service reads the receipt photo into line items
//! - Items are assigned to people by tap or by voice command
//! - Each person's share of service charge and GST follows their share of
//!   the food they were assigned
//!
//! SESSION FLOW:
//! UPLOAD → ANALYZING → ASSIGN → SUMMARY (reset → UPLOAD)

pub mod allocation;
pub mod api;
pub mod config;
pub mod error;
pub mod gemini;
pub mod ingestion;
pub mod media;
pub mod models;
pub mod money;
pub mod state;
pub mod summary;
pub mod voice;

pub use error::{Result, SplitError};

// Re-export common types
pub use allocation::{allocate, Allocation, PersonShare};
pub use models::*;
pub use state::BillSession;
