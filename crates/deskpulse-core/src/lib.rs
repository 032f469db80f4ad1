//! # deskpulse-core
//!
//! Core types, traits, and abstractions for the deskpulse job engine.
//!
//! This crate provides the job record model and its status machine, the
//! interfaces of the external collaborators (job record store, provider
//! fetch, page sink), and the shared error type that every other deskpulse
//! crate builds on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod ticket;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use ticket::{Ticket, TicketUpsert};
pub use traits::*;
pub use uuid_utils::new_v7;
