//! Database models for notify-dispatch.
//!
//! These models map directly to the database schema.

pub mod config;
pub mod delivery;
pub mod user;

pub use config::*;
pub use delivery::*;
pub use user::*;
