//! Repository layer for database access.
//!
//! Each repository is a trait with a `Sqlx*` implementation so the engine can
//! be driven by in-memory doubles in tests.

pub mod config;
pub mod delivery;
pub mod user;

pub use config::*;
pub use delivery::*;
pub use user::*;
