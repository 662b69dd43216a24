//! Threshold-based notification dispatch.
//!
//! Business actions (a proposal signed online, an order delivered) emit a
//! [`NotificationEvent`](notification::NotificationEvent). Rules stored as
//! configuration constants map an action code and an amount threshold to a
//! list of addresses; the [`DispatchEngine`](notification::DispatchEngine)
//! mails every matching list and keeps an audit log of what was sent.

rust_i18n::i18n!("locales", fallback = "en");

pub mod config;
pub mod database;
pub mod error;
pub mod i18n;
pub mod logging;
pub mod notification;
pub mod utils;

pub use error::{Error, Result};
