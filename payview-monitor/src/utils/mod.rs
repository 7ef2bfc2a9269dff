//! Utility modules for payview-monitor

pub mod db_retry;

pub use db_retry::retry_on_conflict;
