//! # PayView Common Library
//!
//! Shared code for the PayView marketplace services including:
//! - Database initialization and entity models
//! - Event types (MonitorEvent enum) and the EventBus
//! - Configuration loading
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
