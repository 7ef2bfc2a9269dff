//! Entity queries used by the monitoring engine
//!
//! Uuids are stored as TEXT and timestamps as Unix milliseconds.

pub mod campaigns;
pub mod profiles;
pub mod submissions;

use payview_common::{Error, Result};
use uuid::Uuid;

pub(crate) fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Bad {} {}: {}", column, value, e)))
}
