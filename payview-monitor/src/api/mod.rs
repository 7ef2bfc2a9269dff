//! HTTP API handlers for payview-monitor
//!
//! JSON endpoints for operators and the marketplace UI, plus an SSE stream
//! of engine events.

pub mod health;
pub mod monitoring;
pub mod sse;

pub use health::health_routes;
pub use monitoring::monitoring_routes;
pub use sse::event_stream;
