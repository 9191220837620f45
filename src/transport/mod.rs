//! Outbound link to the grading backend.
//!
//! `IncidentPayload` is the wire body, `ReportSink` the seam the dispatcher
//! sends through, and `BackendClient` the HTTP implementation.

mod backend;
mod payload;

pub use backend::{BackendClient, BackendConfig, ReportSink, TransportError, API_KEY_HEADER};
pub use payload::IncidentPayload;
