// ── Telemetry ingestion ──

mod event;
mod ingestor;

pub use event::{LinkReport, TelemetryEvent, TelemetryKind};
pub use ingestor::{IngestOutcome, IngestStats, StateIngestor};
