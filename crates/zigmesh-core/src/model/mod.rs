// ── Domain model ──
//
// Canonical types shared by the store, the route resolver, the ingestor
// and the orchestrator.

pub mod device;
pub mod snapshot;

pub use device::{Device, DeviceId, DeviceKind};
pub use snapshot::{Link, Snapshot};
