// ── Topology storage ──
//
// Lock-free snapshot storage with push-based change notification.

mod topology;

pub use topology::TopologyStore;
