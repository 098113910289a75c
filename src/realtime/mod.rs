//! The `Real-Time Hub`: per-user lifecycle event fan-out with bounded replay.

mod event;
mod hub;
mod ring_buffer;

pub use event::{EventKind, LifecycleEvent, WireEvent};
pub use hub::{Connection, RealtimeHub, RealtimeHubConfig};
pub use ring_buffer::RingBuffer;
