//! Event bus for live observability.
//!
//! Every state-mutating action emits an [`Event`] onto a broadcast channel
//! distinct from the state actor's command/reply channel (spec §5), so a
//! slow subscriber never stalls command processing. The JSONL [`EventLogger`]
//! is one such subscriber; a future dashboard WebSocket integrator would be
//! another.

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use logger::{EventLogger, spawn_event_logger};
pub use types::{Event, EventLogEntry};
