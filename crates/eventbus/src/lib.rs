#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Opsflow Eventbus
//!
//! The per-run progress-streaming channel. The scheduler writes
//! [`ExecutionEvent`]s outbound without ever blocking; consumers read them
//! in emission order and send [`ControlCommand`]s back inbound.
//!
//! Each subscriber owns a bounded queue. On overflow the oldest `progress`
//! event in that queue is dropped first — node-level events are never
//! dropped — and the scheduler emits a synthetic `progress` after the
//! current band so consumers re-sync.

pub mod bus;
pub mod control;
pub mod event;

pub use bus::{EventBus, EventSubscriber};
pub use control::{ControlCommand, ControlReceiver, ControlSender, control_channel};
pub use event::{ExecutionEvent, SkipReason};
