//! speedlog core - periodic internet-speed measurement logging
//!
//! Coordinates a repeating, cancellable measurement loop: an external timer
//! ticks the scheduler, each tick spawns one isolated probe cycle, and
//! validated results are appended to a durable CSV log together with the
//! network context they were measured under.

pub mod config;
pub mod error;
pub mod network;
pub mod probe;
pub mod record;
pub mod scheduler;
pub mod store;

pub use config::{Config, validate_params};
pub use error::{Error, Result};
pub use network::{NetworkContext, NetworkSnapshot, NetworkSource};
pub use probe::{Probe, ProbeOutcome, ProbeRunner};
pub use record::{MeasurementRecord, ProbePayload, parse_payload};
pub use scheduler::{CycleEvent, MeasurementScheduler, Phase, SchedulerState, log_events};
pub use store::ResultStore;
