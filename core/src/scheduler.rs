//! Measurement scheduling state machine
//!
//! The scheduler owns the iteration counters and drives one measurement
//! cycle per tick. Each cycle runs as a spawned task with its own probe
//! subprocess, so a slow or crashing probe never blocks control commands.
//! Cycles report back through a bounded event queue drained by a listener
//! on the controlling side; every per-cycle failure is contained there and
//! never reaches the scheduler itself.

use crate::config::{self, ScheduleConfig};
use crate::error::{Error, Result};
use crate::network::NetworkSource;
use crate::probe::Probe;
use crate::record::{self, MeasurementRecord};
use crate::store::ResultStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Capacity of the cycle event queue.
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Exactly one phase describes the scheduler at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Working,
    Paused,
    Done,
}

#[derive(Debug, Clone)]
pub struct SchedulerState {
    /// Tick interval in seconds
    pub frequency_secs: u64,
    /// Target measurement count
    pub iterations: u32,
    /// Cycles initiated so far (attempts, not successes)
    pub elapsed_iterations: u32,
    /// Always `iterations - elapsed_iterations`, floored at zero
    pub remaining_iterations: u32,
    pub active: bool,
    pub paused: bool,
    pub done: bool,
    pub start_time: Option<DateTime<Utc>>,
    /// Diagnostic: counter value captured by the last pause
    pub elapsed_at_pause: u32,
}

impl SchedulerState {
    fn new(config: &ScheduleConfig) -> Self {
        Self {
            frequency_secs: config.frequency_secs,
            iterations: config.iterations,
            elapsed_iterations: 0,
            remaining_iterations: config.iterations,
            active: false,
            paused: false,
            done: false,
            start_time: None,
            elapsed_at_pause: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.paused {
            Phase::Paused
        } else if self.done {
            Phase::Done
        } else if self.active {
            Phase::Working
        } else {
            Phase::NotStarted
        }
    }
}

/// Progress reports from spawned measurement cycles.
#[derive(Debug)]
pub enum CycleEvent {
    Started {
        iteration: u32,
    },
    Committed {
        iteration: u32,
        record: MeasurementRecord,
    },
    Skipped {
        iteration: u32,
        error: Error,
    },
}

pub struct MeasurementScheduler<N, P> {
    state: SchedulerState,
    store: Arc<ResultStore>,
    network: Arc<N>,
    probe: Arc<P>,
    events: mpsc::Sender<CycleEvent>,
}

impl<N, P> MeasurementScheduler<N, P>
where
    N: NetworkSource + 'static,
    P: Probe + 'static,
{
    /// Returns the scheduler together with the receiving end of its event
    /// queue; the caller is expected to drain it (see [`log_events`]).
    pub fn new(
        config: &ScheduleConfig,
        store: Arc<ResultStore>,
        network: Arc<N>,
        probe: Arc<P>,
    ) -> (Self, mpsc::Receiver<CycleEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let scheduler = Self {
            state: SchedulerState::new(config),
            store,
            network,
            probe,
            events,
        };
        (scheduler, receiver)
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// One of `Ready|Working|Paused|Done`, suffixed with progress.
    pub fn status_string(&self) -> String {
        let label = match self.state.phase() {
            Phase::NotStarted => "Ready",
            Phase::Working => "Working",
            Phase::Paused => "Paused",
            Phase::Done => "Done",
        };
        format!(
            "{label}({}/{}it/{}sec)",
            self.state.elapsed_iterations, self.state.iterations, self.state.frequency_secs
        )
    }

    /// Begin a measurement run. The caller must start ticking.
    pub fn start(&mut self) {
        self.state.active = true;
        self.state.paused = false;
        self.state.done = false;
        self.state.start_time = Some(Utc::now());
        info!("scheduler started: {}", self.status_string());
    }

    /// Resume after a pause (or rerun after done), keeping the elapsed
    /// count and the original start time.
    pub fn restart(&mut self) {
        self.state.active = true;
        self.state.paused = false;
        self.state.done = false;
        info!("scheduler restarted: {}", self.status_string());
    }

    /// Freeze the counters. The caller must stop ticking; an in-flight
    /// cycle is not terminated and may still commit its record.
    pub fn pause(&mut self) {
        self.state.active = false;
        self.state.paused = true;
        self.state.elapsed_at_pause = self.state.elapsed_iterations;
        info!("scheduler paused: {}", self.status_string());
    }

    /// Return to NotStarted. Configured parameters persist.
    pub fn reset(&mut self) {
        self.state.active = false;
        self.state.paused = false;
        self.state.done = false;
        self.state.start_time = None;
        self.state.elapsed_iterations = 0;
        self.state.remaining_iterations = self.state.iterations;
        self.state.elapsed_at_pause = 0;
        info!("scheduler reset");
    }

    /// Apply new parameters after validation and reset. On rejection the
    /// state is left untouched.
    pub fn set_params(&mut self, frequency_secs: u64, iterations: u32) -> Result<()> {
        config::validate_params(frequency_secs, iterations)?;
        self.state.frequency_secs = frequency_secs;
        self.state.iterations = iterations;
        self.reset();
        info!(
            "parameters updated: frequency={}s iterations={}",
            frequency_secs, iterations
        );
        Ok(())
    }

    /// Per-interval entry point. Returns whether a measurement cycle was
    /// initiated this tick.
    ///
    /// Counters advance when the cycle is initiated, not when it finishes:
    /// a cycle that later fails has still consumed its iteration slot.
    pub fn tick(&mut self) -> bool {
        if self.state.remaining_iterations == 0 && self.state.active {
            self.state.done = true;
            self.state.active = false;
            info!("measurement run complete: {}", self.status_string());
            return false;
        }

        if self.state.active && !self.state.done {
            self.state.elapsed_iterations += 1;
            self.state.remaining_iterations = self
                .state
                .iterations
                .saturating_sub(self.state.elapsed_iterations);
            self.spawn_cycle(self.state.elapsed_iterations);
            return true;
        }

        false
    }

    fn spawn_cycle(&self, iteration: u32) {
        let store = Arc::clone(&self.store);
        let network = Arc::clone(&self.network);
        let probe = Arc::clone(&self.probe);
        let events = self.events.clone();
        tokio::spawn(run_cycle(iteration, store, network, probe, events));
    }
}

async fn run_cycle<N, P>(
    iteration: u32,
    store: Arc<ResultStore>,
    network: Arc<N>,
    probe: Arc<P>,
    events: mpsc::Sender<CycleEvent>,
) where
    N: NetworkSource,
    P: Probe,
{
    let _ = events.send(CycleEvent::Started { iteration }).await;
    let event = match measure_once(&store, network.as_ref(), probe.as_ref()).await {
        Ok(record) => CycleEvent::Committed { iteration, record },
        Err(error) => CycleEvent::Skipped { iteration, error },
    };
    let _ = events.send(event).await;
}

/// One full measurement cycle: snapshot, probe, drift check, parse, append.
///
/// The first failing step aborts the cycle with its typed error; the
/// read-for-merge of the existing record set happens inside
/// [`ResultStore::append`], under the store's write lock.
async fn measure_once<N, P>(
    store: &ResultStore,
    network: &N,
    probe: &P,
) -> Result<MeasurementRecord>
where
    N: NetworkSource,
    P: Probe,
{
    let before = network.snapshot()?;
    let outcome = probe.run().await?;
    let after = network.snapshot()?;

    if before.network_name != after.network_name {
        return Err(Error::EnvironmentDrift {
            before: before.network_name,
            after: after.network_name,
        });
    }

    let payload = record::parse_payload(&outcome.raw)?;
    let record = MeasurementRecord::from_parts(payload, &before, outcome.pid, outcome.elapsed);
    store.append(&record)?;
    Ok(record)
}

/// Drain the cycle event queue, mirroring each event into the log. Runs
/// until every sender (the scheduler and all in-flight cycles) is gone.
pub async fn log_events(mut receiver: mpsc::Receiver<CycleEvent>) {
    while let Some(event) = receiver.recv().await {
        match event {
            CycleEvent::Started { iteration } => {
                info!("cycle {iteration}: measuring");
            }
            CycleEvent::Committed { iteration, record } => {
                info!(
                    "cycle {iteration}: committed (down {:.1} Mbps, up {:.1} Mbps, ping {:.1} ms, network {:?}, tunnel {:?})",
                    record.download / 1e6,
                    record.upload / 1e6,
                    record.ping,
                    record.network_name,
                    record.tunnel_name,
                );
            }
            CycleEvent::Skipped { iteration, error } => {
                error!("cycle {iteration}: skipped: {error}");
            }
        }
    }
}
