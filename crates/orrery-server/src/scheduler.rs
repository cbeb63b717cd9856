//! Scheduler - dispatches one tick task per active galaxy every minute.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration as TimeDelta, DurationRound, Timelike, Utc};
use orrery_protocol::GalaxyId;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::store::StoreError;
use crate::tick::{run_galaxy_tick, TickError, TickKind, TickReport, TickServices};

/// Galaxies whose tick task has not finished yet.
#[derive(Clone, Default)]
pub struct InFlight {
    galaxies: Arc<Mutex<HashSet<GalaxyId>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<GalaxyId>> {
        // A panicking tick cannot leave the set half-updated.
        self.galaxies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `galaxy` busy. `None` if it already is.
    pub fn acquire(&self, galaxy: GalaxyId) -> Option<InFlightGuard> {
        self.lock().insert(galaxy).then(|| InFlightGuard {
            owner: self.clone(),
            galaxy,
        })
    }

    pub fn contains(&self, galaxy: GalaxyId) -> bool {
        self.lock().contains(&galaxy)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the galaxy when dropped, including while unwinding.
pub struct InFlightGuard {
    owner: InFlight,
    galaxy: GalaxyId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.galaxy);
    }
}

/// Result of one scheduler pass.
#[derive(Debug)]
pub struct PassResult {
    pub minute: DateTime<Utc>,
    pub kind: TickKind,
    /// Galaxies a task was started for
    pub dispatched: Vec<GalaxyId>,
    /// Galaxies skipped because their previous tick is still running
    pub busy: Vec<GalaxyId>,
}

impl PassResult {
    pub fn summary(&self) -> String {
        format!(
            "Minute: {}, Kind: {:?}, Dispatched: {}, Busy: {}",
            self.minute.format("%H:%M"),
            self.kind,
            self.dispatched.len(),
            self.busy.len()
        )
    }
}

type TaskOutput = (GalaxyId, Result<TickReport, TickError>);

pub struct Scheduler {
    config: ServerConfig,
    services: TickServices,
    in_flight: InFlight,
    tasks: JoinSet<TaskOutput>,
}

/// Wall-clock minute containing `now`.
pub fn minute_of(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now)
}

impl Scheduler {
    pub fn new(config: ServerConfig, services: TickServices, in_flight: InFlight) -> Self {
        Self {
            config,
            services,
            in_flight,
            tasks: JoinSet::new(),
        }
    }

    /// Start a tick task for every active galaxy that is not already
    /// ticking.
    pub async fn run_pass(&mut self, now: DateTime<Utc>) -> Result<PassResult, StoreError> {
        let minute = minute_of(now);
        let kind = TickKind::for_minute(minute);
        let galaxies = self.services.store.load_active_galaxies().await?;

        let mut pass = PassResult {
            minute,
            kind,
            dispatched: Vec::new(),
            busy: Vec::new(),
        };
        for record in galaxies {
            let galaxy = record.value.id;
            let Some(guard) = self.in_flight.acquire(galaxy) else {
                debug!(%galaxy, "previous tick still running");
                pass.busy.push(galaxy);
                continue;
            };
            let services = self.services.clone();
            self.tasks.spawn(async move {
                let _guard = guard;
                let result = run_galaxy_tick(&services, galaxy, minute, kind).await;
                (galaxy, result)
            });
            pass.dispatched.push(galaxy);
        }
        Ok(pass)
    }

    /// Wait for every dispatched task and return the reports of those that
    /// succeeded. Failures are logged.
    pub async fn drain(&mut self) -> Vec<TickReport> {
        let mut reports = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            if let Some(report) = log_finished(joined) {
                reports.push(report);
            }
        }
        reports
    }

    /// Run passes on the wall clock until `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let period = self.config.tick_interval();
        let start = if self.config.align_to_minute {
            let second = Utc::now().second();
            Instant::now() + std::time::Duration::from_secs(u64::from(60 - second.min(59)))
        } else {
            Instant::now()
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval_secs = period.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => match self.run_pass(Utc::now()).await {
                    Ok(pass) => debug!("{}", pass.summary()),
                    Err(err) => error!(error = %err, "failed to list active galaxies"),
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    log_finished(joined);
                }
            }
        }

        info!(pending = self.tasks.len(), "scheduler stopping");
        self.drain().await;
    }
}

fn log_finished(joined: Result<TaskOutput, JoinError>) -> Option<TickReport> {
    match joined {
        Ok((_, Ok(report))) => Some(report),
        Ok((galaxy, Err(err))) => {
            error!(%galaxy, error = %err, "galaxy tick failed");
            None
        }
        Err(err) if err.is_panic() => {
            error!(error = %err, "galaxy tick panicked");
            None
        }
        Err(err) => {
            warn!(error = %err, "galaxy tick cancelled");
            None
        }
    }
}
