//! Player actions against the store.
//!
//! Each action loads what it needs, validates through `orrery_core::actions`
//! and writes back under a version check. Actions touching two records save
//! them as one batch. A conflict, usually with a running tick, restarts the
//! whole read-modify-write.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use orrery_core::actions as rules;
use orrery_core::ActionError;
use orrery_protocol::{
    Body, BodyId, EventEnvelope, FactionId, Fleet, FleetId, Galaxy, GalaxyEvent, GalaxyId,
    StatementEvent, Technology, UpgradeAspect, Waypoint,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::EventBus;
use crate::store::{Batch, EntityStore, StoreError};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Rejected(#[from] ActionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("galaxy {0} is not running")]
    NotRunning(GalaxyId),
    #[error("gave up after {0} conflicting attempts")]
    Contended(u32),
}

impl CommandError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }
}

pub struct ActionService {
    store: Arc<dyn EntityStore>,
    events: EventBus,
    attempts: u32,
}

impl ActionService {
    pub fn new(store: Arc<dyn EntityStore>, events: EventBus, attempts: u32) -> Self {
        Self {
            store,
            events,
            attempts: attempts.max(1),
        }
    }

    async fn with_retry<T, F, Fut>(&self, action: &'static str, mut attempt: F) -> Result<T, CommandError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        for n in 1..=self.attempts {
            match attempt().await {
                Err(err) if err.is_conflict() => {
                    debug!(action, attempt = n, "conflict, retrying");
                }
                other => return other,
            }
        }
        warn!(action, attempts = self.attempts, "action abandoned after repeated conflicts");
        Err(CommandError::Contended(self.attempts))
    }

    async fn running_galaxy(&self, galaxy: GalaxyId) -> Result<Galaxy, CommandError> {
        let galaxy = self.store.load_galaxy(galaxy).await?.value;
        if galaxy.is_active() {
            Ok(galaxy)
        } else {
            Err(CommandError::NotRunning(galaxy.id))
        }
    }

    /// Split `ships` off an owned body into a new fleet.
    pub async fn build_fleet(
        &self,
        faction: FactionId,
        body: BodyId,
        ships: u64,
        name: &str,
    ) -> Result<Fleet, CommandError> {
        self.with_retry("build_fleet", move || async move {
            let owner = self.store.load_faction(faction).await?.value;
            self.running_galaxy(owner.galaxy).await?;
            let mut body = self.store.load_body(body).await?;
            let fleet = rules::build_fleet(&owner, &mut body.value, ships, name)?;
            self.store.save_body(&body).await?;
            let fleet = self.store.insert_fleet(fleet).await?.value;
            info!(%faction, fleet = %fleet.id, ships, "fleet built");
            Ok(fleet)
        })
        .await
    }

    pub async fn set_waypoints(
        &self,
        faction: FactionId,
        fleet: FleetId,
        waypoints: Vec<Waypoint>,
    ) -> Result<Fleet, CommandError> {
        self.with_retry("set_waypoints", move || {
            let waypoints = waypoints.clone();
            async move {
                let owner = self.store.load_faction(faction).await?.value;
                let galaxy = self.running_galaxy(owner.galaxy).await?;
                let mut fleet = self.store.load_fleet(fleet).await?;
                let bodies: Vec<Body> = self
                    .store
                    .load_bodies(galaxy.id)
                    .await?
                    .into_iter()
                    .map(|b| b.value)
                    .collect();
                rules::set_waypoints(&galaxy.settings, &owner, &mut fleet.value, waypoints, &bodies)?;
                fleet.version = self.store.save_fleet(&fleet).await?;
                Ok(fleet.value)
            }
        })
        .await
    }

    /// Rebalance ships between a parked fleet and its body.
    pub async fn transfer_ships(
        &self,
        faction: FactionId,
        fleet: FleetId,
        body: BodyId,
        fleet_ships_after: u64,
    ) -> Result<(), CommandError> {
        self.with_retry("transfer_ships", move || async move {
            let owner = self.store.load_faction(faction).await?.value;
            let galaxy = self.running_galaxy(owner.galaxy).await?;
            let mut moved = self.store.load_fleet(fleet).await?;
            let mut body = self.store.load_body(body).await?;
            rules::transfer_ships(&galaxy.settings, &owner, &mut moved.value, &mut body.value, fleet_ships_after)?;

            self.store.save_batch(&Batch::new().body(body).fleet(moved)).await?;
            Ok(())
        })
        .await
    }

    /// Buy one level of `aspect`. Returns the price paid.
    pub async fn upgrade_body(
        &self,
        faction: FactionId,
        body: BodyId,
        aspect: UpgradeAspect,
    ) -> Result<f64, CommandError> {
        self.with_retry("upgrade_body", move || async move {
            let mut owner = self.store.load_faction(faction).await?;
            self.running_galaxy(owner.value.galaxy).await?;
            let mut body = self.store.load_body(body).await?;
            let cost = rules::upgrade_body(&mut owner.value, &mut body.value, aspect)?;

            let upgraded = body.value.id;
            self.store.save_batch(&Batch::new().faction(owner).body(body)).await?;
            info!(%faction, body = %upgraded, ?aspect, cost, "body upgraded");
            Ok(cost)
        })
        .await
    }

    pub async fn set_research_queue(
        &self,
        faction: FactionId,
        queue: Vec<Technology>,
    ) -> Result<(), CommandError> {
        self.with_retry("set_research_queue", move || {
            let queue = queue.clone();
            async move {
                let mut record = self.store.load_faction(faction).await?;
                self.running_galaxy(record.value.galaxy).await?;
                rules::set_research_queue(&mut record.value, queue)?;
                self.store.save_faction(&record).await?;
                Ok(())
            }
        })
        .await
    }

    /// Publish a statement to the galaxy's news feed.
    pub async fn issue_statement(
        &self,
        faction: FactionId,
        text: &str,
    ) -> Result<StatementEvent, CommandError> {
        let owner = self.store.load_faction(faction).await?.value;
        let galaxy = self.running_galaxy(owner.galaxy).await?;
        let statement = rules::compose_statement(&owner, text)?;

        let envelope = EventEnvelope::new(
            galaxy.id,
            galaxy.tick,
            Utc::now(),
            GalaxyEvent::Statement(statement.clone()),
        );
        self.store.append_events(vec![envelope.clone()]).await?;
        self.events.publish(&[envelope]);
        Ok(statement)
    }
}
