//! Entity store adapter.
//!
//! The store is the only shared state between galaxy ticks and player
//! actions. Every record carries a version; `save_*` succeeds only when the
//! caller saw the latest version.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

use async_trait::async_trait;
use orrery_protocol::{
    Body, BodyId, CensusPoint, EventEnvelope, Faction, FactionId, Fleet, FleetId, Galaxy,
    GalaxyId, Versioned,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        kind: &'static str,
        id: String,
        expected: u64,
        found: u64,
    },
    #[error("{field:?} cannot be applied to a {kind}")]
    InvalidDelta { kind: &'static str, field: DeltaField },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Addresses one stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Galaxy(GalaxyId),
    Faction(FactionId),
    Body(BodyId),
    Fleet(FleetId),
}

/// Numeric fields that can be adjusted without a version check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaField {
    Cash,
    Ships,
    Economy,
    Industry,
    Science,
}

/// Records saved together. Either every version check passes and all of
/// them are written, or nothing is.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub factions: Vec<Versioned<Faction>>,
    pub bodies: Vec<Versioned<Body>>,
    pub fleets: Vec<Versioned<Fleet>>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faction(mut self, record: Versioned<Faction>) -> Self {
        self.factions.push(record);
        self
    }

    pub fn body(mut self, record: Versioned<Body>) -> Self {
        self.bodies.push(record);
        self
    }

    pub fn fleet(mut self, record: Versioned<Fleet>) -> Self {
        self.fleets.push(record);
        self
    }
}

/// A tick write that lost its race twice. `before` is what the tick loaded
/// and `ours` what it computed; the galaxy's next tick rebases `ours` onto
/// whatever the store holds by then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeferredWrite {
    Galaxy { before: Galaxy, ours: Galaxy },
    Faction { before: Faction, ours: Faction },
    Body { before: Body, ours: Body },
    Fleet { before: Fleet, ours: Fleet },
}

impl DeferredWrite {
    pub fn galaxy(&self) -> GalaxyId {
        match self {
            Self::Galaxy { ours, .. } => ours.id,
            Self::Faction { ours, .. } => ours.galaxy,
            Self::Body { ours, .. } => ours.galaxy,
            Self::Fleet { ours, .. } => ours.galaxy,
        }
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Galaxies that are started and have no winner.
    async fn load_active_galaxies(&self) -> Result<Vec<Versioned<Galaxy>>, StoreError>;
    async fn load_galaxy(&self, id: GalaxyId) -> Result<Versioned<Galaxy>, StoreError>;
    async fn load_factions(&self, galaxy: GalaxyId) -> Result<Vec<Versioned<Faction>>, StoreError>;
    async fn load_bodies(&self, galaxy: GalaxyId) -> Result<Vec<Versioned<Body>>, StoreError>;
    async fn load_fleets(&self, galaxy: GalaxyId) -> Result<Vec<Versioned<Fleet>>, StoreError>;
    async fn load_faction(&self, id: FactionId) -> Result<Versioned<Faction>, StoreError>;
    async fn load_body(&self, id: BodyId) -> Result<Versioned<Body>, StoreError>;
    async fn load_fleet(&self, id: FleetId) -> Result<Versioned<Fleet>, StoreError>;

    async fn insert_galaxy(&self, galaxy: Galaxy) -> Result<Versioned<Galaxy>, StoreError>;
    async fn insert_faction(&self, faction: Faction) -> Result<Versioned<Faction>, StoreError>;
    async fn insert_bodies(&self, bodies: Vec<Body>) -> Result<(), StoreError>;
    async fn insert_fleet(&self, fleet: Fleet) -> Result<Versioned<Fleet>, StoreError>;

    /// Optimistic writes. Return the new version.
    async fn save_galaxy(&self, galaxy: &Versioned<Galaxy>) -> Result<u64, StoreError>;
    async fn save_faction(&self, faction: &Versioned<Faction>) -> Result<u64, StoreError>;
    async fn save_body(&self, body: &Versioned<Body>) -> Result<u64, StoreError>;
    async fn save_fleet(&self, fleet: &Versioned<Fleet>) -> Result<u64, StoreError>;
    /// All-or-nothing save of several records.
    async fn save_batch(&self, batch: &Batch) -> Result<(), StoreError>;

    /// Returns whether the fleet existed.
    async fn delete_fleet(&self, id: FleetId) -> Result<bool, StoreError>;
    /// Remove every body and fleet of a galaxy.
    async fn clear_galaxy_map(&self, galaxy: GalaxyId) -> Result<(), StoreError>;
    /// Add `delta` to a numeric field regardless of version, clamping at zero.
    async fn apply_delta(&self, target: EntityRef, field: DeltaField, delta: f64)
        -> Result<u64, StoreError>;

    /// Park a write for the galaxy's next tick.
    async fn defer_write(&self, write: DeferredWrite) -> Result<(), StoreError>;
    /// Remove and return the writes parked for `galaxy`, oldest first.
    async fn take_deferred(&self, galaxy: GalaxyId) -> Result<Vec<DeferredWrite>, StoreError>;

    async fn append_events(&self, events: Vec<EventEnvelope>) -> Result<(), StoreError>;
    async fn load_events(&self, galaxy: GalaxyId) -> Result<Vec<EventEnvelope>, StoreError>;
    async fn append_census(&self, point: CensusPoint) -> Result<(), StoreError>;
    async fn load_census(&self, galaxy: GalaxyId) -> Result<Vec<CensusPoint>, StoreError>;
}

/// Records the store can hold.
pub trait Record: Clone + Send + Sync {
    type Key: Copy + Eq + Hash + Display + Send + Sync;
    const KIND: &'static str;
    fn key(&self) -> Self::Key;
    fn galaxy(&self) -> GalaxyId;
}

impl Record for Galaxy {
    type Key = GalaxyId;
    const KIND: &'static str = "galaxy";
    fn key(&self) -> GalaxyId {
        self.id
    }
    fn galaxy(&self) -> GalaxyId {
        self.id
    }
}

impl Record for Faction {
    type Key = FactionId;
    const KIND: &'static str = "faction";
    fn key(&self) -> FactionId {
        self.id
    }
    fn galaxy(&self) -> GalaxyId {
        self.galaxy
    }
}

impl Record for Body {
    type Key = BodyId;
    const KIND: &'static str = "body";
    fn key(&self) -> BodyId {
        self.id
    }
    fn galaxy(&self) -> GalaxyId {
        self.galaxy
    }
}

impl Record for Fleet {
    type Key = FleetId;
    const KIND: &'static str = "fleet";
    fn key(&self) -> FleetId {
        self.id
    }
    fn galaxy(&self) -> GalaxyId {
        self.galaxy
    }
}

struct Row<V> {
    seq: u64,
    record: Versioned<V>,
}

type Rows<V> = HashMap<<V as Record>::Key, Row<V>>;

fn check<V: Record>(rows: &Rows<V>, record: &Versioned<V>) -> Result<(), StoreError> {
    let id = record.value.key();
    let row = rows.get(&id).ok_or_else(|| not_found::<V>(id))?;
    if row.record.version != record.version {
        return Err(StoreError::Conflict {
            kind: V::KIND,
            id: id.to_string(),
            expected: record.version,
            found: row.record.version,
        });
    }
    Ok(())
}

/// Write a record that already passed `check` under the same lock.
fn commit<V: Record>(rows: &mut Rows<V>, record: &Versioned<V>) -> u64 {
    let version = record.version + 1;
    if let Some(row) = rows.get_mut(&record.value.key()) {
        row.record = Versioned::new(version, record.value.clone());
    }
    version
}

/// One versioned table. Rows come back in insertion order.
struct Table<V: Record> {
    rows: RwLock<(u64, Rows<V>)>,
}

impl<V: Record> Default for Table<V> {
    fn default() -> Self {
        Self {
            rows: RwLock::new((0, HashMap::new())),
        }
    }
}

fn not_found<V: Record>(id: V::Key) -> StoreError {
    StoreError::NotFound {
        kind: V::KIND,
        id: id.to_string(),
    }
}

impl<V: Record> Table<V> {
    async fn get(&self, id: V::Key) -> Result<Versioned<V>, StoreError> {
        let rows = self.rows.read().await;
        rows.1
            .get(&id)
            .map(|row| row.record.clone())
            .ok_or_else(|| not_found::<V>(id))
    }

    async fn select(&self, keep: impl Fn(&V) -> bool) -> Vec<Versioned<V>> {
        let rows = self.rows.read().await;
        let mut found: Vec<&Row<V>> = rows.1.values().filter(|r| keep(&r.record.value)).collect();
        found.sort_by_key(|r| r.seq);
        found.into_iter().map(|r| r.record.clone()).collect()
    }

    async fn in_galaxy(&self, galaxy: GalaxyId) -> Vec<Versioned<V>> {
        self.select(|v| v.galaxy() == galaxy).await
    }

    async fn insert(&self, value: V) -> Versioned<V> {
        let mut rows = self.rows.write().await;
        rows.0 += 1;
        let seq = rows.0;
        let record = Versioned::new(1, value);
        rows.1.insert(
            record.value.key(),
            Row {
                seq,
                record: record.clone(),
            },
        );
        record
    }

    async fn save(&self, record: &Versioned<V>) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        check(&rows.1, record)?;
        Ok(commit(&mut rows.1, record))
    }

    async fn update(&self, id: V::Key, change: impl FnOnce(&mut V)) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.1.get_mut(&id).ok_or_else(|| not_found::<V>(id))?;
        change(&mut row.record.value);
        row.record.version += 1;
        Ok(row.record.version)
    }

    async fn remove(&self, id: V::Key) -> bool {
        self.rows.write().await.1.remove(&id).is_some()
    }

    async fn retain(&self, keep: impl Fn(&V) -> bool) {
        self.rows.write().await.1.retain(|_, row| keep(&row.record.value));
    }
}

fn add_u64(value: &mut u64, delta: f64) {
    *value = (*value as f64 + delta).max(0.0).round() as u64;
}

fn add_u32(value: &mut u32, delta: f64) {
    *value = (f64::from(*value) + delta).max(0.0).round() as u32;
}

/// Store held entirely in memory. Used by tests and offline simulation.
#[derive(Default)]
pub struct InMemoryStore {
    galaxies: Table<Galaxy>,
    factions: Table<Faction>,
    bodies: Table<Body>,
    fleets: Table<Fleet>,
    events: RwLock<Vec<EventEnvelope>>,
    census: RwLock<Vec<CensusPoint>>,
    deferred: RwLock<HashMap<GalaxyId, Vec<DeferredWrite>>>,
    unavailable: RwLock<HashSet<GalaxyId>>,
    contended: RwLock<HashMap<EntityRef, Contention>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Contention {
    pass: u32,
    conflicts: u32,
    /// Change the other writer makes, if any.
    change: Option<(DeltaField, f64)>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every per-galaxy load for `galaxy` fail, to rehearse outages.
    pub async fn set_unavailable(&self, galaxy: GalaxyId, unavailable: bool) {
        let mut set = self.unavailable.write().await;
        if unavailable {
            set.insert(galaxy);
        } else {
            set.remove(&galaxy);
        }
    }

    /// Let another writer slip in ahead of the next `saves` saves of
    /// `target`, so each of them conflicts.
    pub async fn contend(&self, target: EntityRef, saves: u32) {
        self.contend_after(target, 0, saves).await;
    }

    /// Like `contend`, but the first `pass` saves of `target` go through.
    pub async fn contend_after(&self, target: EntityRef, pass: u32, saves: u32) {
        self.contended.write().await.insert(
            target,
            Contention {
                pass,
                conflicts: saves,
                change: None,
            },
        );
    }

    /// Make the next save of `target` conflict because another writer
    /// applied `delta` to `field` just before it.
    pub async fn interleave(&self, target: EntityRef, field: DeltaField, delta: f64) {
        self.contended.write().await.insert(
            target,
            Contention {
                pass: 0,
                conflicts: 1,
                change: Some((field, delta)),
            },
        );
    }

    async fn interfere(&self, target: EntityRef) -> Result<(), StoreError> {
        let change = {
            let mut contended = self.contended.write().await;
            match contended.get_mut(&target) {
                Some(c) if c.pass > 0 => {
                    c.pass -= 1;
                    return Ok(());
                }
                Some(c) if c.conflicts > 0 => {
                    c.conflicts -= 1;
                    c.change.take()
                }
                _ => return Ok(()),
            }
        };
        if let Some((field, delta)) = change {
            self.apply_delta(target, field, delta).await?;
            return Ok(());
        }
        match target {
            EntityRef::Galaxy(id) => self.galaxies.update(id, |_| {}).await?,
            EntityRef::Faction(id) => self.factions.update(id, |_| {}).await?,
            EntityRef::Body(id) => self.bodies.update(id, |_| {}).await?,
            EntityRef::Fleet(id) => self.fleets.update(id, |_| {}).await?,
        };
        Ok(())
    }

    async fn ensure_available(&self, galaxy: GalaxyId) -> Result<(), StoreError> {
        if self.unavailable.read().await.contains(&galaxy) {
            return Err(StoreError::Unavailable(format!("galaxy {galaxy} is offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn load_active_galaxies(&self) -> Result<Vec<Versioned<Galaxy>>, StoreError> {
        Ok(self.galaxies.select(Galaxy::is_active).await)
    }

    async fn load_galaxy(&self, id: GalaxyId) -> Result<Versioned<Galaxy>, StoreError> {
        self.ensure_available(id).await?;
        self.galaxies.get(id).await
    }

    async fn load_factions(&self, galaxy: GalaxyId) -> Result<Vec<Versioned<Faction>>, StoreError> {
        self.ensure_available(galaxy).await?;
        Ok(self.factions.in_galaxy(galaxy).await)
    }

    async fn load_bodies(&self, galaxy: GalaxyId) -> Result<Vec<Versioned<Body>>, StoreError> {
        self.ensure_available(galaxy).await?;
        Ok(self.bodies.in_galaxy(galaxy).await)
    }

    async fn load_fleets(&self, galaxy: GalaxyId) -> Result<Vec<Versioned<Fleet>>, StoreError> {
        self.ensure_available(galaxy).await?;
        Ok(self.fleets.in_galaxy(galaxy).await)
    }

    async fn load_faction(&self, id: FactionId) -> Result<Versioned<Faction>, StoreError> {
        self.factions.get(id).await
    }

    async fn load_body(&self, id: BodyId) -> Result<Versioned<Body>, StoreError> {
        self.bodies.get(id).await
    }

    async fn load_fleet(&self, id: FleetId) -> Result<Versioned<Fleet>, StoreError> {
        self.fleets.get(id).await
    }

    async fn insert_galaxy(&self, galaxy: Galaxy) -> Result<Versioned<Galaxy>, StoreError> {
        Ok(self.galaxies.insert(galaxy).await)
    }

    async fn insert_faction(&self, faction: Faction) -> Result<Versioned<Faction>, StoreError> {
        Ok(self.factions.insert(faction).await)
    }

    async fn insert_bodies(&self, bodies: Vec<Body>) -> Result<(), StoreError> {
        for body in bodies {
            self.bodies.insert(body).await;
        }
        Ok(())
    }

    async fn insert_fleet(&self, fleet: Fleet) -> Result<Versioned<Fleet>, StoreError> {
        Ok(self.fleets.insert(fleet).await)
    }

    async fn save_galaxy(&self, galaxy: &Versioned<Galaxy>) -> Result<u64, StoreError> {
        self.interfere(EntityRef::Galaxy(galaxy.value.id)).await?;
        self.galaxies.save(galaxy).await
    }

    async fn save_faction(&self, faction: &Versioned<Faction>) -> Result<u64, StoreError> {
        self.interfere(EntityRef::Faction(faction.value.id)).await?;
        self.factions.save(faction).await
    }

    async fn save_body(&self, body: &Versioned<Body>) -> Result<u64, StoreError> {
        self.interfere(EntityRef::Body(body.value.id)).await?;
        self.bodies.save(body).await
    }

    async fn save_fleet(&self, fleet: &Versioned<Fleet>) -> Result<u64, StoreError> {
        self.interfere(EntityRef::Fleet(fleet.value.id)).await?;
        self.fleets.save(fleet).await
    }

    async fn save_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        for record in &batch.factions {
            self.interfere(EntityRef::Faction(record.value.id)).await?;
        }
        for record in &batch.bodies {
            self.interfere(EntityRef::Body(record.value.id)).await?;
        }
        for record in &batch.fleets {
            self.interfere(EntityRef::Fleet(record.value.id)).await?;
        }

        // Fixed lock order: factions, bodies, fleets.
        let mut factions = self.factions.rows.write().await;
        let mut bodies = self.bodies.rows.write().await;
        let mut fleets = self.fleets.rows.write().await;
        batch.factions.iter().try_for_each(|r| check(&factions.1, r))?;
        batch.bodies.iter().try_for_each(|r| check(&bodies.1, r))?;
        batch.fleets.iter().try_for_each(|r| check(&fleets.1, r))?;

        for record in &batch.factions {
            commit(&mut factions.1, record);
        }
        for record in &batch.bodies {
            commit(&mut bodies.1, record);
        }
        for record in &batch.fleets {
            commit(&mut fleets.1, record);
        }
        Ok(())
    }

    async fn delete_fleet(&self, id: FleetId) -> Result<bool, StoreError> {
        Ok(self.fleets.remove(id).await)
    }

    async fn clear_galaxy_map(&self, galaxy: GalaxyId) -> Result<(), StoreError> {
        self.bodies.retain(|b| b.galaxy() != galaxy).await;
        self.fleets.retain(|f| f.galaxy() != galaxy).await;
        self.deferred.write().await.remove(&galaxy);
        Ok(())
    }

    async fn apply_delta(
        &self,
        target: EntityRef,
        field: DeltaField,
        delta: f64,
    ) -> Result<u64, StoreError> {
        let invalid = |kind| StoreError::InvalidDelta { kind, field };
        match (target, field) {
            (EntityRef::Galaxy(_), _) => Err(invalid(Galaxy::KIND)),
            (EntityRef::Faction(id), DeltaField::Cash) => {
                self.factions.update(id, |f| f.cash = (f.cash + delta).max(0.0)).await
            }
            (EntityRef::Faction(_), _) => Err(invalid(Faction::KIND)),
            (EntityRef::Fleet(id), DeltaField::Ships) => {
                self.fleets.update(id, |f| add_u64(&mut f.ships, delta)).await
            }
            (EntityRef::Fleet(_), _) => Err(invalid(Fleet::KIND)),
            (EntityRef::Body(_), DeltaField::Cash) => Err(invalid(Body::KIND)),
            (EntityRef::Body(id), field) => {
                self.bodies
                    .update(id, |b| match field {
                        DeltaField::Ships => add_u64(&mut b.ships, delta),
                        DeltaField::Economy => add_u32(&mut b.economy, delta),
                        DeltaField::Industry => add_u32(&mut b.industry, delta),
                        DeltaField::Science => add_u32(&mut b.science, delta),
                        // rejected above
                        DeltaField::Cash => {}
                    })
                    .await
            }
        }
    }

    async fn defer_write(&self, write: DeferredWrite) -> Result<(), StoreError> {
        let galaxy = write.galaxy();
        self.ensure_available(galaxy).await?;
        self.deferred.write().await.entry(galaxy).or_default().push(write);
        Ok(())
    }

    async fn take_deferred(&self, galaxy: GalaxyId) -> Result<Vec<DeferredWrite>, StoreError> {
        self.ensure_available(galaxy).await?;
        Ok(self.deferred.write().await.remove(&galaxy).unwrap_or_default())
    }

    async fn append_events(&self, events: Vec<EventEnvelope>) -> Result<(), StoreError> {
        self.events.write().await.extend(events);
        Ok(())
    }

    async fn load_events(&self, galaxy: GalaxyId) -> Result<Vec<EventEnvelope>, StoreError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| e.galaxy == galaxy).cloned().collect())
    }

    async fn append_census(&self, point: CensusPoint) -> Result<(), StoreError> {
        self.census.write().await.push(point);
        Ok(())
    }

    async fn load_census(&self, galaxy: GalaxyId) -> Result<Vec<CensusPoint>, StoreError> {
        let census = self.census.read().await;
        Ok(census.iter().filter(|c| c.galaxy == galaxy).cloned().collect())
    }
}
