//! One galaxy tick.
//!
//! A tick claims its wall-clock minute on the galaxy record, loads the whole
//! galaxy, runs the phases in order and persists after each phase. Writes
//! that lose an optimistic race are rebased onto the fresh record once. A
//! second loss applies the counter deltas right away and parks the rest of
//! the write in the store; the galaxy's next tick rebases it onto whatever
//! it loads before running any phase.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use futures::future::{join_all, BoxFuture};
use orrery_core::{
    census::take_census, combat::resolve_combat, economy::accrue_economy,
    economy::production_cycle, movement::advance_fleets, research::accrue_research,
    victory::check_victory, visibility::snapshot_for, GalaxyState, Rebase,
};
use orrery_protocol::{
    Body, BodyId, EventEnvelope, Faction, FactionId, Fleet, FleetId, Galaxy, GalaxyEvent,
    GalaxyId, Versioned,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::EventBus;
use crate::push::PushSink;
use crate::store::{DeferredWrite, DeltaField, EntityRef, EntityStore, Record, StoreError};

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Collaborators shared by every galaxy task.
#[derive(Clone)]
pub struct TickServices {
    pub store: Arc<dyn EntityStore>,
    pub push: Arc<dyn PushSink>,
    pub events: EventBus,
}

/// Minute ticks move, fight and accrue. Hour ticks additionally research,
/// record a census and pay out production when a cycle is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickKind {
    Minute,
    Hour,
}

impl TickKind {
    pub fn for_minute(minute: DateTime<Utc>) -> Self {
        if minute.minute() == 0 {
            Self::Hour
        } else {
            Self::Minute
        }
    }

    pub fn is_coarse(self) -> bool {
        self == Self::Hour
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Not started, or already won.
    Inactive,
    /// This minute (or a later one) was already claimed.
    AlreadyTicked,
    /// The claim kept losing to concurrent galaxy writes.
    ClaimLost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub saved: usize,
    pub rebased: usize,
    pub deferred: usize,
    /// Records deleted by someone else before we could save them.
    pub vanished: usize,
    /// Writes deferred by earlier ticks that this tick landed.
    pub carried: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub galaxy: GalaxyId,
    pub minute: DateTime<Utc>,
    pub kind: TickKind,
    pub tick: u64,
    pub skipped: Option<SkipReason>,
    pub moved: usize,
    pub arrivals: usize,
    pub combats: usize,
    pub fleets_destroyed: usize,
    pub ships_built: u64,
    pub research_completed: usize,
    pub production: Option<f64>,
    pub census: bool,
    pub winner: Option<FactionId>,
    pub writes: WriteStats,
    pub pushed: usize,
}

impl TickReport {
    fn new(galaxy: GalaxyId, minute: DateTime<Utc>, kind: TickKind) -> Self {
        Self {
            galaxy,
            minute,
            kind,
            tick: 0,
            skipped: None,
            moved: 0,
            arrivals: 0,
            combats: 0,
            fleets_destroyed: 0,
            ships_built: 0,
            research_completed: 0,
            production: None,
            census: false,
            winner: None,
            writes: WriteStats::default(),
            pushed: 0,
        }
    }
}

/// Run one tick of `galaxy` for `minute`. Safe to call repeatedly for the
/// same minute: only the first caller gets past the claim.
#[instrument(skip_all, fields(galaxy = %galaxy, minute = %minute, kind = ?kind))]
pub async fn run_galaxy_tick(
    services: &TickServices,
    galaxy: GalaxyId,
    minute: DateTime<Utc>,
    kind: TickKind,
) -> Result<TickReport, TickError> {
    let store = services.store.as_ref();
    let mut report = TickReport::new(galaxy, minute, kind);

    let claimed = match claim_minute(store, galaxy, minute).await? {
        Claim::Claimed(record) => record,
        Claim::Skipped(reason) => {
            debug!(?reason, "tick skipped");
            report.skipped = Some(reason);
            return Ok(report);
        }
    };
    report.tick = claimed.value.tick;

    let (factions, bodies, fleets) = tokio::try_join!(
        store.load_factions(galaxy),
        store.load_bodies(galaxy),
        store.load_fleets(galaxy),
    )?;
    let mut writer = PhaseWriter::new(store);
    let galaxy_record = writer.track_one(claimed);
    let factions = writer.track(factions);
    let bodies = writer.track(bodies);
    let fleets = writer.track(fleets);
    let mut state = GalaxyState::new(galaxy_record, factions, bodies, fleets);
    let mut events = Vec::new();

    let deferred = store.take_deferred(galaxy).await?;
    if !deferred.is_empty() {
        let loaded = state.clone();
        writer.stats.carried = carry_over(&mut state, deferred);
        writer.persist(&loaded, &mut state).await?;
    }

    // Movement
    let before = state.clone();
    let movement = advance_fleets(&mut state);
    report.moved = movement.moved;
    report.arrivals = movement.arrivals;
    writer.persist(&before, &mut state).await?;

    // Combat
    let before = state.clone();
    let combats = resolve_combat(&mut state);
    report.combats = combats.len();
    events.extend(combats.into_iter().map(GalaxyEvent::Combat));
    report.winner = check_victory(&mut state);
    report.fleets_destroyed = writer.persist(&before, &mut state).await?;

    // Economy, research, production
    let before = state.clone();
    report.ships_built = accrue_economy(&mut state).ships_built;
    if kind.is_coarse() {
        let research = accrue_research(&mut state);
        for (faction, tech, level) in &research.completed {
            info!(%faction, tech = tech.name(), level, "research completed");
        }
        report.research_completed = research.completed.len();

        if production_due(&mut state.galaxy, minute) {
            let production = production_cycle(&mut state);
            info!(cash = production.total_cash, "production cycle");
            report.production = Some(production.total_cash);
            events.push(GalaxyEvent::Production(production));
        }
    }
    writer.persist(&before, &mut state).await?;
    report.writes = writer.stats;

    if kind.is_coarse() {
        store.append_census(take_census(&state, minute)).await?;
        report.census = true;
    }

    if !events.is_empty() {
        let envelopes: Vec<EventEnvelope> = events
            .into_iter()
            .map(|event| EventEnvelope::new(galaxy, state.galaxy.tick, minute, event))
            .collect();
        store.append_events(envelopes.clone()).await?;
        services.events.publish(&envelopes);
    }

    report.pushed = push_snapshots(services, &state).await;

    if report.writes.deferred > 0 {
        warn!(deferred = report.writes.deferred, "tick finished with deferred writes");
    }
    debug!(
        tick = report.tick,
        moved = report.moved,
        combats = report.combats,
        ships_built = report.ships_built,
        "tick complete"
    );
    Ok(report)
}

enum Claim {
    Claimed(Versioned<Galaxy>),
    Skipped(SkipReason),
}

async fn claim_minute(
    store: &dyn EntityStore,
    galaxy: GalaxyId,
    minute: DateTime<Utc>,
) -> Result<Claim, StoreError> {
    for _ in 0..2 {
        let mut record = store.load_galaxy(galaxy).await?;
        if !record.value.is_active() {
            return Ok(Claim::Skipped(SkipReason::Inactive));
        }
        if record.value.last_tick_at.is_some_and(|last| last >= minute) {
            return Ok(Claim::Skipped(SkipReason::AlreadyTicked));
        }

        record.value.last_tick_at = Some(minute);
        record.value.tick += 1;
        match store.save_galaxy(&record).await {
            Ok(version) => {
                record.version = version;
                return Ok(Claim::Claimed(record));
            }
            Err(err) if err.is_conflict() => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(Claim::Skipped(SkipReason::ClaimLost))
}

/// Starts the production clock on first sight and advances it whenever a
/// full cycle has elapsed.
fn production_due(galaxy: &mut Galaxy, minute: DateTime<Utc>) -> bool {
    let cycle = Duration::hours(i64::from(galaxy.settings.production_cycle_length));
    match galaxy.last_production_at {
        Some(last) if minute - last < cycle => false,
        Some(_) => {
            galaxy.last_production_at = Some(minute);
            true
        }
        None => {
            galaxy.last_production_at = Some(minute);
            false
        }
    }
}

/// Rebase writes parked by earlier ticks onto the freshly loaded state, in
/// the order they were parked. Returns how many still had a record.
fn carry_over(state: &mut GalaxyState, writes: Vec<DeferredWrite>) -> usize {
    let mut carried = 0;
    for write in writes {
        let landed = match write {
            DeferredWrite::Galaxy { before, ours } => {
                state.galaxy = ours.rebase(&before, &state.galaxy);
                true
            }
            DeferredWrite::Faction { before, ours } => rebase_into(&mut state.factions, &before, &ours),
            DeferredWrite::Body { before, ours } => rebase_into(&mut state.bodies, &before, &ours),
            DeferredWrite::Fleet { before, ours } => rebase_into(&mut state.fleets, &before, &ours),
        };
        if landed {
            carried += 1;
        }
    }
    if carried > 0 {
        info!(carried, "deferred writes carried over");
    }
    carried
}

fn rebase_into<T: Record + Rebase>(items: &mut [T], before: &T, ours: &T) -> bool {
    match items.iter_mut().find(|t| t.key() == ours.key()) {
        Some(current) => {
            *current = ours.rebase(before, current);
            true
        }
        None => {
            debug!(kind = T::KIND, key = %ours.key(), "deferred write has no record left");
            false
        }
    }
}

async fn push_snapshots(services: &TickServices, state: &GalaxyState) -> usize {
    let mut deliveries = Vec::new();
    for faction in &state.factions {
        if !services.push.is_online(faction.account).await {
            continue;
        }
        if let Some(snapshot) = snapshot_for(state, faction.id) {
            deliveries.push((faction.id, snapshot));
        }
    }
    let count = deliveries.len();
    if count == 0 {
        return 0;
    }

    // Delivery never holds up the tick.
    let push = Arc::clone(&services.push);
    tokio::spawn(async move {
        let sends = deliveries.into_iter().map(|(faction, snapshot)| {
            let push = &push;
            async move { (faction, push.push_snapshot(faction, snapshot).await) }
        });
        for (faction, result) in join_all(sends).await {
            if let Err(err) = result {
                debug!(%faction, error = %err, "snapshot not delivered");
            }
        }
    });
    count
}

/// What the tick persists, and how to defer it.
trait Tracked: Record + Rebase + PartialEq + 'static {
    fn entity(&self) -> EntityRef;
    fn load(store: &dyn EntityStore, key: Self::Key) -> BoxFuture<'_, Result<Versioned<Self>, StoreError>>;
    fn save<'a>(store: &'a dyn EntityStore, record: &'a Versioned<Self>)
        -> BoxFuture<'a, Result<u64, StoreError>>;
    /// Counter changes between `before` and `self` that can be applied
    /// without a version check.
    fn counter_deltas(&self, before: &Self) -> Vec<(EntityRef, DeltaField, f64)>;
    /// `self` with the counters of `ours`, so a rebase no longer carries
    /// the deltas already applied.
    fn with_counters_of(&self, ours: &Self) -> Self;
    fn deferred(before: Self, ours: Self) -> DeferredWrite;
}

fn delta(ours: f64, before: f64) -> Option<f64> {
    let change = ours - before;
    (change != 0.0).then_some(change)
}

impl Tracked for Galaxy {
    fn entity(&self) -> EntityRef {
        EntityRef::Galaxy(self.id)
    }
    fn load(store: &dyn EntityStore, key: GalaxyId) -> BoxFuture<'_, Result<Versioned<Self>, StoreError>> {
        store.load_galaxy(key)
    }
    fn save<'a>(store: &'a dyn EntityStore, record: &'a Versioned<Self>) -> BoxFuture<'a, Result<u64, StoreError>> {
        store.save_galaxy(record)
    }
    fn counter_deltas(&self, _before: &Self) -> Vec<(EntityRef, DeltaField, f64)> {
        Vec::new()
    }
    fn with_counters_of(&self, _ours: &Self) -> Self {
        self.clone()
    }
    fn deferred(before: Self, ours: Self) -> DeferredWrite {
        DeferredWrite::Galaxy { before, ours }
    }
}

impl Tracked for Faction {
    fn entity(&self) -> EntityRef {
        EntityRef::Faction(self.id)
    }
    fn load(store: &dyn EntityStore, key: FactionId) -> BoxFuture<'_, Result<Versioned<Self>, StoreError>> {
        store.load_faction(key)
    }
    fn save<'a>(store: &'a dyn EntityStore, record: &'a Versioned<Self>) -> BoxFuture<'a, Result<u64, StoreError>> {
        store.save_faction(record)
    }
    fn counter_deltas(&self, before: &Self) -> Vec<(EntityRef, DeltaField, f64)> {
        delta(self.cash, before.cash)
            .map(|d| (EntityRef::Faction(self.id), DeltaField::Cash, d))
            .into_iter()
            .collect()
    }
    fn with_counters_of(&self, ours: &Self) -> Self {
        Faction {
            cash: ours.cash,
            ..self.clone()
        }
    }
    fn deferred(before: Self, ours: Self) -> DeferredWrite {
        DeferredWrite::Faction { before, ours }
    }
}

impl Tracked for Body {
    fn entity(&self) -> EntityRef {
        EntityRef::Body(self.id)
    }
    fn load(store: &dyn EntityStore, key: BodyId) -> BoxFuture<'_, Result<Versioned<Self>, StoreError>> {
        store.load_body(key)
    }
    fn save<'a>(store: &'a dyn EntityStore, record: &'a Versioned<Self>) -> BoxFuture<'a, Result<u64, StoreError>> {
        store.save_body(record)
    }
    fn counter_deltas(&self, before: &Self) -> Vec<(EntityRef, DeltaField, f64)> {
        let target = EntityRef::Body(self.id);
        [
            (DeltaField::Ships, self.ships as f64, before.ships as f64),
            (DeltaField::Economy, f64::from(self.economy), f64::from(before.economy)),
            (DeltaField::Industry, f64::from(self.industry), f64::from(before.industry)),
            (DeltaField::Science, f64::from(self.science), f64::from(before.science)),
        ]
        .into_iter()
        .filter_map(|(field, ours, before)| delta(ours, before).map(|d| (target, field, d)))
        .collect()
    }
    fn with_counters_of(&self, ours: &Self) -> Self {
        Body {
            ships: ours.ships,
            economy: ours.economy,
            industry: ours.industry,
            science: ours.science,
            ..self.clone()
        }
    }
    fn deferred(before: Self, ours: Self) -> DeferredWrite {
        DeferredWrite::Body { before, ours }
    }
}

impl Tracked for Fleet {
    fn entity(&self) -> EntityRef {
        EntityRef::Fleet(self.id)
    }
    fn load(store: &dyn EntityStore, key: FleetId) -> BoxFuture<'_, Result<Versioned<Self>, StoreError>> {
        store.load_fleet(key)
    }
    fn save<'a>(store: &'a dyn EntityStore, record: &'a Versioned<Self>) -> BoxFuture<'a, Result<u64, StoreError>> {
        store.save_fleet(record)
    }
    fn counter_deltas(&self, before: &Self) -> Vec<(EntityRef, DeltaField, f64)> {
        delta(self.ships as f64, before.ships as f64)
            .map(|d| (EntityRef::Fleet(self.id), DeltaField::Ships, d))
            .into_iter()
            .collect()
    }
    fn with_counters_of(&self, ours: &Self) -> Self {
        Fleet {
            ships: ours.ships,
            ..self.clone()
        }
    }
    fn deferred(before: Self, ours: Self) -> DeferredWrite {
        DeferredWrite::Fleet { before, ours }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Saved,
    Rebased,
    Deferred,
}

enum WriteOutcome<T> {
    /// The record as the store now holds it.
    Stored(Versioned<T>, Resolution),
    Vanished,
    Failed(StoreError),
}

fn lost<T>(err: StoreError) -> WriteOutcome<T> {
    match err {
        StoreError::NotFound { .. } => WriteOutcome::Vanished,
        err => WriteOutcome::Failed(err),
    }
}

async fn write_one<T: Tracked>(store: &dyn EntityStore, before: &T, ours: Versioned<T>) -> WriteOutcome<T> {
    let key = ours.value.key();
    match T::save(store, &ours).await {
        Ok(version) => return WriteOutcome::Stored(Versioned::new(version, ours.value), Resolution::Saved),
        Err(err) if err.is_conflict() => debug!(kind = T::KIND, %key, "rebasing after conflict"),
        Err(err) => return lost(err),
    }

    let fresh = match T::load(store, key).await {
        Ok(fresh) => fresh,
        Err(err) => return lost(err),
    };
    let merged = Versioned::new(fresh.version, ours.value.rebase(before, &fresh.value));
    match T::save(store, &merged).await {
        Ok(version) => {
            return WriteOutcome::Stored(Versioned::new(version, merged.value), Resolution::Rebased)
        }
        Err(err) if err.is_conflict() => {}
        Err(err) => return lost(err),
    }

    let deltas = ours.value.counter_deltas(before);
    warn!(kind = T::KIND, %key, deltas = deltas.len(), "write deferred to the next tick");
    for (target, field, change) in deltas {
        if let Err(err) = store.apply_delta(target, field, change).await {
            return lost(err);
        }
    }
    let parked = T::deferred(before.with_counters_of(&ours.value), ours.value);
    if let Err(err) = store.defer_write(parked).await {
        return lost(err);
    }
    match T::load(store, key).await {
        Ok(record) => WriteOutcome::Stored(record, Resolution::Deferred),
        Err(err) => lost(err),
    }
}

/// Tracks the version of every record the tick loaded and writes each
/// phase's changes.
struct PhaseWriter<'a> {
    store: &'a dyn EntityStore,
    versions: HashMap<EntityRef, u64>,
    stats: WriteStats,
}

impl<'a> PhaseWriter<'a> {
    fn new(store: &'a dyn EntityStore) -> Self {
        Self {
            store,
            versions: HashMap::new(),
            stats: WriteStats::default(),
        }
    }

    fn track_one<T: Tracked>(&mut self, record: Versioned<T>) -> T {
        self.versions.insert(record.value.entity(), record.version);
        record.value
    }

    fn track<T: Tracked>(&mut self, records: Vec<Versioned<T>>) -> Vec<T> {
        records.into_iter().map(|r| self.track_one(r)).collect()
    }

    async fn write_changed<T: Tracked>(&self, before: &[T], after: &[T]) -> Vec<(T::Key, WriteOutcome<T>)> {
        let previous: HashMap<T::Key, &T> = before.iter().map(|t| (t.key(), t)).collect();
        let writes = after.iter().filter_map(|ours| {
            let prev = *previous.get(&ours.key())?;
            if prev == ours {
                return None;
            }
            let version = self.versions.get(&ours.entity()).copied().unwrap_or_default();
            let key = ours.key();
            let store = self.store;
            Some(async move { (key, write_one(store, prev, Versioned::new(version, ours.clone())).await) })
        });
        join_all(writes).await
    }

    /// Record an outcome. Returns the value to keep in memory, or `None`
    /// when the record no longer exists.
    fn settle<T: Tracked>(&mut self, outcome: WriteOutcome<T>, failure: &mut Option<StoreError>) -> Option<T> {
        match outcome {
            WriteOutcome::Stored(record, resolution) => {
                match resolution {
                    Resolution::Saved => self.stats.saved += 1,
                    Resolution::Rebased => self.stats.rebased += 1,
                    Resolution::Deferred => self.stats.deferred += 1,
                }
                self.versions.insert(record.value.entity(), record.version);
                Some(record.value)
            }
            WriteOutcome::Vanished => {
                self.stats.vanished += 1;
                None
            }
            WriteOutcome::Failed(err) => {
                failure.get_or_insert(err);
                None
            }
        }
    }

    fn absorb<T: Tracked>(
        &mut self,
        items: &mut Vec<T>,
        results: Vec<(T::Key, WriteOutcome<T>)>,
        failure: &mut Option<StoreError>,
    ) {
        let mut gone = HashSet::new();
        for (key, outcome) in results {
            let vanished = matches!(outcome, WriteOutcome::Vanished);
            match self.settle(outcome, failure) {
                Some(value) => {
                    if let Some(slot) = items.iter_mut().find(|t| t.key() == key) {
                        *slot = value;
                    }
                }
                None if vanished => {
                    gone.insert(key);
                }
                None => {}
            }
        }
        if !gone.is_empty() {
            items.retain(|t| !gone.contains(&t.key()));
        }
    }

    /// Persist everything that changed between `before` and `state`, and
    /// delete fleets that disappeared. Returns how many fleets were deleted.
    async fn persist(&mut self, before: &GalaxyState, state: &mut GalaxyState) -> Result<usize, TickError> {
        let removed: Vec<_> = before
            .fleets
            .iter()
            .filter(|f| state.fleet(f.id).is_none())
            .map(|f| f.id)
            .collect();

        let (galaxy, factions, bodies, fleets, deletions) = {
            let this = &*self;
            let store = self.store;
            tokio::join!(
                this.write_changed(std::slice::from_ref(&before.galaxy), std::slice::from_ref(&state.galaxy)),
                this.write_changed(&before.factions, &state.factions),
                this.write_changed(&before.bodies, &state.bodies),
                this.write_changed(&before.fleets, &state.fleets),
                join_all(removed.iter().map(|&id| store.delete_fleet(id))),
            )
        };

        let mut failure = None;
        for (_, outcome) in galaxy {
            match self.settle(outcome, &mut failure) {
                Some(value) => state.galaxy = value,
                None => {
                    failure.get_or_insert(StoreError::NotFound {
                        kind: Galaxy::KIND,
                        id: state.galaxy.id.to_string(),
                    });
                }
            }
        }
        self.absorb(&mut state.factions, factions, &mut failure);
        self.absorb(&mut state.bodies, bodies, &mut failure);
        self.absorb(&mut state.fleets, fleets, &mut failure);

        let mut deleted = 0;
        for (id, result) in removed.iter().zip(deletions) {
            match result {
                Ok(_) => {
                    self.versions.remove(&EntityRef::Fleet(*id));
                    deleted += 1;
                }
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(deleted),
        }
    }
}
