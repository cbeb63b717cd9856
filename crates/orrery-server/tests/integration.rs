use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};

use orrery_protocol::{
    AccountId, Body, Faction, FactionId, GalaxyEvent, GalaxyId, GalaxySettings, Technology,
    UpgradeAspect, Waypoint,
};
use orrery_server::lifecycle::{self, LifecycleError};
use orrery_server::{
    run_galaxy_tick, ActionService, CommandError, ConnectionRegistry, DeltaField, EntityRef, EntityStore,
    EventBus, InFlight, InMemoryStore, Scheduler, ServerConfig, SkipReason, TickKind, TickReport,
    TickServices,
};

const COLORS: &[&str] = &["#c0392b", "#2980b9", "#27ae60", "#8e44ad"];

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
}

fn at(minutes: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes)
}

/// Income of a faction holding only its home star, per fine tick.
const HOME_INCOME_PER_TICK: f64 = 5.0 / 0.25 / 60.0;

struct World {
    store: Arc<InMemoryStore>,
    registry: Arc<ConnectionRegistry>,
    services: TickServices,
    galaxy: GalaxyId,
    owner: AccountId,
    factions: Vec<Faction>,
}

async fn add_galaxy(store: &InMemoryStore, factions: usize, seed: u64) -> (GalaxyId, AccountId, Vec<Faction>) {
    let owner = AccountId::new();
    let galaxy = lifecycle::create_galaxy(store, "Test", owner, GalaxySettings::default(), None)
        .await
        .unwrap()
        .value
        .id;
    let mut joined = Vec::new();
    for n in 0..factions {
        let account = if n == 0 { owner } else { AccountId::new() };
        let faction = lifecycle::join_galaxy(store, galaxy, account, &format!("F{n}"), COLORS[n], None)
            .await
            .unwrap();
        joined.push(faction);
    }
    lifecycle::start_galaxy_with_seed(store, galaxy, owner, t0(), seed)
        .await
        .unwrap();
    (galaxy, owner, joined)
}

async fn world(factions: usize) -> World {
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(ConnectionRegistry::new(8));
    let services = TickServices {
        store: store.clone(),
        push: registry.clone(),
        events: EventBus::new(64),
    };
    let (galaxy, owner, factions) = add_galaxy(&store, factions, 7).await;
    World {
        store,
        registry,
        services,
        galaxy,
        owner,
        factions,
    }
}

impl World {
    async fn tick(&self, minutes: i64) -> TickReport {
        let minute = at(minutes);
        run_galaxy_tick(&self.services, self.galaxy, minute, TickKind::for_minute(minute))
            .await
            .unwrap()
    }

    async fn faction(&self, id: FactionId) -> Faction {
        self.store.load_faction(id).await.unwrap().value
    }

    async fn bodies_of(&self, faction: FactionId) -> Vec<Body> {
        self.store
            .load_bodies(self.galaxy)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.value)
            .filter(|b| b.is_owned_by(faction))
            .collect()
    }

    async fn home(&self, faction: FactionId) -> Body {
        self.bodies_of(faction)
            .await
            .into_iter()
            .find(|b| b.orbit.is_none())
            .unwrap()
    }

    fn actions(&self) -> ActionService {
        ActionService::new(self.services.store.clone(), self.services.events.clone(), 3)
    }
}

#[tokio::test]
async fn a_minute_is_claimed_only_once() {
    let w = world(2).await;

    let first = w.tick(1).await;
    assert_eq!(first.skipped, None);
    assert_eq!(first.tick, 1);

    let again = w.tick(1).await;
    assert_eq!(again.skipped, Some(SkipReason::AlreadyTicked));
    let earlier = w.tick(0).await;
    assert_eq!(earlier.skipped, Some(SkipReason::AlreadyTicked));

    let galaxy = w.store.load_galaxy(w.galaxy).await.unwrap().value;
    assert_eq!(galaxy.tick, 1);
    assert_eq!(galaxy.last_tick_at, Some(at(1)));

    // Income was paid exactly once.
    let cash = w.faction(w.factions[0].id).await.cash;
    assert!((cash - (500.0 + HOME_INCOME_PER_TICK)).abs() < 1e-9);
}

#[tokio::test]
async fn unstarted_galaxies_are_not_ticked() {
    let store = Arc::new(InMemoryStore::new());
    let services = TickServices {
        store: store.clone(),
        push: Arc::new(ConnectionRegistry::new(1)),
        events: EventBus::new(8),
    };
    let galaxy = lifecycle::create_galaxy(store.as_ref(), "Lobby", AccountId::new(), GalaxySettings::default(), None)
        .await
        .unwrap()
        .value
        .id;

    let report = run_galaxy_tick(&services, galaxy, at(1), TickKind::Minute)
        .await
        .unwrap();
    assert_eq!(report.skipped, Some(SkipReason::Inactive));
}

#[tokio::test]
async fn a_failing_galaxy_does_not_stop_the_others() {
    let store = Arc::new(InMemoryStore::new());
    let services = TickServices {
        store: store.clone(),
        push: Arc::new(ConnectionRegistry::new(1)),
        events: EventBus::new(8),
    };
    let (healthy, _, _) = add_galaxy(&store, 2, 1).await;
    let (broken, _, _) = add_galaxy(&store, 2, 2).await;
    store.set_unavailable(broken, true).await;

    let mut scheduler = Scheduler::new(ServerConfig::default(), services, InFlight::new());
    let pass = scheduler.run_pass(at(1)).await.unwrap();
    assert_eq!(pass.dispatched.len(), 2);
    let reports = scheduler.drain().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].galaxy, healthy);

    // The failed galaxy is not stuck in flight and recovers next pass.
    store.set_unavailable(broken, false).await;
    let pass = scheduler.run_pass(at(2)).await.unwrap();
    assert!(pass.busy.is_empty());
    assert_eq!(scheduler.drain().await.len(), 2);
}

#[tokio::test]
async fn busy_galaxies_are_skipped() {
    let store = Arc::new(InMemoryStore::new());
    let services = TickServices {
        store: store.clone(),
        push: Arc::new(ConnectionRegistry::new(1)),
        events: EventBus::new(8),
    };
    let (galaxy, _, _) = add_galaxy(&store, 1, 3).await;
    let in_flight = InFlight::new();
    let _held = in_flight.acquire(galaxy).unwrap();

    let mut scheduler = Scheduler::new(ServerConfig::default(), services, in_flight);
    let pass = scheduler.run_pass(at(1)).await.unwrap();
    assert!(pass.dispatched.is_empty());
    assert_eq!(pass.busy, vec![galaxy]);
}

#[tokio::test]
async fn production_pays_out_once_per_cycle() {
    let w = world(2).await;
    let mut events = w.services.events.subscribe();

    // Nothing is due an hour after start.
    let report = w.tick(60).await;
    assert_eq!(report.kind, TickKind::Hour);
    assert_eq!(report.production, None);

    let mut galaxy = w.store.load_galaxy(w.galaxy).await.unwrap();
    galaxy.value.last_production_at = Some(at(120) - Duration::hours(24));
    w.store.save_galaxy(&galaxy).await.unwrap();

    let before = w.faction(w.factions[0].id).await.cash;
    let report = w.tick(120).await;
    assert_eq!(report.production, Some(100.0));
    let after = w.faction(w.factions[0].id).await.cash;
    assert!((after - before - 50.0 - HOME_INCOME_PER_TICK).abs() < 1e-9);

    let published = tokio::time::timeout(StdDuration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    match published.event {
        GalaxyEvent::Production(production) => {
            assert_eq!(production.awards.len(), 2);
            assert!(production.awards.iter().all(|a| a.cash == 50.0));
        }
        other => panic!("expected production, got {other:?}"),
    }
    let stored = w.store.load_events(w.galaxy).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].tick, report.tick);

    // The clock moved, so the next hour pays nothing.
    assert_eq!(w.tick(180).await.production, None);
}

#[tokio::test]
async fn hourly_ticks_record_a_census() {
    let w = world(3).await;

    w.tick(59).await;
    assert!(w.store.load_census(w.galaxy).await.unwrap().is_empty());

    let report = w.tick(60).await;
    assert!(report.census);
    let census = w.store.load_census(w.galaxy).await.unwrap();
    assert_eq!(census.len(), 1);
    assert_eq!(census[0].at, at(60));
    assert_eq!(census[0].entries.len(), 3);
    for entry in &census[0].entries {
        assert_eq!(entry.bodies, 6);
        assert_eq!(entry.economy, 5);
    }
}

#[tokio::test]
async fn a_conflicting_write_is_rebased() {
    let w = world(2).await;
    let contended = w.factions[0].id;
    w.store.contend(EntityRef::Faction(contended), 1).await;

    let report = w.tick(1).await;
    assert_eq!(report.writes.rebased, 1);
    assert_eq!(report.writes.deferred, 0);

    let cash = w.faction(contended).await.cash;
    assert!((cash - (500.0 + HOME_INCOME_PER_TICK)).abs() < 1e-9);
}

#[tokio::test]
async fn repeated_conflicts_defer_but_keep_counters() {
    let w = world(2).await;
    let contended = w.factions[0].id;
    w.store.contend(EntityRef::Faction(contended), 2).await;

    let report = w.tick(1).await;
    assert_eq!(report.writes.deferred, 1);

    let contended_cash = w.faction(contended).await.cash;
    let other_cash = w.faction(w.factions[1].id).await.cash;
    assert!((contended_cash - other_cash).abs() < 1e-9);

    // The next tick proceeds normally from the stored record.
    let report = w.tick(2).await;
    assert_eq!(report.writes.deferred, 0);
    assert_eq!(report.writes.carried, 1);
    let cash = w.faction(contended).await.cash;
    assert!((cash - (500.0 + 2.0 * HOME_INCOME_PER_TICK)).abs() < 1e-9);
}

#[tokio::test]
async fn deferred_research_lands_on_the_next_tick() {
    let w = world(2).await;
    let (contended, other) = (w.factions[0].id, w.factions[1].id);
    w.store.contend(EntityRef::Faction(contended), 2).await;

    let report = w.tick(60).await;
    assert_eq!(report.writes.deferred, 1);
    assert_ne!(w.faction(contended).await.research, w.faction(other).await.research);

    let report = w.tick(120).await;
    assert_eq!(report.writes.carried, 1);
    let (contended, other) = (w.faction(contended).await, w.faction(other).await);
    assert_eq!(contended.research, other.research);
    assert_eq!(contended.research_queue, other.research_queue);
    assert!((contended.cash - other.cash).abs() < 1e-9);
}

#[tokio::test]
async fn a_deferred_production_clock_is_not_paid_twice() {
    let w = world(2).await;
    let mut galaxy = w.store.load_galaxy(w.galaxy).await.unwrap();
    let last_cycle = at(120) - Duration::hours(24);
    galaxy.value.last_production_at = Some(last_cycle);
    w.store.save_galaxy(&galaxy).await.unwrap();

    // The claim goes through; both saves of the moved clock lose.
    w.store.contend_after(EntityRef::Galaxy(w.galaxy), 1, 2).await;
    let before = w.faction(w.factions[0].id).await.cash;
    let report = w.tick(120).await;
    assert_eq!(report.production, Some(100.0));
    assert_eq!(report.writes.deferred, 1);
    assert_eq!(
        w.store.load_galaxy(w.galaxy).await.unwrap().value.last_production_at,
        Some(last_cycle)
    );

    let report = w.tick(180).await;
    assert_eq!(report.production, None);
    assert_eq!(report.writes.carried, 1);
    assert_eq!(
        w.store.load_galaxy(w.galaxy).await.unwrap().value.last_production_at,
        Some(at(120))
    );
    let after = w.faction(w.factions[0].id).await.cash;
    assert!((after - before - 50.0 - 2.0 * HOME_INCOME_PER_TICK).abs() < 1e-9);
}

#[tokio::test]
async fn deferred_ship_production_is_carried_over() {
    let control = world(1).await;
    let w = world(1).await;
    let home = w.home(w.factions[0].id).await;
    w.store.contend(EntityRef::Body(home.id), 2).await;

    assert_eq!(w.tick(1).await.writes.deferred, 1);
    control.tick(1).await;
    assert_eq!(w.tick(2).await.writes.carried, 1);
    control.tick(2).await;

    let ours = w.home(w.factions[0].id).await;
    let expected = control.home(control.factions[0].id).await;
    assert_eq!(ours.ships, expected.ships);
    assert!((ours.ship_accum - expected.ship_accum).abs() < 1e-9);
}

#[tokio::test]
async fn online_members_receive_snapshots() {
    let w = world(2).await;
    let online = &w.factions[1];
    let mut rx = w.registry.connect(online.account).await;

    let report = w.tick(1).await;
    assert_eq!(report.pushed, 1);

    let snapshot = tokio::time::timeout(StdDuration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.observer, online.id);
    assert_eq!(snapshot.tick, 1);
    let me = snapshot.faction(online.id).unwrap();
    assert!(me.private.is_some());
    let peer = snapshot.faction(w.factions[0].id).unwrap();
    assert!(peer.private.is_none());
}

#[tokio::test]
async fn holding_most_bodies_wins_the_galaxy() {
    let w = world(2).await;
    let winner = w.factions[0].id;
    for mut body in w.store.load_bodies(w.galaxy).await.unwrap() {
        body.value.owner = Some(winner);
        w.store.save_body(&body).await.unwrap();
    }

    let report = w.tick(1).await;
    assert_eq!(report.winner, Some(winner));
    assert_eq!(
        w.store.load_galaxy(w.galaxy).await.unwrap().value.winner,
        Some(winner)
    );
    assert!(w.store.load_active_galaxies().await.unwrap().is_empty());
    assert_eq!(w.tick(2).await.skipped, Some(SkipReason::Inactive));
}

#[tokio::test]
async fn fleets_are_built_ordered_and_moved() {
    let w = world(2).await;
    let actions = w.actions();
    let faction = w.factions[0].id;
    let home = w.home(faction).await;
    let planet = w
        .bodies_of(faction)
        .await
        .into_iter()
        .find(|b| b.orbit.is_some())
        .unwrap();

    let fleet = assert_ok!(actions.build_fleet(faction, home.id, 4, "Vanguard").await);
    assert_eq!(fleet.ships, 4);
    assert_eq!(w.home(faction).await.ships, home.ships - 4);

    let ordered = assert_ok!(
        actions
            .set_waypoints(faction, fleet.id, vec![Waypoint::to(planet.id)])
            .await
    );
    assert_eq!(ordered.waypoints.len(), 1);

    let report = w.tick(1).await;
    assert_eq!(report.moved, 1);
    let moved = w.store.load_fleet(fleet.id).await.unwrap().value;
    assert!(moved.position.distance(planet.position) < home.position.distance(planet.position));
}

#[tokio::test]
async fn actions_are_validated() {
    let w = world(2).await;
    let actions = w.actions();
    let (mine, theirs) = (w.factions[0].id, w.factions[1].id);
    let their_home = w.home(theirs).await;

    let err = assert_err!(actions.build_fleet(mine, their_home.id, 1, "").await);
    assert!(matches!(err, CommandError::Rejected(_)));

    let err = assert_err!(actions.set_research_queue(mine, Vec::new()).await);
    assert!(matches!(err, CommandError::Rejected(_)));
    assert_ok!(
        actions
            .set_research_queue(mine, vec![Technology::Weapons, Technology::Scanning])
            .await
    );
    assert_eq!(
        w.faction(mine).await.research_queue,
        vec![Technology::Weapons, Technology::Scanning]
    );

    let home = w.home(mine).await;
    let cost = assert_ok!(actions.upgrade_body(mine, home.id, UpgradeAspect::Economy).await);
    assert!((w.faction(mine).await.cash - (500.0 - cost)).abs() < 1e-9);
    assert_eq!(w.home(mine).await.economy, 6);

    let statement = assert_ok!(actions.issue_statement(mine, "  We come in peace.  ").await);
    assert_eq!(statement.text, "We come in peace.");
    let events = w.store.load_events(w.galaxy).await.unwrap();
    assert!(matches!(events.last().map(|e| &e.event), Some(GalaxyEvent::Statement(_))));
}

#[tokio::test]
async fn transfers_conserve_ships() {
    let w = world(1).await;
    let actions = w.actions();
    let faction = w.factions[0].id;
    let home = w.home(faction).await;
    let fleet = actions.build_fleet(faction, home.id, 2, "").await.unwrap();

    assert_ok!(actions.transfer_ships(faction, fleet.id, home.id, 7).await);
    let fleet_after = w.store.load_fleet(fleet.id).await.unwrap().value;
    let home_after = w.home(faction).await;
    assert_eq!(fleet_after.ships, 7);
    assert_eq!(fleet_after.ships + home_after.ships, home.ships);

    let err = assert_err!(actions.transfer_ships(faction, fleet.id, home.id, 0).await);
    assert!(matches!(err, CommandError::Rejected(_)));
}

#[tokio::test]
async fn transfers_restart_when_the_fleet_changes_underneath() {
    let w = world(1).await;
    let actions = w.actions();
    let faction = w.factions[0].id;
    let home = w.home(faction).await;
    let fleet = assert_ok!(actions.build_fleet(faction, home.id, 8, "").await);
    assert_eq!(w.home(faction).await.ships, 2);

    // Six ships are lost between the action's read and its write.
    w.store
        .interleave(EntityRef::Fleet(fleet.id), DeltaField::Ships, -6.0)
        .await;
    assert_ok!(actions.transfer_ships(faction, fleet.id, home.id, 1).await);

    let fleet_after = w.store.load_fleet(fleet.id).await.unwrap().value;
    let home_after = w.home(faction).await;
    assert_eq!(fleet_after.ships, 1);
    assert_eq!(home_after.ships, 3);
    assert_eq!(fleet_after.ships + home_after.ships, home.ships - 6);
}

#[tokio::test]
async fn upgrades_recheck_cash_after_a_concurrent_spend() {
    let w = world(1).await;
    let actions = w.actions();
    let faction = w.factions[0].id;
    let home = w.home(faction).await;

    w.store
        .interleave(EntityRef::Faction(faction), DeltaField::Cash, -450.0)
        .await;
    let err = assert_err!(actions.upgrade_body(faction, home.id, UpgradeAspect::WarpGate).await);
    assert!(matches!(err, CommandError::Rejected(_)));

    assert!((w.faction(faction).await.cash - 50.0).abs() < 1e-9);
    assert!(!w.home(faction).await.warp_gate);
}

#[tokio::test]
async fn actions_need_a_running_galaxy() {
    let store = Arc::new(InMemoryStore::new());
    let owner = AccountId::new();
    let galaxy = lifecycle::create_galaxy(store.as_ref(), "Lobby", owner, GalaxySettings::default(), None)
        .await
        .unwrap()
        .value
        .id;
    let faction = lifecycle::join_galaxy(store.as_ref(), galaxy, owner, "Early", "#000", None)
        .await
        .unwrap();

    let actions = ActionService::new(store.clone(), EventBus::new(8), 3);
    let err = assert_err!(actions.issue_statement(faction.id, "hello").await);
    assert!(matches!(err, CommandError::NotRunning(id) if id == galaxy));
}

#[tokio::test]
async fn joining_enforces_secret_colors_and_capacity() {
    let store = InMemoryStore::new();
    let owner = AccountId::new();
    let settings = GalaxySettings {
        max_factions: 2,
        ..GalaxySettings::default()
    };
    let galaxy = lifecycle::create_galaxy(&store, "Private", owner, settings, Some("hunter2".into()))
        .await
        .unwrap()
        .value
        .id;

    let err = lifecycle::join_galaxy(&store, galaxy, owner, "A", "#111", Some("wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::BadSecret(_)));

    lifecycle::join_galaxy(&store, galaxy, owner, "A", "#111", Some("hunter2"))
        .await
        .unwrap();
    let err = lifecycle::join_galaxy(&store, galaxy, owner, "A again", "#222", Some("hunter2"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyJoined(_)));
    let err = lifecycle::join_galaxy(&store, galaxy, AccountId::new(), "B", "#111", Some("hunter2"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::ColorTaken(_)));

    lifecycle::join_galaxy(&store, galaxy, AccountId::new(), "B", "#222", Some("hunter2"))
        .await
        .unwrap();
    let err = lifecycle::join_galaxy(&store, galaxy, AccountId::new(), "C", "#333", Some("hunter2"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Full { max: 2, .. }));

    assert_eq!(store.load_factions(galaxy).await.unwrap().len(), 2);
}

#[tokio::test]
async fn starting_is_owner_only_and_once() {
    let store = InMemoryStore::new();
    let owner = AccountId::new();
    let galaxy = lifecycle::create_galaxy(&store, "G", owner, GalaxySettings::default(), None)
        .await
        .unwrap()
        .value
        .id;

    let err = lifecycle::start_galaxy(&store, galaxy, owner, t0()).await.unwrap_err();
    assert!(matches!(err, LifecycleError::NoFactions(_)));

    lifecycle::join_galaxy(&store, galaxy, owner, "A", "#111", None)
        .await
        .unwrap();
    let err = lifecycle::start_galaxy(&store, galaxy, AccountId::new(), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotOwner(_)));

    let started = lifecycle::start_galaxy(&store, galaxy, owner, t0()).await.unwrap();
    assert_eq!(started.value.started_at, Some(t0()));
    assert!(!store.load_bodies(galaxy).await.unwrap().is_empty());

    let err = lifecycle::start_galaxy(&store, galaxy, owner, t0()).await.unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyStarted(_)));
}

#[tokio::test]
async fn restarting_resets_the_map_and_factions() {
    let w = world(2).await;
    let actions = w.actions();
    let faction = w.factions[0].id;
    let home = w.home(faction).await;
    actions.build_fleet(faction, home.id, 3, "").await.unwrap();
    actions
        .upgrade_body(faction, home.id, UpgradeAspect::Industry)
        .await
        .unwrap();
    w.tick(1).await;

    let galaxy = lifecycle::restart_galaxy(w.store.as_ref(), w.galaxy, w.owner)
        .await
        .unwrap();
    assert_eq!(galaxy.value.started_at, None);
    assert_eq!(galaxy.value.tick, 0);
    assert!(w.store.load_bodies(w.galaxy).await.unwrap().is_empty());
    assert!(w.store.load_fleets(w.galaxy).await.unwrap().is_empty());

    let reset = w.faction(faction).await;
    assert_eq!(reset.cash, 500.0);
    assert_eq!(reset.research_queue, vec![Technology::Hyperspace]);
    assert_eq!(reset.color, w.factions[0].color);
}
