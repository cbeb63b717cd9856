//! Per-faction fog of war.
//!
//! Projections are rebuilt from the live state on every call.

use orrery_protocol::{
    Body, BodyDetail, BodyView, Faction, FactionId, FactionPrivate, FactionView, Fleet, FleetView,
    Position, Technology, VisibilitySnapshot,
};

use crate::state::GalaxyState;

/// Scan radius of a faction: the galaxy's base plus its scanning level.
pub fn scan_range(state: &GalaxyState, faction: &Faction) -> f64 {
    f64::from(state.galaxy.settings.scan_base + faction.level(Technology::Scanning))
}

/// Snapshot of the galaxy as `observer` may see it, or `None` if the
/// observer is not a member.
pub fn snapshot_for(state: &GalaxyState, observer: FactionId) -> Option<VisibilitySnapshot> {
    let me = state.faction(observer)?;
    let range = scan_range(state, me);
    let sensors: Vec<Position> = state.owned_bodies(observer).map(|b| b.position).collect();
    let in_range = |p: Position| sensors.iter().any(|s| s.distance(p) <= range);

    let bodies = state
        .bodies
        .iter()
        .map(|b| {
            let scanned = b.is_owned_by(observer) || in_range(b.position);
            body_view(b, scanned)
        })
        .collect();

    let fleets = state
        .fleets
        .iter()
        .filter(|f| f.owner == observer || in_range(f.position))
        .map(|f| fleet_view(f, f.owner == observer))
        .collect();

    let factions = state
        .factions
        .iter()
        .map(|f| faction_view(f, f.id == observer))
        .collect();

    Some(VisibilitySnapshot {
        galaxy: state.galaxy.id,
        tick: state.galaxy.tick,
        observer,
        scan_range: range,
        factions,
        bodies,
        fleets,
        winner: state.galaxy.winner,
    })
}

fn body_view(body: &Body, scanned: bool) -> BodyView {
    BodyView {
        id: body.id,
        name: body.name.clone(),
        kind: body.kind,
        position: body.position,
        orbit: body.orbit,
        owner: body.owner,
        detail: scanned.then(|| BodyDetail {
            ships: body.ships,
            ship_accum: body.ship_accum,
            economy: body.economy,
            industry: body.industry,
            science: body.science,
            resources: body.resources,
            warp_gate: body.warp_gate,
        }),
    }
}

fn fleet_view(fleet: &Fleet, own: bool) -> FleetView {
    FleetView {
        id: fleet.id,
        owner: fleet.owner,
        name: fleet.name.clone(),
        position: fleet.position,
        ships: fleet.ships,
        waypoints: own.then(|| fleet.waypoints.clone()),
    }
}

fn faction_view(faction: &Faction, own: bool) -> FactionView {
    FactionView {
        id: faction.id,
        name: faction.name.clone(),
        account: faction.account,
        color: faction.color.clone(),
        levels: faction.research.map(|p| p.level),
        private: own.then(|| FactionPrivate {
            cash: faction.cash.trunc() as i64,
            research_queue: faction.research_queue.clone(),
            research: faction.research.clone(),
        }),
    }
}
