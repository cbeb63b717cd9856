//! Rules for player-initiated changes.
//!
//! Each function validates against the entities it is given and applies the
//! change in place; persisting the result is the caller's job.

use orrery_protocol::{
    Body, BodyId, Faction, FactionId, Fleet, FleetId, GalaxySettings, StatementEvent, Technology,
    UpgradeAspect, Waypoint, MAX_RESEARCH_QUEUE,
};
use thiserror::Error;

/// Longest statement a faction may publish.
pub const MAX_STATEMENT_LEN: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("faction {faction} does not own body {body}")]
    BodyNotOwned { faction: FactionId, body: BodyId },
    #[error("faction {faction} does not own fleet {fleet}")]
    FleetNotOwned { faction: FactionId, fleet: FleetId },
    #[error("unknown body {0}")]
    UnknownBody(BodyId),
    #[error("cannot move {requested} ships, only {available} available")]
    NotEnoughShips { requested: u64, available: u64 },
    #[error("a fleet needs at least one ship")]
    EmptyFleet,
    #[error("hop of {distance:.2} light years exceeds hyperspace range {range:.2}")]
    OutOfRange { distance: f64, range: f64 },
    #[error("fleet {fleet} is not at body {body}")]
    NotAtBody { fleet: FleetId, body: BodyId },
    #[error("upgrade costs {cost:.0} but only {cash:.0} is available")]
    InsufficientCash { cost: f64, cash: f64 },
    #[error("body {0} already has a warp gate")]
    WarpGateExists(BodyId),
    #[error("research queue must hold 1 to 5 technologies, got {0}")]
    QueueLength(usize),
    #[error("statement must be 1 to 1000 characters")]
    StatementLength,
}

/// Longest single hop a faction's fleets can be ordered to make.
pub fn hyperspace_range(settings: &GalaxySettings, faction: &Faction) -> f64 {
    f64::from(settings.hyperspace_base + faction.level(Technology::Hyperspace))
}

fn ensure_owns_body(faction: &Faction, body: &Body) -> Result<(), ActionError> {
    if body.is_owned_by(faction.id) {
        Ok(())
    } else {
        Err(ActionError::BodyNotOwned {
            faction: faction.id,
            body: body.id,
        })
    }
}

/// Move `ships` from a body into a new fleet parked at that body.
pub fn build_fleet(
    faction: &Faction,
    body: &mut Body,
    ships: u64,
    name: &str,
) -> Result<Fleet, ActionError> {
    ensure_owns_body(faction, body)?;
    if ships == 0 {
        return Err(ActionError::EmptyFleet);
    }
    if ships > body.ships {
        return Err(ActionError::NotEnoughShips {
            requested: ships,
            available: body.ships,
        });
    }

    body.ships -= ships;
    let name = match name.trim() {
        "" => format!("{} Fleet", body.name),
        name => name.to_string(),
    };
    Ok(Fleet {
        id: FleetId::new(),
        galaxy: body.galaxy,
        owner: faction.id,
        name,
        position: body.position,
        waypoints: Vec::new(),
        ships,
    })
}

/// Replace a fleet's orders. Every hop, starting from the fleet's current
/// position, must be within hyperspace range.
pub fn set_waypoints(
    settings: &GalaxySettings,
    faction: &Faction,
    fleet: &mut Fleet,
    waypoints: Vec<Waypoint>,
    bodies: &[Body],
) -> Result<(), ActionError> {
    if fleet.owner != faction.id {
        return Err(ActionError::FleetNotOwned {
            faction: faction.id,
            fleet: fleet.id,
        });
    }

    let range = hyperspace_range(settings, faction);
    let mut from = fleet.position;
    for waypoint in &waypoints {
        let body = bodies
            .iter()
            .find(|b| b.id == waypoint.body)
            .ok_or(ActionError::UnknownBody(waypoint.body))?;
        let distance = from.distance(body.position);
        if distance > range {
            return Err(ActionError::OutOfRange { distance, range });
        }
        from = body.position;
    }

    fleet.waypoints = waypoints;
    Ok(())
}

/// Rebalance ships between a fleet and the body it is parked at so the
/// fleet ends with `fleet_ships_after`.
pub fn transfer_ships(
    settings: &GalaxySettings,
    faction: &Faction,
    fleet: &mut Fleet,
    body: &mut Body,
    fleet_ships_after: u64,
) -> Result<(), ActionError> {
    if fleet.owner != faction.id {
        return Err(ActionError::FleetNotOwned {
            faction: faction.id,
            fleet: fleet.id,
        });
    }
    ensure_owns_body(faction, body)?;
    if fleet.position.distance(body.position) > settings.engagement_radius {
        return Err(ActionError::NotAtBody {
            fleet: fleet.id,
            body: body.id,
        });
    }
    if fleet_ships_after == 0 {
        return Err(ActionError::EmptyFleet);
    }
    let total = fleet.ships + body.ships;
    if fleet_ships_after > total {
        return Err(ActionError::NotEnoughShips {
            requested: fleet_ships_after,
            available: total,
        });
    }

    fleet.ships = fleet_ships_after;
    body.ships = total - fleet_ships_after;
    Ok(())
}

/// Price of the next level of `aspect` on `body`. Richer bodies and better
/// terraforming make upgrades cheaper.
pub fn upgrade_cost(body: &Body, aspect: UpgradeAspect, terraforming: u32) -> f64 {
    let richness = (f64::from(body.resources) + 5.0 * f64::from(terraforming)).max(1.0);
    let tiered = |base: f64, level: u32| base * 2.0 * f64::from(level + 1) / (richness / 100.0);
    match aspect {
        UpgradeAspect::Economy => tiered(2.5, body.economy),
        UpgradeAspect::Industry => tiered(5.0, body.industry),
        UpgradeAspect::Science => tiered(20.0, body.science),
        UpgradeAspect::WarpGate => 50.0 * 2.0 * 100.0 / richness,
    }
}

/// Buy one level of `aspect` on an owned body. Returns the price paid.
pub fn upgrade_body(
    faction: &mut Faction,
    body: &mut Body,
    aspect: UpgradeAspect,
) -> Result<f64, ActionError> {
    ensure_owns_body(faction, body)?;
    if aspect == UpgradeAspect::WarpGate && body.warp_gate {
        return Err(ActionError::WarpGateExists(body.id));
    }
    let cost = upgrade_cost(body, aspect, faction.level(Technology::Terraforming));
    if faction.cash < cost {
        return Err(ActionError::InsufficientCash {
            cost,
            cash: faction.cash,
        });
    }

    faction.cash -= cost;
    match aspect {
        UpgradeAspect::Economy => body.economy += 1,
        UpgradeAspect::Industry => body.industry += 1,
        UpgradeAspect::Science => body.science += 1,
        UpgradeAspect::WarpGate => body.warp_gate = true,
    }
    Ok(cost)
}

pub fn set_research_queue(faction: &mut Faction, queue: Vec<Technology>) -> Result<(), ActionError> {
    if queue.is_empty() || queue.len() > MAX_RESEARCH_QUEUE {
        return Err(ActionError::QueueLength(queue.len()));
    }
    faction.research_queue = queue;
    Ok(())
}

pub fn compose_statement(faction: &Faction, text: &str) -> Result<StatementEvent, ActionError> {
    let text = text.trim();
    if text.is_empty() || text.chars().count() > MAX_STATEMENT_LEN {
        return Err(ActionError::StatementLength);
    }
    Ok(StatementEvent {
        faction: faction.id,
        text: text.to_string(),
    })
}
