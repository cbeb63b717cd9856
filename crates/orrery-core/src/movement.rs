use std::collections::HashMap;

use orrery_protocol::{ArrivalAction, BodyId, FactionId, GalaxySettings, Position};
use tracing::trace;

use crate::state::GalaxyState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MovementReport {
    pub moved: usize,
    pub arrivals: usize,
    /// Waypoints dropped because their body no longer exists.
    pub stale_waypoints: usize,
}

/// What movement may read about a body. Captured before any fleet moves.
#[derive(Clone, Copy)]
struct Beacon {
    position: Position,
    owner: Option<FactionId>,
    warp_gate: bool,
}

/// Distance a fleet covers in one fine tick toward a destination.
pub fn step_length(settings: &GalaxySettings, warp_gate: bool) -> f64 {
    let speed = if warp_gate {
        settings.warp_speed
    } else {
        settings.fleet_speed
    };
    speed * settings.tick_hours()
}

/// Advance every fleet one fine tick along its waypoint queue.
pub fn advance_fleets(state: &mut GalaxyState) -> MovementReport {
    let beacons: HashMap<BodyId, Beacon> = state
        .bodies
        .iter()
        .map(|b| {
            (
                b.id,
                Beacon {
                    position: b.position,
                    owner: b.owner,
                    warp_gate: b.warp_gate,
                },
            )
        })
        .collect();
    let index = state.body_index();
    let settings = &state.galaxy.settings;
    let mut report = MovementReport::default();

    for fleet in &mut state.fleets {
        let Some(&waypoint) = fleet.waypoints.first() else {
            continue;
        };
        let Some(beacon) = beacons.get(&waypoint.body) else {
            fleet.waypoints.remove(0);
            report.stale_waypoints += 1;
            continue;
        };

        let step = step_length(settings, beacon.warp_gate);
        if fleet.position.distance(beacon.position) > step {
            fleet.position = fleet.position.step_toward(beacon.position, step);
            report.moved += 1;
            continue;
        }

        fleet.position = beacon.position;
        fleet.waypoints.remove(0);
        report.arrivals += 1;
        trace!(fleet = %fleet.id, body = %waypoint.body, "fleet arrived");

        if beacon.owner != Some(fleet.owner) {
            continue;
        }
        let Some(body) = index.get(&waypoint.body).map(|&i| &mut state.bodies[i]) else {
            continue;
        };
        match waypoint.action {
            Some(ArrivalAction::Collect) => {
                fleet.ships += body.ships;
                body.ships = 0;
            }
            Some(ArrivalAction::Drop) => {
                let unloaded = fleet.ships.saturating_sub(1);
                body.ships += unloaded;
                fleet.ships -= unloaded;
            }
            None => {}
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use orrery_protocol::{Position, Waypoint};

    use super::*;
    use crate::state::fixtures::*;

    #[test]
    fn fleet_without_orders_stays_put() {
        let g = galaxy();
        let f = faction(&g, "a");
        let mut state = state(g.clone());
        state.fleets.push(fleet(g.id, f.id, Position::new(1.5, -2.0), 5));
        state.factions.push(f);

        let report = advance_fleets(&mut state);
        assert_eq!(state.fleets[0].position, Position::new(1.5, -2.0));
        assert_eq!(report, MovementReport::default());
    }

    #[test]
    fn fleet_within_one_step_snaps_to_the_body() {
        let g = galaxy();
        let f = faction(&g, "a");
        let target = body(g.id, 10.0, 10.0, None);
        let step = step_length(&g.settings, false);
        let start = Position::new(10.0 - step * 0.5, 10.0);

        let mut state = state(g.clone());
        state.fleets.push(heading(fleet(g.id, f.id, start, 5), &target));
        state.bodies.push(target.clone());
        state.factions.push(f);

        advance_fleets(&mut state);
        assert_eq!(state.fleets[0].position, target.position);
        assert!(state.fleets[0].waypoints.is_empty());
    }

    #[test]
    fn fleet_moves_exactly_one_step() {
        let g = galaxy();
        let f = faction(&g, "a");
        let target = body(g.id, 3.0, 4.0, None);

        let mut state = state(g.clone());
        state.fleets.push(heading(fleet(g.id, f.id, Position::ORIGIN, 5), &target));
        state.bodies.push(target);
        state.factions.push(f);

        advance_fleets(&mut state);
        let step = step_length(&state.galaxy.settings, false);
        let travelled = state.fleets[0].position.distance(Position::ORIGIN);
        assert!((travelled - step).abs() < 1e-12);
        assert_eq!(state.fleets[0].waypoints.len(), 1);
    }

    #[test]
    fn warp_gate_uses_warp_speed() {
        let g = galaxy();
        let f = faction(&g, "a");
        let mut target = body(g.id, 100.0, 0.0, None);
        target.warp_gate = true;

        let mut state = state(g.clone());
        state.fleets.push(heading(fleet(g.id, f.id, Position::ORIGIN, 5), &target));
        state.bodies.push(target);
        state.factions.push(f);

        advance_fleets(&mut state);
        let expected = g.settings.warp_speed / f64::from(g.settings.ticks_per_hour);
        assert!((state.fleets[0].position.x - expected).abs() < 1e-12);
    }

    #[test]
    fn stale_waypoint_is_dropped_without_moving() {
        let g = galaxy();
        let f = faction(&g, "a");
        let mut state = state(g.clone());
        let mut carrier = fleet(g.id, f.id, Position::new(1.0, 1.0), 5);
        carrier.waypoints.push(Waypoint::to(BodyId::new()));
        state.fleets.push(carrier);
        state.factions.push(f);

        let report = advance_fleets(&mut state);
        assert_eq!(report.stale_waypoints, 1);
        assert_eq!(state.fleets[0].position, Position::new(1.0, 1.0));
        assert!(state.fleets[0].waypoints.is_empty());
    }

    #[test]
    fn arrival_actions_apply_only_at_own_bodies() {
        let g = galaxy();
        let f = faction(&g, "a");
        let other = faction(&g, "b");
        let mut home = body(g.id, 0.0, 0.0, Some(f.id));
        home.ships = 7;
        let mut foreign = body(g.id, 0.0, 0.0, Some(other.id));
        foreign.ships = 9;
        foreign.position = Position::new(0.0, 0.01);

        let mut collector = fleet(g.id, f.id, home.position, 2);
        collector
            .waypoints
            .push(Waypoint::with_action(home.id, ArrivalAction::Collect));
        let mut raider = fleet(g.id, f.id, foreign.position, 2);
        raider
            .waypoints
            .push(Waypoint::with_action(foreign.id, ArrivalAction::Collect));

        let mut state = state(g);
        state.bodies = vec![home, foreign];
        state.fleets = vec![collector, raider];
        state.factions = vec![f, other];

        advance_fleets(&mut state);
        assert_eq!(state.fleets[0].ships, 9);
        assert_eq!(state.bodies[0].ships, 0);
        assert_eq!(state.fleets[1].ships, 2);
        assert_eq!(state.bodies[1].ships, 9);
    }

    #[test]
    fn drop_leaves_one_ship_aboard() {
        let g = galaxy();
        let f = faction(&g, "a");
        let home = body(g.id, 0.0, 0.0, Some(f.id));
        let mut carrier = fleet(g.id, f.id, home.position, 12);
        carrier
            .waypoints
            .push(Waypoint::with_action(home.id, ArrivalAction::Drop));

        let mut state = state(g);
        state.bodies.push(home);
        state.fleets.push(carrier);
        state.factions.push(f);

        advance_fleets(&mut state);
        assert_eq!(state.fleets[0].ships, 1);
        assert_eq!(state.bodies[0].ships, 11);
    }
}
