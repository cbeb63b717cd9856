//! Attrition combat at bodies.
//!
//! Resolution has no randomness: the same ship counts and weapon levels
//! always produce the same rounds, losses and winner.

use std::collections::VecDeque;

use orrery_protocol::{CombatEvent, FactionId, Technology};
use tracing::debug;

use crate::state::GalaxyState;

/// Inputs of one clash, reduced to numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Clash {
    pub attacking_ships: u64,
    pub defending_ships: u64,
    pub attacking_weapons: u32,
    pub defending_weapons: u32,
    /// Owned bodies fire back even with no ships present.
    pub body_owned: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attrition {
    pub attacker_won: bool,
    pub attacker_losses: u64,
    pub defender_losses: u64,
    pub rounds: u64,
}

/// Run attrition rounds until one side is wiped out.
///
/// Attackers take fire first in each round, so a round that empties both
/// sides is a defender victory. The loop is bounded by the larger side's ship
/// count: every round either removes at least one attacker or ends the fight.
pub fn resolve_attrition(clash: Clash) -> Attrition {
    let mut attackers = clash.attacking_ships;
    let mut defenders = clash.defending_ships;
    let bound = attackers.max(defenders).max(1);
    let mut attacker_won = false;
    let mut rounds = 0;

    while rounds < bound {
        rounds += 1;
        if defenders > 0 || clash.body_owned {
            attackers = attackers.saturating_sub(u64::from(clash.defending_weapons) + 1);
        }
        if attackers == 0 {
            break;
        }
        defenders = defenders.saturating_sub(u64::from(clash.attacking_weapons));
        if defenders == 0 {
            attacker_won = true;
            break;
        }
    }

    Attrition {
        attacker_won,
        attacker_losses: clash.attacking_ships - attackers,
        defender_losses: clash.defending_ships - defenders,
        rounds,
    }
}

/// Spread `losses` one ship at a time over `units`, cycling through the
/// units that still have ships. Returns what could not be allocated.
pub fn spread_losses(units: &mut [u64], mut losses: u64) -> u64 {
    let mut queue: VecDeque<usize> = (0..units.len()).filter(|&i| units[i] > 0).collect();
    while losses > 0 {
        let Some(i) = queue.pop_front() else {
            break;
        };
        units[i] -= 1;
        losses -= 1;
        if units[i] > 0 {
            queue.push_back(i);
        }
    }
    losses
}

/// Resolve every clash in the galaxy after movement.
pub fn resolve_combat(state: &mut GalaxyState) -> Vec<CombatEvent> {
    let radius = state.galaxy.settings.engagement_radius;
    let mut events = Vec::new();

    for b in 0..state.bodies.len() {
        let body = &state.bodies[b];
        let owner = body.owner;
        let present: Vec<usize> = state
            .fleets
            .iter()
            .enumerate()
            .filter(|(_, f)| f.ships > 0 && f.position.distance(body.position) <= radius)
            .map(|(i, _)| i)
            .collect();
        let (defending, attacking): (Vec<usize>, Vec<usize>) = present
            .into_iter()
            .partition(|&i| Some(state.fleets[i].owner) == owner);
        if attacking.is_empty() {
            continue;
        }

        let mut attackers: Vec<FactionId> = Vec::new();
        for &i in &attacking {
            let faction = state.fleets[i].owner;
            if !attackers.contains(&faction) {
                attackers.push(faction);
            }
        }

        let clash = Clash {
            attacking_ships: attacking.iter().map(|&i| state.fleets[i].ships).sum(),
            defending_ships: body.ships
                + defending.iter().map(|&i| state.fleets[i].ships).sum::<u64>(),
            attacking_weapons: attackers
                .iter()
                .map(|&f| state.level(Some(f), Technology::Weapons))
                .max()
                .unwrap_or(0),
            defending_weapons: state.level(owner, Technology::Weapons),
            body_owned: owner.is_some(),
        };
        let outcome = resolve_attrition(clash);

        let winner = if outcome.attacker_won {
            apply_attacker_victory(state, b, &attacking, &defending, &attackers, outcome)
        } else {
            apply_defender_victory(state, b, &attacking, &defending, outcome);
            owner
        };

        debug!(
            body = %state.bodies[b].id,
            attackers = clash.attacking_ships,
            defenders = clash.defending_ships,
            attacker_won = outcome.attacker_won,
            rounds = outcome.rounds,
            "combat resolved"
        );
        events.push(CombatEvent {
            body: state.bodies[b].id,
            defender: owner,
            attackers,
            attacker_ships: clash.attacking_ships,
            defender_ships: clash.defending_ships,
            attacker_losses: outcome.attacker_losses,
            defender_losses: outcome.defender_losses,
            winner,
            attacker_won: outcome.attacker_won,
            rounds: outcome.rounds,
        });
    }

    state.prune_empty_fleets();
    events
}

fn apply_attacker_victory(
    state: &mut GalaxyState,
    body: usize,
    attacking: &[usize],
    defending: &[usize],
    attackers: &[FactionId],
    outcome: Attrition,
) -> Option<FactionId> {
    let mut ships: Vec<u64> = attacking.iter().map(|&i| state.fleets[i].ships).collect();
    spread_losses(&mut ships, outcome.attacker_losses);
    for (&i, &left) in attacking.iter().zip(&ships) {
        state.fleets[i].ships = left;
    }
    for &i in defending {
        state.fleets[i].ships = 0;
    }

    // Most surviving ships wins; ties go to whoever arrived first.
    let mut winner = None;
    let mut best = 0;
    for &faction in attackers {
        let survivors: u64 = attacking
            .iter()
            .filter(|&&i| state.fleets[i].owner == faction)
            .map(|&i| state.fleets[i].ships)
            .sum();
        if winner.is_none() || survivors > best {
            winner = Some(faction);
            best = survivors;
        }
    }

    let captured = &mut state.bodies[body];
    captured.owner = winner;
    captured.ships = 0;
    captured.ship_accum = 0.0;
    let plunder = f64::from(captured.economy) * 10.0;
    captured.economy = 0;
    if plunder > 0.0 {
        if let Some(faction) = winner.and_then(|w| state.faction_mut(w)) {
            faction.cash += plunder;
        }
    }
    winner
}

fn apply_defender_victory(
    state: &mut GalaxyState,
    body: usize,
    attacking: &[usize],
    defending: &[usize],
    outcome: Attrition,
) {
    let mut ships: Vec<u64> = defending.iter().map(|&i| state.fleets[i].ships).collect();
    let remaining = spread_losses(&mut ships, outcome.defender_losses);
    for (&i, &left) in defending.iter().zip(&ships) {
        state.fleets[i].ships = left;
    }
    let garrison = &mut state.bodies[body];
    garrison.ships = garrison.ships.saturating_sub(remaining);

    for &i in attacking {
        state.fleets[i].ships = 0;
    }
}

#[cfg(test)]
mod tests {
    use orrery_protocol::{Position, TechProgress};

    use super::*;
    use crate::state::fixtures::*;

    fn with_weapons(state: &mut GalaxyState, faction: FactionId, level: u32) {
        if let Some(f) = state.faction_mut(faction) {
            *f.research.get_mut(Technology::Weapons) = TechProgress { level, points: 0 };
        }
    }

    #[test]
    fn fifty_against_forty_with_weapons_two() {
        let outcome = resolve_attrition(Clash {
            attacking_ships: 50,
            defending_ships: 40,
            attacking_weapons: 2,
            defending_weapons: 0,
            body_owned: true,
        });
        assert!(outcome.attacker_won);
        assert_eq!(outcome.rounds, 20);
        assert_eq!(outcome.attacker_losses, 20);
        assert_eq!(outcome.defender_losses, 40);
    }

    #[test]
    fn simultaneous_wipeout_goes_to_the_defender() {
        let outcome = resolve_attrition(Clash {
            attacking_ships: 1,
            defending_ships: 1,
            attacking_weapons: 1,
            defending_weapons: 0,
            body_owned: true,
        });
        assert!(!outcome.attacker_won);
        assert_eq!(outcome.attacker_losses, 1);
        assert_eq!(outcome.defender_losses, 0);
    }

    #[test]
    fn zero_weapons_never_loops_forever() {
        let outcome = resolve_attrition(Clash {
            attacking_ships: 10,
            defending_ships: 10,
            attacking_weapons: 0,
            defending_weapons: 0,
            body_owned: false,
        });
        assert!(!outcome.attacker_won);
        assert_eq!(outcome.rounds, 10);
    }

    #[test]
    fn empty_unowned_body_falls_in_one_round() {
        let outcome = resolve_attrition(Clash {
            attacking_ships: 3,
            defending_ships: 0,
            attacking_weapons: 0,
            defending_weapons: 0,
            body_owned: false,
        });
        assert!(outcome.attacker_won);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.attacker_losses, 0);
    }

    #[test]
    fn resolution_is_deterministic() {
        let clash = Clash {
            attacking_ships: 77,
            defending_ships: 64,
            attacking_weapons: 3,
            defending_weapons: 2,
            body_owned: true,
        };
        assert_eq!(resolve_attrition(clash), resolve_attrition(clash));
    }

    #[test]
    fn losses_spread_evenly_and_skip_empty_units() {
        let mut units = vec![3, 0, 1, 5];
        let left = spread_losses(&mut units, 6);
        assert_eq!(left, 0);
        assert_eq!(units, vec![0, 0, 0, 3]);

        let mut units = vec![1, 1];
        assert_eq!(spread_losses(&mut units, 5), 3);
        assert_eq!(units, vec![0, 0]);
    }

    #[test]
    fn attacker_captures_and_pillages() {
        let g = galaxy();
        let attacker = faction(&g, "red");
        let defender = faction(&g, "blue");
        let mut target = body(g.id, 5.0, 5.0, Some(defender.id));
        target.ships = 30;
        target.economy = 4;
        target.ship_accum = 0.7;
        let at = target.position;

        let mut state = state(g.clone());
        state.fleets = vec![
            fleet(g.id, attacker.id, at, 30),
            fleet(g.id, attacker.id, at, 20),
            fleet(g.id, defender.id, at, 10),
        ];
        state.bodies.push(target);
        state.factions = vec![attacker.clone(), defender.clone()];
        with_weapons(&mut state, attacker.id, 2);
        with_weapons(&mut state, defender.id, 0);

        let before: u64 = state.fleets.iter().map(|f| f.ships).sum::<u64>() + 30;
        let events = resolve_combat(&mut state);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!(event.attacker_won);
        assert_eq!(event.winner, Some(attacker.id));
        assert_eq!(event.attacker_ships, 50);
        assert_eq!(event.defender_ships, 40);

        let body = &state.bodies[0];
        assert_eq!(body.owner, Some(attacker.id));
        assert_eq!((body.ships, body.economy, body.ship_accum), (0, 0, 0.0));
        assert_eq!(state.faction(attacker.id).unwrap().cash, 40.0);

        let after: u64 = state.fleets.iter().map(|f| f.ships).sum::<u64>() + body.ships;
        assert_eq!(before - after, event.attacker_losses + event.defender_losses);
        assert_eq!(state.fleets.len(), 2);
        assert!(state.fleets.iter().all(|f| f.owner == attacker.id));
        assert_eq!(state.fleets.iter().map(|f| f.ships).sum::<u64>(), 30);
    }

    #[test]
    fn defender_holds_and_attackers_are_removed() {
        let g = galaxy();
        let attacker = faction(&g, "red");
        let defender = faction(&g, "blue");
        let mut target = body(g.id, 0.0, 0.0, Some(defender.id));
        target.ships = 4;
        let at = Position::new(0.01, 0.0);

        let mut state = state(g.clone());
        state.fleets = vec![
            fleet(g.id, defender.id, at, 3),
            fleet(g.id, attacker.id, at, 5),
        ];
        state.bodies.push(target);
        state.factions = vec![attacker.clone(), defender.clone()];
        with_weapons(&mut state, attacker.id, 1);
        with_weapons(&mut state, defender.id, 1);

        let events = resolve_combat(&mut state);
        let event = &events[0];
        // 5 attackers lose 2 per round: rounds 1..3, defenders lose 1 per round twice.
        assert!(!event.attacker_won);
        assert_eq!(event.winner, Some(defender.id));
        assert_eq!(event.defender_losses, 2);
        assert_eq!(event.attacker_losses, 5);

        assert_eq!(state.fleets.len(), 1);
        assert_eq!(state.fleets[0].owner, defender.id);
        // Fleet absorbs losses before the garrison.
        assert_eq!(state.fleets[0].ships, 1);
        assert_eq!(state.bodies[0].ships, 4);
        assert_eq!(state.bodies[0].owner, Some(defender.id));
    }

    #[test]
    fn garrison_absorbs_what_the_defending_fleets_cannot() {
        let g = galaxy();
        let attacker = faction(&g, "red");
        let defender = faction(&g, "blue");
        let mut target = body(g.id, 0.0, 0.0, Some(defender.id));
        target.ships = 10;

        let mut state = state(g.clone());
        state.fleets = vec![
            fleet(g.id, defender.id, Position::ORIGIN, 2),
            fleet(g.id, attacker.id, Position::ORIGIN, 9),
        ];
        state.bodies.push(target);
        state.factions = vec![attacker.clone(), defender.clone()];
        with_weapons(&mut state, attacker.id, 2);
        with_weapons(&mut state, defender.id, 1);

        let events = resolve_combat(&mut state);
        let event = &events[0];
        // 9 attackers lose 2 per round and are gone in round 5; 12 defenders lose 2 in each of the first 4.
        assert!(!event.attacker_won);
        assert_eq!(event.defender_ships, 12);
        assert_eq!(event.defender_losses, 8);
        assert_eq!(event.attacker_losses, 9);

        // The fleet's 2 ships go first, the other 6 come off the body.
        assert!(state.fleets.is_empty());
        assert_eq!(state.bodies[0].ships, 4);
        assert_eq!(state.bodies[0].owner, Some(defender.id));
        assert_eq!(21 - state.bodies[0].ships, event.attacker_losses + event.defender_losses);
    }

    #[test]
    fn strongest_attacking_faction_takes_the_body() {
        let g = galaxy();
        let red = faction(&g, "red");
        let green = faction(&g, "green");
        let target = body(g.id, 0.0, 0.0, None);

        let mut state = state(g.clone());
        state.fleets = vec![
            fleet(g.id, red.id, Position::ORIGIN, 2),
            fleet(g.id, green.id, Position::ORIGIN, 6),
        ];
        state.bodies.push(target);
        state.factions = vec![red, green.clone()];

        let events = resolve_combat(&mut state);
        assert_eq!(events[0].winner, Some(green.id));
        assert_eq!(state.bodies[0].owner, Some(green.id));
    }

    #[test]
    fn fleets_out_of_range_do_not_fight() {
        let g = galaxy();
        let red = faction(&g, "red");
        let blue = faction(&g, "blue");
        let target = body(g.id, 0.0, 0.0, Some(blue.id));

        let mut state = state(g.clone());
        state.fleets = vec![fleet(g.id, red.id, Position::new(1.0, 0.0), 9)];
        state.bodies.push(target);
        state.factions = vec![red, blue];

        assert!(resolve_combat(&mut state).is_empty());
        assert_eq!(state.fleets[0].ships, 9);
    }
}
