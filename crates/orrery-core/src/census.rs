use chrono::{DateTime, Utc};
use orrery_protocol::{CensusEntry, CensusPoint};

use crate::state::GalaxyState;

/// Hourly statistics for every faction in the galaxy.
pub fn take_census(state: &GalaxyState, at: DateTime<Utc>) -> CensusPoint {
    let entries = state
        .factions
        .iter()
        .map(|faction| {
            let mut entry = CensusEntry {
                faction: faction.id,
                bodies: 0,
                fleets: 0,
                ships: 0,
                economy: 0,
                industry: 0,
                science: 0,
                levels: faction.research.map(|p| p.level),
            };
            for body in state.owned_bodies(faction.id) {
                entry.bodies += 1;
                entry.ships += body.ships;
                entry.economy += body.economy;
                entry.industry += body.industry;
                entry.science += body.science;
            }
            for fleet in state.fleets.iter().filter(|f| f.owner == faction.id) {
                entry.fleets += 1;
                entry.ships += fleet.ships;
            }
            entry
        })
        .collect();

    CensusPoint {
        galaxy: state.galaxy.id,
        tick: state.galaxy.tick,
        at,
        entries,
    }
}
