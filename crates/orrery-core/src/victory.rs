use std::collections::HashMap;

use orrery_protocol::FactionId;
use tracing::info;

use crate::state::GalaxyState;

/// Faction owning at least the configured share of all bodies, if any.
/// When several qualify the largest holding wins.
pub fn leading_faction(state: &GalaxyState) -> Option<FactionId> {
    let total = state.bodies.len() as u64;
    if total == 0 {
        return None;
    }
    let threshold = u64::from(state.galaxy.settings.body_victory_percentage);

    let mut counts: HashMap<FactionId, u64> = HashMap::new();
    for owner in state.bodies.iter().filter_map(|b| b.owner) {
        *counts.entry(owner).or_default() += 1;
    }
    state
        .factions
        .iter()
        .filter_map(|f| counts.get(&f.id).map(|&n| (f.id, n)))
        .filter(|&(_, n)| n * 100 >= threshold * total)
        .max_by_key(|&(_, n)| n)
        .map(|(id, _)| id)
}

/// Record a winner on the galaxy if one has emerged. Returns the new winner.
pub fn check_victory(state: &mut GalaxyState) -> Option<FactionId> {
    if state.galaxy.winner.is_some() {
        return None;
    }
    let winner = leading_faction(state)?;
    state.galaxy.winner = Some(winner);
    info!(galaxy = %state.galaxy.id, %winner, "galaxy won");
    Some(winner)
}
