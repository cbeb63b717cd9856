use std::collections::HashMap;

use orrery_protocol::{
    FactionId, GalaxySettings, ResearchTable, TechProgress, Technology, MAX_RESEARCH_QUEUE,
};
use tracing::debug;

use crate::state::GalaxyState;

/// Technology researched when a queue is empty.
pub const DEFAULT_RESEARCH: Technology = Technology::Hyperspace;

/// Research table of a faction that has just joined or been reset.
pub fn initial_research(settings: &GalaxySettings) -> ResearchTable {
    ResearchTable::from_fn(|tech| TechProgress {
        level: settings.technologies.get(tech).starting_level,
        points: 0,
    })
}

/// Points needed to take `tech` from its current level to the next.
pub fn level_cost(settings: &GalaxySettings, tech: Technology, level: u32) -> u64 {
    u64::from(level) * settings.technologies.get(tech).cost_per_level
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResearchReport {
    pub completed: Vec<(FactionId, Technology, u32)>,
}

/// Coarse-tick research: each faction's science goes to the head of its queue.
pub fn accrue_research(state: &mut GalaxyState) -> ResearchReport {
    let mut science: HashMap<FactionId, u64> = HashMap::new();
    for body in &state.bodies {
        if let Some(owner) = body.owner {
            *science.entry(owner).or_default() += u64::from(body.science);
        }
    }

    let settings = &state.galaxy.settings;
    let mut report = ResearchReport::default();
    for faction in &mut state.factions {
        if faction.research_queue.is_empty() {
            faction.research_queue.push(DEFAULT_RESEARCH);
        }
        faction.research_queue.truncate(MAX_RESEARCH_QUEUE);
        let tech = faction.research_queue[0];

        let progress = faction.research.get_mut(tech);
        progress.points += science.get(&faction.id).copied().unwrap_or(0);
        let cost = level_cost(settings, tech, progress.level);
        if progress.points < cost {
            continue;
        }
        progress.points -= cost;
        progress.level += 1;
        let level = progress.level;
        if faction.research_queue.len() > 1 {
            faction.research_queue.remove(0);
        }
        debug!(faction = %faction.id, %tech, level, "research completed");
        report.completed.push((faction.id, tech, level));
    }
    report
}
