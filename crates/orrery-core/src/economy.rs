use std::collections::HashMap;

use orrery_protocol::{FactionId, ProductionAward, ProductionEvent, Technology};

use crate::state::GalaxyState;

/// Cash a faction earns per hour for each point of economy.
const INCOME_DIVISOR: f64 = 0.25;
/// Cash a production cycle pays for each point of economy.
const PRODUCTION_MULTIPLIER: f64 = 10.0;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EconomyReport {
    pub cash: f64,
    pub ships_built: u64,
}

fn economy_by_faction(state: &GalaxyState) -> HashMap<FactionId, u32> {
    let mut totals = HashMap::new();
    for body in &state.bodies {
        if let Some(owner) = body.owner {
            *totals.entry(owner).or_default() += body.economy;
        }
    }
    totals
}

/// Fine-tick income: cash from economy and ships from industry.
pub fn accrue_economy(state: &mut GalaxyState) -> EconomyReport {
    let settings = &state.galaxy.settings;
    let per_tick = f64::from(settings.ticks_per_hour.max(1));
    let cycle = f64::from(settings.production_cycle_length.max(1));
    let mut report = EconomyReport::default();

    let economy = economy_by_faction(state);
    for faction in &mut state.factions {
        let total = economy.get(&faction.id).copied().unwrap_or(0);
        let income = f64::from(total) / INCOME_DIVISOR / per_tick;
        faction.cash += income;
        report.cash += income;
    }

    let manufacturing: HashMap<FactionId, u32> = state
        .factions
        .iter()
        .map(|f| (f.id, f.level(Technology::Manufacturing)))
        .collect();
    for body in &mut state.bodies {
        let Some(owner) = body.owner else {
            continue;
        };
        let level = manufacturing.get(&owner).copied().unwrap_or(0);
        body.ship_accum +=
            f64::from(body.industry) * f64::from(level + 5) / cycle / per_tick;
        let whole = body.ship_accum.floor();
        if whole >= 1.0 {
            body.ships += whole as u64;
            body.ship_accum -= whole;
            report.ships_built += whole as u64;
        }
    }

    report
}

/// Once-per-cycle payout of `economy * 10` to every faction.
pub fn production_cycle(state: &mut GalaxyState) -> ProductionEvent {
    let economy = economy_by_faction(state);
    let mut awards = Vec::with_capacity(state.factions.len());
    for faction in &mut state.factions {
        let total = economy.get(&faction.id).copied().unwrap_or(0);
        let cash = f64::from(total) * PRODUCTION_MULTIPLIER;
        faction.cash += cash;
        awards.push(ProductionAward {
            faction: faction.id,
            cash,
        });
    }
    ProductionEvent {
        total_cash: awards.iter().map(|a| a.cash).sum(),
        awards,
    }
}
