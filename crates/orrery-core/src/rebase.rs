//! Three-way merges used when a tick's write loses an optimistic race.
//!
//! `before` is what the tick loaded, `self` is what the tick computed and
//! `fresh` is what the store holds now. Counters carry the tick's delta onto
//! the fresh value; fields only the tick touches come from the tick; fields
//! only players touch come from the store.

use orrery_protocol::{Body, Faction, Fleet, Galaxy, TechProgress, TechTable};

pub trait Rebase: Sized {
    fn rebase(&self, before: &Self, fresh: &Self) -> Self;
}

fn carry_u64(fresh: u64, ours: u64, before: u64) -> u64 {
    (i128::from(fresh) + i128::from(ours) - i128::from(before)).max(0) as u64
}

fn carry_u32(fresh: u32, ours: u32, before: u32) -> u32 {
    (i64::from(fresh) + i64::from(ours) - i64::from(before)).max(0) as u32
}

/// Ours if we changed it, otherwise whatever the store has.
fn pick<T: PartialEq + Clone>(fresh: &T, ours: &T, before: &T) -> T {
    if ours != before {
        ours.clone()
    } else {
        fresh.clone()
    }
}

impl Rebase for Fleet {
    fn rebase(&self, before: &Self, fresh: &Self) -> Self {
        let waypoints = if fresh.waypoints == before.waypoints {
            self.waypoints.clone()
        } else {
            // New orders from the player win, minus a head we already reached.
            let mut orders = fresh.waypoints.clone();
            let popped = before.waypoints.len() == self.waypoints.len() + 1
                && before.waypoints.get(1..) == Some(self.waypoints.as_slice());
            if popped && orders.first() == before.waypoints.first() {
                orders.remove(0);
            }
            orders
        };
        Fleet {
            position: self.position,
            ships: carry_u64(fresh.ships, self.ships, before.ships),
            waypoints,
            ..fresh.clone()
        }
    }
}

impl Rebase for Body {
    fn rebase(&self, before: &Self, fresh: &Self) -> Self {
        Body {
            owner: pick(&fresh.owner, &self.owner, &before.owner),
            ships: carry_u64(fresh.ships, self.ships, before.ships),
            ship_accum: (fresh.ship_accum + self.ship_accum - before.ship_accum).max(0.0),
            economy: carry_u32(fresh.economy, self.economy, before.economy),
            industry: carry_u32(fresh.industry, self.industry, before.industry),
            science: carry_u32(fresh.science, self.science, before.science),
            warp_gate: pick(&fresh.warp_gate, &self.warp_gate, &before.warp_gate),
            ..fresh.clone()
        }
    }
}

impl Rebase for Faction {
    fn rebase(&self, before: &Self, fresh: &Self) -> Self {
        let research = TechTable::from_fn(|tech| {
            let (f, o, b) = (fresh.research.get(tech), self.research.get(tech), before.research.get(tech));
            TechProgress {
                level: carry_u32(f.level, o.level, b.level),
                points: carry_u64(f.points, o.points, b.points),
            }
        });
        let research_queue = if fresh.research_queue == before.research_queue {
            self.research_queue.clone()
        } else {
            fresh.research_queue.clone()
        };
        Faction {
            cash: fresh.cash + (self.cash - before.cash),
            research,
            research_queue,
            ..fresh.clone()
        }
    }
}

impl Rebase for Galaxy {
    fn rebase(&self, before: &Self, fresh: &Self) -> Self {
        Galaxy {
            winner: fresh.winner.or(self.winner),
            tick: self.tick.max(fresh.tick),
            last_tick_at: self.last_tick_at.max(fresh.last_tick_at),
            last_production_at: pick(
                &fresh.last_production_at,
                &self.last_production_at,
                &before.last_production_at,
            ),
            ..fresh.clone()
        }
    }
}
