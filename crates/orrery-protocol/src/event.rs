use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BodyId, FactionId, GalaxyId};

/// Records produced by the simulation for the news/audit collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GalaxyEvent {
    Combat(CombatEvent),
    Production(ProductionEvent),
    Statement(StatementEvent),
}

impl GalaxyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Combat(_) => "combat",
            Self::Production(_) => "production",
            Self::Statement(_) => "statement",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombatEvent {
    pub body: BodyId,
    /// Owner of the body when combat started, if any.
    pub defender: Option<FactionId>,
    /// Attacking factions in arrival order.
    pub attackers: Vec<FactionId>,
    pub attacker_ships: u64,
    pub defender_ships: u64,
    pub attacker_losses: u64,
    pub defender_losses: u64,
    pub winner: Option<FactionId>,
    pub attacker_won: bool,
    pub rounds: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionEvent {
    pub total_cash: f64,
    pub awards: Vec<ProductionAward>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionAward {
    pub faction: FactionId,
    pub cash: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatementEvent {
    pub faction: FactionId,
    pub text: String,
}

/// An event stamped with where and when it happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub galaxy: GalaxyId,
    pub tick: u64,
    pub at: DateTime<Utc>,
    pub event: GalaxyEvent,
}

impl EventEnvelope {
    pub fn new(galaxy: GalaxyId, tick: u64, at: DateTime<Utc>, event: GalaxyEvent) -> Self {
        Self {
            galaxy,
            tick,
            at,
            event,
        }
    }
}
