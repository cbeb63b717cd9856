use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    AccountId, BodyId, FactionId, FleetId, GalaxyId, GalaxySettings, Position, ResearchTable,
    Technology,
};

/// Longest research queue a faction may hold.
pub const MAX_RESEARCH_QUEUE: usize = 5;

/// One running game instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Galaxy {
    pub id: GalaxyId,
    pub name: String,
    pub owner: AccountId,
    pub members: Vec<FactionId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub winner: Option<FactionId>,
    /// Join secret. Never leaves the server.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    pub settings: GalaxySettings,
    /// Wall-clock minute of the last claimed tick.
    #[serde(default)]
    pub last_tick_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_production_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tick: u64,
}

impl Galaxy {
    pub fn new(name: impl Into<String>, owner: AccountId, settings: GalaxySettings) -> Self {
        Self {
            id: GalaxyId::new(),
            name: name.into(),
            owner,
            members: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            winner: None,
            secret: None,
            settings,
            last_tick_at: None,
            last_production_at: None,
            tick: 0,
        }
    }

    /// Started and not yet won.
    pub fn is_active(&self) -> bool {
        self.started_at.is_some() && self.winner.is_none()
    }
}

/// A player's civilization inside one galaxy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub id: FactionId,
    pub galaxy: GalaxyId,
    pub name: String,
    pub account: AccountId,
    pub color: String,
    #[serde(serialize_with = "truncate_cash")]
    pub cash: f64,
    pub research_queue: Vec<Technology>,
    pub research: ResearchTable,
}

impl Faction {
    pub fn level(&self, tech: Technology) -> u32 {
        self.research.get(tech).level
    }
}

fn truncate_cash<S: Serializer>(cash: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(cash.trunc())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    Star,
    Planet,
}

/// Placement of a planet around its parent star.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Orbit {
    pub parent: BodyId,
    pub radius: f64,
    /// Phase angle in radians.
    pub phase: f64,
}

/// A star or planet: a stationary, ownable production node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub id: BodyId,
    pub galaxy: GalaxyId,
    pub name: String,
    pub kind: BodyKind,
    pub position: Position,
    #[serde(default)]
    pub orbit: Option<Orbit>,
    #[serde(default)]
    pub owner: Option<FactionId>,
    pub ships: u64,
    /// Fractional ship production carried between ticks.
    pub ship_accum: f64,
    pub economy: u32,
    pub industry: u32,
    pub science: u32,
    pub resources: u32,
    pub warp_gate: bool,
}

impl Body {
    pub fn is_owned_by(&self, faction: FactionId) -> bool {
        self.owner == Some(faction)
    }
}

/// What a fleet does on reaching a waypoint it still owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalAction {
    /// Load every ship from the body.
    Collect,
    /// Unload all but one ship onto the body.
    Drop,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub body: BodyId,
    #[serde(default)]
    pub action: Option<ArrivalAction>,
}

impl Waypoint {
    pub fn to(body: BodyId) -> Self {
        Self { body, action: None }
    }

    pub fn with_action(body: BodyId, action: ArrivalAction) -> Self {
        Self {
            body,
            action: Some(action),
        }
    }
}

/// A mobile carrier transporting ships between bodies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fleet {
    pub id: FleetId,
    pub galaxy: GalaxyId,
    pub owner: FactionId,
    pub name: String,
    pub position: Position,
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,
    pub ships: u64,
}

/// A stored record and the version it was read at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }
}
