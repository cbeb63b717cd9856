use serde::{Deserialize, Serialize};

use crate::{
    AccountId, BodyId, BodyKind, FactionId, FleetId, GalaxyId, Orbit, Position, ResearchTable,
    Technology, TechTable, Waypoint,
};

/// What one faction is allowed to see of its galaxy at one moment.
///
/// Derived on demand, never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisibilitySnapshot {
    pub galaxy: GalaxyId,
    pub tick: u64,
    pub observer: FactionId,
    pub scan_range: f64,
    pub factions: Vec<FactionView>,
    pub bodies: Vec<BodyView>,
    pub fleets: Vec<FleetView>,
    #[serde(default)]
    pub winner: Option<FactionId>,
}

impl VisibilitySnapshot {
    pub fn body(&self, id: BodyId) -> Option<&BodyView> {
        self.bodies.iter().find(|b| b.id == id)
    }

    pub fn fleet(&self, id: FleetId) -> Option<&FleetView> {
        self.fleets.iter().find(|f| f.id == id)
    }

    pub fn faction(&self, id: FactionId) -> Option<&FactionView> {
        self.factions.iter().find(|f| f.id == id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactionView {
    pub id: FactionId,
    pub name: String,
    pub account: AccountId,
    pub color: String,
    /// Public technology levels.
    pub levels: TechTable<u32>,
    /// Only present on the observer's own entry.
    #[serde(default, skip_serializing_if = "Option::is_none", flatten)]
    pub private: Option<FactionPrivate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactionPrivate {
    /// Truncated to whole credits.
    pub cash: i64,
    pub research_queue: Vec<Technology>,
    pub research: ResearchTable,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodyView {
    pub id: BodyId,
    pub name: String,
    pub kind: BodyKind,
    pub position: Position,
    #[serde(default)]
    pub orbit: Option<Orbit>,
    #[serde(default)]
    pub owner: Option<FactionId>,
    /// Present only when the body is scanned.
    #[serde(default, skip_serializing_if = "Option::is_none", flatten)]
    pub detail: Option<BodyDetail>,
}

impl BodyView {
    pub fn is_scanned(&self) -> bool {
        self.detail.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodyDetail {
    pub ships: u64,
    pub ship_accum: f64,
    pub economy: u32,
    pub industry: u32,
    pub science: u32,
    pub resources: u32,
    pub warp_gate: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FleetView {
    pub id: FleetId,
    pub owner: FactionId,
    pub name: String,
    pub position: Position,
    pub ships: u64,
    /// Orders are only shown to the fleet's owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waypoints: Option<Vec<Waypoint>>,
}
