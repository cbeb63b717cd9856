use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FactionId, GalaxyId, TechTable};

/// Hourly statistics for every faction of a galaxy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CensusPoint {
    pub galaxy: GalaxyId,
    pub tick: u64,
    pub at: DateTime<Utc>,
    pub entries: Vec<CensusEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CensusEntry {
    pub faction: FactionId,
    pub bodies: u32,
    pub fleets: u32,
    /// Ships on owned bodies plus ships aboard fleets.
    pub ships: u64,
    pub economy: u32,
    pub industry: u32,
    pub science: u32,
    pub levels: TechTable<u32>,
}
