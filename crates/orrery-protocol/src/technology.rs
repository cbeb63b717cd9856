use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Researchable technologies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technology {
    /// +1 scan range per level.
    Scanning,
    /// +1 hyperspace (single hop) range per level.
    Hyperspace,
    /// Cheaper body upgrades.
    Terraforming,
    Experimentation,
    /// Combat damage per round.
    Weapons,
    Banking,
    /// Ship production rate.
    Manufacturing,
}

impl Technology {
    pub const ALL: [Technology; 7] = [
        Technology::Scanning,
        Technology::Hyperspace,
        Technology::Terraforming,
        Technology::Experimentation,
        Technology::Weapons,
        Technology::Banking,
        Technology::Manufacturing,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Hyperspace => "hyperspace",
            Self::Terraforming => "terraforming",
            Self::Experimentation => "experimentation",
            Self::Weapons => "weapons",
            Self::Banking => "banking",
            Self::Manufacturing => "manufacturing",
        }
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown technology: {0}")]
pub struct UnknownTechnology(pub String);

impl FromStr for Technology {
    type Err = UnknownTechnology;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Technology::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownTechnology(s.to_string()))
    }
}

/// One value per technology, addressed by `Technology` rather than by field name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechTable<T> {
    pub scanning: T,
    pub hyperspace: T,
    pub terraforming: T,
    pub experimentation: T,
    pub weapons: T,
    pub banking: T,
    pub manufacturing: T,
}

impl<T> TechTable<T> {
    pub fn from_fn(mut f: impl FnMut(Technology) -> T) -> Self {
        Self {
            scanning: f(Technology::Scanning),
            hyperspace: f(Technology::Hyperspace),
            terraforming: f(Technology::Terraforming),
            experimentation: f(Technology::Experimentation),
            weapons: f(Technology::Weapons),
            banking: f(Technology::Banking),
            manufacturing: f(Technology::Manufacturing),
        }
    }

    pub fn get(&self, tech: Technology) -> &T {
        match tech {
            Technology::Scanning => &self.scanning,
            Technology::Hyperspace => &self.hyperspace,
            Technology::Terraforming => &self.terraforming,
            Technology::Experimentation => &self.experimentation,
            Technology::Weapons => &self.weapons,
            Technology::Banking => &self.banking,
            Technology::Manufacturing => &self.manufacturing,
        }
    }

    pub fn get_mut(&mut self, tech: Technology) -> &mut T {
        match tech {
            Technology::Scanning => &mut self.scanning,
            Technology::Hyperspace => &mut self.hyperspace,
            Technology::Terraforming => &mut self.terraforming,
            Technology::Experimentation => &mut self.experimentation,
            Technology::Weapons => &mut self.weapons,
            Technology::Banking => &mut self.banking,
            Technology::Manufacturing => &mut self.manufacturing,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> TechTable<U> {
        TechTable::from_fn(|tech| f(self.get(tech)))
    }
}

/// Research state of one technology for one faction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechProgress {
    pub level: u32,
    /// Points accumulated toward the next level.
    pub points: u64,
}

pub type ResearchTable = TechTable<TechProgress>;

/// Per-technology rules in `GalaxySettings`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechCurve {
    pub starting_level: u32,
    /// Points needed per current level: next level costs `level * cost_per_level`.
    pub cost_per_level: u64,
}

impl Default for TechCurve {
    fn default() -> Self {
        Self {
            starting_level: 1,
            cost_per_level: 144,
        }
    }
}
