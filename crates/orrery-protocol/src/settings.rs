use serde::{Deserialize, Serialize};

use crate::{TechCurve, TechTable};

/// Ruleset of one galaxy. Fixed for the galaxy's lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalaxySettings {
    pub max_factions: u32,
    /// Star systems generated per faction, including its home system.
    pub bodies_per_faction: u32,
    /// Bodies each faction owns at start (home star plus home planets).
    pub starting_bodies: u32,
    /// Percentage of all bodies a faction must own to win.
    pub body_victory_percentage: u32,

    /// Fine-grained ticks per hour.
    pub ticks_per_hour: u32,
    /// Production cycle length in hours.
    pub production_cycle_length: u32,
    /// Fleet cruising speed, light years per hour.
    pub fleet_speed: f64,
    /// Fleet speed toward a body with a warp gate, light years per hour.
    pub warp_speed: f64,

    pub starting_cash: f64,
    /// Ships placed on every starting body.
    pub starting_ships: u32,
    pub starting_economy: u32,
    pub starting_industry: u32,
    pub starting_science: u32,

    pub technologies: TechTable<TechCurve>,

    pub geometry: GeometrySettings,

    /// Fleets within this distance of a body take part in its combat.
    pub engagement_radius: f64,
    pub scan_base: u32,
    pub hyperspace_base: u32,
    pub min_resources: u32,
    pub max_resources: u32,
}

impl Default for GalaxySettings {
    fn default() -> Self {
        Self {
            max_factions: 8,
            bodies_per_faction: 24,
            starting_bodies: 6,
            body_victory_percentage: 51,
            ticks_per_hour: 60,
            production_cycle_length: 24,
            fleet_speed: 1.0 / 3.0,
            warp_speed: 3.0,
            starting_cash: 500.0,
            starting_ships: 10,
            starting_economy: 5,
            starting_industry: 5,
            starting_science: 1,
            technologies: TechTable::default(),
            geometry: GeometrySettings::default(),
            engagement_radius: 0.05,
            scan_base: 2,
            hyperspace_base: 3,
            min_resources: 10,
            max_resources: 50,
        }
    }
}

impl GalaxySettings {
    /// Hours represented by a single fine-grained tick.
    pub fn tick_hours(&self) -> f64 {
        1.0 / f64::from(self.ticks_per_hour.max(1))
    }
}

/// Constants for procedural placement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometrySettings {
    /// Galaxy disc radius is this times the square root of the system count.
    pub radius_per_system: f64,
    /// Fixed system radius of faction home systems.
    pub starting_system_radius: f64,
    /// Smallest system radius accepted while sampling.
    pub min_system_radius: f64,
    /// Extra clearance between neighbouring systems.
    pub separation_margin: f64,
    /// Orbital spacing between consecutive planets of a system.
    pub planet_spacing: f64,
    pub max_planets_per_system: u32,
    pub max_iterations: u32,
    /// Share of proposals that grow outward from an accepted system.
    pub cluster_bias: f64,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            radius_per_system: 2.0,
            starting_system_radius: 2.5,
            min_system_radius: 0.5,
            separation_margin: 0.5,
            planet_spacing: 0.4,
            max_planets_per_system: 6,
            max_iterations: 10_000,
            cluster_bias: 0.3,
        }
    }
}
