//! Procedural placement of star systems.
//!
//! Each faction gets a home anchor on a circle at the edge of the galaxy
//! disc. The remaining systems are found by bounded rejection sampling and
//! then sized by their nearest neighbour, so that every pair of systems
//! (anchors included) satisfies
//! `distance >= radius_a + radius_b + separation_margin`.

use orrery_protocol::{GeometrySettings, Position};
use thiserror::Error;
use tracing::debug;

use crate::rng::GameRng;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("cannot lay out a galaxy without factions")]
    NoFactions,
    #[error("home systems overlap: spacing {spacing:.2} is below the required {required:.2}")]
    AnchorsOverlap { spacing: f64, required: f64 },
    #[error("placed {placed} of {wanted} systems before giving up after {iterations} iterations")]
    PlacementExhausted {
        placed: usize,
        wanted: usize,
        iterations: u32,
    },
}

/// One placed star system.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub position: Position,
    pub system_radius: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Layout {
    pub galaxy_radius: f64,
    /// One home system per faction, in faction order.
    pub anchors: Vec<Placement>,
    pub systems: Vec<Placement>,
}

impl Layout {
    /// Every system, anchors first.
    pub fn all(&self) -> impl Iterator<Item = &Placement> {
        self.anchors.iter().chain(self.systems.iter())
    }
}

pub fn generate_layout(
    factions: usize,
    systems_per_faction: usize,
    geometry: &GeometrySettings,
    rng: &mut GameRng,
) -> Result<Layout, GenerationError> {
    if factions == 0 {
        return Err(GenerationError::NoFactions);
    }

    let total = factions * systems_per_faction.max(1);
    let wanted = total - factions;
    let galaxy_radius = geometry.radius_per_system * (total as f64).sqrt();
    let home = geometry.starting_system_radius;
    let margin = geometry.separation_margin;
    let min_radius = geometry.min_system_radius;

    let anchors = place_anchors(factions, galaxy_radius, home);
    if factions > 1 {
        let spacing = anchors[0].position.distance(anchors[1].position);
        let required = 2.0 * home + margin;
        if spacing < required {
            return Err(GenerationError::AnchorsOverlap { spacing, required });
        }
    }

    let mut accepted: Vec<Position> = Vec::with_capacity(wanted);
    let mut iterations = 0;
    while accepted.len() < wanted {
        if iterations >= geometry.max_iterations {
            return Err(GenerationError::PlacementExhausted {
                placed: accepted.len(),
                wanted,
                iterations,
            });
        }
        iterations += 1;

        let candidate = propose(&anchors, &accepted, galaxy_radius, geometry, rng);
        if candidate.length() > galaxy_radius {
            continue;
        }
        let clear_of_anchors = anchors
            .iter()
            .all(|a| a.position.distance(candidate) >= home + min_radius + margin);
        let clear_of_systems = accepted
            .iter()
            .all(|p| p.distance(candidate) >= 2.0 * min_radius + margin);
        if clear_of_anchors && clear_of_systems {
            accepted.push(candidate);
        }
    }
    debug!(
        systems = accepted.len(),
        iterations, galaxy_radius, "placed star systems"
    );

    let systems = accepted
        .iter()
        .enumerate()
        .map(|(i, &position)| Placement {
            position,
            system_radius: nearest_neighbour_radius(i, &accepted, &anchors, margin, min_radius),
        })
        .collect();

    Ok(Layout {
        galaxy_radius,
        anchors,
        systems,
    })
}

fn place_anchors(factions: usize, galaxy_radius: f64, home: f64) -> Vec<Placement> {
    (0..factions)
        .map(|i| {
            let theta = i as f64 * std::f64::consts::TAU / factions as f64;
            Placement {
                position: Position::polar(galaxy_radius, theta),
                system_radius: home,
            }
        })
        .collect()
}

/// Uniform point in the disc, or a step outward from an existing system.
fn propose(
    anchors: &[Placement],
    accepted: &[Position],
    galaxy_radius: f64,
    geometry: &GeometrySettings,
    rng: &mut GameRng,
) -> Position {
    let grow = !accepted.is_empty() && rng.next_f64() < geometry.cluster_bias;
    if grow {
        let pick = rng.index(anchors.len() + accepted.len());
        let (origin, origin_radius) = match pick.checked_sub(anchors.len()) {
            Some(i) => (accepted[i], geometry.min_system_radius),
            None => (anchors[pick].position, anchors[pick].system_radius),
        };
        let reach = origin_radius + geometry.min_system_radius + geometry.separation_margin;
        let distance = rng.range_f64(reach, 2.0 * reach);
        return origin.offset(distance, rng.angle());
    }
    // sqrt keeps the density uniform over the disc area
    let r = galaxy_radius * rng.next_f64().sqrt();
    Position::polar(r, rng.angle())
}

fn nearest_neighbour_radius(
    index: usize,
    systems: &[Position],
    anchors: &[Placement],
    margin: f64,
    floor: f64,
) -> f64 {
    let me = systems[index];
    let from_systems = systems
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != index)
        .map(|(_, p)| (p.distance(me) - margin) / 2.0);
    let from_anchors = anchors
        .iter()
        .map(|a| a.position.distance(me) - margin - a.system_radius);
    from_systems
        .chain(from_anchors)
        .fold(f64::INFINITY, f64::min)
        .max(floor)
}
