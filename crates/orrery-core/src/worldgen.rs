//! Turns a placement layout into the initial set of bodies.

use orrery_protocol::{Body, BodyId, BodyKind, FactionId, GalaxyId, GalaxySettings, Orbit};
use tracing::info;

use crate::geometry::{generate_layout, GenerationError, Placement};
use crate::rng::GameRng;

const PREFIXES: &[&str] = &[
    "Ach", "Bel", "Cor", "Dra", "Eos", "Fal", "Gal", "Hel", "Ish", "Kal", "Lyr", "Mir", "Nox",
    "Ori", "Pol", "Qua", "Rha", "Sol", "Tau", "Ula", "Veg", "Xan", "Zet",
];
const SUFFIXES: &[&str] = &[
    "ara", "eon", "ion", "is", "ix", "on", "or", "os", "ua", "us", "yx", "ene", "ath", "ulon",
];
const NUMERALS: &[&str] = &["I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X"];

/// Generate the full body set for a galaxy. `factions` are the home system
/// owners in anchor order.
pub fn generate_bodies(
    galaxy: GalaxyId,
    factions: &[FactionId],
    settings: &GalaxySettings,
    seed: u64,
) -> Result<Vec<Body>, GenerationError> {
    let mut rng = GameRng::seed_from_u64(seed);
    let layout = generate_layout(
        factions.len(),
        settings.bodies_per_faction as usize,
        &settings.geometry,
        &mut rng,
    )?;

    let mut bodies = Vec::new();
    for (anchor, &faction) in layout.anchors.iter().zip(factions) {
        materialise_system(galaxy, anchor, Some(faction), settings, &mut rng, &mut bodies);
    }
    for system in &layout.systems {
        materialise_system(galaxy, system, None, settings, &mut rng, &mut bodies);
    }

    info!(
        %galaxy,
        factions = factions.len(),
        bodies = bodies.len(),
        radius = layout.galaxy_radius,
        "generated galaxy"
    );
    Ok(bodies)
}

/// Planet count for a system of the given radius.
pub fn planet_count(system_radius: f64, settings: &GalaxySettings) -> usize {
    let geometry = &settings.geometry;
    if geometry.planet_spacing <= 0.0 {
        return 0;
    }
    let fit = (system_radius / geometry.planet_spacing).floor().max(0.0) as usize;
    fit.min(geometry.max_planets_per_system as usize)
}

fn materialise_system(
    galaxy: GalaxyId,
    placement: &Placement,
    home_of: Option<FactionId>,
    settings: &GalaxySettings,
    rng: &mut GameRng,
    out: &mut Vec<Body>,
) {
    let star_name = star_name(rng);
    let mut star = blank_body(galaxy, star_name.clone(), BodyKind::Star, rng, settings);
    star.position = placement.position;
    if let Some(faction) = home_of {
        star.owner = Some(faction);
        star.ships = u64::from(settings.starting_ships);
        star.economy = settings.starting_economy;
        star.industry = settings.starting_industry;
        star.science = settings.starting_science;
    }
    let parent = star.id;
    let centre = star.position;
    out.push(star);

    // The home star counts toward the starting bodies.
    let mut owned_planets = home_of
        .map(|_| settings.starting_bodies.saturating_sub(1) as usize)
        .unwrap_or(0);

    for k in 0..planet_count(placement.system_radius, settings) {
        let name = format!("{star_name} {}", NUMERALS[k % NUMERALS.len()]);
        let mut planet = blank_body(galaxy, name, BodyKind::Planet, rng, settings);
        let radius = settings.geometry.planet_spacing * (k + 1) as f64;
        let phase = rng.angle();
        planet.position = centre.offset(radius, phase);
        planet.orbit = Some(Orbit {
            parent,
            radius,
            phase,
        });
        if owned_planets > 0 {
            planet.owner = home_of;
            planet.ships = u64::from(settings.starting_ships);
            owned_planets -= 1;
        }
        out.push(planet);
    }
}

fn blank_body(
    galaxy: GalaxyId,
    name: String,
    kind: BodyKind,
    rng: &mut GameRng,
    settings: &GalaxySettings,
) -> Body {
    Body {
        id: BodyId::from_random_bytes(rng.bytes16()),
        galaxy,
        name,
        kind,
        position: Default::default(),
        orbit: None,
        owner: None,
        ships: 0,
        ship_accum: 0.0,
        economy: 0,
        industry: 0,
        science: 0,
        resources: rng.range_u32(settings.min_resources..=settings.max_resources),
        warp_gate: false,
    }
}

fn star_name(rng: &mut GameRng) -> String {
    let prefix = PREFIXES[rng.index(PREFIXES.len())];
    let suffix = SUFFIXES[rng.index(SUFFIXES.len())];
    format!("{prefix}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factions(n: u8) -> Vec<FactionId> {
        (0..n).map(|i| FactionId::from_random_bytes([i + 1; 16])).collect()
    }

    #[test]
    fn home_systems_are_owned_and_stocked() {
        let settings = GalaxySettings {
            bodies_per_faction: 8,
            ..GalaxySettings::default()
        };
        let members = factions(2);
        let bodies = generate_bodies(GalaxyId::new(), &members, &settings, 11).unwrap();

        for faction in &members {
            let owned: Vec<_> = bodies.iter().filter(|b| b.is_owned_by(*faction)).collect();
            assert_eq!(owned.len(), settings.starting_bodies as usize);
            let stars: Vec<_> = owned.iter().filter(|b| b.kind == BodyKind::Star).collect();
            assert_eq!(stars.len(), 1);
            assert_eq!(stars[0].economy, settings.starting_economy);
            assert!(owned.iter().all(|b| b.ships == u64::from(settings.starting_ships)));
        }
    }

    #[test]
    fn unowned_bodies_have_no_development() {
        let bodies =
            generate_bodies(GalaxyId::new(), &factions(3), &GalaxySettings::default(), 5).unwrap();
        for body in bodies.iter().filter(|b| b.owner.is_none()) {
            assert_eq!((body.economy, body.industry, body.science), (0, 0, 0));
        }
    }

    #[test]
    fn planets_orbit_inside_their_parent_system() {
        let settings = GalaxySettings::default();
        let bodies = generate_bodies(GalaxyId::new(), &factions(2), &settings, 8).unwrap();
        for planet in bodies.iter().filter(|b| b.kind == BodyKind::Planet) {
            let orbit = planet.orbit.expect("planets have an orbit");
            let parent = bodies.iter().find(|b| b.id == orbit.parent).unwrap();
            assert!((planet.position.distance(parent.position) - orbit.radius).abs() < 1e-9);
            assert!((settings.min_resources..=settings.max_resources).contains(&planet.resources));
        }
    }

    #[test]
    fn same_seed_same_galaxy() {
        let galaxy = GalaxyId::new();
        let members = factions(2);
        let settings = GalaxySettings::default();
        let a = generate_bodies(galaxy, &members, &settings, 77).unwrap();
        let b = generate_bodies(galaxy, &members, &settings, 77).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn planet_count_is_capped() {
        let settings = GalaxySettings::default();
        assert_eq!(planet_count(0.5, &settings), 1);
        assert_eq!(planet_count(2.5, &settings), 6);
        assert_eq!(planet_count(100.0, &settings), 6);
    }
}
