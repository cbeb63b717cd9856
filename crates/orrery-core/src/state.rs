use std::collections::HashMap;

use orrery_protocol::{Body, BodyId, Faction, FactionId, Fleet, FleetId, Galaxy, Technology};

/// Everything a tick needs for one galaxy, loaded up front and owned by the
/// task running that galaxy.
#[derive(Clone, Debug, PartialEq)]
pub struct GalaxyState {
    pub galaxy: Galaxy,
    pub factions: Vec<Faction>,
    pub bodies: Vec<Body>,
    pub fleets: Vec<Fleet>,
}

impl GalaxyState {
    pub fn new(galaxy: Galaxy, factions: Vec<Faction>, bodies: Vec<Body>, fleets: Vec<Fleet>) -> Self {
        Self {
            galaxy,
            factions,
            bodies,
            fleets,
        }
    }

    pub fn faction(&self, id: FactionId) -> Option<&Faction> {
        self.factions.iter().find(|f| f.id == id)
    }

    pub fn faction_mut(&mut self, id: FactionId) -> Option<&mut Faction> {
        self.factions.iter_mut().find(|f| f.id == id)
    }

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.iter().find(|b| b.id == id)
    }

    pub fn fleet(&self, id: FleetId) -> Option<&Fleet> {
        self.fleets.iter().find(|f| f.id == id)
    }

    /// Index of every body by id, for phases that look bodies up per fleet.
    pub fn body_index(&self) -> HashMap<BodyId, usize> {
        self.bodies
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id, i))
            .collect()
    }

    /// Technology level of a faction, zero for unknown factions.
    pub fn level(&self, faction: Option<FactionId>, tech: Technology) -> u32 {
        faction
            .and_then(|id| self.faction(id))
            .map(|f| f.level(tech))
            .unwrap_or(0)
    }

    pub fn owned_bodies(&self, faction: FactionId) -> impl Iterator<Item = &Body> {
        self.bodies.iter().filter(move |b| b.is_owned_by(faction))
    }

    /// Drop fleets that have run out of ships.
    pub fn prune_empty_fleets(&mut self) -> usize {
        let before = self.fleets.len();
        self.fleets.retain(|f| f.ships > 0);
        before - self.fleets.len()
    }
}
