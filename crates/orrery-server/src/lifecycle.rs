//! Creating, joining, starting and restarting galaxies.

use chrono::{DateTime, Utc};
use orrery_core::research::{initial_research, DEFAULT_RESEARCH};
use orrery_core::worldgen::generate_bodies;
use orrery_core::GenerationError;
use orrery_protocol::{AccountId, Faction, FactionId, Galaxy, GalaxyId, GalaxySettings, Versioned};
use thiserror::Error;
use tracing::info;

use crate::store::{EntityStore, StoreError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("galaxy {0} has already started")]
    AlreadyStarted(GalaxyId),
    #[error("galaxy {0} has no factions")]
    NoFactions(GalaxyId),
    #[error("galaxy {galaxy} is full ({max} factions)")]
    Full { galaxy: GalaxyId, max: u32 },
    #[error("wrong secret for galaxy {0}")]
    BadSecret(GalaxyId),
    #[error("color {0} is already taken")]
    ColorTaken(String),
    #[error("account {0} has already joined")]
    AlreadyJoined(AccountId),
    #[error("faction name must not be empty")]
    EmptyName,
    #[error("account {0} does not own this galaxy")]
    NotOwner(AccountId),
    #[error("world generation task failed: {0}")]
    Worker(String),
}

pub async fn create_galaxy(
    store: &dyn EntityStore,
    name: &str,
    owner: AccountId,
    settings: GalaxySettings,
    secret: Option<String>,
) -> Result<Versioned<Galaxy>, LifecycleError> {
    let mut galaxy = Galaxy::new(name.trim(), owner, settings);
    galaxy.secret = secret.filter(|s| !s.is_empty());
    let stored = store.insert_galaxy(galaxy).await?;
    info!(galaxy = %stored.value.id, name = %stored.value.name, "galaxy created");
    Ok(stored)
}

fn fresh_faction(galaxy: &Galaxy, account: AccountId, name: &str, color: &str) -> Faction {
    Faction {
        id: FactionId::new(),
        galaxy: galaxy.id,
        name: name.to_string(),
        account,
        color: color.to_string(),
        cash: galaxy.settings.starting_cash,
        research_queue: vec![DEFAULT_RESEARCH],
        research: initial_research(&galaxy.settings),
    }
}

/// Add a faction for `account` to a galaxy that has not started yet.
pub async fn join_galaxy(
    store: &dyn EntityStore,
    galaxy: GalaxyId,
    account: AccountId,
    name: &str,
    color: &str,
    secret: Option<&str>,
) -> Result<Faction, LifecycleError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LifecycleError::EmptyName);
    }

    let mut record = store.load_galaxy(galaxy).await?;
    if record.value.started_at.is_some() {
        return Err(LifecycleError::AlreadyStarted(galaxy));
    }
    if record.value.secret.as_deref().is_some_and(|s| Some(s) != secret) {
        return Err(LifecycleError::BadSecret(galaxy));
    }
    let max = record.value.settings.max_factions;
    if record.value.members.len() >= max as usize {
        return Err(LifecycleError::Full { galaxy, max });
    }

    let factions = store.load_factions(galaxy).await?;
    if factions.iter().any(|f| f.value.account == account) {
        return Err(LifecycleError::AlreadyJoined(account));
    }
    if factions.iter().any(|f| f.value.color.eq_ignore_ascii_case(color)) {
        return Err(LifecycleError::ColorTaken(color.to_string()));
    }

    let faction = fresh_faction(&record.value, account, name, color);
    // Membership is claimed first so two joins cannot both take the last seat.
    record.value.members.push(faction.id);
    store.save_galaxy(&record).await?;
    let stored = store.insert_faction(faction).await?;

    info!(%galaxy, faction = %stored.value.id, name, "faction joined");
    Ok(stored.value)
}

/// Generate the map and mark the galaxy started, seeding from the OS.
pub async fn start_galaxy(
    store: &dyn EntityStore,
    galaxy: GalaxyId,
    account: AccountId,
    now: DateTime<Utc>,
) -> Result<Versioned<Galaxy>, LifecycleError> {
    start_galaxy_with_seed(store, galaxy, account, now, rand::random()).await
}

pub async fn start_galaxy_with_seed(
    store: &dyn EntityStore,
    galaxy: GalaxyId,
    account: AccountId,
    now: DateTime<Utc>,
    seed: u64,
) -> Result<Versioned<Galaxy>, LifecycleError> {
    let mut record = store.load_galaxy(galaxy).await?;
    if record.value.owner != account {
        return Err(LifecycleError::NotOwner(account));
    }
    if record.value.started_at.is_some() {
        return Err(LifecycleError::AlreadyStarted(galaxy));
    }
    if record.value.members.is_empty() {
        return Err(LifecycleError::NoFactions(galaxy));
    }

    let members = record.value.members.clone();
    let settings = record.value.settings.clone();
    let bodies = tokio::task::spawn_blocking(move || {
        generate_bodies(galaxy, &members, &settings, seed)
    })
    .await
    .map_err(|e| LifecycleError::Worker(e.to_string()))??;

    store.clear_galaxy_map(galaxy).await?;
    let count = bodies.len();
    store.insert_bodies(bodies).await?;

    record.value.started_at = Some(now);
    record.value.last_production_at = Some(now);
    record.value.last_tick_at = None;
    record.value.tick = 0;
    record.version = store.save_galaxy(&record).await?;

    info!(%galaxy, seed, bodies = count, "galaxy started");
    Ok(record)
}

/// Wipe the map, reset every faction and return the galaxy to the lobby.
pub async fn restart_galaxy(
    store: &dyn EntityStore,
    galaxy: GalaxyId,
    account: AccountId,
) -> Result<Versioned<Galaxy>, LifecycleError> {
    let mut record = store.load_galaxy(galaxy).await?;
    if record.value.owner != account {
        return Err(LifecycleError::NotOwner(account));
    }

    store.clear_galaxy_map(galaxy).await?;
    for mut faction in store.load_factions(galaxy).await? {
        let reset = fresh_faction(
            &record.value,
            faction.value.account,
            &faction.value.name,
            &faction.value.color,
        );
        faction.value = Faction {
            id: faction.value.id,
            ..reset
        };
        store.save_faction(&faction).await?;
    }

    record.value.started_at = None;
    record.value.winner = None;
    record.value.last_tick_at = None;
    record.value.last_production_at = None;
    record.value.tick = 0;
    record.version = store.save_galaxy(&record).await?;

    info!(%galaxy, "galaxy restarted");
    Ok(record)
}
