//! Orrery server binary.
//!
//! - `orrery-server run` - tick every active galaxy on the wall clock
//! - `orrery-server simulate` - play a seeded galaxy forward offline

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, DurationRound, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use orrery_protocol::{AccountId, GalaxyId, Waypoint};
use orrery_server::{
    lifecycle, ActionService, ConnectionRegistry, EntityStore, EventBus, InFlight, InMemoryStore,
    Scheduler, ServerConfig, TickServices,
};

const COLORS: &[&str] = &[
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
];

#[derive(Parser)]
#[command(name = "orrery-server")]
#[command(about = "Galaxy tick simulation server", version)]
struct Cli {
    /// Config file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run {
        /// Seed an in-memory demo galaxy with this many factions
        #[arg(long, default_value = "0")]
        demo_factions: usize,
    },

    /// Tick a fresh galaxy forward on a synthetic clock
    Simulate {
        #[arg(long, default_value = "4")]
        factions: usize,

        /// Minutes to simulate
        #[arg(long, default_value = "180")]
        ticks: u32,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::load_or_default(cli.config.as_deref())?;

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if cli.json || config.log_format == "json" {
        fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    match cli.command {
        Commands::Run { demo_factions } => run_server(config, demo_factions).await,
        Commands::Simulate {
            factions,
            ticks,
            seed,
        } => simulate(config, factions, ticks, seed, cli.json).await,
    }
}

fn services(config: &ServerConfig, store: Arc<InMemoryStore>) -> TickServices {
    TickServices {
        store,
        push: Arc::new(ConnectionRegistry::new(config.push_capacity)),
        events: EventBus::new(config.event_capacity),
    }
}

/// Create, populate and start a galaxy with `factions` bot accounts.
async fn seed_galaxy(
    store: &dyn EntityStore,
    config: &ServerConfig,
    factions: usize,
    now: DateTime<Utc>,
    seed: u64,
) -> Result<GalaxyId> {
    let owner = AccountId::new();
    let galaxy = lifecycle::create_galaxy(store, "Demo", owner, config.galaxy_defaults.clone(), None)
        .await?
        .value
        .id;
    for n in 0..factions {
        let account = if n == 0 { owner } else { AccountId::new() };
        let color = COLORS[n % COLORS.len()];
        lifecycle::join_galaxy(store, galaxy, account, &format!("Faction {}", n + 1), color, None)
            .await
            .with_context(|| format!("Failed to join faction {}", n + 1))?;
    }
    lifecycle::start_galaxy_with_seed(store, galaxy, owner, now, seed).await?;
    Ok(galaxy)
}

async fn run_server(config: ServerConfig, demo_factions: usize) -> Result<()> {
    tracing::info!(interval_secs = config.tick_interval_secs, "Starting server");

    let store = Arc::new(InMemoryStore::new());
    if demo_factions > 0 {
        let galaxy = seed_galaxy(store.as_ref(), &config, demo_factions, Utc::now(), rand::random()).await?;
        tracing::info!(%galaxy, factions = demo_factions, "Demo galaxy ready");
    }

    let scheduler = Scheduler::new(config.clone(), services(&config, store), InFlight::new());
    scheduler
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
        })
        .await;
    Ok(())
}

/// Send every faction's home fleet at the nearest body it does not own.
async fn issue_opening_orders(store: &dyn EntityStore, actions: &ActionService, galaxy: GalaxyId) -> Result<()> {
    let bodies: Vec<_> = store.load_bodies(galaxy).await?.into_iter().map(|b| b.value).collect();
    for faction in store.load_factions(galaxy).await? {
        let faction = faction.value;
        let Some(home) = bodies.iter().filter(|b| b.is_owned_by(faction.id)).max_by_key(|b| b.ships) else {
            continue;
        };
        let target = bodies
            .iter()
            .filter(|b| !b.is_owned_by(faction.id))
            .min_by(|a, b| {
                home.position
                    .distance(a.position)
                    .total_cmp(&home.position.distance(b.position))
            });
        let (Some(target), true) = (target, home.ships > 1) else {
            continue;
        };

        let fleet = actions
            .build_fleet(faction.id, home.id, home.ships / 2, "")
            .await?;
        if let Err(err) = actions
            .set_waypoints(faction.id, fleet.id, vec![Waypoint::to(target.id)])
            .await
        {
            tracing::warn!(faction = %faction.name, error = %err, "Opening order rejected");
        }
    }
    Ok(())
}

async fn simulate(config: ServerConfig, factions: usize, ticks: u32, seed: u64, json: bool) -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let services = services(&config, Arc::clone(&store));
    let start = Utc::now()
        .duration_trunc(Duration::hours(1))
        .context("Failed to align the simulation clock")?;

    let galaxy = seed_galaxy(store.as_ref(), &config, factions, start, seed).await?;
    let actions = ActionService::new(services.store.clone(), services.events.clone(), config.action_retries);
    issue_opening_orders(store.as_ref(), &actions, galaxy).await?;

    let mut scheduler = Scheduler::new(config.clone(), services, InFlight::new());
    for minute in 1..=ticks {
        let now = start + Duration::minutes(i64::from(minute));
        let pass = scheduler.run_pass(now).await?;
        for report in scheduler.drain().await {
            if report.combats > 0 || report.production.is_some() || report.winner.is_some() {
                tracing::info!(
                    tick = report.tick,
                    combats = report.combats,
                    production = ?report.production,
                    winner = ?report.winner,
                    "Notable tick"
                );
            }
        }
        if pass.dispatched.is_empty() {
            tracing::info!(minute, "Galaxy no longer active, stopping");
            break;
        }
    }

    let census = store.load_census(galaxy).await?;
    let events = store.load_events(galaxy).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&census.last())?);
        return Ok(());
    }

    let factions = store.load_factions(galaxy).await?;
    println!("Galaxy {galaxy}: {} events, {} census points", events.len(), census.len());
    if let Some(point) = census.last() {
        for entry in &point.entries {
            let name = factions
                .iter()
                .find(|f| f.value.id == entry.faction)
                .map(|f| f.value.name.as_str())
                .unwrap_or("?");
            println!(
                "  {name:<12} bodies {:>3}  fleets {:>2}  ships {:>5}  economy {:>3}",
                entry.bodies, entry.fleets, entry.ships, entry.economy
            );
        }
    }
    Ok(())
}
