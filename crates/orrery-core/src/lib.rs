//! Deterministic galaxy simulation.
//!
//! Everything here operates on an in-memory [`GalaxyState`]; loading,
//! persisting and scheduling live in `orrery-server`.

pub mod actions;
pub mod census;
pub mod combat;
pub mod economy;
pub mod geometry;
pub mod movement;
pub mod rebase;
pub mod research;
mod rng;
mod state;
pub mod victory;
pub mod visibility;
pub mod worldgen;

pub use crate::actions::ActionError;
pub use crate::geometry::{GenerationError, Layout, Placement};
pub use crate::rebase::Rebase;
pub use crate::rng::GameRng;
pub use crate::state::GalaxyState;
