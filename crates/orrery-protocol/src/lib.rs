//! Data model shared by the Orrery simulation, its server and its collaborators.

mod census;
mod entities;
mod event;
mod ids;
mod settings;
mod snapshot;
mod technology;
mod types;

pub use crate::census::*;
pub use crate::entities::*;
pub use crate::event::*;
pub use crate::ids::*;
pub use crate::settings::*;
pub use crate::snapshot::*;
pub use crate::technology::*;
pub use crate::types::*;
