//! # Temple Gameplay
//!
//! Combat and AI core for the Temple brawler.
//!
//! This crate provides everything that decides who hits whom:
//! - Event bus with priorities, wildcards and a deferred queue
//! - Factions, combat stats and the attack catalog
//! - Damage calculation, hitboxes, blocking, knockback and the Force
//! - Combat manager: attack lifecycle, hit resolution, stun and death
//! - Generic state machine and per-entity motion bodies
//! - Enemy framework with trooper, Jedi defender, temple guard and boss brains
//! - Steering behaviours and squad coordination
//! - Player controller and a headless fight simulation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod attack_data;
pub mod behavior;
pub mod block;
pub mod body;
pub mod boss;
pub mod combat;
pub mod combat_stats;
pub mod damage_calc;
pub mod defender;
pub mod enemy;
pub mod events;
pub mod faction;
pub mod force;
pub mod hitbox;
pub mod knockback;
pub mod player;
pub mod simulation;
pub mod squad;
pub mod state_machine;
pub mod temple_guard;
pub mod trooper;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::attack_data::*;
    pub use crate::behavior::*;
    pub use crate::block::*;
    pub use crate::body::*;
    pub use crate::boss::*;
    pub use crate::combat::*;
    pub use crate::combat_stats::*;
    pub use crate::damage_calc::*;
    pub use crate::defender::*;
    pub use crate::enemy::*;
    pub use crate::events::*;
    pub use crate::faction::*;
    pub use crate::force::*;
    pub use crate::hitbox::*;
    pub use crate::knockback::*;
    pub use crate::player::*;
    pub use crate::simulation::*;
    pub use crate::squad::*;
    pub use crate::state_machine::*;
    pub use crate::temple_guard::*;
    pub use crate::trooper::*;
}

pub use prelude::*;
