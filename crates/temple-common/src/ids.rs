//! ID types for combatants, hitboxes and squads.

use serde::{Deserialize, Serialize};

/// Unique identifier for a combat entity (player, enemy, boss).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates an entity ID from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Null/invalid entity ID.
    pub const NULL: Self = Self(0);

    /// Checks if this is a valid (non-null) entity ID.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a live hitbox inside the hitbox engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HitboxId(u64);

impl HitboxId {
    /// Creates a hitbox ID from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Identifier of a squad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SquadId(u64);

impl SquadId {
    /// Creates a squad ID from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Monotonic ID source.
///
/// Each simulation owns its allocator, so two simulations (or two tests)
/// never share a counter. Zero is reserved for [`EntityId::NULL`].
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Creates an allocator whose first ID is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Creates an allocator starting at a given raw value (clamped to 1).
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self { next: first.max(1) }
    }

    fn bump(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Allocates a new entity ID.
    pub fn next_entity(&mut self) -> EntityId {
        EntityId(self.bump())
    }

    /// Allocates a new hitbox ID.
    pub fn next_hitbox(&mut self) -> HitboxId {
        HitboxId(self.bump())
    }

    /// Allocates a new squad ID.
    pub fn next_squad(&mut self) -> SquadId {
        SquadId(self.bump())
    }

    /// Number of IDs handed out so far.
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.next - 1
    }
}
