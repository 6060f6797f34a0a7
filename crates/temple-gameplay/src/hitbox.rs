//! Hitbox / hurtbox collision.
//!
//! Hitboxes are timed, attacker-owned volumes created when an attack starts;
//! they only collide while their attack is in its Active phase. Hurtboxes are
//! the per-entity damageable volumes. [`HitboxSystem::check_hits`] is the
//! once-per-tick O(hitboxes × hurtboxes) pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use temple_common::{Aabb, EntityId, HitboxId, IdAllocator, SimClock, Vec2};
use tracing::debug;

use crate::attack_data::{attack_duration, attack_phase, AttackData, AttackPhase};
use crate::combat_stats::DefenseType;

/// A live attack volume.
#[derive(Debug, Clone)]
pub struct ActiveHitbox {
    /// Hitbox id
    pub id: HitboxId,
    /// Attacking entity
    pub owner: EntityId,
    /// Attack the hitbox was created from
    pub attack: Arc<AttackData>,
    /// World-space bounds
    pub bounds: Aabb,
    /// Owner facing at creation
    pub facing_right: bool,
    /// Creation time (ms)
    pub created_at: f64,
    /// Damage multiplier from charging
    pub charge_multiplier: f32,
    /// Entities struck, with the time of their latest hit
    pub hit_log: BTreeMap<EntityId, f64>,
}

impl ActiveHitbox {
    /// Milliseconds since creation.
    #[must_use]
    pub fn elapsed(&self, now: f64) -> f32 {
        (now - self.created_at).max(0.0) as f32
    }

    /// Current phase, `None` once the attack has finished.
    #[must_use]
    pub fn phase(&self, now: f64) -> Option<AttackPhase> {
        attack_phase(&self.attack, self.elapsed(now))
    }

    /// Whether the hitbox can currently strike.
    #[must_use]
    pub fn is_active(&self, now: f64) -> bool {
        self.phase(now) == Some(AttackPhase::Active)
    }

    fn can_strike(&self, target: EntityId, now: f64) -> bool {
        match (self.hit_log.get(&target), self.attack.multi_hit_interval_ms) {
            (None, _) => true,
            (Some(last), Some(interval)) => now - last >= f64::from(interval),
            (Some(_), None) => false,
        }
    }
}

/// Damageable volume of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Hurtbox {
    /// Owner
    pub entity: EntityId,
    /// World-space bounds
    pub bounds: Aabb,
    /// Ignored by every hitbox while set
    pub invulnerable: bool,
    /// Current defense mode
    pub defense_type: DefenseType,
}

/// One hitbox / hurtbox contact.
#[derive(Debug, Clone)]
pub struct HitResult {
    /// Hitbox that connected
    pub hitbox: HitboxId,
    /// Attacker
    pub attacker: EntityId,
    /// Defender
    pub defender: EntityId,
    /// Attack data
    pub attack: Arc<AttackData>,
    /// Charge multiplier of the hitbox
    pub charge_multiplier: f32,
    /// Defense mode of the defender at contact
    pub defense_type: DefenseType,
    /// Center of the overlap
    pub position: Vec2,
}

/// Kind of box in a debug snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugBoxKind {
    /// Attack volume
    Hit,
    /// Damageable volume
    Hurt,
}

/// Introspection record for debug overlays.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugBox {
    /// Box kind
    pub kind: DebugBoxKind,
    /// Owning entity
    pub owner: EntityId,
    /// Bounds
    pub bounds: Aabb,
    /// Hitbox active / hurtbox vulnerable
    pub live: bool,
}

/// Registry of hitboxes and hurtboxes.
#[derive(Debug)]
pub struct HitboxSystem {
    clock: SimClock,
    ids: IdAllocator,
    hitboxes: BTreeMap<HitboxId, ActiveHitbox>,
    hurtboxes: BTreeMap<EntityId, Hurtbox>,
}

impl HitboxSystem {
    /// Creates an empty system reading time from `clock`.
    #[must_use]
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            ids: IdAllocator::new(),
            hitboxes: BTreeMap::new(),
            hurtboxes: BTreeMap::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Hitboxes
    // ------------------------------------------------------------------------

    /// Creates a hitbox for an attack starting now.
    pub fn create_hitbox(
        &mut self,
        owner: EntityId,
        attack: Arc<AttackData>,
        owner_pos: Vec2,
        facing_right: bool,
    ) -> HitboxId {
        self.create_charged_hitbox(owner, attack, owner_pos, facing_right, 1.0)
    }

    /// Creates a hitbox carrying a charge multiplier.
    pub fn create_charged_hitbox(
        &mut self,
        owner: EntityId,
        attack: Arc<AttackData>,
        owner_pos: Vec2,
        facing_right: bool,
        charge_multiplier: f32,
    ) -> HitboxId {
        let id = self.ids.next_hitbox();
        let center = attack.hitbox.world_center(owner_pos, facing_right);
        let bounds = Aabb::from_center(center, attack.hitbox.width, attack.hitbox.height);
        self.hitboxes.insert(
            id,
            ActiveHitbox {
                id,
                owner,
                attack,
                bounds,
                facing_right,
                created_at: self.clock.now_ms(),
                charge_multiplier,
                hit_log: BTreeMap::new(),
            },
        );
        id
    }

    /// Looks up a hitbox.
    #[must_use]
    pub fn hitbox(&self, id: HitboxId) -> Option<&ActiveHitbox> {
        self.hitboxes.get(&id)
    }

    /// Number of live hitboxes.
    #[must_use]
    pub fn hitbox_count(&self) -> usize {
        self.hitboxes.len()
    }

    /// Moves every hitbox of `owner` along with it.
    pub fn follow_owner(&mut self, owner: EntityId, owner_pos: Vec2) {
        for hitbox in self.hitboxes.values_mut().filter(|h| h.owner == owner) {
            let center = hitbox.attack.hitbox.world_center(owner_pos, hitbox.facing_right);
            hitbox.bounds = hitbox.bounds.recentered(center);
        }
    }

    /// Removes a single hitbox.
    pub fn remove_hitbox(&mut self, id: HitboxId) -> bool {
        self.hitboxes.remove(&id).is_some()
    }

    /// Removes all hitboxes owned by `owner` (attack cancelled or owner gone).
    pub fn remove_owner_hitboxes(&mut self, owner: EntityId) -> usize {
        let before = self.hitboxes.len();
        self.hitboxes.retain(|_, h| h.owner != owner);
        before - self.hitboxes.len()
    }

    // ------------------------------------------------------------------------
    // Hurtboxes
    // ------------------------------------------------------------------------

    /// Registers (or replaces) an entity's hurtbox.
    pub fn register_hurtbox(&mut self, entity: EntityId, bounds: Aabb) {
        self.hurtboxes.insert(
            entity,
            Hurtbox {
                entity,
                bounds,
                invulnerable: false,
                defense_type: DefenseType::None,
            },
        );
    }

    /// Re-centers an entity's hurtbox.
    pub fn update_hurtbox(&mut self, entity: EntityId, center: Vec2) {
        if let Some(hurtbox) = self.hurtboxes.get_mut(&entity) {
            hurtbox.bounds = hurtbox.bounds.recentered(center);
        }
    }

    /// Removes an entity's hurtbox and every hitbox it owns.
    pub fn remove_hurtbox(&mut self, entity: EntityId) {
        self.hurtboxes.remove(&entity);
        self.remove_owner_hitboxes(entity);
    }

    /// Toggles invulnerability.
    pub fn set_invulnerable(&mut self, entity: EntityId, invulnerable: bool) {
        if let Some(hurtbox) = self.hurtboxes.get_mut(&entity) {
            hurtbox.invulnerable = invulnerable;
        }
    }

    /// Updates the defense mode recorded on the hurtbox.
    pub fn set_defense_type(&mut self, entity: EntityId, defense_type: DefenseType) {
        if let Some(hurtbox) = self.hurtboxes.get_mut(&entity) {
            hurtbox.defense_type = defense_type;
        }
    }

    /// Looks up a hurtbox.
    #[must_use]
    pub fn hurtbox(&self, entity: EntityId) -> Option<&Hurtbox> {
        self.hurtboxes.get(&entity)
    }

    // ------------------------------------------------------------------------
    // Per-tick
    // ------------------------------------------------------------------------

    /// Finds every new hitbox / hurtbox contact this tick.
    pub fn check_hits(&mut self) -> Vec<HitResult> {
        let now = self.clock.now_ms();
        let mut hits = Vec::new();

        for hitbox in self.hitboxes.values_mut() {
            if !hitbox.is_active(now) {
                continue;
            }
            for hurtbox in self.hurtboxes.values() {
                if hurtbox.entity == hitbox.owner
                    || hurtbox.invulnerable
                    || !hitbox.can_strike(hurtbox.entity, now)
                {
                    continue;
                }
                let Some(position) = hitbox.bounds.overlap_center(&hurtbox.bounds) else {
                    continue;
                };
                hitbox.hit_log.insert(hurtbox.entity, now);
                debug!(
                    "{} hit {} with {} at ({:.1}, {:.1})",
                    hitbox.owner, hurtbox.entity, hitbox.attack.id, position.x, position.y
                );
                hits.push(HitResult {
                    hitbox: hitbox.id,
                    attacker: hitbox.owner,
                    defender: hurtbox.entity,
                    attack: Arc::clone(&hitbox.attack),
                    charge_multiplier: hitbox.charge_multiplier,
                    defense_type: hurtbox.defense_type,
                    position,
                });
            }
        }
        hits
    }

    /// Removes hitboxes whose attack has finished. Returns how many.
    pub fn update(&mut self) -> usize {
        let now = self.clock.now_ms();
        let before = self.hitboxes.len();
        self.hitboxes
            .retain(|_, h| h.elapsed(now) < attack_duration(&h.attack));
        before - self.hitboxes.len()
    }

    /// Snapshot of every box for debug drawing.
    #[must_use]
    pub fn debug_boxes(&self) -> Vec<DebugBox> {
        let now = self.clock.now_ms();
        let hit = self.hitboxes.values().map(|h| DebugBox {
            kind: DebugBoxKind::Hit,
            owner: h.owner,
            bounds: h.bounds,
            live: h.is_active(now),
        });
        let hurt = self.hurtboxes.values().map(|h| DebugBox {
            kind: DebugBoxKind::Hurt,
            owner: h.entity,
            bounds: h.bounds,
            live: !h.invulnerable,
        });
        hit.chain(hurt).collect()
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.hitboxes.clear();
        self.hurtboxes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack_data::{AttackType, HitboxShape};

    fn setup() -> (SimClock, HitboxSystem) {
        let clock = SimClock::new();
        let system = HitboxSystem::new(clock.clone());
        (clock, system)
    }

    fn swing() -> Arc<AttackData> {
        Arc::new(
            AttackData::new("swing", "Swing", AttackType::Light, 10.0)
                .with_timing(100.0, 100.0, 100.0)
                .with_hitbox(HitboxShape::forward(40.0, 60.0, 40.0)),
        )
    }

    fn eid(n: u64) -> EntityId {
        EntityId::from_raw(n)
    }

    #[test]
    fn test_hitbox_only_hits_while_active() {
        let (clock, mut system) = setup();
        system.register_hurtbox(eid(2), Aabb::from_center(Vec2::new(40.0, 0.0), 30.0, 30.0));
        system.create_hitbox(eid(1), swing(), Vec2::ZERO, true);

        assert!(system.check_hits().is_empty(), "startup");
        clock.advance(100.0);
        let hits = system.check_hits();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].defender, eid(2));
        assert_eq!(hits[0].attacker, eid(1));
    }

    #[test]
    fn test_facing_left_mirrors() {
        let (clock, mut system) = setup();
        system.register_hurtbox(eid(2), Aabb::from_center(Vec2::new(40.0, 0.0), 30.0, 30.0));
        system.create_hitbox(eid(1), swing(), Vec2::ZERO, false);
        clock.advance(150.0);
        assert!(system.check_hits().is_empty());
    }

    #[test]
    fn test_single_hit_guarantee() {
        let (clock, mut system) = setup();
        system.register_hurtbox(eid(2), Aabb::from_center(Vec2::new(40.0, 0.0), 30.0, 30.0));
        system.create_hitbox(eid(1), swing(), Vec2::ZERO, true);
        clock.advance(100.0);
        let mut total = 0;
        for _ in 0..6 {
            total += system.check_hits().len();
            clock.advance(16.0);
        }
        assert_eq!(total, 1);
    }

    #[test]
    fn test_multi_hit_respects_interval() {
        let (clock, mut system) = setup();
        let attack = Arc::new(
            AttackData::new("spin", "Spin", AttackType::Special, 5.0)
                .with_timing(0.0, 500.0, 0.0)
                .with_hitbox(HitboxShape::around(100.0, 100.0))
                .with_multi_hit(100.0),
        );
        system.register_hurtbox(eid(2), Aabb::from_center(Vec2::new(10.0, 0.0), 20.0, 20.0));
        system.create_hitbox(eid(1), attack, Vec2::ZERO, true);

        let mut total = 0;
        for _ in 0..25 {
            total += system.check_hits().len();
            clock.advance(20.0);
        }
        // t = 0, 100, 200, 300, 400
        assert_eq!(total, 5);
    }

    #[test]
    fn test_skips_self_and_invulnerable_and_reports_all_pairs() {
        let (clock, mut system) = setup();
        system.register_hurtbox(eid(1), Aabb::from_center(Vec2::ZERO, 30.0, 30.0));
        system.register_hurtbox(eid(2), Aabb::from_center(Vec2::new(40.0, 0.0), 30.0, 30.0));
        system.register_hurtbox(eid(3), Aabb::from_center(Vec2::new(45.0, 5.0), 30.0, 30.0));
        system.register_hurtbox(eid(4), Aabb::from_center(Vec2::new(50.0, 0.0), 30.0, 30.0));
        system.set_invulnerable(eid(4), true);
        system.create_hitbox(eid(1), swing(), Vec2::ZERO, true);
        clock.advance(120.0);

        let defenders: Vec<_> = system.check_hits().iter().map(|h| h.defender).collect();
        assert_eq!(defenders, vec![eid(2), eid(3)]);
    }

    #[test]
    fn test_update_expires_and_follow_moves() {
        let (clock, mut system) = setup();
        system.register_hurtbox(eid(2), Aabb::from_center(Vec2::new(240.0, 0.0), 30.0, 30.0));
        let id = system.create_hitbox(eid(1), swing(), Vec2::ZERO, true);
        system.follow_owner(eid(1), Vec2::new(200.0, 0.0));
        assert_eq!(system.hitbox(id).map(|h| h.bounds.center()), Some(Vec2::new(240.0, 0.0)));

        clock.advance(100.0);
        assert_eq!(system.check_hits().len(), 1);

        clock.advance(199.0);
        assert_eq!(system.update(), 0);
        clock.advance(1.0);
        assert_eq!(system.update(), 1);
        assert_eq!(system.hitbox_count(), 0);
    }

    #[test]
    fn test_remove_owner_and_debug_boxes() {
        let (_clock, mut system) = setup();
        system.register_hurtbox(eid(1), Aabb::default());
        system.create_hitbox(eid(1), swing(), Vec2::ZERO, true);
        system.create_hitbox(eid(1), swing(), Vec2::ZERO, true);
        assert_eq!(system.debug_boxes().len(), 3);
        assert_eq!(system.remove_owner_hitboxes(eid(1)), 2);

        system.remove_hurtbox(eid(1));
        assert!(system.debug_boxes().is_empty());
    }
}
