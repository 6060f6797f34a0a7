//! Swappable movement policies.
//!
//! Behaviours are independent of the combat state machine: an enemy runs its
//! [`BehaviorSet`] while idle or chasing, and the highest-priority behaviour
//! whose activation test passes steers the body for that tick.

use std::fmt::Debug;

use temple_common::{rotate, Vec2};

use crate::enemy::EnemyCore;

/// A movement policy.
pub trait AiBehavior: Debug {
    /// Display name.
    fn name(&self) -> &'static str;

    /// Higher runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether the behaviour wants control this tick.
    fn should_activate(&self, core: &EnemyCore) -> bool;

    /// Steers the body.
    fn execute(&mut self, core: &mut EnemyCore, dt_ms: f32);

    /// Called when another behaviour takes over.
    fn on_interrupt(&mut self, _core: &mut EnemyCore) {}
}

/// Priority-ordered set of behaviours. Ties keep insertion order.
#[derive(Debug, Default)]
pub struct BehaviorSet {
    behaviors: Vec<Box<dyn AiBehavior>>,
    active: Option<usize>,
}

impl BehaviorSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a behaviour (builder pattern).
    #[must_use]
    pub fn with(mut self, behavior: impl AiBehavior + 'static) -> Self {
        self.push(behavior);
        self
    }

    /// Adds a behaviour.
    pub fn push(&mut self, behavior: impl AiBehavior + 'static) {
        let priority = behavior.priority();
        let index = self
            .behaviors
            .iter()
            .position(|b| b.priority() < priority)
            .unwrap_or(self.behaviors.len());
        self.behaviors.insert(index, Box::new(behavior));
        self.active = None;
    }

    /// Number of behaviours.
    #[must_use]
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Name of the behaviour that ran last tick.
    #[must_use]
    pub fn active_name(&self) -> Option<&'static str> {
        self.active
            .and_then(|i| self.behaviors.get(i))
            .map(|b| b.name())
    }

    /// Runs the first willing behaviour. Returns false when none activated.
    pub fn update(&mut self, core: &mut EnemyCore, dt_ms: f32) -> bool {
        let chosen = self.behaviors.iter().position(|b| b.should_activate(core));
        if chosen != self.active {
            if let Some(previous) = self.active.and_then(|i| self.behaviors.get_mut(i)) {
                previous.on_interrupt(core);
            }
            self.active = chosen;
        }
        match chosen.and_then(|i| self.behaviors.get_mut(i)) {
            Some(behavior) => {
                behavior.execute(core, dt_ms);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Behaviours
// ============================================================================

/// Walks a waypoint loop while no target is known.
#[derive(Debug, Clone)]
pub struct Patrol {
    waypoints: Vec<Vec2>,
    index: usize,
    wait_ms: f32,
    waited_ms: f32,
}

impl Patrol {
    /// Creates a patrol over `waypoints`, pausing `wait_ms` at each.
    #[must_use]
    pub fn new(waypoints: Vec<Vec2>, wait_ms: f32) -> Self {
        Self {
            waypoints,
            index: 0,
            wait_ms,
            waited_ms: 0.0,
        }
    }

    /// Index of the waypoint being walked to.
    #[must_use]
    pub fn current_waypoint(&self) -> usize {
        self.index
    }
}

impl AiBehavior for Patrol {
    fn name(&self) -> &'static str {
        "patrol"
    }

    fn should_activate(&self, core: &EnemyCore) -> bool {
        !core.has_target() && !self.waypoints.is_empty()
    }

    fn execute(&mut self, core: &mut EnemyCore, dt_ms: f32) {
        let Some(&waypoint) = self.waypoints.get(self.index) else {
            self.index = 0;
            return;
        };
        if core.position().distance(waypoint) > 8.0 {
            core.move_towards(waypoint, 0.5);
            return;
        }
        core.stop();
        self.waited_ms += dt_ms;
        if self.waited_ms >= self.wait_ms {
            self.waited_ms = 0.0;
            self.index = (self.index + 1) % self.waypoints.len();
        }
    }
}

/// Pursues the target, leading it by its smoothed velocity.
#[derive(Debug, Clone)]
pub struct Chase {
    anticipation: f32,
    smoothing: f32,
    lookahead_ms: f32,
    last_target: Option<Vec2>,
    velocity_estimate: Vec2,
}

impl Default for Chase {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Chase {
    /// Creates a chase that leads the target by `anticipation` × 0.5 s of motion.
    #[must_use]
    pub fn new(anticipation: f32) -> Self {
        Self {
            anticipation: anticipation.max(0.0),
            smoothing: 0.2,
            lookahead_ms: 500.0,
            last_target: None,
            velocity_estimate: Vec2::ZERO,
        }
    }

    /// Smoothed target velocity (px/s).
    #[must_use]
    pub fn velocity_estimate(&self) -> Vec2 {
        self.velocity_estimate
    }

    /// Where the target is expected to be.
    #[must_use]
    pub fn predicted(&self, target: Vec2) -> Vec2 {
        target + self.velocity_estimate * (self.lookahead_ms / 1000.0) * self.anticipation
    }
}

impl AiBehavior for Chase {
    fn name(&self) -> &'static str {
        "chase"
    }

    fn should_activate(&self, core: &EnemyCore) -> bool {
        core.has_target() && core.distance_to_target() > core.config.attack_range * 0.8
    }

    fn execute(&mut self, core: &mut EnemyCore, dt_ms: f32) {
        let Some(target) = core.perception.target_position else {
            return;
        };
        if let Some(last) = self.last_target {
            if dt_ms > 0.0 {
                let sample = (target - last) / (dt_ms / 1000.0);
                self.velocity_estimate = self.velocity_estimate.lerp(sample, self.smoothing);
            }
        }
        self.last_target = Some(target);
        core.move_towards(self.predicted(target), 1.0);
    }

    fn on_interrupt(&mut self, _core: &mut EnemyCore) {
        self.last_target = None;
        self.velocity_estimate = Vec2::ZERO;
    }
}

/// Circles the target inside a distance band, switching sides periodically.
#[derive(Debug, Clone)]
pub struct Strafe {
    min_range: f32,
    max_range: f32,
    switch_ms: f32,
    side: f32,
    elapsed_ms: f32,
}

impl Strafe {
    /// Creates a strafe active between `min_range` and `max_range`.
    #[must_use]
    pub fn new(min_range: f32, max_range: f32, switch_ms: f32) -> Self {
        Self {
            min_range,
            max_range,
            switch_ms,
            side: 1.0,
            elapsed_ms: 0.0,
        }
    }

    /// Current circling direction (±1).
    #[must_use]
    pub fn side(&self) -> f32 {
        self.side
    }
}

impl AiBehavior for Strafe {
    fn name(&self) -> &'static str {
        "strafe"
    }

    fn should_activate(&self, core: &EnemyCore) -> bool {
        let d = core.distance_to_target();
        d >= self.min_range && d <= self.max_range
    }

    fn execute(&mut self, core: &mut EnemyCore, dt_ms: f32) {
        self.elapsed_ms += dt_ms;
        if self.elapsed_ms >= self.switch_ms {
            self.elapsed_ms = 0.0;
            self.side = -self.side;
        }
        core.strafe(self.side, 0.6);
    }
}

/// Runs from a close target when badly hurt.
#[derive(Debug, Clone)]
pub struct Flee {
    health_threshold: f32,
    safe_distance: f32,
}

impl Flee {
    /// Creates a flee below `health_threshold` until `safe_distance` is reached.
    #[must_use]
    pub fn new(health_threshold: f32, safe_distance: f32) -> Self {
        Self {
            health_threshold,
            safe_distance,
        }
    }
}

impl AiBehavior for Flee {
    fn name(&self) -> &'static str {
        "flee"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn should_activate(&self, core: &EnemyCore) -> bool {
        core.perception.health_fraction < self.health_threshold
            && core.distance_to_target() < self.safe_distance
    }

    fn execute(&mut self, core: &mut EnemyCore, _dt_ms: f32) {
        if let Some(threat) = core.perception.target_position {
            core.move_away_from(threat, 1.2);
        }
    }
}

/// Takes a fixed bearing on a ring around the target.
#[derive(Debug, Clone)]
pub struct Surround {
    radius: f32,
    angle: f32,
}

impl Surround {
    /// Creates a surround at `radius` and bearing `angle` (radians).
    #[must_use]
    pub fn new(radius: f32, angle: f32) -> Self {
        Self { radius, angle }
    }

    /// Ring position around `target`.
    #[must_use]
    pub fn spot(&self, target: Vec2) -> Vec2 {
        target + rotate(Vec2::X * self.radius, self.angle)
    }
}

impl AiBehavior for Surround {
    fn name(&self) -> &'static str {
        "surround"
    }

    fn should_activate(&self, core: &EnemyCore) -> bool {
        core.has_target()
    }

    fn execute(&mut self, core: &mut EnemyCore, _dt_ms: f32) {
        let Some(target) = core.perception.target_position else {
            return;
        };
        let spot = self.spot(target);
        if core.position().distance(spot) > 6.0 {
            core.move_towards(spot, 1.0);
        } else {
            core.stop();
        }
        core.face_target();
    }
}

/// Moves behind the cover point that best shields from the target.
#[derive(Debug, Clone)]
pub struct CoverFire {
    cover_points: Vec<Vec2>,
    search_radius: f32,
}

impl CoverFire {
    /// Creates a cover behaviour over known `cover_points`.
    #[must_use]
    pub fn new(cover_points: Vec<Vec2>, search_radius: f32) -> Self {
        Self {
            cover_points,
            search_radius,
        }
    }

    /// Best reachable cover: farthest from the threat within the search radius.
    #[must_use]
    pub fn best_cover(&self, from: Vec2, threat: Vec2) -> Option<Vec2> {
        self.cover_points
            .iter()
            .copied()
            .filter(|p| p.distance(from) <= self.search_radius)
            .max_by(|a, b| a.distance(threat).total_cmp(&b.distance(threat)))
    }
}

impl AiBehavior for CoverFire {
    fn name(&self) -> &'static str {
        "cover_fire"
    }

    fn priority(&self) -> i32 {
        5
    }

    fn should_activate(&self, core: &EnemyCore) -> bool {
        core.perception
            .target_position
            .is_some_and(|t| self.best_cover(core.position(), t).is_some())
    }

    fn execute(&mut self, core: &mut EnemyCore, _dt_ms: f32) {
        let Some(threat) = core.perception.target_position else {
            return;
        };
        match self.best_cover(core.position(), threat) {
            Some(cover) if core.position().distance(cover) > 6.0 => core.move_towards(cover, 1.0),
            _ => {
                core.stop();
                core.face_target();
            }
        }
    }
}

/// Returns to the squad slot when displaced.
#[derive(Debug, Clone)]
pub struct Formation {
    tolerance: f32,
}

impl Default for Formation {
    fn default() -> Self {
        Self { tolerance: 12.0 }
    }
}

impl Formation {
    /// Creates a formation keeper that tolerates `tolerance` px of drift.
    #[must_use]
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl AiBehavior for Formation {
    fn name(&self) -> &'static str {
        "formation"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn should_activate(&self, core: &EnemyCore) -> bool {
        core.formation_slot
            .is_some_and(|slot| core.position().distance(slot) > self.tolerance)
    }

    fn execute(&mut self, core: &mut EnemyCore, _dt_ms: f32) {
        if let Some(slot) = core.formation_slot {
            core.move_towards(slot, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enemy::EnemyConfig;
    use crate::events::EventBus;
    use crate::faction::Faction;
    use temple_common::{EntityId, SimRng};

    fn core_at(position: Vec2, target: Option<Vec2>) -> EnemyCore {
        let mut core = EnemyCore::new(
            EntityId::from_raw(5),
            Faction::Jedi,
            EnemyConfig::default(),
            position,
            SimRng::new(1),
            EventBus::new(),
        );
        core.perception.target_position = target;
        core
    }

    #[test]
    fn test_priority_order_and_interrupt() {
        let mut set = BehaviorSet::new()
            .with(Chase::default())
            .with(Flee::new(0.3, 200.0));
        let mut core = core_at(Vec2::ZERO, Some(Vec2::new(150.0, 0.0)));
        core.perception.health_fraction = 1.0;

        assert!(set.update(&mut core, 16.0));
        assert_eq!(set.active_name(), Some("chase"));
        assert!(core.body.velocity.x > 0.0);

        core.perception.health_fraction = 0.1;
        assert!(set.update(&mut core, 16.0));
        assert_eq!(set.active_name(), Some("flee"));
        assert!(core.body.velocity.x < 0.0);
    }

    #[test]
    fn test_empty_or_unwilling_set_reports_inactive() {
        let mut set = BehaviorSet::new().with(Formation::default());
        let mut core = core_at(Vec2::ZERO, None);
        assert!(!set.update(&mut core, 16.0));
        assert_eq!(set.active_name(), None);
        assert!(!BehaviorSet::new().update(&mut core, 16.0));
    }

    #[test]
    fn test_chase_leads_moving_target() {
        let mut chase = Chase::new(1.0);
        let mut core = core_at(Vec2::ZERO, Some(Vec2::new(300.0, 0.0)));
        for step in 1..=30 {
            core.perception.target_position = Some(Vec2::new(300.0, step as f32 * 1.6));
            chase.execute(&mut core, 16.0);
        }
        let v = chase.velocity_estimate();
        assert!(v.y > 50.0 && v.y <= 100.0, "estimate {v:?}");
        let target = Vec2::new(300.0, 48.0);
        assert!(chase.predicted(target).y > target.y);
        assert!(core.body.velocity.y > 0.0, "steers toward the lead point");

        chase.on_interrupt(&mut core);
        assert_eq!(chase.velocity_estimate(), Vec2::ZERO);
    }

    #[test]
    fn test_zero_anticipation_aims_at_target() {
        let mut chase = Chase::new(0.0);
        let mut core = core_at(Vec2::ZERO, Some(Vec2::new(100.0, 0.0)));
        core.perception.target_position = Some(Vec2::new(100.0, 10.0));
        chase.execute(&mut core, 16.0);
        assert_eq!(chase.predicted(Vec2::new(1.0, 2.0)), Vec2::new(1.0, 2.0));
    }

    #[test]
    fn test_patrol_cycles_waypoints() {
        let mut patrol = Patrol::new(vec![Vec2::ZERO, Vec2::new(100.0, 0.0)], 50.0);
        let mut core = core_at(Vec2::ZERO, None);
        assert!(patrol.should_activate(&core));
        for _ in 0..4 {
            patrol.execute(&mut core, 16.0);
        }
        assert_eq!(patrol.current_waypoint(), 1);
        patrol.execute(&mut core, 16.0);
        assert!(core.body.velocity.x > 0.0);

        core.perception.target_position = Some(Vec2::ONE);
        assert!(!patrol.should_activate(&core));
    }

    #[test]
    fn test_strafe_band_and_side_switch() {
        let mut strafe = Strafe::new(50.0, 150.0, 100.0);
        let mut core = core_at(Vec2::ZERO, Some(Vec2::new(100.0, 0.0)));
        assert!(strafe.should_activate(&core));
        strafe.execute(&mut core, 16.0);
        assert!(core.body.velocity.x.abs() < 1e-3 && core.body.velocity.y != 0.0);
        strafe.execute(&mut core, 100.0);
        assert_eq!(strafe.side(), -1.0);

        core.perception.target_position = Some(Vec2::new(400.0, 0.0));
        assert!(!strafe.should_activate(&core));
    }

    #[test]
    fn test_cover_on_far_side() {
        let cover = CoverFire::new(vec![Vec2::new(-40.0, 0.0), Vec2::new(40.0, 0.0), Vec2::new(900.0, 0.0)], 100.0);
        let threat = Vec2::new(200.0, 0.0);
        assert_eq!(cover.best_cover(Vec2::ZERO, threat), Some(Vec2::new(-40.0, 0.0)));
        assert_eq!(cover.best_cover(Vec2::new(5000.0, 0.0), threat), None);
    }

    #[test]
    fn test_surround_and_formation() {
        let surround = Surround::new(100.0, std::f32::consts::FRAC_PI_2);
        let spot = surround.spot(Vec2::new(10.0, 10.0));
        assert!((spot - Vec2::new(10.0, 110.0)).length() < 1e-3);

        let mut core = core_at(Vec2::ZERO, None);
        let mut keeper = Formation::default();
        assert!(!keeper.should_activate(&core));
        core.formation_slot = Some(Vec2::new(0.0, -80.0));
        assert!(keeper.should_activate(&core));
        keeper.execute(&mut core, 16.0);
        assert!(core.body.velocity.y < 0.0);
    }
}
