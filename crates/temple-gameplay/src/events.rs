//! Event bus for inter-system communication.
//!
//! Combat, AI and squad code never hold references to UI or audio. They
//! publish [`GameEvent`]s on a shared [`EventBus`] and whoever cares subscribes.
//!
//! Delivery is synchronous and re-entrant: a handler may emit further events
//! from inside its callback. Handlers are ordered by descending priority, ties
//! by registration order, and any handler may cancel the rest of an emission.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use temple_common::{EntityId, SimClock, SquadId, Vec2};

use crate::attack_data::{AttackType, KnockbackKind};
use crate::block::BlockResult;
use crate::boss::BossForm;
use crate::faction::Faction;
use crate::damage_calc::DamageKind;
use crate::squad::{FormationType, SquadState};

/// Stable topic names consumed by UI, audio and feedback layers.
pub mod topics {
    /// Damage applied to an entity.
    pub const COMBAT_DAMAGE: &str = "combat:damage";
    /// An entity died.
    pub const COMBAT_DEATH: &str = "combat:death";
    /// A hitbox connected with a hurtbox.
    pub const COMBAT_HIT: &str = "combat:hit";
    /// Any block outcome (manual or automatic).
    pub const COMBAT_BLOCK: &str = "combat:block";
    /// Canonical "something visible happened" event.
    pub const COMBAT_FEEDBACK: &str = "combat:feedback";
    /// Block raised.
    pub const COMBAT_BLOCK_START: &str = "combat:block_start";
    /// Block lowered.
    pub const COMBAT_BLOCK_END: &str = "combat:block_end";
    /// Block absorbed a hit.
    pub const COMBAT_BLOCK_SUCCESS: &str = "combat:block_success";
    /// Block broken by stamina exhaustion.
    pub const COMBAT_GUARD_BREAK: &str = "combat:guard_break";
    /// Perfect parry.
    pub const COMBAT_PARRY_SUCCESS: &str = "combat:parry_success";
    /// Knockback started.
    pub const COMBAT_KNOCKBACK: &str = "combat:knockback";
    /// Knockback finished.
    pub const COMBAT_KNOCKBACK_END: &str = "combat:knockback_end";
    /// Stagger meter filled.
    pub const COMBAT_STAGGER_BREAK: &str = "combat:stagger_break";
    /// Force energy spent.
    pub const FORCE_POWER_USED: &str = "force:power_used";
    /// Force energy back to full.
    pub const FORCE_RECHARGED: &str = "force:recharged";
    /// Enemy took damage.
    pub const ENEMY_DAMAGED: &str = "enemy:damaged";
    /// Enemy died.
    pub const ENEMY_DEATH: &str = "enemy:death";
    /// Enemy started an attack.
    pub const ENEMY_ATTACK: &str = "enemy:attack";
    /// Enemy parried.
    pub const ENEMY_PARRY: &str = "enemy:parry";
    /// Enemy stance/form changed.
    pub const ENEMY_STANCE_CHANGE: &str = "enemy:stance_change";
    /// Boss changed lightsaber form.
    pub const BOSS_PHASE_TRANSITION: &str = "boss:phase_transition";
    /// Boss defeated.
    pub const BOSS_DEFEATED: &str = "boss:defeated";
    /// Boss calls in apprentices.
    pub const BOSS_SUMMON_APPRENTICES: &str = "boss:summon_apprentices";
    /// Boss enraged after the fight dragged on.
    pub const BOSS_ENRAGED: &str = "boss:enraged";
    /// Squad state changed.
    pub const SQUAD_STATE_CHANGE: &str = "squad:state_change";
    /// Squad formation changed.
    pub const SQUAD_FORMATION_CHANGE: &str = "squad:formation_change";
    /// A state machine changed state.
    pub const STATE_CHANGE: &str = "state:change";
}

/// Damage applied to an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageEvent {
    /// Source entity (None for scripted damage)
    pub attacker: Option<EntityId>,
    /// Damaged entity
    pub defender: EntityId,
    /// Damage applied
    pub damage: f32,
    /// Health left afterwards
    pub remaining_health: f32,
    /// UI damage category
    pub kind: DamageKind,
}

/// A hitbox touched a hurtbox.
#[derive(Debug, Clone, PartialEq)]
pub struct HitEvent {
    /// Hitbox owner
    pub attacker: EntityId,
    /// Struck entity
    pub defender: EntityId,
    /// Attack id
    pub attack_id: String,
    /// Overlap center
    pub position: Vec2,
}

/// Everything the presentation layer needs to show a hit.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEvent {
    /// Where the hit landed
    pub hit_position: Vec2,
    /// Final damage
    pub damage: f32,
    /// Damage category for colouring numbers
    pub damage_kind: DamageKind,
    /// Attack weight class
    pub hit_type: AttackType,
    /// How the defender's guard handled it
    pub block: BlockResult,
    /// Attacker
    pub attacker_id: EntityId,
    /// Defender
    pub defender_id: EntityId,
    /// Attacker's combo counter at the time of the hit
    pub combo_count: u32,
    /// Hitstun inflicted (ms)
    pub hitstun_ms: f32,
}

/// An entity died.
#[derive(Debug, Clone, PartialEq)]
pub struct DeathEvent {
    /// Who died
    pub entity: EntityId,
    /// Who dealt the last hit
    pub killer: Option<EntityId>,
    /// Faction of the dead entity
    pub faction: Faction,
}

/// Block / parry outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEvent {
    /// Blocking entity
    pub defender: EntityId,
    /// Attacker, if a hit triggered the event
    pub attacker: Option<EntityId>,
    /// Outcome
    pub result: BlockResult,
    /// Defender stamina afterwards
    pub stamina: f32,
    /// Damage absorbed
    pub damage_blocked: f32,
}

/// Knockback applied or finished.
#[derive(Debug, Clone, PartialEq)]
pub struct KnockbackEvent {
    /// Moved entity
    pub entity: EntityId,
    /// Initial velocity (zero on end)
    pub velocity: Vec2,
    /// Stun duration (ms)
    pub stun_ms: f32,
    /// Archetype
    pub kind: KnockbackKind,
}

/// Force energy spent or refilled.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceEvent {
    /// Force user
    pub entity: EntityId,
    /// Power (attack id) or empty on recharge
    pub power: String,
    /// Energy spent
    pub cost: f32,
    /// Energy left
    pub remaining: f32,
}

/// Attack started.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackEvent {
    /// Attacker
    pub entity: EntityId,
    /// Attack id
    pub attack_id: String,
}

/// Stance or form change.
#[derive(Debug, Clone, PartialEq)]
pub struct StanceEvent {
    /// Entity
    pub entity: EntityId,
    /// New stance name
    pub stance: String,
}

/// Boss lightsaber form change.
#[derive(Debug, Clone, PartialEq)]
pub struct BossPhaseEvent {
    /// Boss
    pub boss: EntityId,
    /// Previous form
    pub from: BossForm,
    /// New form
    pub to: BossForm,
}

/// Boss summoning reinforcements.
#[derive(Debug, Clone, PartialEq)]
pub struct SummonEvent {
    /// Boss
    pub boss: EntityId,
    /// Number of apprentices requested
    pub count: u32,
    /// Where they should appear
    pub position: Vec2,
}

/// Squad state / formation change.
#[derive(Debug, Clone, PartialEq)]
pub struct SquadEvent {
    /// Squad
    pub squad: SquadId,
    /// Squad state after the change
    pub state: SquadState,
    /// Formation after the change
    pub formation: FormationType,
}

/// State machine transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChangeEvent {
    /// Owner of the machine
    pub entity: EntityId,
    /// Previous state
    pub from: String,
    /// New state
    pub to: String,
}

/// Stagger meter filled up.
#[derive(Debug, Clone, PartialEq)]
pub struct StaggerEvent {
    /// Staggered entity
    pub entity: EntityId,
    /// Entity whose hit broke the posture
    pub source: Option<EntityId>,
}

/// Typed event payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// No payload
    None,
    /// Damage applied
    Damage(DamageEvent),
    /// Hit registered
    Hit(HitEvent),
    /// Hit feedback
    Feedback(FeedbackEvent),
    /// Death
    Death(DeathEvent),
    /// Block outcome
    Block(BlockEvent),
    /// Knockback
    Knockback(KnockbackEvent),
    /// Force energy
    Force(ForceEvent),
    /// Attack started
    Attack(AttackEvent),
    /// Stance change
    Stance(StanceEvent),
    /// Boss phase change
    BossPhase(BossPhaseEvent),
    /// Boss summon
    Summon(SummonEvent),
    /// Squad change
    Squad(SquadEvent),
    /// State machine change
    StateChange(StateChangeEvent),
    /// Stagger break
    Stagger(StaggerEvent),
}

/// An event travelling through the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct GameEvent {
    /// Topic, e.g. `combat:feedback`
    pub topic: String,
    /// Emission time (ms); stamped by the bus when absent
    pub timestamp: Option<f64>,
    /// Set by a handler to stop further delivery
    pub cancelled: bool,
    /// Typed payload
    pub payload: EventPayload,
}

impl GameEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            topic: topic.into(),
            timestamp: None,
            cancelled: false,
            payload,
        }
    }

    /// Creates an event with no payload.
    #[must_use]
    pub fn signal(topic: impl Into<String>) -> Self {
        Self::new(topic, EventPayload::None)
    }

    /// Sets an explicit timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Handle returned by subscriptions, used to unsubscribe one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Rc<dyn Fn(&mut GameEvent)>;

struct Listener {
    id: ListenerId,
    pattern: String,
    priority: i32,
    once: bool,
    handler: Handler,
}

/// Checks whether a subscription pattern matches a topic.
///
/// `*` matches everything, `prefix*` matches any topic starting with
/// `prefix`, anything else must match exactly.
#[must_use]
pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

#[derive(Default)]
struct BusInner {
    listeners: RefCell<Vec<Listener>>,
    queued: RefCell<VecDeque<GameEvent>>,
    next_id: Cell<u64>,
    clock: RefCell<Option<SimClock>>,
}

/// Event bus for broadcasting events to subscribers.
///
/// Cloning the bus yields another handle to the same subscriber list and
/// queue. The handle is single-threaded (`!Send`), matching the tick model.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.inner.listeners.borrow().len())
            .field("queued", &self.inner.queued.borrow().len())
            .finish()
    }
}

impl EventBus {
    /// Creates an empty bus. Events are stamped with 0 until a clock is attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that stamps events with the given clock.
    #[must_use]
    pub fn with_clock(clock: SimClock) -> Self {
        let bus = Self::default();
        *bus.inner.clock.borrow_mut() = Some(clock);
        bus
    }

    fn subscribe(
        &self,
        pattern: &str,
        priority: i32,
        once: bool,
        handler: impl Fn(&mut GameEvent) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        self.inner.listeners.borrow_mut().push(Listener {
            id,
            pattern: pattern.to_owned(),
            priority,
            once,
            handler: Rc::new(handler),
        });
        id
    }

    /// Subscribes a handler to a topic or wildcard pattern.
    pub fn on(
        &self,
        pattern: &str,
        priority: i32,
        handler: impl Fn(&mut GameEvent) + 'static,
    ) -> ListenerId {
        self.subscribe(pattern, priority, false, handler)
    }

    /// Subscribes a handler that is removed after its first invocation.
    pub fn once(
        &self,
        pattern: &str,
        priority: i32,
        handler: impl Fn(&mut GameEvent) + 'static,
    ) -> ListenerId {
        self.subscribe(pattern, priority, true, handler)
    }

    /// Removes every listener registered under exactly this pattern.
    pub fn off(&self, pattern: &str) {
        self.inner
            .listeners
            .borrow_mut()
            .retain(|l| l.pattern != pattern);
    }

    /// Removes a single listener. Returns false if it was already gone.
    pub fn off_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Delivers an event immediately to every matching listener.
    ///
    /// Returns the event as the handlers left it (check `cancelled`).
    pub fn emit(&self, mut event: GameEvent) -> GameEvent {
        if event.timestamp.is_none() {
            let now = self
                .inner
                .clock
                .borrow()
                .as_ref()
                .map_or(0.0, SimClock::now_ms);
            event.timestamp = Some(now);
        }
        event.cancelled = false;

        // Snapshot so handlers can subscribe, unsubscribe or emit while we iterate.
        let mut matched: Vec<(ListenerId, i32, bool, Handler)> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .filter(|l| pattern_matches(&l.pattern, &event.topic))
            .map(|l| (l.id, l.priority, l.once, Rc::clone(&l.handler)))
            .collect();
        // Stable sort keeps registration order among equal priorities.
        matched.sort_by(|a, b| b.1.cmp(&a.1));

        for (id, _, once, handler) in matched {
            if once && !self.off_listener(id) {
                // Already consumed by a nested emission.
                continue;
            }
            handler(&mut event);
            if event.cancelled {
                break;
            }
        }
        event
    }

    /// Stores an event for delivery on the next [`flush`](Self::flush).
    pub fn queue(&self, event: GameEvent) {
        self.inner.queued.borrow_mut().push_back(event);
    }

    /// Delivers queued events in FIFO order. Events queued while flushing
    /// wait for the next flush. Returns the number delivered.
    pub fn flush(&self) -> usize {
        let pending = std::mem::take(&mut *self.inner.queued.borrow_mut());
        let count = pending.len();
        for event in pending {
            self.emit(event);
        }
        count
    }

    /// Returns the number of pending queued events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.queued.borrow().len()
    }

    /// Whether any listener (exact or wildcard) would receive this topic.
    #[must_use]
    pub fn has_listeners(&self, topic: &str) -> bool {
        self.inner
            .listeners
            .borrow()
            .iter()
            .any(|l| pattern_matches(&l.pattern, topic))
    }

    /// Number of listeners registered under exactly this pattern.
    #[must_use]
    pub fn listener_count(&self, pattern: &str) -> usize {
        self.inner
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.pattern == pattern)
            .count()
    }

    /// Removes every listener and queued event.
    pub fn clear(&self) {
        self.inner.listeners.borrow_mut().clear();
        self.inner.queued.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(bus: &EventBus, pattern: &str, priority: i32, tag: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) {
        let log = Rc::clone(log);
        bus.on(pattern, priority, move |_| log.borrow_mut().push(tag));
    }

    #[test]
    fn test_priority_then_registration_order() {
        let bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        recorder(&bus, "combat:hit", 0, "low", &log);
        recorder(&bus, "combat:hit", 10, "high-a", &log);
        recorder(&bus, "combat:*", 10, "high-b", &log);
        recorder(&bus, "*", 5, "mid", &log);

        bus.emit(GameEvent::signal("combat:hit"));
        assert_eq!(*log.borrow(), vec!["high-a", "high-b", "mid", "low"]);
    }

    #[test]
    fn test_wildcards() {
        assert!(pattern_matches("*", "squad:state_change"));
        assert!(pattern_matches("combat:*", "combat:feedback"));
        assert!(!pattern_matches("combat:*", "enemy:death"));
        assert!(pattern_matches("enemy:death", "enemy:death"));
        assert!(!pattern_matches("enemy:death", "enemy:deathly"));
    }

    #[test]
    fn test_cancel_stops_propagation() {
        let bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.on("combat:damage", 10, |e| e.cancelled = true);
        recorder(&bus, "combat:damage", 0, "late", &log);

        let out = bus.emit(GameEvent::signal("combat:damage"));
        assert!(out.cancelled);
        assert!(log.borrow().is_empty());

        // Re-emitting resets the flag before delivery.
        let out = bus.emit(out);
        assert!(out.cancelled);
    }

    #[test]
    fn test_once_runs_exactly_once() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        bus.once("*", 0, move |_| c.set(c.get() + 1));

        bus.emit(GameEvent::signal("combat:hit"));
        bus.emit(GameEvent::signal("enemy:death"));
        assert_eq!(count.get(), 1);
        assert!(!bus.has_listeners("combat:hit"));
    }

    #[test]
    fn test_once_under_reentrant_emit() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0));
        let inner_bus = bus.clone();
        bus.on("outer", 10, move |_| {
            inner_bus.emit(GameEvent::signal("outer:nested"));
        });
        let c = Rc::clone(&count);
        bus.once("outer*", 0, move |_| c.set(c.get() + 1));

        bus.emit(GameEvent::signal("outer"));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_queue_and_flush_fifo() {
        let bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let requeue = bus.clone();
        bus.on("*", 0, move |e| {
            l.borrow_mut().push(e.topic.clone());
            if e.topic == "a" {
                requeue.queue(GameEvent::signal("late"));
            }
        });

        bus.queue(GameEvent::signal("a"));
        bus.queue(GameEvent::signal("b"));
        assert!(log.borrow().is_empty());
        assert_eq!(bus.pending_count(), 2);

        assert_eq!(bus.flush(), 2);
        assert_eq!(*log.borrow(), vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(bus.pending_count(), 1);

        bus.flush();
        assert_eq!(log.borrow().last().map(String::as_str), Some("late"));
    }

    #[test]
    fn test_timestamp_stamped_from_clock() {
        let clock = SimClock::starting_at(250.0);
        let bus = EventBus::with_clock(clock);
        let out = bus.emit(GameEvent::signal("x"));
        assert_eq!(out.timestamp, Some(250.0));

        let out = bus.emit(GameEvent::signal("x").at(5.0));
        assert_eq!(out.timestamp, Some(5.0));
    }

    #[test]
    fn test_off_and_counts() {
        let bus = EventBus::new();
        let id = bus.on("combat:hit", 0, |_| {});
        bus.on("combat:hit", 0, |_| {});
        bus.on("combat:*", 0, |_| {});
        assert_eq!(bus.listener_count("combat:hit"), 2);

        assert!(bus.off_listener(id));
        assert!(!bus.off_listener(id));
        bus.off("combat:hit");
        assert_eq!(bus.listener_count("combat:hit"), 0);
        assert!(bus.has_listeners("combat:hit"), "wildcard still matches");

        bus.clear();
        assert!(!bus.has_listeners("combat:hit"));
    }
}
