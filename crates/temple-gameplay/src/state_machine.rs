//! Generic finite state machine.
//!
//! Used identically by the player, every enemy archetype and the boss. The
//! machine owns its context value; hooks and conditions receive it each tick.
//!
//! Per [`StateMachine::update`]:
//! 1. time-in-state accumulates,
//! 2. the active state's update hook runs,
//! 3. transitions out of the active state are checked in descending priority
//!    (ties keep registration order) and the first one that is allowed fires.
//!
//! At most one transition fires per tick.

use std::fmt::Debug;
use std::hash::Hash;

use ahash::AHashMap;
use temple_common::EntityId;
use tracing::debug;

use crate::events::{topics, EventBus, EventPayload, GameEvent, StateChangeEvent};

type EnterHook<C> = Box<dyn FnMut(&mut C)>;
type UpdateHook<C> = Box<dyn FnMut(&mut C, f32)>;
type Condition<C> = Box<dyn Fn(&C, f32) -> bool>;

/// Hooks for one state.
pub struct State<C> {
    on_enter: Option<EnterHook<C>>,
    on_update: Option<UpdateHook<C>>,
    on_exit: Option<EnterHook<C>>,
}

impl<C> Default for State<C> {
    fn default() -> Self {
        Self {
            on_enter: None,
            on_update: None,
            on_exit: None,
        }
    }
}

impl<C> State<C> {
    /// Creates a state with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the enter hook (builder pattern).
    #[must_use]
    pub fn on_enter(mut self, hook: impl FnMut(&mut C) + 'static) -> Self {
        self.on_enter = Some(Box::new(hook));
        self
    }

    /// Sets the per-tick hook, called with the tick length in ms (builder pattern).
    #[must_use]
    pub fn on_update(mut self, hook: impl FnMut(&mut C, f32) + 'static) -> Self {
        self.on_update = Some(Box::new(hook));
        self
    }

    /// Sets the exit hook (builder pattern).
    #[must_use]
    pub fn on_exit(mut self, hook: impl FnMut(&mut C) + 'static) -> Self {
        self.on_exit = Some(Box::new(hook));
        self
    }
}

/// A guarded edge between two states.
pub struct Transition<C, S> {
    from: Option<S>,
    to: S,
    condition: Condition<C>,
    automatic: bool,
    priority: i32,
}

impl<C, S: Copy + Eq> Transition<C, S> {
    /// Automatic transition from `from` to `to` that always passes its guard.
    #[must_use]
    pub fn new(from: S, to: S) -> Self {
        Self {
            from: Some(from),
            to,
            condition: Box::new(|_, _| true),
            automatic: true,
            priority: 0,
        }
    }

    /// Transition into `to` from any other state.
    #[must_use]
    pub fn from_any(to: S) -> Self {
        Self {
            from: None,
            ..Self::new(to, to)
        }
    }

    /// Sets the guard; it receives the context and the time in the current state (ms).
    #[must_use]
    pub fn when(mut self, condition: impl Fn(&C, f32) -> bool + 'static) -> Self {
        self.condition = Box::new(condition);
        self
    }

    /// Only fires when requested (builder pattern).
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.automatic = false;
        self
    }

    /// Sets the priority (builder pattern).
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn leaves(&self, active: S) -> bool {
        match self.from {
            Some(from) => from == active,
            None => self.to != active,
        }
    }
}

/// Finite state machine over context `C` and state key `S`.
pub struct StateMachine<C, S> {
    context: C,
    states: AHashMap<S, State<C>>,
    transitions: Vec<Transition<C, S>>,
    active: Option<S>,
    previous: Option<S>,
    time_in_state: f32,
    requested: Option<S>,
    observer: Option<(EventBus, EntityId)>,
}

impl<C, S: Copy + Eq + Hash + Debug> StateMachine<C, S> {
    /// Creates a stopped machine owning `context`.
    #[must_use]
    pub fn new(context: C) -> Self {
        Self {
            context,
            states: AHashMap::new(),
            transitions: Vec::new(),
            active: None,
            previous: None,
            time_in_state: 0.0,
            requested: None,
            observer: None,
        }
    }

    /// Publishes `state:change` for `entity` on every transition (builder pattern).
    #[must_use]
    pub fn with_observer(mut self, bus: EventBus, entity: EntityId) -> Self {
        self.observer = Some((bus, entity));
        self
    }

    /// Registers a state, replacing any existing one with the same key.
    pub fn add_state(&mut self, key: S, state: State<C>) {
        self.states.insert(key, state);
    }

    /// Registers a transition.
    pub fn add_transition(&mut self, transition: Transition<C, S>) {
        // Insert after every transition of equal or higher priority.
        let index = self
            .transitions
            .iter()
            .position(|t| t.priority < transition.priority)
            .unwrap_or(self.transitions.len());
        self.transitions.insert(index, transition);
    }

    /// Enters `initial`. Returns false if the state is unknown.
    pub fn start(&mut self, initial: S) -> bool {
        if !self.states.contains_key(&initial) {
            return false;
        }
        if self.active.is_some() {
            self.stop();
        }
        self.active = Some(initial);
        self.previous = None;
        self.time_in_state = 0.0;
        self.requested = None;
        if let Some(hook) = self
            .states
            .get_mut(&initial)
            .and_then(|s| s.on_enter.as_mut())
        {
            hook(&mut self.context);
        }
        true
    }

    /// Replaces the context and returns the old one.
    pub fn set_context(&mut self, context: C) -> C {
        std::mem::replace(&mut self.context, context)
    }

    /// Current context.
    #[must_use]
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Current context, mutably.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Active state, `None` while stopped.
    #[must_use]
    pub fn current(&self) -> Option<S> {
        self.active
    }

    /// State active before the last transition.
    #[must_use]
    pub fn previous(&self) -> Option<S> {
        self.previous
    }

    /// Whether `state` is active.
    #[must_use]
    pub fn is_in(&self, state: S) -> bool {
        self.active == Some(state)
    }

    /// Whether the machine has been started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Milliseconds spent in the active state.
    #[must_use]
    pub fn time_in_state(&self) -> f32 {
        self.time_in_state
    }

    /// Advances one tick. Returns the new state if a transition fired.
    pub fn update(&mut self, dt_ms: f32) -> Option<S> {
        let active = self.active?;
        self.time_in_state += dt_ms.max(0.0);
        if let Some(hook) = self
            .states
            .get_mut(&active)
            .and_then(|s| s.on_update.as_mut())
        {
            hook(&mut self.context, dt_ms);
        }

        // An update hook may have stopped the machine.
        let active = self.active?;
        let requested = self.requested.take();
        let target = self
            .transitions
            .iter()
            .filter(|t| t.leaves(active))
            .find(|t| {
                (t.automatic || requested == Some(t.to))
                    && (t.condition)(&self.context, self.time_in_state)
            })
            .map(|t| t.to)?;
        self.switch(target);
        Some(target)
    }

    /// Transitions immediately if a registered transition to `target` passes its guard.
    pub fn transition_to(&mut self, target: S) -> bool {
        let Some(active) = self.active else {
            return false;
        };
        let allowed = self
            .transitions
            .iter()
            .any(|t| t.to == target && t.leaves(active) && (t.condition)(&self.context, self.time_in_state));
        if allowed {
            self.switch(target);
        }
        allowed
    }

    /// Asks for `target` at the next update; manual transitions only fire this way.
    pub fn request(&mut self, target: S) {
        self.requested = Some(target);
    }

    /// Exits the active state and stops.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(hook) = self
                .states
                .get_mut(&active)
                .and_then(|s| s.on_exit.as_mut())
            {
                hook(&mut self.context);
            }
        }
        self.requested = None;
        self.time_in_state = 0.0;
    }

    fn switch(&mut self, target: S) {
        let Some(from) = self.active else {
            return;
        };
        if let Some(hook) = self.states.get_mut(&from).and_then(|s| s.on_exit.as_mut()) {
            hook(&mut self.context);
        }
        self.previous = Some(from);
        self.active = Some(target);
        self.time_in_state = 0.0;
        if let Some(hook) = self
            .states
            .get_mut(&target)
            .and_then(|s| s.on_enter.as_mut())
        {
            hook(&mut self.context);
        }
        debug!("state {:?} -> {:?}", from, target);
        if let Some((bus, entity)) = &self.observer {
            bus.emit(GameEvent::new(
                topics::STATE_CHANGE,
                EventPayload::StateChange(StateChangeEvent {
                    entity: *entity,
                    from: format!("{from:?}"),
                    to: format!("{target:?}"),
                }),
            ));
        }
    }
}

impl<C, S: Debug> Debug for StateMachine<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("active", &self.active)
            .field("time_in_state", &self.time_in_state)
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Light {
        Red,
        Green,
        Yellow,
    }

    #[derive(Default)]
    struct Ctx {
        go: bool,
        log: Vec<&'static str>,
        ticks: u32,
    }

    fn machine() -> StateMachine<Ctx, Light> {
        let mut m = StateMachine::new(Ctx::default());
        m.add_state(
            Light::Red,
            State::new()
                .on_enter(|c: &mut Ctx| c.log.push("enter red"))
                .on_update(|c: &mut Ctx, _| c.ticks += 1)
                .on_exit(|c: &mut Ctx| c.log.push("exit red")),
        );
        m.add_state(Light::Green, State::new().on_enter(|c: &mut Ctx| c.log.push("enter green")));
        m.add_state(Light::Yellow, State::new());
        m
    }

    #[test]
    fn test_start_and_hooks_order() {
        let mut m = machine();
        m.add_transition(Transition::new(Light::Red, Light::Green).when(|c: &Ctx, _| c.go));
        assert!(m.start(Light::Red));
        assert_eq!(m.update(16.0), None);
        m.context_mut().go = true;
        assert_eq!(m.update(16.0), Some(Light::Green));
        assert_eq!(m.context().log, vec!["enter red", "exit red", "enter green"]);
        assert_eq!(m.context().ticks, 2);
        assert_eq!(m.time_in_state(), 0.0);
        assert_eq!(m.previous(), Some(Light::Red));
    }

    #[test]
    fn test_priority_and_registration_order() {
        let mut m = machine();
        m.add_transition(Transition::new(Light::Red, Light::Yellow));
        m.add_transition(Transition::new(Light::Red, Light::Green));
        m.start(Light::Red);
        assert_eq!(m.update(1.0), Some(Light::Yellow), "first registered wins ties");

        let mut m = machine();
        m.add_transition(Transition::new(Light::Red, Light::Yellow));
        m.add_transition(Transition::new(Light::Red, Light::Green).priority(100));
        m.start(Light::Red);
        assert_eq!(m.update(1.0), Some(Light::Green));
    }

    #[test]
    fn test_one_transition_per_tick() {
        let mut m = machine();
        m.add_transition(Transition::new(Light::Red, Light::Green));
        m.add_transition(Transition::new(Light::Green, Light::Yellow));
        m.start(Light::Red);
        assert_eq!(m.update(1.0), Some(Light::Green));
        assert_eq!(m.update(1.0), Some(Light::Yellow));
    }

    #[test]
    fn test_manual_needs_request() {
        let mut m = machine();
        m.add_transition(Transition::new(Light::Red, Light::Green).manual());
        m.start(Light::Red);
        assert_eq!(m.update(1.0), None);
        m.request(Light::Green);
        assert!(m.is_in(Light::Red), "deferred");
        assert_eq!(m.update(1.0), Some(Light::Green));
    }

    #[test]
    fn test_transition_to_is_guarded() {
        let mut m = machine();
        m.add_transition(Transition::new(Light::Red, Light::Green).manual().when(|c: &Ctx, _| c.go));
        m.start(Light::Red);
        assert!(!m.transition_to(Light::Green));
        assert!(!m.transition_to(Light::Yellow), "no such edge");
        m.context_mut().go = true;
        assert!(m.transition_to(Light::Green));
        assert!(m.is_in(Light::Green));
    }

    #[test]
    fn test_from_any_and_time_guard() {
        let mut m = machine();
        m.add_transition(Transition::new(Light::Red, Light::Green).when(|_, t| t >= 100.0));
        m.add_transition(Transition::from_any(Light::Yellow).when(|c: &Ctx, _| c.go).priority(1000));
        m.start(Light::Red);
        assert_eq!(m.update(50.0), None);
        assert_eq!(m.update(50.0), Some(Light::Green));
        m.context_mut().go = true;
        assert_eq!(m.update(1.0), Some(Light::Yellow));
        assert_eq!(m.update(1.0), None, "does not re-enter itself");
    }

    #[test]
    fn test_observer_and_stop() {
        let bus = EventBus::new();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let s = std::rc::Rc::clone(&seen);
        bus.on(topics::STATE_CHANGE, 0, move |e| {
            if let EventPayload::StateChange(change) = &e.payload {
                s.borrow_mut().push(change.to.clone());
            }
        });
        let mut m = machine().with_observer(bus, EntityId::from_raw(3));
        m.add_transition(Transition::new(Light::Red, Light::Green));
        m.start(Light::Red);
        m.update(1.0);
        assert_eq!(*seen.borrow(), vec!["Green".to_owned()]);

        m.stop();
        assert!(!m.is_running());
        assert_eq!(m.update(1.0), None);
    }

    proptest! {
        #[test]
        fn prop_time_resets_on_transition(dts in proptest::collection::vec(0.0f32..50.0, 1..40)) {
            let mut m = machine();
            m.add_transition(Transition::new(Light::Red, Light::Green).when(|_, t| t > 60.0));
            m.add_transition(Transition::new(Light::Green, Light::Red).when(|_, t| t > 30.0));
            m.start(Light::Red);
            for dt in dts {
                let fired = m.update(dt);
                prop_assert!(m.time_in_state() >= 0.0);
                prop_assert!(m.current().is_some());
                if fired.is_some() {
                    prop_assert_eq!(m.time_in_state(), 0.0);
                }
            }
        }
    }
}
