use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::constants::MAX_DEFERRED_CHAIN;
use crate::error::HookError;
use crate::save_codec::CharacterSaveData;
use crate::types::{
    CharacterDefinition, CharacterHandle, HookPhase, LifecycleState, PlayerId, SessionId,
};

/// Character-supplied behavior. Every method defaults to a no-op.
pub trait CharacterHooks {
    fn prepare(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn enable(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn disable(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once per player the first time it is bound to this character.
    fn player_added(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _session: SessionId,
        _player: PlayerId,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn save(&mut self, _data: &mut CharacterSaveData) -> Result<(), HookError> {
        Ok(())
    }

    fn load(&mut self, _data: &CharacterSaveData) -> Result<(), HookError> {
        Ok(())
    }
}

pub struct NoopHooks;

impl CharacterHooks for NoopHooks {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    Prepare,
    Enable,
    Disable,
}

/// Handed to hooks. Transitions requested here run after the current one completes.
pub struct HookContext<'a> {
    character: &'a str,
    phase: HookPhase,
    deferred: &'a mut Vec<Request>,
}

impl HookContext<'_> {
    pub fn character(&self) -> &str {
        self.character
    }

    pub fn phase(&self) -> HookPhase {
        self.phase
    }

    pub fn request_prepare(&mut self) {
        self.deferred.push(Request::Prepare);
    }

    pub fn request_enable(&mut self) {
        self.deferred.push(Request::Enable);
    }

    pub fn request_disable(&mut self) {
        self.deferred.push(Request::Disable);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TransitionStats {
    pub prepares: u32,
    pub enables: u32,
    pub disables: u32,
    pub mismatches: u32,
    #[serde(rename = "hookFailures")]
    pub hook_failures: u32,
    #[serde(rename = "droppedRequests")]
    pub dropped_requests: u32,
}

/// Counter and state are committed before a hook runs.
pub struct LifecycleController {
    character: CharacterHandle,
    state: LifecycleState,
    instance_count: u32,
    hooks: Box<dyn CharacterHooks>,
    deferred: Vec<Request>,
    stats: TransitionStats,
}

impl LifecycleController {
    pub fn new(character: CharacterHandle, hooks: Box<dyn CharacterHooks>) -> Self {
        Self {
            character,
            state: LifecycleState::Disabled,
            instance_count: 0,
            hooks,
            deferred: Vec::new(),
            stats: TransitionStats::default(),
        }
    }

    pub fn character(&self) -> &CharacterHandle {
        &self.character
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn stats(&self) -> TransitionStats {
        self.stats
    }

    pub fn request_enable(&mut self) {
        self.handle(Request::Enable);
    }

    pub fn request_disable(&mut self) {
        self.handle(Request::Disable);
    }

    /// Moves to at least `Prepared` without taking an instance.
    pub fn request_prepare(&mut self) {
        self.handle(Request::Prepare);
    }

    pub fn notify_player_added(&mut self, session: SessionId, player: PlayerId) {
        self.run_hook(HookPhase::PlayerAdded, |hooks, ctx| {
            hooks.player_added(ctx, session, player)
        });
        self.drain_deferred();
    }

    pub fn save(&mut self, data: &mut CharacterSaveData) {
        self.run_hook(HookPhase::Save, |hooks, _| hooks.save(data));
        self.drain_deferred();
    }

    pub fn load(&mut self, data: &CharacterSaveData) {
        self.run_hook(HookPhase::Load, |hooks, _| hooks.load(data));
        self.drain_deferred();
    }

    fn handle(&mut self, request: Request) {
        self.apply(request);
        self.drain_deferred();
    }

    fn apply(&mut self, request: Request) {
        match request {
            Request::Enable => {
                self.instance_count += 1;
                if self.instance_count == 1 {
                    self.drive_to(LifecycleState::Enabled);
                }
            }
            Request::Disable => {
                if self.instance_count == 0 {
                    self.stats.mismatches += 1;
                    warn!(
                        character = %self.character.name,
                        state = ?self.state,
                        "disable requested with no active instances; enable/disable calls are mismatched"
                    );
                    return;
                }
                self.instance_count -= 1;
                if self.instance_count == 0 {
                    self.drive_to(LifecycleState::Disabled);
                }
            }
            Request::Prepare => {
                if self.state == LifecycleState::Disabled {
                    self.drive_to(LifecycleState::Prepared);
                }
            }
        }
    }

    fn drive_to(&mut self, target: LifecycleState) {
        while self.state != target {
            let next = self.state.next();
            self.state = next;
            match next {
                LifecycleState::Prepared => self.stats.prepares += 1,
                LifecycleState::Enabled => self.stats.enables += 1,
                LifecycleState::Disabled => self.stats.disables += 1,
            }
            debug!(
                character = %self.character.name,
                state = ?next,
                instances = self.instance_count,
                "character lifecycle transition"
            );
            let phase = next.phase();
            self.run_hook(phase, |hooks, ctx| match phase {
                HookPhase::Prepare => hooks.prepare(ctx),
                HookPhase::Enable => hooks.enable(ctx),
                _ => hooks.disable(ctx),
            });
        }
    }

    fn drain_deferred(&mut self) {
        let mut processed = 0usize;
        while !self.deferred.is_empty() {
            let batch = std::mem::take(&mut self.deferred);
            for (offset, request) in batch.iter().enumerate() {
                if processed >= MAX_DEFERRED_CHAIN {
                    let dropped = (batch.len() - offset + self.deferred.len()) as u32;
                    self.stats.dropped_requests += dropped;
                    self.deferred.clear();
                    warn!(
                        character = %self.character.name,
                        dropped,
                        "too many transitions requested from hooks; dropping the rest"
                    );
                    return;
                }
                processed += 1;
                self.apply(*request);
            }
        }
    }

    fn run_hook<F>(&mut self, phase: HookPhase, call: F)
    where
        F: FnOnce(&mut dyn CharacterHooks, &mut HookContext<'_>) -> Result<(), HookError>,
    {
        let mut ctx = HookContext {
            character: &self.character.name,
            phase,
            deferred: &mut self.deferred,
        };
        let hooks = self.hooks.as_mut();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(hooks, &mut ctx)));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(HookError::Panicked(panic_message(payload.as_ref()))),
        };
        if let Err(error) = result {
            self.stats.hook_failures += 1;
            error!(
                character = %self.character.name,
                phase = ?phase,
                %error,
                "character hook failed"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

#[derive(Default)]
pub struct Lifecycles {
    controllers: HashMap<String, LifecycleController>,
}

impl Lifecycles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, character: CharacterHandle, hooks: Box<dyn CharacterHooks>) {
        self.controllers.insert(
            character.name.clone(),
            LifecycleController::new(character, hooks),
        );
    }

    pub fn get(&self, name: &str) -> Option<&LifecycleController> {
        self.controllers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut LifecycleController> {
        self.controllers.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LifecycleController> {
        self.controllers.values()
    }

    /// Characters without a controller are not tracked and read as `Disabled`.
    pub fn state(&self, name: &str) -> LifecycleState {
        self.get(name)
            .map(LifecycleController::state)
            .unwrap_or(LifecycleState::Disabled)
    }

    pub fn instance_count(&self, name: &str) -> u32 {
        self.get(name)
            .map(LifecycleController::instance_count)
            .unwrap_or(0)
    }

    pub fn request_enable(&mut self, character: &CharacterDefinition) {
        if let Some(controller) = self.controller_for(character) {
            controller.request_enable();
        }
    }

    pub fn request_disable(&mut self, character: &CharacterDefinition) {
        if let Some(controller) = self.controller_for(character) {
            controller.request_disable();
        }
    }

    pub fn request_prepare(&mut self, character: &CharacterDefinition) {
        if let Some(controller) = self.controller_for(character) {
            controller.request_prepare();
        }
    }

    pub fn notify_player_added(
        &mut self,
        character: &CharacterDefinition,
        session: SessionId,
        player: PlayerId,
    ) {
        if let Some(controller) = self.controller_for(character) {
            controller.notify_player_added(session, player);
        }
    }

    pub fn save(&mut self, character: &CharacterDefinition, data: &mut CharacterSaveData) {
        if let Some(controller) = self.controller_for(character) {
            controller.save(data);
        }
    }

    pub fn load(&mut self, character: &CharacterDefinition, data: &CharacterSaveData) {
        if let Some(controller) = self.controller_for(character) {
            controller.load(data);
        }
    }

    fn controller_for(&mut self, character: &CharacterDefinition) -> Option<&mut LifecycleController> {
        let controller = self.controllers.get_mut(&character.name);
        if controller.is_none() {
            debug!(character = %character.name, "no lifecycle controller for character");
        }
        controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    type EventLog = Rc<RefCell<Vec<String>>>;

    #[derive(Default)]
    struct RecordingHooks {
        log: EventLog,
        fail_on: Option<HookPhase>,
        panic_on: Option<HookPhase>,
        disable_during_enable: bool,
    }

    impl RecordingHooks {
        fn record(&self, event: &str, phase: HookPhase) -> Result<(), HookError> {
            self.log.borrow_mut().push(event.to_string());
            if self.panic_on == Some(phase) {
                panic!("{event} exploded");
            }
            if self.fail_on == Some(phase) {
                return Err(HookError::msg(format!("{event} failed")));
            }
            Ok(())
        }
    }

    impl CharacterHooks for RecordingHooks {
        fn prepare(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
            self.record("prepare", HookPhase::Prepare)
        }

        fn enable(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
            if self.disable_during_enable {
                ctx.request_disable();
            }
            self.record("enable", HookPhase::Enable)
        }

        fn disable(&mut self, _ctx: &mut HookContext<'_>) -> Result<(), HookError> {
            self.record("disable", HookPhase::Disable)
        }

        fn player_added(
            &mut self,
            _ctx: &mut HookContext<'_>,
            _session: SessionId,
            player: PlayerId,
        ) -> Result<(), HookError> {
            self.record(&format!("added {player}"), HookPhase::PlayerAdded)
        }

        fn save(&mut self, data: &mut CharacterSaveData) -> Result<(), HookError> {
            data.persistent.set("saved", true);
            self.record("save", HookPhase::Save)
        }
    }

    fn controller(hooks: RecordingHooks) -> LifecycleController {
        LifecycleController::new(
            Arc::new(CharacterDefinition::new("Tester", true, "1")),
            Box::new(hooks),
        )
    }

    fn events(log: &EventLog) -> Vec<String> {
        log.borrow().clone()
    }

    #[test]
    fn first_enable_prepares_then_enables() {
        let log = EventLog::default();
        let mut ctl = controller(RecordingHooks {
            log: log.clone(),
            ..Default::default()
        });
        ctl.request_enable();
        ctl.request_enable();
        assert_eq!(ctl.state(), LifecycleState::Enabled);
        assert_eq!(ctl.instance_count(), 2);
        assert_eq!(events(&log), vec!["prepare", "enable"]);

        ctl.request_disable();
        assert_eq!(ctl.state(), LifecycleState::Enabled);
        ctl.request_disable();
        assert_eq!(ctl.state(), LifecycleState::Disabled);
        assert_eq!(events(&log), vec!["prepare", "enable", "disable"]);
    }

    #[test]
    fn prepare_is_idempotent_and_takes_no_instance() {
        let log = EventLog::default();
        let mut ctl = controller(RecordingHooks {
            log: log.clone(),
            ..Default::default()
        });
        ctl.request_prepare();
        ctl.request_prepare();
        assert_eq!(ctl.state(), LifecycleState::Prepared);
        assert_eq!(ctl.instance_count(), 0);

        ctl.request_enable();
        assert_eq!(events(&log), vec!["prepare", "enable"]);

        ctl.request_prepare();
        assert_eq!(ctl.state(), LifecycleState::Enabled);
        assert_eq!(ctl.instance_count(), 1);
    }

    #[test]
    fn unmatched_disable_is_clamped_and_counted() {
        let log = EventLog::default();
        let mut ctl = controller(RecordingHooks {
            log: log.clone(),
            ..Default::default()
        });
        ctl.request_disable();
        assert_eq!(ctl.instance_count(), 0);
        assert_eq!(ctl.state(), LifecycleState::Disabled);
        assert_eq!(ctl.stats().mismatches, 1);
        assert!(events(&log).is_empty());

        ctl.request_enable();
        assert_eq!(ctl.instance_count(), 1);
        assert_eq!(ctl.state(), LifecycleState::Enabled);
    }

    #[test]
    fn failing_hook_still_advances_state() {
        let log = EventLog::default();
        let mut ctl = controller(RecordingHooks {
            log: log.clone(),
            fail_on: Some(HookPhase::Enable),
            ..Default::default()
        });
        ctl.request_enable();
        assert_eq!(ctl.state(), LifecycleState::Enabled);
        assert_eq!(ctl.instance_count(), 1);
        assert_eq!(ctl.stats().hook_failures, 1);

        ctl.request_disable();
        assert_eq!(ctl.state(), LifecycleState::Disabled);
        assert_eq!(ctl.stats().mismatches, 0);
    }

    #[test]
    fn panicking_hook_is_contained() {
        let log = EventLog::default();
        let mut ctl = controller(RecordingHooks {
            log: log.clone(),
            panic_on: Some(HookPhase::Prepare),
            ..Default::default()
        });
        ctl.request_enable();
        assert_eq!(ctl.state(), LifecycleState::Enabled);
        assert_eq!(ctl.stats().hook_failures, 1);
        assert_eq!(events(&log), vec!["prepare", "enable"]);
    }

    #[test]
    fn transition_requested_from_hook_runs_after_current_one() {
        let log = EventLog::default();
        let mut ctl = controller(RecordingHooks {
            log: log.clone(),
            disable_during_enable: true,
            ..Default::default()
        });
        ctl.request_enable();
        assert_eq!(events(&log), vec!["prepare", "enable", "disable"]);
        assert_eq!(ctl.state(), LifecycleState::Disabled);
        assert_eq!(ctl.instance_count(), 0);
    }

    #[test]
    fn runaway_hook_requests_are_bounded() {
        struct Restless;

        impl CharacterHooks for Restless {
            fn enable(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
                ctx.request_disable();
                Ok(())
            }

            fn disable(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
                ctx.request_enable();
                Ok(())
            }
        }

        let mut ctl = LifecycleController::new(
            Arc::new(CharacterDefinition::new("Restless", true, "1")),
            Box::new(Restless),
        );
        ctl.request_enable();
        let stats = ctl.stats();
        assert!(stats.dropped_requests > 0);
        assert_eq!(stats.enables as usize, MAX_DEFERRED_CHAIN / 2 + 1);
        assert!(stats.enables >= stats.disables);
    }

    #[test]
    fn table_ignores_unmanaged_characters() {
        let mut table = Lifecycles::new();
        let builtin = CharacterDefinition::builtin("Survivor");
        table.request_enable(&builtin);
        assert_eq!(table.state("Survivor"), LifecycleState::Disabled);
        assert_eq!(table.instance_count("Survivor"), 0);
    }

    #[test]
    fn table_routes_player_added_and_save() {
        let log = EventLog::default();
        let character = Arc::new(CharacterDefinition::new("Tester", true, "1"));
        let mut table = Lifecycles::new();
        table.insert(
            character.clone(),
            Box::new(RecordingHooks {
                log: log.clone(),
                ..Default::default()
            }),
        );
        table.notify_player_added(&character, SessionId(1), PlayerId(2));
        let mut data = CharacterSaveData::default();
        table.save(&character, &mut data);
        assert_eq!(events(&log), vec!["added player_2", "save"]);
        assert_eq!(data.persistent.get::<bool>("saved"), Some(true));
    }

    proptest! {
        #[test]
        fn hooks_fire_once_per_counter_edge(ops in prop::collection::vec(any::<bool>(), 0..64)) {
            let log = EventLog::default();
            let mut ctl = controller(RecordingHooks { log: log.clone(), ..Default::default() });
            let mut model = 0u32;
            let mut rising = 0u32;
            let mut falling = 0u32;
            let mut mismatches = 0u32;

            for enable in ops {
                if enable {
                    ctl.request_enable();
                    model += 1;
                    if model == 1 {
                        rising += 1;
                    }
                } else {
                    ctl.request_disable();
                    if model == 0 {
                        mismatches += 1;
                    } else {
                        model -= 1;
                        if model == 0 {
                            falling += 1;
                        }
                    }
                }
                prop_assert_eq!(ctl.instance_count(), model);
                prop_assert_eq!(ctl.state() == LifecycleState::Enabled, model > 0);
            }

            let stats = ctl.stats();
            prop_assert_eq!(stats.enables, rising);
            prop_assert_eq!(stats.disables, falling);
            prop_assert_eq!(stats.prepares, rising);
            prop_assert_eq!(stats.mismatches, mismatches);
        }
    }
}
