//! Per-person, per-module execution cursor
//!
//! A `Context` owns the current state, the history of visited states and the
//! stack of suspended callers while a submodule runs. `run` drives states
//! forward until one of them has to wait.
//!
//! When a state exits before the time being processed (a Delay that expired
//! between two driver ticks), the states that follow it are first processed
//! at that earlier exit time and only then at the tick time. These rewinds
//! are kept on an explicit stack of pending times rather than recursion.
//! Transitions are resolved at the time being processed, so a condition
//! that was false at a Delay's expiry is checked again on later ticks.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::calendar;
use crate::core::error::{Result, SimError};
use crate::core::types::Timestamp;
use crate::entity::person::Person;
use crate::module::definition::INITIAL;
use crate::module::registry::{Module, ModuleRegistry};
use crate::module::state::{most_recent_by_name, State};

/// Default cap on state steps within one `run`
pub const DEFAULT_ITERATION_LIMIT: usize = 10_000;

/// A suspended caller waiting for its submodule to finish
#[derive(Debug, Clone)]
struct Frame {
    module: Arc<Module>,
    call_state: State,
}

/// Outcome of processing the current state once
enum Step {
    /// Control moved on; states after this one start at `exited`
    Advanced { exited: Timestamp },
    /// Nothing more can happen at this time
    Yield,
}

#[derive(Debug, Clone)]
pub struct Context {
    registry: Arc<ModuleRegistry>,
    root: Arc<Module>,
    module: Arc<Module>,
    current: State,
    history: Vec<State>,
    stack: Vec<Frame>,
    iteration_limit: usize,
    log_history: bool,
    history_logged: bool,
}

impl Context {
    pub fn new(registry: Arc<ModuleRegistry>, module_name: &str) -> Result<Self> {
        let module = registry.require(module_name)?;
        let current = initial_state(&module)?;
        Ok(Self {
            registry,
            root: Arc::clone(&module),
            module,
            current,
            history: Vec::new(),
            stack: Vec::new(),
            iteration_limit: DEFAULT_ITERATION_LIMIT,
            log_history: false,
            history_logged: false,
        })
    }

    pub fn with_iteration_limit(mut self, limit: usize) -> Self {
        self.iteration_limit = limit;
        self
    }

    /// Log the full state history once the module finishes
    pub fn with_history_logging(mut self, enabled: bool) -> Self {
        self.log_history = enabled;
        self
    }

    /// Key of the top-level module this context runs
    pub fn module_key(&self) -> &str {
        self.root.key()
    }

    /// Key of the module currently executing (a submodule while one is called)
    pub fn current_module_key(&self) -> &str {
        self.module.key()
    }

    pub fn current_state(&self) -> &State {
        &self.current
    }

    pub fn history(&self) -> &[State] {
        &self.history
    }

    pub fn call_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn most_recent_by_name(&self, name: &str) -> Option<&State> {
        most_recent_by_name(&self.history, name)
    }

    /// False once the top-level module has reached a Terminal state
    pub fn is_active(&self) -> bool {
        !(self.current.is_terminal() && self.stack.is_empty())
    }

    pub fn validate(&self) -> Vec<String> {
        self.root.validate()
    }

    /// Advance the module as far as it can go at `time`.
    pub fn run(&mut self, time: Timestamp, person: &mut Person) -> Result<()> {
        let mut pending = vec![time];
        let mut iterations = 0;

        while let Some(&now) = pending.last() {
            iterations += 1;
            if iterations > self.iteration_limit {
                return Err(SimError::RunawayModule {
                    module: self.module.key().to_string(),
                    state: self.current.name.clone(),
                    iterations: self.iteration_limit,
                });
            }

            match self.step(now, person)? {
                Step::Advanced { exited } if exited < now => {
                    debug!(
                        module = self.module.key(),
                        state = %self.current.name,
                        at = %calendar::format(exited),
                        "Rewinding to exit time"
                    );
                    pending.push(exited);
                }
                Step::Advanced { .. } => {}
                Step::Yield => {
                    pending.pop();
                }
            }
        }

        if !self.is_active() && self.log_history && !self.history_logged {
            self.log_history_table();
            self.history_logged = true;
        }
        Ok(())
    }

    /// Perform a wellness Encounter the module is waiting on, then continue.
    ///
    /// Returns false when the current state is not waiting for one.
    pub fn perform_wellness_encounter(&mut self, time: Timestamp, person: &mut Person) -> Result<bool> {
        if !self.current.is_waiting_for_wellness() {
            return Ok(false);
        }
        debug!(
            module = self.module.key(),
            state = %self.current.name,
            "Performing scheduled wellness encounter"
        );
        self.current
            .perform_encounter(&mut self.history, time, person, false)?;
        self.run(time, person)?;
        Ok(true)
    }

    fn step(&mut self, time: Timestamp, person: &mut Person) -> Result<Step> {
        if let Some(submodule) = self.current.pending_call() {
            let submodule = submodule.to_string();
            self.call_submodule(time, &submodule)?;
            return Ok(Step::Advanced { exited: time });
        }

        if !self.current.run(&mut self.history, time, person)? {
            if self.current.is_terminal() && !self.stack.is_empty() {
                self.return_from_submodule(time)?;
                return Ok(Step::Advanced { exited: time });
            }
            return Ok(Step::Yield);
        }

        let exited = self.current.exited.unwrap_or(time);
        let transition = self.current.transition().ok_or_else(|| SimError::InvalidTransition {
            module: self.module.key().to_string(),
            state: self.current.name.clone(),
            reason: "state has no transition".to_string(),
        })?;

        let Some(next) = transition.follow(&self.history, person, time)? else {
            trace!(state = %self.current.name, "No transition available");
            self.current.hold();
            return Ok(Step::Yield);
        };

        // A self-loop keeps one history entry; a loop that never leaves is
        // caught by the iteration limit
        if next == self.current.name {
            self.current.restart(exited);
            return Ok(Step::Advanced { exited });
        }

        let def = self.module.shared_state_def(&next)?;
        trace!(
            module = self.module.key(),
            from = %self.current.name,
            to = %next,
            "Transition"
        );
        let mut next_state = State::new(self.module.key(), &next, def);
        next_state.entered = Some(exited);
        next_state.start_time = Some(exited);
        let previous = std::mem::replace(&mut self.current, next_state);
        // CallSubmodule states were already recorded when the call began
        if !previous.is_call_submodule() {
            self.history.push(previous);
        }
        Ok(Step::Advanced { exited })
    }

    fn call_submodule(&mut self, time: Timestamp, name: &str) -> Result<()> {
        let submodule = self.registry.require(name)?;
        debug!(
            caller = self.module.key(),
            submodule = submodule.key(),
            depth = self.stack.len() + 1,
            "Calling submodule"
        );

        self.current.called = true;
        if self.current.entered.is_none() {
            self.current.entered = Some(time);
        }
        self.current.exited = Some(time);
        self.history.push(self.current.clone());

        let initial = initial_state(&submodule)?;
        let call_state = std::mem::replace(&mut self.current, initial);
        let caller = std::mem::replace(&mut self.module, submodule);
        self.stack.push(Frame {
            module: caller,
            call_state,
        });
        Ok(())
    }

    fn return_from_submodule(&mut self, time: Timestamp) -> Result<()> {
        let frame = self.stack.pop().ok_or_else(|| SimError::InvalidTransition {
            module: self.module.key().to_string(),
            state: self.current.name.clone(),
            reason: "return with empty call stack".to_string(),
        })?;
        debug!(
            submodule = self.module.key(),
            caller = frame.module.key(),
            "Returning from submodule"
        );

        self.current.exited = Some(time);
        let mut call_state = frame.call_state;
        call_state.returned = true;
        call_state.exited = None;
        let terminal = std::mem::replace(&mut self.current, call_state);
        self.history.push(terminal);
        self.module = frame.module;
        Ok(())
    }

    fn log_history_table(&self) {
        debug!(module = self.root.key(), "{:<26} | {:<26} | STATE", "ENTERED", "EXITED");
        for state in self.history.iter().chain(std::iter::once(&self.current)) {
            let entered = state.entered.map(calendar::format).unwrap_or_default();
            let exited = state.exited.map(calendar::format).unwrap_or_default();
            debug!(
                module = self.root.key(),
                "{:<26} | {:<26} | {}::{}",
                entered,
                exited,
                state.module,
                state.name
            );
        }
    }
}

fn initial_state(module: &Module) -> Result<State> {
    let def = module
        .shared_state_def(INITIAL)
        .map_err(|_| SimError::MissingInitial(module.key().to_string()))?;
    Ok(State::new(module.key(), INITIAL, def))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calendar::{timestamp, MS_PER_DAY};
    use crate::core::types::EntityId;
    use serde_json::json;

    fn registry(modules: &[(&str, serde_json::Value)]) -> Arc<ModuleRegistry> {
        let mut registry = ModuleRegistry::new();
        for (key, doc) in modules {
            registry.load_str(key, &doc.to_string()).unwrap();
        }
        Arc::new(registry)
    }

    fn person() -> Person {
        Person::born(EntityId::from_seed(5, 0), 5, timestamp(1990, 1, 1).unwrap())
    }

    fn names(context: &Context) -> Vec<&str> {
        context.history().iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_runs_to_terminal() {
        let reg = registry(&[(
            "simple",
            json!({"name": "Simple", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Middle"},
                "Middle": {"type": "Simple", "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }}),
        )]);
        let mut p = person();
        let mut ctx = Context::new(reg, "simple").unwrap();
        assert!(ctx.is_active());
        ctx.run(timestamp(2000, 1, 1).unwrap(), &mut p).unwrap();
        assert!(!ctx.is_active());
        assert_eq!(names(&ctx), vec!["Initial", "Middle"]);
        assert_eq!(ctx.current_state().name, "Terminal");
    }

    #[test]
    fn test_unmatched_conditional_stays_put() {
        let reg = registry(&[(
            "stuck",
            json!({"name": "Stuck", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Choose"},
                "Choose": {"type": "Simple", "conditional_transition": [
                    {"condition": {"condition_type": "False"}, "transition": "Terminal"}
                ]},
                "Terminal": {"type": "Terminal"}
            }}),
        )]);
        let mut p = person();
        let mut ctx = Context::new(reg, "stuck").unwrap();
        ctx.run(timestamp(2000, 1, 1).unwrap(), &mut p).unwrap();
        assert_eq!(ctx.current_state().name, "Choose");
        assert_eq!(ctx.current_state().exited, None);
        assert!(ctx.is_active());

        ctx.run(timestamp(2000, 2, 1).unwrap(), &mut p).unwrap();
        assert_eq!(ctx.current_state().name, "Choose");
        assert_eq!(names(&ctx), vec!["Initial"]);
    }

    #[test]
    fn test_guard_timestamps_bracket_wait() {
        let reg = registry(&[(
            "guarded",
            json!({"name": "Guarded", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Wait_For_Flag"},
                "Wait_For_Flag": {
                    "type": "Guard",
                    "allow": {"condition_type": "Attribute", "attribute": "flag", "operator": "==", "value": true},
                    "direct_transition": "Terminal"
                },
                "Terminal": {"type": "Terminal"}
            }}),
        )]);
        let mut p = person();
        let mut ctx = Context::new(reg, "guarded").unwrap();
        let start = timestamp(2000, 1, 1).unwrap();
        let opened = start + 14 * MS_PER_DAY;

        ctx.run(start, &mut p).unwrap();
        ctx.run(start + 7 * MS_PER_DAY, &mut p).unwrap();
        assert_eq!(ctx.current_state().name, "Wait_For_Flag");

        p.set("flag", true);
        ctx.run(opened, &mut p).unwrap();
        let guard = ctx.most_recent_by_name("Wait_For_Flag").unwrap();
        assert_eq!(guard.entered, Some(start));
        assert_eq!(guard.exited, Some(opened));
    }

    #[test]
    fn test_endless_self_loop_is_runaway() {
        let reg = registry(&[(
            "spin",
            json!({"name": "Spin", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Loop"},
                "Loop": {"type": "Simple", "direct_transition": "Loop"}
            }}),
        )]);
        let mut p = person();
        let mut ctx = Context::new(reg, "spin").unwrap().with_iteration_limit(50);
        let result = ctx.run(timestamp(2000, 1, 1).unwrap(), &mut p);
        assert!(matches!(
            result,
            Err(SimError::RunawayModule { ref state, iterations: 50, .. }) if state == "Loop"
        ));
        assert_eq!(names(&ctx), vec!["Initial"]);
    }

    #[test]
    fn test_same_instant_self_loop_keeps_going() {
        let reg = registry(&[(
            "flip",
            json!({"name": "Flip", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Flip"},
                "Flip": {"type": "Simple", "distributed_transition": [
                    {"distribution": 0.5, "transition": "Flip"},
                    {"distribution": 0.5, "transition": "Terminal"}
                ]},
                "Terminal": {"type": "Terminal"}
            }}),
        )]);
        let t = timestamp(2000, 1, 1).unwrap();
        for seed in 0..50 {
            let mut p = Person::born(EntityId::from_seed(seed, 0), seed, timestamp(1990, 1, 1).unwrap());
            let mut ctx = Context::new(Arc::clone(&reg), "flip").unwrap();
            ctx.run(t, &mut p).unwrap();
            assert!(!ctx.is_active(), "seed {} stopped on {}", seed, ctx.current_state().name);
            assert_eq!(names(&ctx), vec!["Initial", "Flip"]);
            assert_eq!(ctx.most_recent_by_name("Flip").unwrap().exited, Some(t));
        }
    }

    #[test]
    fn test_oversized_delay_is_an_error() {
        let reg = registry(&[(
            "forever",
            json!({"name": "Forever", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Wait"},
                "Wait": {"type": "Delay", "exact": {"quantity": 1e300, "unit": "days"}, "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }}),
        )]);
        let mut p = person();
        let mut ctx = Context::new(reg, "forever").unwrap();
        let result = ctx.run(timestamp(2000, 1, 1).unwrap(), &mut p);
        assert!(matches!(result, Err(SimError::TimeOutOfRange(_))));
    }

    #[test]
    fn test_runaway_module_is_capped() {
        // Each one-second delay loops back on itself, so a year of catch-up
        // needs far more steps than the limit allows
        let reg = registry(&[(
            "busy",
            json!({"name": "Busy", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Tick"},
                "Tick": {"type": "Delay", "exact": {"quantity": 1, "unit": "seconds"}, "direct_transition": "Tick"}
            }}),
        )]);
        let mut p = person();
        let mut ctx = Context::new(reg, "busy").unwrap().with_iteration_limit(100);
        ctx.run(timestamp(2000, 1, 1).unwrap(), &mut p).unwrap();
        let result = ctx.run(timestamp(2001, 1, 1).unwrap(), &mut p);
        assert!(matches!(result, Err(SimError::RunawayModule { iterations: 100, .. })));
    }

    #[test]
    fn test_unknown_target_fails_at_run_time() {
        let reg = registry(&[(
            "dangling",
            json!({"name": "Dangling", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Nowhere"}
            }}),
        )]);
        let mut p = person();
        let mut ctx = Context::new(reg, "dangling").unwrap();
        let result = ctx.run(timestamp(2000, 1, 1).unwrap(), &mut p);
        assert!(matches!(result, Err(SimError::UnknownState { .. })));
    }

    #[test]
    fn test_missing_submodule_is_fatal() {
        let reg = registry(&[(
            "caller",
            json!({"name": "Caller", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Call"},
                "Call": {"type": "CallSubmodule", "submodule": "missing", "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }}),
        )]);
        let mut p = person();
        let mut ctx = Context::new(reg, "caller").unwrap();
        let result = ctx.run(timestamp(2000, 1, 1).unwrap(), &mut p);
        assert!(matches!(result, Err(SimError::UnknownModule(name)) if name == "missing"));
    }

    #[test]
    fn test_wellness_encounter_blocks_until_performed() {
        let reg = registry(&[(
            "checkup",
            json!({"name": "Checkup", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Annual"},
                "Annual": {"type": "Encounter", "wellness": true, "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }}),
        )]);
        let mut p = person();
        let mut ctx = Context::new(reg, "checkup").unwrap();
        let start = timestamp(2000, 1, 1).unwrap();
        ctx.run(start, &mut p).unwrap();
        ctx.run(start + 30 * MS_PER_DAY, &mut p).unwrap();
        assert_eq!(ctx.current_state().name, "Annual");

        let visit = start + 60 * MS_PER_DAY;
        assert!(ctx.perform_wellness_encounter(visit, &mut p).unwrap());
        assert!(!ctx.is_active());
        let annual = ctx.most_recent_by_name("Annual").unwrap();
        assert_eq!(annual.exited, Some(visit));
        assert!(!ctx.perform_wellness_encounter(visit, &mut p).unwrap());
    }
}
