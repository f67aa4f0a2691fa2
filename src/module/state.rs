//! Runtime state instances
//!
//! A `State` pairs an immutable `StateDef` with the bookkeeping of one visit:
//! when it was entered and exited, and which side effects already happened.
//! Side effects run at most once per visit, so `process` can be called again
//! on every tick without writing duplicate records.

use std::sync::Arc;

use rand::Rng;
use tracing::trace;

use crate::core::calendar;
use crate::core::error::{Result, SimError};
use crate::core::types::{symbolize, Code, Timestamp};
use crate::entity::attributes::AttrValue;
use crate::entity::person::Person;
use crate::module::definition::{CounterAction, RangeWithUnit, StateDef, StateKind};
use crate::module::transition::Transition;

/// Reason recorded when a MedicationEnd does not name one
const DEFAULT_STOP_REASON: &str = "prescription_expired";

#[derive(Debug, Clone)]
pub struct State {
    pub name: String,
    /// Key of the module this state belongs to
    pub module: String,
    def: Arc<StateDef>,
    pub entered: Option<Timestamp>,
    /// Start of the current visit; moves forward when a self-loop restarts it
    pub start_time: Option<Timestamp>,
    pub exited: Option<Timestamp>,
    expiration: Option<Timestamp>,
    completed: bool,
    /// Deferred record write has happened
    recorded: bool,
    performed_at: Option<Timestamp>,
    /// Ready earlier but no transition matched, so the exit is whenever one does
    held: bool,
    pub(crate) called: bool,
    pub(crate) returned: bool,
}

impl State {
    pub fn new(module: &str, name: &str, def: Arc<StateDef>) -> Self {
        Self {
            name: name.to_string(),
            module: module.to_string(),
            def,
            entered: None,
            start_time: None,
            exited: None,
            expiration: None,
            completed: false,
            recorded: false,
            performed_at: None,
            held: false,
            called: false,
            returned: false,
        }
    }

    pub fn kind(&self) -> &StateKind {
        &self.def.kind
    }

    pub fn transition(&self) -> Option<&Transition> {
        self.def.transition.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.def.is_terminal()
    }

    pub fn is_call_submodule(&self) -> bool {
        matches!(self.def.kind, StateKind::CallSubmodule { .. })
    }

    /// Submodule a pending CallSubmodule should enter
    pub fn pending_call(&self) -> Option<&str> {
        match &self.def.kind {
            StateKind::CallSubmodule { submodule } if !self.called => submodule.as_deref(),
            _ => None,
        }
    }

    pub fn is_waiting_for_wellness(&self) -> bool {
        matches!(self.def.kind, StateKind::Encounter { wellness: true, .. })
            && self.performed_at.is_none()
    }

    pub fn performed_at(&self) -> Option<Timestamp> {
        self.performed_at
    }

    /// Delay end time, once sampled
    pub fn expiration(&self) -> Option<Timestamp> {
        self.expiration
    }

    /// Record key: first code's display, else the state name
    pub fn symbol(&self) -> String {
        match self.def.kind.codes().first() {
            Some(code) => code.symbol(),
            None => symbolize(&self.name),
        }
    }

    fn codes(&self) -> Vec<Code> {
        self.def.kind.codes().to_vec()
    }

    /// Process the state at `time` and stamp its exit when ready.
    pub fn run(
        &mut self,
        history: &mut [State],
        time: Timestamp,
        person: &mut Person,
    ) -> Result<bool> {
        if self.entered.is_none() {
            self.entered = Some(time);
        }
        if self.start_time.is_none() {
            self.start_time = Some(time);
        }

        let ready = self.process(history, time, person)?;
        if ready {
            let exited = match self.def.kind {
                StateKind::Delay { .. } if !self.held => self.expiration.unwrap_or(time),
                _ => time,
            };
            self.exited = Some(exited);
            if let Some(attribute) = &self.def.assign_to_attribute {
                person.set(attribute.as_str(), self.symbol());
            }
        }
        Ok(ready)
    }

    /// True when the state is ready to transition away at `time`
    pub fn process(
        &mut self,
        history: &mut [State],
        time: Timestamp,
        person: &mut Person,
    ) -> Result<bool> {
        let def = Arc::clone(&self.def);
        match &def.kind {
            StateKind::Initial | StateKind::Simple => Ok(true),
            StateKind::Terminal => Ok(false),
            StateKind::Delay { exact, range } => {
                let expiration = match self.expiration {
                    Some(expiration) => expiration,
                    None => {
                        let start = self.start_time.unwrap_or(time);
                        let expiration = if let Some(exact) = exact {
                            calendar::advance(start, exact.quantity, exact.unit)?
                        } else if let Some(range) = range {
                            let quantity = self.sample_range(range, person)?;
                            calendar::advance(start, quantity, range.unit)?
                        } else {
                            return Err(self.missing("exact or range"));
                        };
                        self.expiration = Some(expiration);
                        expiration
                    }
                };
                Ok(time >= expiration)
            }
            StateKind::Guard { allow } => {
                let allow = allow.as_ref().ok_or_else(|| self.missing("allow"))?;
                allow.test(history, time, person)
            }
            StateKind::Encounter { wellness, .. } => {
                if self.performed_at.is_none() {
                    if *wellness {
                        return Ok(false);
                    }
                    self.perform_encounter(history, time, person, true)?;
                }
                Ok(true)
            }
            StateKind::ConditionOnset { .. }
            | StateKind::MedicationOrder { .. }
            | StateKind::Procedure { .. } => {
                if !self.completed {
                    self.completed = true;
                    // Without a target encounter nothing ever writes the entry
                    let concurrent = def.kind.target_encounter().map_or(false, |target| {
                        most_recent_by_name(history, target).map_or(false, |e| e.performed_at == Some(time))
                    });
                    if concurrent {
                        let reason = self.reason_symbol(history, person);
                        self.record_entry(reason, time, person);
                    }
                }
                Ok(true)
            }
            StateKind::ConditionEnd {
                condition_onset,
                referenced_by_attribute,
                ..
            } => {
                if !self.completed {
                    self.completed = true;
                    let symbol =
                        self.referenced_symbol(history, person, condition_onset, referenced_by_attribute)?;
                    if let Some(symbol) = symbol {
                        person.record.condition_end(&symbol, time);
                    }
                }
                Ok(true)
            }
            StateKind::MedicationEnd {
                medication_order,
                referenced_by_attribute,
                reason,
                ..
            } => {
                if !self.completed {
                    self.completed = true;
                    let symbol =
                        self.referenced_symbol(history, person, medication_order, referenced_by_attribute)?;
                    if let Some(symbol) = symbol {
                        let reason = reason.as_deref().unwrap_or(DEFAULT_STOP_REASON);
                        person.record.medication_stop(&symbol, time, reason);
                    }
                }
                Ok(true)
            }
            StateKind::SetAttribute { attribute, value } => {
                if !self.completed {
                    self.completed = true;
                    let attribute = attribute.as_deref().ok_or_else(|| self.missing("attribute"))?;
                    match value {
                        Some(value) => person.set(attribute, value.clone()),
                        None => {
                            person.remove(attribute);
                        }
                    }
                }
                Ok(true)
            }
            StateKind::Counter {
                attribute,
                action,
                amount,
            } => {
                if !self.completed {
                    self.completed = true;
                    let attribute = attribute.as_deref().ok_or_else(|| self.missing("attribute"))?;
                    let action = action.ok_or_else(|| self.missing("action"))?;
                    let step = match action {
                        CounterAction::Increment => amount.unwrap_or(1),
                        CounterAction::Decrement => -amount.unwrap_or(1),
                    };
                    let next = match person.get(attribute) {
                        None => AttrValue::Int(step),
                        Some(AttrValue::Int(current)) => AttrValue::Int(current + step),
                        Some(AttrValue::Float(current)) => AttrValue::Float(current + step as f64),
                        Some(other) => {
                            return Err(SimError::InvalidField {
                                context: format!("Counter state '{}'", self.name),
                                message: format!("attribute '{}' holds non-numeric {}", attribute, other),
                            })
                        }
                    };
                    person.set(attribute, next);
                }
                Ok(true)
            }
            StateKind::Death { .. } => {
                if !self.completed {
                    self.completed = true;
                    person.mark_deceased(time, &self.module);
                }
                Ok(true)
            }
            StateKind::CallSubmodule { submodule } => {
                if submodule.is_none() {
                    return Err(self.missing("submodule"));
                }
                Ok(self.returned)
            }
        }
    }

    /// Perform an Encounter at `time`, then write any history entries that
    /// were waiting on it. Scheduled wellness visits are recorded by the
    /// driver, so `record` is false for them.
    pub fn perform_encounter(
        &mut self,
        history: &mut [State],
        time: Timestamp,
        person: &mut Person,
        record: bool,
    ) -> Result<()> {
        let encounter_class = match &self.def.kind {
            StateKind::Encounter {
                encounter_class, ..
            } => encounter_class.clone(),
            _ => {
                return Err(SimError::InvalidField {
                    context: format!("state '{}'", self.name),
                    message: format!("{} cannot perform an encounter", self.def.kind.type_name()),
                })
            }
        };

        if self.entered.is_none() {
            self.entered = Some(time);
        }
        if record {
            person
                .record
                .encounter(&self.symbol(), self.codes(), encounter_class, time);
        }
        self.performed_at = Some(time);

        let visited: &[State] = history;
        let pending: Vec<(usize, Option<String>)> = visited
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.recorded && s.def.kind.target_encounter() == Some(self.name.as_str()))
            .map(|(i, s)| (i, s.reason_symbol(visited, person)))
            .collect();

        for (index, reason) in pending {
            trace!(
                state = %history[index].name,
                encounter = %self.name,
                "Writing deferred record entry"
            );
            history[index].record_entry(reason, time, person);
        }
        Ok(())
    }

    /// Write this state's diagnosis, prescription or procedure to the record
    fn record_entry(&mut self, reason: Option<String>, time: Timestamp, person: &mut Person) {
        let symbol = self.symbol();
        match self.def.kind {
            StateKind::ConditionOnset { .. } => {
                person.record.condition_onset(&symbol, self.codes(), time);
            }
            StateKind::MedicationOrder { .. } => {
                person
                    .record
                    .medication_start(&symbol, self.codes(), time, reason.into_iter().collect());
            }
            StateKind::Procedure { .. } => {
                person.record.procedure(&symbol, self.codes(), time, reason);
            }
            _ => return,
        }
        self.recorded = true;
    }

    /// Symbol of the clinical reason: a prior state of that name, else an attribute
    fn reason_symbol(&self, history: &[State], person: &Person) -> Option<String> {
        let reason = match &self.def.kind {
            StateKind::MedicationOrder { reason, .. } | StateKind::Procedure { reason, .. } => {
                reason.as_deref()?
            }
            _ => return None,
        };
        most_recent_by_name(history, reason)
            .map(State::symbol)
            .or_else(|| person.lookup(reason).map(|v| v.to_string()))
    }

    /// Record key named by a prior state, an attribute or the state's codes
    fn referenced_symbol(
        &self,
        history: &[State],
        person: &Person,
        by_state: &Option<String>,
        by_attribute: &Option<String>,
    ) -> Result<Option<String>> {
        if let Some(name) = by_state {
            return Ok(most_recent_by_name(history, name).map(State::symbol));
        }
        if let Some(attribute) = by_attribute {
            return Ok(person.lookup(attribute).map(|v| v.to_string()));
        }
        match self.def.kind.codes().first() {
            Some(code) => Ok(Some(code.symbol())),
            None => Err(self.missing("a state, attribute or code reference")),
        }
    }

    fn sample_range(&self, range: &RangeWithUnit, person: &mut Person) -> Result<f64> {
        if range.low > range.high {
            return Err(SimError::InvalidField {
                context: format!("Delay state '{}'", self.name),
                message: format!("range low {} exceeds high {}", range.low, range.high),
            });
        }
        let whole = range.low.fract() == 0.0 && range.high.fract() == 0.0;
        let rng = person.rng();
        Ok(if whole {
            rng.gen_range(range.low as i64..=range.high as i64) as f64
        } else {
            rng.gen_range(range.low..=range.high)
        })
    }

    /// Ready, but no transition was available at the time it was checked
    pub(crate) fn hold(&mut self) {
        self.exited = None;
        self.held = true;
    }

    /// Begin a fresh visit of the same state at `time` (self-loop)
    pub(crate) fn restart(&mut self, time: Timestamp) {
        self.start_time = Some(time);
        self.exited = None;
        self.held = false;
        self.expiration = None;
        self.completed = false;
        self.recorded = false;
        self.performed_at = None;
        self.called = false;
        self.returned = false;
    }

    fn missing(&self, field: &'static str) -> SimError {
        SimError::MissingField {
            context: format!("{} state '{}'", self.def.kind.type_name(), self.name),
            field,
        }
    }
}

/// Latest visit of the named state, scanning history backwards
pub fn most_recent_by_name<'a>(history: &'a [State], name: &str) -> Option<&'a State> {
    history.iter().rev().find(|s| s.name == name)
}
