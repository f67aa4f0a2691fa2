//! Simulation output and serialization

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::types::{EntityId, Timestamp};
use crate::entity::record::EntryKind;
use crate::entity::person::Person;
use crate::module::context::Context;
use crate::module::state::State;

/// Complete output of a population run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub statistics: PopulationSummary,
    pub persons: Vec<PersonOutcome>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PopulationSummary {
    pub population: usize,
    pub alive: usize,
    pub deceased: usize,
    pub encounters: usize,
    pub conditions: usize,
    pub medications: usize,
    pub procedures: usize,
    pub simulation_time_ms: u64,
}

/// One visited state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateTrace {
    pub module: String,
    pub name: String,
    pub entered: Option<Timestamp>,
    pub exited: Option<Timestamp>,
}

impl From<&State> for StateTrace {
    fn from(state: &State) -> Self {
        Self {
            module: state.module.clone(),
            name: state.name.clone(),
            entered: state.entered,
            exited: state.exited,
        }
    }
}

/// Where one module ended up for one person
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleTrace {
    pub module: String,
    pub active: bool,
    pub current_state: String,
    pub history: Vec<StateTrace>,
}

impl From<&Context> for ModuleTrace {
    fn from(context: &Context) -> Self {
        Self {
            module: context.module_key().to_string(),
            active: context.is_active(),
            current_state: context.current_state().name.clone(),
            history: context.history().iter().map(StateTrace::from).collect(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordCounts {
    pub encounters: usize,
    pub conditions: usize,
    pub medications: usize,
    pub procedures: usize,
    pub observations: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonOutcome {
    pub id: EntityId,
    pub index: usize,
    pub birth: Option<Timestamp>,
    pub alive: bool,
    pub death: Option<Timestamp>,
    pub modules: Vec<ModuleTrace>,
    pub record: RecordCounts,
}

impl PersonOutcome {
    pub fn new(index: usize, person: &Person, contexts: &[Context]) -> Self {
        let record = &person.record;
        Self {
            id: person.id,
            index,
            birth: person.birth_time(),
            alive: person.is_alive(),
            death: record.death_time(),
            modules: contexts.iter().map(ModuleTrace::from).collect(),
            record: RecordCounts {
                encounters: record.count(EntryKind::Encounter),
                conditions: record.count(EntryKind::Condition),
                medications: record.count(EntryKind::Medication),
                procedures: record.count(EntryKind::Procedure),
                observations: record.count(EntryKind::Observation),
            },
        }
    }
}

impl SimulationOutput {
    pub fn new(persons: Vec<PersonOutcome>, elapsed: Duration) -> Self {
        let alive = persons.iter().filter(|p| p.alive).count();
        let total = |f: fn(&RecordCounts) -> usize| persons.iter().map(|p| f(&p.record)).sum::<usize>();

        let statistics = PopulationSummary {
            population: persons.len(),
            alive,
            deceased: persons.len() - alive,
            encounters: total(|r| r.encounters),
            conditions: total(|r| r.conditions),
            medications: total(|r| r.medications),
            procedures: total(|r| r.procedures),
            simulation_time_ms: elapsed.as_millis() as u64,
        };

        Self {
            statistics,
            persons,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn summary(&self) -> String {
        let s = &self.statistics;
        format!(
            "Simulated {} persons in {}ms\n{} alive, {} deceased\n{} encounters, {} conditions, {} medications, {} procedures",
            s.population,
            s.simulation_time_ms,
            s.alive,
            s.deceased,
            s.encounters,
            s.conditions,
            s.medications,
            s.procedures,
        )
    }
}
