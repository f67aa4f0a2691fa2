//! Serde schema for module documents
//!
//! A module is a JSON object with a `name` and a `states` mapping. Each
//! state carries a `type` discriminator, type-specific fields, an optional
//! `assign_to_attribute` and at most one of the four transition keys.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::core::calendar::TimeUnit;
use crate::core::types::Code;
use crate::entity::attributes::AttrValue;
use crate::module::logic::Condition;
use crate::module::transition::{ComplexOption, ConditionalOption, DistributedOption, Transition};

/// Name of the state every module starts in
pub const INITIAL: &str = "Initial";

/// A parsed module document
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleDef {
    pub name: String,
    #[serde(default)]
    pub remarks: Vec<String>,
    pub states: BTreeMap<String, StateDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Exact {
    pub quantity: f64,
    pub unit: TimeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RangeWithUnit {
    pub low: f64,
    pub high: f64,
    pub unit: TimeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterAction {
    Increment,
    Decrement,
}

/// Variant-specific configuration of a state
///
/// Fields the validator checks for are `Option` so a module with missing
/// fields still loads and gets reported rather than failing to parse.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StateKind {
    Initial,
    Terminal,
    Simple,
    Delay {
        exact: Option<Exact>,
        range: Option<RangeWithUnit>,
    },
    Guard {
        allow: Option<Condition>,
    },
    Encounter {
        #[serde(default)]
        wellness: bool,
        #[serde(default)]
        codes: Vec<Code>,
        encounter_class: Option<String>,
    },
    ConditionOnset {
        #[serde(default)]
        codes: Vec<Code>,
        target_encounter: Option<String>,
    },
    ConditionEnd {
        condition_onset: Option<String>,
        referenced_by_attribute: Option<String>,
        #[serde(default)]
        codes: Vec<Code>,
    },
    MedicationOrder {
        #[serde(default)]
        codes: Vec<Code>,
        target_encounter: Option<String>,
        reason: Option<String>,
    },
    MedicationEnd {
        medication_order: Option<String>,
        referenced_by_attribute: Option<String>,
        #[serde(default)]
        codes: Vec<Code>,
        reason: Option<String>,
    },
    Procedure {
        #[serde(default)]
        codes: Vec<Code>,
        target_encounter: Option<String>,
        reason: Option<String>,
    },
    SetAttribute {
        attribute: Option<String>,
        value: Option<AttrValue>,
    },
    Counter {
        attribute: Option<String>,
        action: Option<CounterAction>,
        amount: Option<i64>,
    },
    Death {
        #[serde(default)]
        codes: Vec<Code>,
    },
    CallSubmodule {
        submodule: Option<String>,
    },
}

impl StateKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StateKind::Initial => "Initial",
            StateKind::Terminal => "Terminal",
            StateKind::Simple => "Simple",
            StateKind::Delay { .. } => "Delay",
            StateKind::Guard { .. } => "Guard",
            StateKind::Encounter { .. } => "Encounter",
            StateKind::ConditionOnset { .. } => "ConditionOnset",
            StateKind::ConditionEnd { .. } => "ConditionEnd",
            StateKind::MedicationOrder { .. } => "MedicationOrder",
            StateKind::MedicationEnd { .. } => "MedicationEnd",
            StateKind::Procedure { .. } => "Procedure",
            StateKind::SetAttribute { .. } => "SetAttribute",
            StateKind::Counter { .. } => "Counter",
            StateKind::Death { .. } => "Death",
            StateKind::CallSubmodule { .. } => "CallSubmodule",
        }
    }

    pub fn codes(&self) -> &[Code] {
        match self {
            StateKind::Encounter { codes, .. }
            | StateKind::ConditionOnset { codes, .. }
            | StateKind::ConditionEnd { codes, .. }
            | StateKind::MedicationOrder { codes, .. }
            | StateKind::MedicationEnd { codes, .. }
            | StateKind::Procedure { codes, .. }
            | StateKind::Death { codes } => codes,
            _ => &[],
        }
    }

    /// Encounter this state waits on before writing to the record
    pub fn target_encounter(&self) -> Option<&str> {
        match self {
            StateKind::ConditionOnset {
                target_encounter, ..
            }
            | StateKind::MedicationOrder {
                target_encounter, ..
            }
            | StateKind::Procedure {
                target_encounter, ..
            } => target_encounter.as_deref(),
            _ => None,
        }
    }
}

/// One state of a module, as declared
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawStateDef")]
pub struct StateDef {
    pub kind: StateKind,
    pub transition: Option<Transition>,
    pub assign_to_attribute: Option<String>,
}

impl StateDef {
    pub fn new(kind: StateKind, transition: Option<Transition>) -> Self {
        Self {
            kind,
            transition,
            assign_to_attribute: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, StateKind::Terminal)
    }
}

#[derive(Deserialize)]
struct RawStateDef {
    #[serde(flatten)]
    kind: StateKind,
    #[serde(alias = "direct")]
    direct_transition: Option<String>,
    #[serde(alias = "distributed")]
    distributed_transition: Option<Vec<DistributedOption>>,
    #[serde(alias = "conditional")]
    conditional_transition: Option<Vec<ConditionalOption>>,
    #[serde(alias = "complex")]
    complex_transition: Option<Vec<ComplexOption>>,
    assign_to_attribute: Option<String>,
}

impl TryFrom<RawStateDef> for StateDef {
    type Error = String;

    fn try_from(raw: RawStateDef) -> Result<Self, Self::Error> {
        let mut declared = Vec::new();
        if let Some(target) = raw.direct_transition {
            declared.push(Transition::Direct(target));
        }
        if let Some(options) = raw.distributed_transition {
            if options.is_empty() {
                return Err("distributed_transition has no options".to_string());
            }
            declared.push(Transition::Distributed(options));
        }
        if let Some(options) = raw.conditional_transition {
            declared.push(Transition::Conditional(options));
        }
        if let Some(options) = raw.complex_transition {
            declared.push(Transition::Complex(options));
        }

        if declared.len() > 1 {
            return Err(format!(
                "{} state declares {} transitions, expected one",
                raw.kind.type_name(),
                declared.len()
            ));
        }
        let transition = declared.pop();

        let terminal = matches!(raw.kind, StateKind::Terminal);
        if transition.is_none() && !terminal {
            return Err(format!("{} state has no transition", raw.kind.type_name()));
        }
        if transition.is_some() && terminal {
            return Err("Terminal state cannot declare a transition".to_string());
        }

        Ok(StateDef {
            kind: raw.kind,
            transition,
            assign_to_attribute: raw.assign_to_attribute,
        })
    }
}
