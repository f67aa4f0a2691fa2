//! Offline module checks
//!
//! Reports missing required fields, transitions naming unknown states, and
//! states that cannot be reached from Initial. Messages are advisory; nothing
//! here runs during simulation.

use std::collections::{BTreeSet, VecDeque};

use crate::module::definition::{StateDef, StateKind, INITIAL};
use crate::module::logic::Condition;
use crate::module::registry::Module;

/// Presence rule over named fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Required {
    Field(&'static str),
    And(Vec<Required>),
    Or(Vec<Required>),
}

impl Required {
    pub fn is_satisfied(&self, present: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Required::Field(name) => present(name),
            Required::And(rules) => rules.iter().all(|r| r.is_satisfied(present)),
            Required::Or(rules) => rules.iter().any(|r| r.is_satisfied(present)),
        }
    }

    /// Human readable form, e.g. `exact or range`
    pub fn describe(&self) -> String {
        match self {
            Required::Field(name) => name.to_string(),
            Required::And(rules) => join(rules, " and "),
            Required::Or(rules) => join(rules, " or "),
        }
    }
}

fn join(rules: &[Required], separator: &str) -> String {
    rules
        .iter()
        .map(|r| match r {
            Required::Field(_) => r.describe(),
            _ => format!("({})", r.describe()),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn field(name: &'static str) -> Required {
    Required::Field(name)
}

/// Required fields per state type
pub fn state_rule(kind: &StateKind) -> Option<Required> {
    let rule = match kind {
        StateKind::Delay { .. } => Required::Or(vec![field("exact"), field("range")]),
        StateKind::Guard { .. } => field("allow"),
        StateKind::Encounter { .. } => Required::Or(vec![field("wellness"), field("codes")]),
        StateKind::ConditionOnset { .. }
        | StateKind::MedicationOrder { .. }
        | StateKind::Procedure { .. } => field("codes"),
        StateKind::ConditionEnd { .. } => Required::Or(vec![
            field("condition_onset"),
            field("referenced_by_attribute"),
            field("codes"),
        ]),
        StateKind::MedicationEnd { .. } => Required::Or(vec![
            field("medication_order"),
            field("referenced_by_attribute"),
            field("codes"),
        ]),
        StateKind::SetAttribute { .. } => field("attribute"),
        StateKind::Counter { .. } => Required::And(vec![field("attribute"), field("action")]),
        StateKind::CallSubmodule { .. } => field("submodule"),
        StateKind::Initial | StateKind::Terminal | StateKind::Simple | StateKind::Death { .. } => {
            return None
        }
    };
    Some(rule)
}

fn state_has(kind: &StateKind, name: &str) -> bool {
    match (kind, name) {
        (StateKind::Delay { exact, .. }, "exact") => exact.is_some(),
        (StateKind::Delay { range, .. }, "range") => range.is_some(),
        (StateKind::Guard { allow }, "allow") => allow.is_some(),
        (StateKind::Encounter { wellness, .. }, "wellness") => *wellness,
        (StateKind::ConditionEnd { condition_onset, .. }, "condition_onset") => {
            condition_onset.is_some()
        }
        (StateKind::MedicationEnd { medication_order, .. }, "medication_order") => {
            medication_order.is_some()
        }
        (
            StateKind::ConditionEnd {
                referenced_by_attribute,
                ..
            }
            | StateKind::MedicationEnd {
                referenced_by_attribute,
                ..
            },
            "referenced_by_attribute",
        ) => referenced_by_attribute.is_some(),
        (StateKind::SetAttribute { attribute, .. } | StateKind::Counter { attribute, .. }, "attribute") => {
            attribute.is_some()
        }
        (StateKind::Counter { action, .. }, "action") => action.is_some(),
        (StateKind::CallSubmodule { submodule }, "submodule") => submodule.is_some(),
        (kind, "codes") => !kind.codes().is_empty(),
        _ => false,
    }
}

/// Required fields per condition type
pub fn condition_rule(condition: &Condition) -> Option<Required> {
    let rule = match condition {
        Condition::And { .. } | Condition::Or { .. } => field("conditions"),
        Condition::AtLeast { .. } => Required::And(vec![field("minimum"), field("conditions")]),
        Condition::AtMost { .. } => Required::And(vec![field("maximum"), field("conditions")]),
        Condition::Not { .. } => field("condition"),
        Condition::Gender { .. } => field("gender"),
        Condition::Age { .. } => {
            Required::And(vec![field("quantity"), field("unit"), field("operator")])
        }
        Condition::SocioeconomicStatus { .. } => field("category"),
        Condition::Date { .. } => Required::And(vec![field("year"), field("operator")]),
        Condition::Attribute { .. } => Required::And(vec![field("attribute"), field("operator")]),
        Condition::Symptom { .. } => {
            Required::And(vec![field("symptom"), field("value"), field("operator")])
        }
        Condition::Observation { .. } => Required::And(vec![
            field("operator"),
            Required::Or(vec![field("codes"), field("referenced_by_attribute")]),
        ]),
        Condition::ActiveCondition { .. } | Condition::ActiveMedication { .. } => {
            Required::Or(vec![field("codes"), field("referenced_by_attribute")])
        }
        Condition::PriorState { .. } => field("name"),
        Condition::True | Condition::False => return None,
    };
    Some(rule)
}

fn condition_has(condition: &Condition, name: &str) -> bool {
    match (condition, name) {
        (Condition::AtLeast { minimum, .. }, "minimum") => minimum.is_some(),
        (Condition::AtMost { maximum, .. }, "maximum") => maximum.is_some(),
        (
            Condition::And { conditions }
            | Condition::Or { conditions }
            | Condition::AtLeast { conditions, .. }
            | Condition::AtMost { conditions, .. },
            "conditions",
        ) => !conditions.is_empty(),
        (Condition::Not { condition }, "condition") => condition.is_some(),
        (Condition::Gender { gender }, "gender") => gender.is_some(),
        (Condition::Age { quantity, .. }, "quantity") => quantity.is_some(),
        (Condition::Age { unit, .. }, "unit") => unit.is_some(),
        (Condition::SocioeconomicStatus { category }, "category") => category.is_some(),
        (Condition::Date { year, .. }, "year") => year.is_some(),
        (Condition::Attribute { attribute, .. }, "attribute") => attribute.is_some(),
        (Condition::Symptom { symptom, .. }, "symptom") => symptom.is_some(),
        (Condition::Symptom { value, .. }, "value") => value.is_some(),
        (
            Condition::Age { operator, .. }
            | Condition::Date { operator, .. }
            | Condition::Attribute { operator, .. }
            | Condition::Symptom { operator, .. }
            | Condition::Observation { operator, .. },
            "operator",
        ) => operator.is_some(),
        (
            Condition::Observation { codes, .. }
            | Condition::ActiveCondition { codes, .. }
            | Condition::ActiveMedication { codes, .. },
            "codes",
        ) => !codes.is_empty(),
        (
            Condition::Observation {
                referenced_by_attribute,
                ..
            }
            | Condition::ActiveCondition {
                referenced_by_attribute,
                ..
            }
            | Condition::ActiveMedication {
                referenced_by_attribute,
                ..
            },
            "referenced_by_attribute",
        ) => referenced_by_attribute.is_some(),
        (Condition::PriorState { name }, "name") => name.is_some(),
        _ => false,
    }
}

fn children(condition: &Condition) -> Vec<&Condition> {
    match condition {
        Condition::And { conditions }
        | Condition::Or { conditions }
        | Condition::AtLeast { conditions, .. }
        | Condition::AtMost { conditions, .. } => conditions.iter().collect(),
        Condition::Not { condition } => condition.iter().map(|c| &**c).collect(),
        _ => Vec::new(),
    }
}

fn check_condition(condition: &Condition, path: &str, messages: &mut Vec<String>) {
    if let Some(rule) = condition_rule(condition) {
        if !rule.is_satisfied(&|name| condition_has(condition, name)) {
            messages.push(format!(
                "{}: {} condition requires {}",
                path,
                condition.kind_name(),
                rule.describe()
            ));
        }
    }
    for child in children(condition) {
        check_condition(child, &format!("{}/{}", path, condition.kind_name()), messages);
    }
}

/// Field-level messages for one state
pub fn check_state(path: &str, def: &StateDef) -> Vec<String> {
    let mut messages = Vec::new();
    if let Some(rule) = state_rule(&def.kind) {
        if !rule.is_satisfied(&|name| state_has(&def.kind, name)) {
            messages.push(format!(
                "{}: {} state requires {}",
                path,
                def.kind.type_name(),
                rule.describe()
            ));
        }
    }
    if let StateKind::Guard { allow: Some(allow) } = &def.kind {
        check_condition(allow, &format!("{}/allow", path), &mut messages);
    }
    if let Some(transition) = &def.transition {
        for condition in transition.conditions() {
            check_condition(condition, &format!("{}/transition", path), &mut messages);
        }
    }
    messages
}

/// All messages for a module, in state-name order
pub fn validate_module(module: &Module) -> Vec<String> {
    let mut messages = Vec::new();

    for (name, def) in module.states() {
        let path = format!("{}/{}", module.key(), name);
        messages.extend(check_state(&path, def));

        if let Some(transition) = &def.transition {
            for target in transition.targets() {
                if module.state_def(target).is_none() {
                    messages.push(format!("{}: transition to unknown state '{}'", path, target));
                }
            }
        }
    }

    let reachable = reachable_from_initial(module);
    for (name, _) in module.states() {
        if !reachable.contains(name.as_str()) {
            messages.push(format!(
                "{}/{}: state is unreachable from {}",
                module.key(),
                name,
                INITIAL
            ));
        }
    }

    messages
}

/// Breadth-first walk of transition targets starting at Initial
pub fn reachable_from_initial(module: &Module) -> BTreeSet<&str> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::new();
    if module.state_def(INITIAL).is_some() {
        seen.insert(INITIAL);
        queue.push_back(INITIAL);
    }

    while let Some(name) = queue.pop_front() {
        let Some(transition) = module.state_def(name).and_then(|d| d.transition.as_ref()) else {
            continue;
        };
        for target in transition.targets() {
            if module.state_def(target).is_some() && seen.insert(target) {
                queue.push_back(target);
            }
        }
    }
    seen
}
