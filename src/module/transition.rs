//! Transition resolution: which state comes next

use rand::Rng;
use serde::Deserialize;

use crate::core::error::Result;
use crate::core::types::Timestamp;
use crate::entity::person::Person;
use crate::module::logic::Condition;
use crate::module::state::State;

#[derive(Debug, Clone, Deserialize)]
pub struct DistributedOption {
    pub distribution: f64,
    pub transition: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionalOption {
    /// Absent means the option always matches
    pub condition: Option<Condition>,
    pub transition: String,
}

/// Where a matching complex option leads
#[derive(Debug, Clone)]
pub enum ComplexOutcome {
    Transition(String),
    Distributions(Vec<DistributedOption>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawComplexOption")]
pub struct ComplexOption {
    pub condition: Option<Condition>,
    pub outcome: ComplexOutcome,
}

#[derive(Deserialize)]
struct RawComplexOption {
    condition: Option<Condition>,
    transition: Option<String>,
    distributions: Option<Vec<DistributedOption>>,
}

impl TryFrom<RawComplexOption> for ComplexOption {
    type Error = String;

    fn try_from(raw: RawComplexOption) -> std::result::Result<Self, Self::Error> {
        let outcome = match (raw.transition, raw.distributions) {
            (Some(target), _) => ComplexOutcome::Transition(target),
            (None, Some(distributions)) if distributions.is_empty() => {
                return Err("complex_transition option has empty distributions".to_string())
            }
            (None, Some(distributions)) => ComplexOutcome::Distributions(distributions),
            (None, None) => {
                return Err("complex_transition option needs a transition or distributions".to_string())
            }
        };
        Ok(Self {
            condition: raw.condition,
            outcome,
        })
    }
}

/// A state's outgoing edge rule
#[derive(Debug, Clone)]
pub enum Transition {
    Direct(String),
    Distributed(Vec<DistributedOption>),
    Conditional(Vec<ConditionalOption>),
    Complex(Vec<ComplexOption>),
}

impl Transition {
    /// Name of the next state, or `None` when nothing matches right now.
    ///
    /// Distributed choices draw from the person's own generator.
    pub fn follow(
        &self,
        history: &[State],
        person: &mut Person,
        time: Timestamp,
    ) -> Result<Option<String>> {
        match self {
            Transition::Direct(target) => Ok(Some(target.clone())),
            Transition::Distributed(options) => {
                Ok(pick_distributed(options, person.rng()).map(str::to_string))
            }
            Transition::Conditional(options) => {
                for option in options {
                    if matches(&option.condition, history, time, person)? {
                        return Ok(Some(option.transition.clone()));
                    }
                }
                Ok(None)
            }
            Transition::Complex(options) => {
                for option in options {
                    if !matches(&option.condition, history, time, person)? {
                        continue;
                    }
                    return Ok(match &option.outcome {
                        ComplexOutcome::Transition(target) => Some(target.clone()),
                        ComplexOutcome::Distributions(distributions) => {
                            pick_distributed(distributions, person.rng()).map(str::to_string)
                        }
                    });
                }
                Ok(None)
            }
        }
    }

    /// Every state name this transition can lead to
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Transition::Direct(target) => vec![target.as_str()],
            Transition::Distributed(options) => {
                options.iter().map(|o| o.transition.as_str()).collect()
            }
            Transition::Conditional(options) => {
                options.iter().map(|o| o.transition.as_str()).collect()
            }
            Transition::Complex(options) => options
                .iter()
                .flat_map(|o| match &o.outcome {
                    ComplexOutcome::Transition(target) => vec![target.as_str()],
                    ComplexOutcome::Distributions(distributions) => {
                        distributions.iter().map(|d| d.transition.as_str()).collect()
                    }
                })
                .collect(),
        }
    }

    /// Conditions nested in this transition, for validation
    pub fn conditions(&self) -> Vec<&Condition> {
        match self {
            Transition::Direct(_) | Transition::Distributed(_) => Vec::new(),
            Transition::Conditional(options) => {
                options.iter().filter_map(|o| o.condition.as_ref()).collect()
            }
            Transition::Complex(options) => {
                options.iter().filter_map(|o| o.condition.as_ref()).collect()
            }
        }
    }
}

fn matches(
    condition: &Option<Condition>,
    history: &[State],
    time: Timestamp,
    person: &Person,
) -> Result<bool> {
    match condition {
        Some(condition) => condition.test(history, time, person),
        None => Ok(true),
    }
}

/// Cumulative-weight draw over `options`.
///
/// Falls back to the last option when rounding leaves the draw above the
/// running sum, so a non-empty list always yields a target.
pub fn pick_distributed<'a, R: Rng + ?Sized>(
    options: &'a [DistributedOption],
    rng: &mut R,
) -> Option<&'a str> {
    let draw: f64 = rng.gen();
    let mut cumulative = 0.0;
    for option in options {
        cumulative += option.distribution;
        if draw < cumulative {
            return Some(&option.transition);
        }
    }
    options.last().map(|o| o.transition.as_str())
}
