//! Boolean condition language used by Guard states and conditional transitions
//!
//! Conditions are a closed tagged union keyed by `condition_type`, so an
//! unknown condition type or comparison operator fails when the module is
//! loaded. Evaluation is pure with respect to the person: it reads attributes,
//! events and the record, never writes them.

use std::fmt;

use serde::Deserialize;

use crate::core::calendar::{self, TimeUnit};
use crate::core::error::{Result, SimError};
use crate::core::types::{Code, Timestamp};
use crate::entity::attributes::AttrValue;
use crate::entity::events::BIRTH;
use crate::entity::person::{Person, GENDER, SOCIOECONOMIC_CATEGORY};
use crate::module::state::{most_recent_by_name, State};

/// Comparison operators accepted in module documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "is nil")]
    IsNil,
    #[serde(rename = "is not nil")]
    IsNotNil,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ge => ">=",
            Operator::Gt => ">",
            Operator::Ne => "!=",
            Operator::IsNil => "is nil",
            Operator::IsNotNil => "is not nil",
        }
    }

    /// The two operators that are meaningful against a missing value
    pub fn is_nil_sentinel(self) -> bool {
        matches!(self, Operator::IsNil | Operator::IsNotNil)
    }

    /// Compare `lhs` against `rhs`. Ordering operators require both sides
    /// present and of compatible kinds.
    pub fn compare(self, lhs: Option<&AttrValue>, rhs: Option<&AttrValue>) -> Result<bool> {
        match self {
            Operator::IsNil => Ok(lhs.is_none()),
            Operator::IsNotNil => Ok(lhs.is_some()),
            Operator::Eq => Ok(loose_eq(lhs, rhs)),
            Operator::Ne => Ok(!loose_eq(lhs, rhs)),
            Operator::Lt => Ok(self.ordering(lhs, rhs)?.is_lt()),
            Operator::Le => Ok(self.ordering(lhs, rhs)?.is_le()),
            Operator::Gt => Ok(self.ordering(lhs, rhs)?.is_gt()),
            Operator::Ge => Ok(self.ordering(lhs, rhs)?.is_ge()),
        }
    }

    fn ordering(
        self,
        lhs: Option<&AttrValue>,
        rhs: Option<&AttrValue>,
    ) -> Result<std::cmp::Ordering> {
        lhs.zip(rhs)
            .and_then(|(a, b)| a.loose_cmp(b))
            .ok_or_else(|| SimError::IncomparableValues {
                lhs: describe(lhs),
                rhs: describe(rhs),
                operator: self.as_str().to_string(),
            })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn loose_eq(lhs: Option<&AttrValue>, rhs: Option<&AttrValue>) -> bool {
    match (lhs, rhs) {
        (Some(a), Some(b)) => a.loose_eq(b),
        (None, None) => true,
        _ => false,
    }
}

fn describe(value: Option<&AttrValue>) -> String {
    value.map_or_else(|| "nil".to_string(), |v| format!("{:?}", v))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SesCategory {
    High,
    Middle,
    Low,
}

impl SesCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SesCategory::High => "High",
            SesCategory::Middle => "Middle",
            SesCategory::Low => "Low",
        }
    }
}

/// A node of the condition tree
///
/// Leaf fields are optional so that incomplete modules still load and can
/// be reported by the validator; evaluating a node with a missing field is
/// an error.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "condition_type")]
pub enum Condition {
    And {
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    Or {
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    #[serde(rename = "At Least")]
    AtLeast {
        minimum: Option<usize>,
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    #[serde(rename = "At Most")]
    AtMost {
        maximum: Option<usize>,
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    Not {
        condition: Option<Box<Condition>>,
    },
    Gender {
        gender: Option<String>,
    },
    Age {
        quantity: Option<f64>,
        unit: Option<TimeUnit>,
        operator: Option<Operator>,
    },
    #[serde(rename = "Socioeconomic Status")]
    SocioeconomicStatus { category: Option<SesCategory> },
    Date {
        year: Option<i32>,
        operator: Option<Operator>,
    },
    Attribute {
        attribute: Option<String>,
        value: Option<AttrValue>,
        operator: Option<Operator>,
    },
    Symptom {
        symptom: Option<String>,
        value: Option<f64>,
        operator: Option<Operator>,
    },
    Observation {
        #[serde(default)]
        codes: Vec<Code>,
        referenced_by_attribute: Option<String>,
        operator: Option<Operator>,
        value: Option<AttrValue>,
    },
    #[serde(rename = "Active Condition")]
    ActiveCondition {
        #[serde(default)]
        codes: Vec<Code>,
        referenced_by_attribute: Option<String>,
    },
    #[serde(rename = "Active Medication")]
    ActiveMedication {
        #[serde(default)]
        codes: Vec<Code>,
        referenced_by_attribute: Option<String>,
    },
    PriorState {
        name: Option<String>,
    },
    True,
    False,
}

impl Condition {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Condition::And { .. } => "And",
            Condition::Or { .. } => "Or",
            Condition::AtLeast { .. } => "At Least",
            Condition::AtMost { .. } => "At Most",
            Condition::Not { .. } => "Not",
            Condition::Gender { .. } => "Gender",
            Condition::Age { .. } => "Age",
            Condition::SocioeconomicStatus { .. } => "Socioeconomic Status",
            Condition::Date { .. } => "Date",
            Condition::Attribute { .. } => "Attribute",
            Condition::Symptom { .. } => "Symptom",
            Condition::Observation { .. } => "Observation",
            Condition::ActiveCondition { .. } => "Active Condition",
            Condition::ActiveMedication { .. } => "Active Medication",
            Condition::PriorState { .. } => "PriorState",
            Condition::True => "True",
            Condition::False => "False",
        }
    }

    /// Evaluate against `person` at `time`; `history` is the calling
    /// context's visited states (for PriorState).
    pub fn test(&self, history: &[State], time: Timestamp, person: &Person) -> Result<bool> {
        match self {
            Condition::And { conditions } => {
                for c in conditions {
                    if !c.test(history, time, person)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or { conditions } => {
                for c in conditions {
                    if c.test(history, time, person)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::AtLeast { minimum, conditions } => {
                let minimum = *self.field(minimum, "minimum")?;
                Ok(count_true(conditions, history, time, person)? >= minimum)
            }
            Condition::AtMost { maximum, conditions } => {
                let maximum = *self.field(maximum, "maximum")?;
                Ok(count_true(conditions, history, time, person)? <= maximum)
            }
            Condition::Not { condition } => {
                Ok(!self.field(condition, "condition")?.test(history, time, person)?)
            }
            Condition::Gender { gender } => {
                let gender = self.field(gender, "gender")?;
                Ok(person.lookup(GENDER).and_then(AttrValue::as_str) == Some(gender.as_str()))
            }
            Condition::Age {
                quantity,
                unit,
                operator,
            } => {
                let birth = person
                    .events
                    .most_recent(BIRTH)
                    .ok_or_else(|| SimError::MissingValue("birth event".to_string()))?
                    .time;
                let age = calendar::elapsed(birth, time, *self.field(unit, "unit")?)?;
                self.field(operator, "operator")?.compare(
                    Some(&AttrValue::Int(age)),
                    Some(&AttrValue::Float(*self.field(quantity, "quantity")?)),
                )
            }
            Condition::SocioeconomicStatus { category } => {
                let category = self.field(category, "category")?;
                let actual = person.lookup(SOCIOECONOMIC_CATEGORY).ok_or_else(|| {
                    SimError::MissingValue(SOCIOECONOMIC_CATEGORY.to_string())
                })?;
                Operator::Eq.compare(Some(actual), Some(&AttrValue::from(category.as_str())))
            }
            Condition::Date { year, operator } => {
                let current = calendar::year_of(time)? as i64;
                self.field(operator, "operator")?.compare(
                    Some(&AttrValue::Int(current)),
                    Some(&AttrValue::Int(*self.field(year, "year")? as i64)),
                )
            }
            Condition::Attribute {
                attribute,
                value,
                operator,
            } => {
                let actual = person.lookup(self.field(attribute, "attribute")?);
                self.field(operator, "operator")?
                    .compare(actual, value.as_ref())
            }
            Condition::Symptom {
                symptom,
                value,
                operator,
            } => {
                let severity = person.symptom(self.field(symptom, "symptom")?).unwrap_or(0.0);
                self.field(operator, "operator")?.compare(
                    Some(&AttrValue::Float(severity)),
                    Some(&AttrValue::Float(*self.field(value, "value")?)),
                )
            }
            Condition::Observation {
                codes,
                referenced_by_attribute,
                operator,
                value,
            } => {
                let operator = *self.field(operator, "operator")?;
                let symbol = self.referenced_symbol(codes, referenced_by_attribute, person)?;
                match person.record.latest_observation(&symbol) {
                    Some(latest) => operator.compare(Some(latest), value.as_ref()),
                    None if operator.is_nil_sentinel() => operator.compare(None, value.as_ref()),
                    None => Err(SimError::MissingValue(format!("observation '{}'", symbol))),
                }
            }
            Condition::ActiveCondition {
                codes,
                referenced_by_attribute,
            } => {
                let symbol = self.referenced_symbol(codes, referenced_by_attribute, person)?;
                Ok(person.record.condition_active(&symbol))
            }
            Condition::ActiveMedication {
                codes,
                referenced_by_attribute,
            } => {
                let symbol = self.referenced_symbol(codes, referenced_by_attribute, person)?;
                Ok(person.record.medication_active(&symbol))
            }
            Condition::PriorState { name } => {
                Ok(most_recent_by_name(history, self.field(name, "name")?).is_some())
            }
            Condition::True => Ok(true),
            Condition::False => Ok(false),
        }
    }

    fn field<'a, T>(&self, value: &'a Option<T>, field: &'static str) -> Result<&'a T> {
        value.as_ref().ok_or_else(|| SimError::MissingField {
            context: format!("{} condition", self.kind_name()),
            field,
        })
    }

    /// Record key named either by the first code or by an attribute holding it
    fn referenced_symbol(
        &self,
        codes: &[Code],
        referenced_by_attribute: &Option<String>,
        person: &Person,
    ) -> Result<String> {
        if let Some(code) = codes.first() {
            return Ok(code.symbol());
        }
        let attribute = self.field(referenced_by_attribute, "codes or referenced_by_attribute")?;
        person
            .lookup(attribute)
            .map(|v| v.to_string())
            .ok_or_else(|| SimError::MissingValue(format!("attribute '{}'", attribute)))
    }
}

fn count_true(
    conditions: &[Condition],
    history: &[State],
    time: Timestamp,
    person: &Person,
) -> Result<usize> {
    let mut count = 0;
    for c in conditions {
        if c.test(history, time, person)? {
            count += 1;
        }
    }
    Ok(count)
}
