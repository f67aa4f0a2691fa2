//! A simulated person

use ahash::AHashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::core::types::{symbolize, EntityId, Timestamp};
use crate::entity::attributes::AttrValue;
use crate::entity::events::{EventList, BIRTH, DEATH};
use crate::entity::record::HealthRecord;

pub const GENDER: &str = "gender";
pub const IS_ALIVE: &str = "is_alive";
pub const SOCIOECONOMIC_CATEGORY: &str = "socioeconomic_category";

/// Person state shared by every module context advancing them
///
/// Owns its own random generator so a person's history depends only on
/// its seed, not on which worker thread ran it or in what order.
#[derive(Debug, Clone)]
pub struct Person {
    pub id: EntityId,
    attributes: AHashMap<String, AttrValue>,
    /// Current symptom severities, 0-100
    symptoms: AHashMap<String, f64>,
    pub events: EventList,
    pub record: HealthRecord,
    rng: ChaCha8Rng,
}

impl Person {
    pub fn new(id: EntityId, seed: u64) -> Self {
        Self {
            id,
            attributes: AHashMap::new(),
            symptoms: AHashMap::new(),
            events: EventList::new(),
            record: HealthRecord::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// A person with a birth event at `birth`
    pub fn born(id: EntityId, seed: u64, birth: Timestamp) -> Self {
        let mut person = Self::new(id, seed);
        person.events.create(birth, BIRTH, "driver", true);
        person.set(IS_ALIVE, true);
        person
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    /// Look up by exact key, then by the symbolized form of the key
    pub fn lookup(&self, key: &str) -> Option<&AttrValue> {
        self.attributes
            .get(key)
            .or_else(|| self.attributes.get(&symbolize(key)))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.attributes.remove(key)
    }

    pub fn birth_time(&self) -> Option<Timestamp> {
        self.events.most_recent(BIRTH).map(|e| e.time)
    }

    pub fn is_alive(&self) -> bool {
        !self.events.had_event(DEATH)
            && self.get(IS_ALIVE).and_then(AttrValue::as_bool).unwrap_or(true)
    }

    pub fn mark_deceased(&mut self, time: Timestamp, source: &str) {
        self.set(IS_ALIVE, false);
        self.events.create(time, DEATH, source, true);
        self.record.death(time);
    }

    pub fn set_symptom(&mut self, symptom: impl Into<String>, severity: f64) {
        self.symptoms.insert(symptom.into(), severity);
    }

    pub fn symptom(&self, symptom: &str) -> Option<f64> {
        self.symptoms.get(symptom).copied()
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_falls_back_to_symbol_form() {
        let mut person = Person::new(EntityId::from_seed(1, 0), 1);
        person.set("diabetes_severity", 3i64);
        assert_eq!(person.lookup("Diabetes Severity"), Some(&AttrValue::Int(3)));
        assert_eq!(person.lookup("missing"), None);
    }

    #[test]
    fn test_death_marks_all_collaborators() {
        let mut person = Person::born(EntityId::from_seed(1, 0), 1, 0);
        assert!(person.is_alive());
        assert_eq!(person.birth_time(), Some(0));

        person.mark_deceased(500, "test");
        assert!(!person.is_alive());
        assert_eq!(person.record.death_time(), Some(500));
        assert_eq!(person.events.most_recent(DEATH).map(|e| e.time), Some(500));
    }
}
