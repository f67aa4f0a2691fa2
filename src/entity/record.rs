//! In-memory health record (the chart the modules write into)
//!
//! Write operations mirror what a clinical module can do to a chart:
//! encounters, condition onset/end, medication start/stop, procedures,
//! observations and death. Export formats are out of scope; the record is
//! serializable so the driver can emit it as JSON.

use serde::{Deserialize, Serialize};

use crate::core::types::{Code, Timestamp};
use crate::entity::attributes::AttrValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Encounter,
    Condition,
    Medication,
    Procedure,
    Observation,
    Death,
}

/// One chart entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub kind: EntryKind,
    /// Lookup key, see `core::types::symbolize`
    pub symbol: String,
    pub codes: Vec<Code>,
    pub start: Timestamp,
    /// Set when a condition resolves or a medication is stopped
    pub stop: Option<Timestamp>,
    pub reasons: Vec<String>,
    pub encounter_class: Option<String>,
    pub value: Option<AttrValue>,
}

impl Entry {
    fn new(kind: EntryKind, symbol: &str, codes: Vec<Code>, start: Timestamp) -> Self {
        Self {
            kind,
            symbol: symbol.to_string(),
            codes,
            start,
            stop: None,
            reasons: Vec::new(),
            encounter_class: None,
            value: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stop.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthRecord {
    entries: Vec<Entry>,
    death: Option<Timestamp>,
}

impl HealthRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encounter(
        &mut self,
        symbol: &str,
        codes: Vec<Code>,
        encounter_class: Option<String>,
        time: Timestamp,
    ) {
        let mut entry = Entry::new(EntryKind::Encounter, symbol, codes, time);
        entry.encounter_class = encounter_class;
        self.entries.push(entry);
    }

    /// Returns false if the condition was already active
    pub fn condition_onset(&mut self, symbol: &str, codes: Vec<Code>, time: Timestamp) -> bool {
        if self.condition_active(symbol) {
            return false;
        }
        self.entries
            .push(Entry::new(EntryKind::Condition, symbol, codes, time));
        true
    }

    /// Returns false if no active condition matched
    pub fn condition_end(&mut self, symbol: &str, time: Timestamp) -> bool {
        self.stop_active(EntryKind::Condition, symbol, time, None)
    }

    pub fn medication_start(
        &mut self,
        symbol: &str,
        codes: Vec<Code>,
        time: Timestamp,
        reasons: Vec<String>,
    ) {
        let mut entry = Entry::new(EntryKind::Medication, symbol, codes, time);
        entry.reasons = reasons;
        self.entries.push(entry);
    }

    pub fn medication_stop(&mut self, symbol: &str, time: Timestamp, reason: &str) -> bool {
        self.stop_active(EntryKind::Medication, symbol, time, Some(reason))
    }

    pub fn procedure(
        &mut self,
        symbol: &str,
        codes: Vec<Code>,
        time: Timestamp,
        reason: Option<String>,
    ) {
        let mut entry = Entry::new(EntryKind::Procedure, symbol, codes, time);
        entry.stop = Some(time);
        entry.reasons = reason.into_iter().collect();
        self.entries.push(entry);
    }

    pub fn observation(&mut self, symbol: &str, value: AttrValue, time: Timestamp) {
        let mut entry = Entry::new(EntryKind::Observation, symbol, Vec::new(), time);
        entry.value = Some(value);
        self.entries.push(entry);
    }

    pub fn death(&mut self, time: Timestamp) {
        if self.death.is_some() {
            return;
        }
        self.death = Some(time);
        self.entries
            .push(Entry::new(EntryKind::Death, "death", Vec::new(), time));
    }

    pub fn condition_active(&self, symbol: &str) -> bool {
        self.has_active(EntryKind::Condition, symbol)
    }

    pub fn medication_active(&self, symbol: &str) -> bool {
        self.has_active(EntryKind::Medication, symbol)
    }

    /// Value of the most recently recorded observation with this symbol
    pub fn latest_observation(&self, symbol: &str) -> Option<&AttrValue> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Observation && e.symbol == symbol)
            .fold(None, |best: Option<&Entry>, e| match best {
                Some(b) if b.start > e.start => Some(b),
                _ => Some(e),
            })
            .and_then(|e| e.value.as_ref())
    }

    pub fn death_time(&self) -> Option<Timestamp> {
        self.death
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn count(&self, kind: EntryKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    fn has_active(&self, kind: EntryKind, symbol: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.kind == kind && e.symbol == symbol && e.is_active())
    }

    fn stop_active(
        &mut self,
        kind: EntryKind,
        symbol: &str,
        time: Timestamp,
        reason: Option<&str>,
    ) -> bool {
        let mut stopped = false;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.kind == kind && e.symbol == symbol && e.is_active())
        {
            entry.stop = Some(time);
            if let Some(reason) = reason {
                entry.reasons.push(reason.to_string());
            }
            stopped = true;
        }
        stopped
    }
}
