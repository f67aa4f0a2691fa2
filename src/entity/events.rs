//! Append-only life event log

use serde::{Deserialize, Serialize};

use crate::core::types::Timestamp;

pub const BIRTH: &str = "birth";
pub const DEATH: &str = "death";

/// A dated life event (birth, death, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub time: Timestamp,
    pub kind: String,
    /// What produced the event, e.g. the module or "driver"
    pub source: String,
    pub processed: bool,
}

/// Events for one person, in insertion order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventList {
    events: Vec<Event>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        time: Timestamp,
        kind: impl Into<String>,
        source: impl Into<String>,
        processed: bool,
    ) {
        self.events.push(Event {
            time,
            kind: kind.into(),
            source: source.into(),
            processed,
        });
    }

    pub fn had_event(&self, kind: &str) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }

    /// Latest event of the given kind; ties go to the one recorded last
    pub fn most_recent(&self, kind: &str) -> Option<&Event> {
        self.events
            .iter()
            .filter(|e| e.kind == kind)
            .fold(None, |best: Option<&Event>, e| match best {
                Some(b) if b.time > e.time => Some(b),
                _ => Some(e),
            })
    }

    pub fn events_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |e| e.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
