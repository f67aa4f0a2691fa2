//! The simulated person and the collaborators modules read and write:
//! attribute store, life event log and health record.

pub mod attributes;
pub mod events;
pub mod person;
pub mod record;

pub use attributes::AttrValue;
pub use events::{Event, EventList};
pub use person::Person;
pub use record::{Entry, EntryKind, HealthRecord};
