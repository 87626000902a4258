//! Gateway events
//!
//! Event kinds, decoded payloads, and the cache updates each event applies.

mod event;
mod event_types;

pub use event::{Event, EventData};
pub use event_types::EventKind;
