//! Event dispatch
//!
//! Handler registration and isolated, ordered delivery.

mod dispatcher;

pub use dispatcher::{EventDispatcher, Handler};
