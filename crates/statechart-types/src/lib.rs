//! Data model shared by the statechart interpreter: events, actor identity, the
//! uniform actor capability, and the state-value tree.
//!
//! Deliberately excludes anything that knows how to *run* a statechart — that lives
//! in `statechart-core`, which depends on this crate rather than the other way
//! around.

mod actor;
mod error;
mod event;
mod state_value;

pub use actor::{ActorHandle, ActorId, ActorRef};
pub use error::{Result, StatechartError};
pub use event::{ActorOrigin, Event, ScxmlEvent};
pub use state_value::StateValue;
