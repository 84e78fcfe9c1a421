//! statechart-core: the Actor/Interpreter Core, Action Executor, Behavior
//! Abstraction, Delayed-Send Registry, Event Queue/Scheduler, Subscription Layer,
//! and Public Façade (`interpret`) described in SPEC_FULL.md §4.
//!
//! Depends on `statechart-types` for the data model and `statechart-clock` for
//! delayed dispatch; neither of those crates depends back on this one.

mod delayed;
mod engine;
mod interpreter;
mod logging;
mod machine;

pub mod behaviors;

pub use interpreter::{interpret, Interpreter, InterpreterOptions, ListenerId, Subscription};
pub use logging::{default_logger, Logger};
pub use machine::{
	ActionMeta, CancelSource, DelaySource, EventSource, LogSource, MachineDefinition, Resolvable, ResolvedAction, SendTarget, SerializedState, State,
};

pub use statechart_clock::{Clock, ClockHandle, RealClock, SimulatedClock, TimerCallback};
pub use statechart_types::{ActorHandle, ActorId, ActorRef, Event, Result, ScxmlEvent, StateValue, StatechartError};
