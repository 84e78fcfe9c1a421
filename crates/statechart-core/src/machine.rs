use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use statechart_types::{ActorId, ActorRef, Event, Result, ScxmlEvent, StateValue};

use crate::behaviors::BehaviorSpec;

/// Context passed to every expression-valued action field: the current context,
/// the event that caused the current state entry, and routing metadata.
pub struct ActionMeta<'a> {
	pub event: &'a ScxmlEvent,
}

/// Where a `send`/`stop` action's target resolves to.
#[derive(Debug, Clone)]
pub enum SendTarget {
	/// `#_internal` — routed to self regardless of current state.
	SelfActor,
	Child(ActorId),
	Parent,
	Explicit(ActorId),
}

type Expr<C, T> = Arc<dyn Fn(&C, &ScxmlEvent, &ActionMeta<'_>) -> T + Send + Sync>;

/// A value that may be given literally or computed from `(context, event, meta)`
/// at action-execution time, per §4.2's expression contract.
pub enum Resolvable<C, T> {
	Literal(T),
	Expr(Expr<C, T>),
}

impl<C, T: Clone> Resolvable<C, T> {
	pub fn resolve(&self, ctx: &C, event: &ScxmlEvent, meta: &ActionMeta<'_>) -> T {
		match self {
			Self::Literal(v) => v.clone(),
			Self::Expr(f) => f(ctx, event, meta),
		}
	}
}

impl<C, T> Clone for Resolvable<C, T>
where
	T: Clone,
{
	fn clone(&self) -> Self {
		match self {
			Self::Literal(v) => Self::Literal(v.clone()),
			Self::Expr(f) => Self::Expr(f.clone()),
		}
	}
}

pub type EventSource<C> = Resolvable<C, Event>;
pub type DelaySource<C> = Resolvable<C, std::time::Duration>;
pub type CancelSource<C> = Resolvable<C, String>;
pub type LogSource<C> = Resolvable<C, String>;
pub type StopTarget<C> = Resolvable<C, SendTarget>;

/// The concrete shape of the "ordered list of resolved actions" a `State<C>`
/// carries (§3). The machine definition produces these; the Action Executor
/// (`crate::engine`) is the only thing that interprets them.
pub enum ResolvedAction<C> {
	Send {
		event: EventSource<C>,
		target: SendTarget,
		delay: Option<DelaySource<C>>,
		id: Option<String>,
	},
	Cancel(CancelSource<C>),
	Raise(Event),
	Log(LogSource<C>),
	Respond(Event),
	SendParent(Event),
	StartChild { id: ActorId, spawn: BehaviorSpec },
	StopChild(StopTarget<C>),
}

impl<C> Clone for ResolvedAction<C> {
	fn clone(&self) -> Self {
		match self {
			Self::Send { event, target, delay, id } => Self::Send {
				event: event.clone(),
				target: target.clone(),
				delay: delay.clone(),
				id: id.clone(),
			},
			Self::Cancel(c) => Self::Cancel(c.clone()),
			Self::Raise(e) => Self::Raise(e.clone()),
			Self::Log(l) => Self::Log(l.clone()),
			Self::Respond(e) => Self::Respond(e.clone()),
			Self::SendParent(e) => Self::SendParent(e.clone()),
			Self::StartChild { id, spawn } => Self::StartChild { id: id.clone(), spawn: spawn.clone() },
			Self::StopChild(t) => Self::StopChild(t.clone()),
		}
	}
}

/// A settled (non-transient) state produced by `MachineDefinition::transition`.
///
/// Opaque to interpreter *logic* beyond what it needs to drive the macrostep loop:
/// the interpreter reads `actions`, `children`, `done`, and broadcasts the whole
/// value to subscribers, but never inspects `context` itself.
#[derive(Clone)]
pub struct State<C> {
	pub value: StateValue,
	pub context: C,
	pub actions: SmallVec<[ResolvedAction<C>; 4]>,
	pub children: HashMap<ActorId, ActorRef>,
	pub changed: bool,
	pub done: bool,
	pub event: ScxmlEvent,
	pub history_value: Option<serde_json::Value>,
}

impl<C: std::fmt::Debug> std::fmt::Debug for State<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("State")
			.field("value", &self.value)
			.field("context", &self.context)
			.field("children", &self.children.keys().collect::<Vec<_>>())
			.field("changed", &self.changed)
			.field("done", &self.done)
			.finish_non_exhaustive()
	}
}

impl<C: Clone> State<C> {
	/// The plain-record projection from §6: everything serializable, with
	/// `children` reduced to the set of live ids (an `ActorRef` cannot itself be
	/// serialized).
	#[must_use]
	pub fn to_serialized(&self) -> SerializedState<C> {
		SerializedState {
			value: self.value.clone(),
			context: self.context.clone(),
			children: self.children.keys().cloned().collect(),
			history_value: self.history_value.clone(),
			done: self.done,
			event: self.event.data.clone(),
		}
	}
}

/// The plain-record shape a `State` serializes to, and the shape
/// `MachineDefinition::resolve_state` rehydrates from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: serde::de::DeserializeOwned"))]
pub struct SerializedState<C> {
	pub value: StateValue,
	pub context: C,
	pub children: Vec<ActorId>,
	pub history_value: Option<serde_json::Value>,
	pub done: bool,
	pub event: Event,
}

/// The abstract collaborator the interpreter drives. Out of scope: the
/// declarative description of states/transitions/guards that produces these
/// `State` values — only the pure, already-resolved contract is in scope here.
pub trait MachineDefinition: Send + Sync + 'static {
	/// `Serialize` is required so that `done.invoke.<id>`/`error.platform.<id>`
	/// payloads and the §6 serialized-state record can carry the context without
	/// the interpreter needing to know its shape.
	type Context: Clone + Send + Sync + Serialize + 'static;

	/// Identity used as the default interpreter id and in error messages.
	fn id(&self) -> &str;

	/// The machine's initial state. Must be idempotent and side-effect-free:
	/// calling this repeatedly must not spawn actors or fire entry actions — only
	/// `Interpreter::start` actually executes the actions a `State` carries.
	fn initial_state(&self) -> Result<State<Self::Context>>;

	/// Pure transition function. Must fully resolve any chain of eventless
	/// ("always") transitions internally before returning — the interpreter
	/// never observes a transient state (see SPEC_FULL.md §2).
	fn transition(&self, state: &State<Self::Context>, event: &ScxmlEvent) -> State<Self::Context>;

	/// Rehydrate a serialized record into a live state, repopulating the entry
	/// actions that would fire on (re-)entering it. Used by `Interpreter::start`
	/// when given a restored state.
	fn resolve_state(&self, serialized: SerializedState<Self::Context>) -> Result<State<Self::Context>>;
}
