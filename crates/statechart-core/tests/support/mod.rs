//! Hand-written `MachineDefinition` fixtures for the seed scenarios in
//! SPEC_FULL.md §8. These stand in for the out-of-scope machine builder DSL —
//! each fixture is the smallest pure `transition`/`initial_state` pair that
//! exercises one scenario, assembled by hand rather than through a shared
//! macro/builder.

use std::collections::HashMap;
use std::time::Duration;

use smallvec::SmallVec;
use statechart_core::{ActorHandle, ActorId, ActorRef, Event, MachineDefinition, Resolvable, ResolvedAction, ScxmlEvent, SendTarget, SerializedState, State, StateValue};

/// A child-registry placeholder: the machine declares *which ids* should be
/// alive in a given state (§3's invariant that `state.children` and the live
/// registry agree on keys), not real actor handles — the interpreter replaces
/// whatever `ActorRef` value is here with the live one once actions run. See
/// `Engine::settle` in `crates/statechart-core/src/engine.rs`.
pub struct PlaceholderActor(pub ActorId);

impl ActorHandle for PlaceholderActor {
	fn id(&self) -> &ActorId {
		&self.0
	}
	fn send(&self, _event: Event) {}
	fn stop(&self) {}
}

pub fn placeholder(id: &str) -> ActorRef {
	std::sync::Arc::new(PlaceholderActor(ActorId::from(id)))
}

pub fn leaf(state: &State<()>) -> String {
	state.value.top_id().unwrap_or_default().to_string()
}

fn bare_state(id: &str, actions: SmallVec<[ResolvedAction<()>; 4]>, done: bool) -> State<()> {
	State {
		value: StateValue::atomic(id),
		context: (),
		actions,
		children: HashMap::new(),
		changed: true,
		done,
		event: ScxmlEvent::new(Event::new("xstate.init")),
		history_value: None,
	}
}

/// Scenario 1: `green --TIMER/delay 10--> yellow --TIMER/delay 10--> red --TIMER/delay 10--> green`.
/// ("after 10" and `send('TIMER', {delay: 10})` are equivalent per §8's boundary behavior.)
pub struct TrafficLightMachine;

impl TrafficLightMachine {
	fn timer_state(id: &str) -> State<()> {
		let mut actions = SmallVec::new();
		actions.push(ResolvedAction::Send {
			event: Resolvable::Literal(Event::new("TIMER")),
			target: SendTarget::SelfActor,
			delay: Some(Resolvable::Literal(Duration::from_millis(10))),
			id: None,
		});
		bare_state(id, actions, false)
	}
}

impl MachineDefinition for TrafficLightMachine {
	type Context = ();

	fn id(&self) -> &str {
		"traffic-light"
	}

	fn initial_state(&self) -> statechart_core::Result<State<()>> {
		Ok(Self::timer_state("green"))
	}

	fn transition(&self, state: &State<()>, event: &ScxmlEvent) -> State<()> {
		let next_id = match (leaf(state).as_str(), event.name.as_str()) {
			("green", "TIMER") => "yellow",
			("yellow", "TIMER") => "red",
			("red", "TIMER") => "green",
			(other, _) => other,
		};
		Self::timer_state(next_id)
	}

	fn resolve_state(&self, serialized: SerializedState<()>) -> statechart_core::Result<State<()>> {
		Ok(Self::timer_state(serialized.value.top_id().unwrap_or("green")))
	}
}

/// Scenarios 2 & 3: `green` schedules one or more delayed sends on entry, and
/// an external event (or an entry action) cancels one of them by id.
pub struct CancelMachine;

impl MachineDefinition for CancelMachine {
	type Context = ();

	fn id(&self) -> &str {
		"cancel-demo"
	}

	fn initial_state(&self) -> statechart_core::Result<State<()>> {
		let mut actions = SmallVec::new();
		actions.push(ResolvedAction::Send {
			event: Resolvable::Literal(Event::new("TIMER")),
			target: SendTarget::SelfActor,
			delay: Some(Resolvable::Literal(Duration::from_millis(10))),
			id: Some("TIMER".to_string()),
		});
		Ok(bare_state("green", actions, false))
	}

	fn transition(&self, state: &State<()>, event: &ScxmlEvent) -> State<()> {
		match (leaf(state).as_str(), event.name.as_str()) {
			("green", "KEEP_GOING") => {
				let mut actions = SmallVec::new();
				actions.push(ResolvedAction::Cancel(Resolvable::Literal("TIMER".to_string())));
				bare_state("green", actions, false)
			}
			("green", "TIMER") => bare_state("cycled", SmallVec::new(), false),
			(other, _) => bare_state(other, SmallVec::new(), false),
		}
	}

	fn resolve_state(&self, serialized: SerializedState<()>) -> statechart_core::Result<State<()>> {
		Ok(bare_state(serialized.value.top_id().unwrap_or("green"), SmallVec::new(), false))
	}
}

/// Scenario 3: entering `start` schedules `FOO` (id `foo`, delay 100) and `BAR`
/// (delay 200), then cancels `foo` by an expression — the machine reaches
/// `pass` on `BAR` and never `fail`.
pub struct CancelByExpressionMachine;

impl MachineDefinition for CancelByExpressionMachine {
	type Context = ();

	fn id(&self) -> &str {
		"cancel-by-expr-demo"
	}

	fn initial_state(&self) -> statechart_core::Result<State<()>> {
		let mut actions = SmallVec::new();
		actions.push(ResolvedAction::Send {
			event: Resolvable::Literal(Event::new("FOO")),
			target: SendTarget::SelfActor,
			delay: Some(Resolvable::Literal(Duration::from_millis(100))),
			id: Some("foo".to_string()),
		});
		actions.push(ResolvedAction::Send {
			event: Resolvable::Literal(Event::new("BAR")),
			target: SendTarget::SelfActor,
			delay: Some(Resolvable::Literal(Duration::from_millis(200))),
			id: None,
		});
		actions.push(ResolvedAction::Cancel(Resolvable::Expr(std::sync::Arc::new(|_ctx, _event, _meta| "foo".to_string()))));
		Ok(bare_state("start", actions, false))
	}

	fn transition(&self, _state: &State<()>, event: &ScxmlEvent) -> State<()> {
		match event.name.as_str() {
			"FOO" => bare_state("fail", SmallVec::new(), true),
			"BAR" => bare_state("pass", SmallVec::new(), true),
			_ => bare_state("start", SmallVec::new(), false),
		}
	}

	fn resolve_state(&self, serialized: SerializedState<()>) -> statechart_core::Result<State<()>> {
		Ok(bare_state(serialized.value.top_id().unwrap_or("start"), SmallVec::new(), false))
	}
}

/// Scenario 5: `idle` has an always-guarded chain (`transient`, guard false,
/// then unconditional to `next`) fully resolved within one `transition` call —
/// observers see `[idle, next]`, never `transient`.
pub struct TransientGuardMachine;

impl MachineDefinition for TransientGuardMachine {
	type Context = ();

	fn id(&self) -> &str {
		"transient-guard-demo"
	}

	fn initial_state(&self) -> statechart_core::Result<State<()>> {
		Ok(bare_state("idle", SmallVec::new(), false))
	}

	fn transition(&self, state: &State<()>, event: &ScxmlEvent) -> State<()> {
		match (leaf(state).as_str(), event.name.as_str()) {
			("idle", "START") => bare_state("next", SmallVec::new(), false),
			(other, _) => bare_state(other, SmallVec::new(), false),
		}
	}

	fn resolve_state(&self, serialized: SerializedState<()>) -> statechart_core::Result<State<()>> {
		Ok(bare_state(serialized.value.top_id().unwrap_or("idle"), SmallVec::new(), false))
	}
}

/// Scenario 4: deferred pre-start events. `a --NEXT_A--> b --NEXT_B--> c` (final).
pub struct DeferredMachine;

impl MachineDefinition for DeferredMachine {
	type Context = ();

	fn id(&self) -> &str {
		"deferred-demo"
	}

	fn initial_state(&self) -> statechart_core::Result<State<()>> {
		Ok(bare_state("a", SmallVec::new(), false))
	}

	fn transition(&self, state: &State<()>, event: &ScxmlEvent) -> State<()> {
		match (leaf(state).as_str(), event.name.as_str()) {
			("a", "NEXT_A") => bare_state("b", SmallVec::new(), false),
			("b", "NEXT_B") => bare_state("c", SmallVec::new(), true),
			(other, _) => bare_state(other, SmallVec::new(), false),
		}
	}

	fn resolve_state(&self, serialized: SerializedState<()>) -> statechart_core::Result<State<()>> {
		Ok(bare_state(serialized.value.top_id().unwrap_or("a"), SmallVec::new(), serialized.done))
	}
}

/// Scenario 6: a promise child resolving to `42`; the parent transitions to
/// `success` via a `done.invoke.childActor` guard and the child disappears
/// from the registry.
pub struct ParentWithChildMachine;

impl MachineDefinition for ParentWithChildMachine {
	type Context = ();

	fn id(&self) -> &str {
		"parent-with-child-demo"
	}

	fn initial_state(&self) -> statechart_core::Result<State<()>> {
		let mut actions = SmallVec::new();
		actions.push(ResolvedAction::StartChild {
			id: ActorId::from("childActor"),
			spawn: statechart_core::behaviors::promise_behavior(|| async { Ok(serde_json::json!(42)) }),
		});
		let mut state = bare_state("waiting", actions, false);
		state.children.insert(ActorId::from("childActor"), placeholder("childActor"));
		Ok(state)
	}

	fn transition(&self, state: &State<()>, event: &ScxmlEvent) -> State<()> {
		if event.name == "done.invoke.childActor" {
			let data_is_42 = event.data.field("data").and_then(serde_json::Value::as_i64) == Some(42);
			if data_is_42 {
				return bare_state("success", SmallVec::new(), true);
			}
		}
		let mut next = bare_state("waiting", SmallVec::new(), false);
		next.children = state.children.clone();
		next
	}

	fn resolve_state(&self, serialized: SerializedState<()>) -> statechart_core::Result<State<()>> {
		Ok(bare_state(serialized.value.top_id().unwrap_or("waiting"), SmallVec::new(), serialized.done))
	}
}

/// Lets a test drain the engine task's and dispatcher task's processing of an
/// already-queued command before asserting on the resulting state — both are
/// synchronous work items on a cooperatively scheduled tokio task, so a
/// handful of yields is enough for them to run to quiescence.
pub async fn settle() {
	for _ in 0..20 {
		tokio::task::yield_now().await;
	}
}
