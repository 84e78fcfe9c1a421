use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use statechart_clock::Clock;
use statechart_types::{ActorHandle, ActorId, ActorRef, Event, Result, ScxmlEvent, StatechartError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::delayed::DelayedSendRegistry;
use crate::logging::Logger;
use crate::machine::{ActionMeta, MachineDefinition, ResolvedAction, SendTarget, State};

/// Commands accepted by the background engine task. `Subscribe` has no variant
/// here — subscription is implemented directly over a cloned `watch::Receiver`
/// (see `crate::interpreter`), which gives replay-latest semantics for free.
pub(crate) enum Command<C> {
	Start(Option<State<C>>),
	Send(Event),
	RouteSend(ActorId, Event),
	Stop,
}

/// Outcome of resolving a `SendTarget` against the actor topology at the moment
/// of resolution. `Unknown` and `None` are deliberately distinct: an explicit or
/// child id that isn't found is a reportable error, while `Parent` with no
/// parent present is a legitimate no-op (e.g. a top-level machine).
enum TargetResolution {
	SelfActor,
	Actor(ActorRef),
	Unknown(ActorId),
	None,
}

/// Routes a send targeting `#_internal`/self back into the engine's own command
/// channel, so a nested child's `sendParent` (where the parent is this engine)
/// and delayed self-sends share the same inbox as external callers.
struct SelfHandle<C> {
	id: ActorId,
	tx: mpsc::UnboundedSender<Command<C>>,
}

impl<C: Send + Sync + 'static> ActorHandle for SelfHandle<C> {
	fn id(&self) -> &ActorId {
		&self.id
	}

	fn send(&self, event: Event) {
		let _ = self.tx.send(Command::Send(event));
	}

	fn stop(&self) {
		let _ = self.tx.send(Command::Stop);
	}
}

/// The background task driving one interpreter instance: the macrostep loop
/// (§4.1), the Action Executor (§4.2), and child/delayed-send bookkeeping.
///
/// Owns all mutable per-run state. The `Interpreter` façade (`crate::interpreter`)
/// never touches these fields directly — only through the command channel and the
/// broadcast `watch` channels.
pub(crate) struct Engine<M: MachineDefinition> {
	pub(crate) id: ActorId,
	pub(crate) machine: Arc<M>,
	pub(crate) state: Option<State<M::Context>>,
	pub(crate) microstep_queue: VecDeque<ScxmlEvent>,
	pub(crate) children: HashMap<ActorId, ActorRef>,
	pub(crate) delayed: DelayedSendRegistry,
	pub(crate) parent: Option<ActorRef>,
	pub(crate) logger: Logger,
	pub(crate) clock: Arc<dyn Clock>,
	pub(crate) cancel_token: CancellationToken,
	pub(crate) cmd_rx: mpsc::UnboundedReceiver<Command<M::Context>>,
	pub(crate) self_tx: mpsc::UnboundedSender<Command<M::Context>>,
	pub(crate) state_tx: watch::Sender<Option<State<M::Context>>>,
	pub(crate) error_tx: watch::Sender<Option<StatechartError>>,
	pub(crate) terminal: bool,
}

impl<M: MachineDefinition> Engine<M> {
	pub(crate) async fn run(mut self) {
		info!(id = %self.id, "interpreter engine started");
		loop {
			let should_exit = tokio::select! {
				maybe_cmd = self.cmd_rx.recv() => self.handle_command(maybe_cmd),
				() = self.cancel_token.cancelled() => {
					self.teardown();
					true
				}
			};
			if should_exit {
				break;
			}
		}
		info!(id = %self.id, "interpreter engine stopped");
	}

	fn handle_command(&mut self, cmd: Option<Command<M::Context>>) -> bool {
		match cmd {
			Some(Command::Start(initial)) => {
				if self.state.is_none() {
					if let Err(err) = self.do_start(initial) {
						warn!(id = %self.id, error = %err, "start failed");
						let _ = self.error_tx.send(Some(err));
						self.teardown();
						return true;
					}
				}
				self.terminal
			}
			Some(Command::Send(event)) => {
				if self.state.is_some() {
					self.microstep_queue.push_back(ScxmlEvent::new(event));
					self.flush();
				}
				self.terminal
			}
			Some(Command::RouteSend(child_id, event)) => {
				match self.children.get(&child_id) {
					Some(child) => child.send(event),
					None => {
						warn!(id = %self.id, child = %child_id, "sendTo unknown child id");
						let _ = self.error_tx.send(Some(StatechartError::UnknownActorId { id: child_id }));
					}
				}
				self.terminal
			}
			Some(Command::Stop) => {
				self.teardown();
				true
			}
			None => true,
		}
	}

	fn do_start(&mut self, initial: Option<State<M::Context>>) -> Result<()> {
		let state = match initial {
			Some(s) => s,
			None => self.machine.initial_state()?,
		};
		let triggering = state.event.clone();
		let done = self.settle(state, &triggering);
		if done {
			self.finish();
		}
		Ok(())
	}

	fn flush(&mut self) {
		loop {
			let Some(scxml_event) = self.microstep_queue.pop_front() else { break };
			let Some(current) = self.state.take() else { break };

			let new_state = self.machine.transition(&current, &scxml_event);
			let done = self.settle(new_state, &scxml_event);

			if done {
				self.finish();
				return;
			}
		}
	}

	/// Run the action list attached to `new_state`, reconcile the child registry
	/// against it, publish the settled state, and report whether it's terminal.
	fn settle(&mut self, mut new_state: State<M::Context>, triggering: &ScxmlEvent) -> bool {
		self.reconcile_children(&new_state);

		for action in &new_state.actions {
			self.execute_action(action, &new_state.context, triggering);
		}

		// Reflect the registry as it stands after this microstep's start/stop
		// actions ran — the machine's own `transition` has no spawning
		// capability, so `children` here is authoritative only for removals.
		new_state.children = self.children.clone();

		let done = new_state.done;
		self.state = Some(new_state.clone());
		let _ = self.state_tx.send(self.state.clone());
		done
	}

	fn reconcile_children(&mut self, expected: &State<M::Context>) {
		let stale: Vec<ActorId> = self.children.keys().filter(|id| !expected.children.contains_key(*id)).cloned().collect();
		for id in stale {
			if let Some(child) = self.children.remove(&id) {
				debug!(id = %self.id, child = %child.id(), "child left scope, stopping");
				child.stop();
			}
		}
	}

	fn execute_action(&mut self, action: &ResolvedAction<M::Context>, ctx: &M::Context, triggering: &ScxmlEvent) {
		let meta = ActionMeta { event: triggering };
		match action {
			ResolvedAction::Raise(event) => {
				self.microstep_queue.push_back(ScxmlEvent::from_origin(event.clone(), self.id.clone()));
			}
			ResolvedAction::Log(src) => {
				let message = src.resolve(ctx, triggering, &meta);
				(self.logger)(&message);
			}
			ResolvedAction::Respond(event) => self.respond(event.clone(), triggering),
			ResolvedAction::SendParent(event) => {
				if let Some(parent) = &self.parent {
					parent.send(event.clone());
				}
			}
			ResolvedAction::Send { event, target, delay, id } => {
				let resolved = event.resolve(ctx, triggering, &meta);
				let send_id = id.clone().unwrap_or_else(|| resolved.event_type.clone());
				match delay {
					None => self.dispatch_now(target, resolved),
					Some(delay_src) => {
						let duration = delay_src.resolve(ctx, triggering, &meta);
						self.schedule_delayed(target, resolved, duration, send_id);
					}
				}
			}
			ResolvedAction::Cancel(cancel_src) => {
				let send_id = cancel_src.resolve(ctx, triggering, &meta);
				self.delayed.cancel(&send_id);
			}
			ResolvedAction::StartChild { id, spawn } => self.start_child(id.clone(), spawn.clone()),
			ResolvedAction::StopChild(target_src) => {
				let target = target_src.resolve(ctx, triggering, &meta);
				self.stop_child_target(&target);
			}
		}
	}

	fn respond(&mut self, event: Event, triggering: &ScxmlEvent) {
		let Some(origin) = &triggering.origin else { return };
		if *origin == self.id {
			self.microstep_queue.push_back(ScxmlEvent::from_origin(event, self.id.clone()));
		} else if let Some(child) = self.children.get(origin) {
			child.send(event);
		} else if self.parent.as_ref().is_some_and(|p| p.id() == origin) {
			self.parent.as_ref().unwrap().send(event);
		}
	}

	/// Resolves a `SendTarget` against the current actor/parent/children topology,
	/// the same way for an immediate dispatch (`dispatch_now`) and a delayed one
	/// (`schedule_delayed`'s callback, which may run on a different task much
	/// later) — both must honor the same self → children → parent → unknown order.
	fn resolve_target(&self, target: &SendTarget) -> TargetResolution {
		match target {
			SendTarget::SelfActor => TargetResolution::SelfActor,
			SendTarget::Parent => match &self.parent {
				Some(parent) => TargetResolution::Actor(parent.clone()),
				None => TargetResolution::None,
			},
			SendTarget::Child(id) => match self.children.get(id) {
				Some(child) => TargetResolution::Actor(child.clone()),
				None => TargetResolution::Unknown(id.clone()),
			},
			SendTarget::Explicit(id) => {
				if *id == self.id {
					TargetResolution::SelfActor
				} else if let Some(child) = self.children.get(id) {
					TargetResolution::Actor(child.clone())
				} else if self.parent.as_ref().is_some_and(|p| p.id() == id) {
					TargetResolution::Actor(self.parent.clone().unwrap())
				} else {
					TargetResolution::Unknown(id.clone())
				}
			}
		}
	}

	fn dispatch_now(&mut self, target: &SendTarget, event: Event) {
		match self.resolve_target(target) {
			TargetResolution::SelfActor => {
				self.microstep_queue.push_back(ScxmlEvent::from_origin(event, self.id.clone()));
			}
			TargetResolution::Actor(actor) => actor.send(event),
			TargetResolution::Unknown(id) => {
				warn!(id = %self.id, target = %id, "send target not found");
				let _ = self.error_tx.send(Some(StatechartError::UnknownActorId { id }));
			}
			TargetResolution::None => {}
		}
	}

	fn schedule_delayed(&mut self, target: &SendTarget, event: Event, duration: Duration, send_id: String) {
		let resolution = self.resolve_target(target);
		let self_tx = self.self_tx.clone();
		let error_tx = self.error_tx.clone();
		let id = self.id.clone();

		let callback = Box::new(move || match resolution {
			TargetResolution::SelfActor => {
				let _ = self_tx.send(Command::Send(event));
			}
			TargetResolution::Actor(actor) => actor.send(event),
			TargetResolution::Unknown(target_id) => {
				warn!(id = %id, target = %target_id, "delayed send target not found");
				let _ = error_tx.send(Some(StatechartError::UnknownActorId { id: target_id }));
			}
			TargetResolution::None => {}
		});

		let handle = self.clock.set_timeout(duration, callback);
		trace!(id = %self.id, send_id, delay_ms = duration.as_millis() as u64, "delayed send scheduled");
		self.delayed.register(send_id, handle);
	}

	fn start_child(&mut self, id: ActorId, spawn: crate::behaviors::BehaviorSpec) {
		let spawn_ctx = crate::behaviors::SpawnCtx {
			parent: self.self_actor_ref(),
			cancel_token: self.cancel_token.child_token(),
			clock: self.clock.clone(),
			logger: self.logger.clone(),
		};
		debug!(id = %self.id, child = %id, "starting child actor");
		let actor_ref = spawn(id.clone(), spawn_ctx);
		self.children.insert(id, actor_ref);
	}

	fn stop_child_target(&mut self, target: &SendTarget) {
		let id = match target {
			SendTarget::Child(id) | SendTarget::Explicit(id) => Some(id.clone()),
			_ => None,
		};
		if let Some(id) = id {
			if let Some(child) = self.children.remove(&id) {
				debug!(id = %self.id, child = %id, "stopping child actor by explicit action");
				child.stop();
			}
		}
	}

	fn self_actor_ref(&self) -> ActorRef {
		Arc::new(SelfHandle {
			id: self.id.clone(),
			tx: self.self_tx.clone(),
		})
	}

	/// Emit `done.invoke.<id>` to the parent, if any, carrying the final context.
	fn notify_parent_done(&self) {
		let Some(parent) = &self.parent else { return };
		let Some(state) = &self.state else { return };
		let payload = serde_json::to_value(&state.context).unwrap_or(serde_json::Value::Null);
		parent.send(Event::with_payload(format!("done.invoke.{}", self.id), payload));
	}

	fn finish(&mut self) {
		self.notify_parent_done();
		self.teardown();
	}

	fn teardown(&mut self) {
		if self.terminal {
			return;
		}
		self.terminal = true;
		self.delayed.cancel_all();
		for (_, child) in self.children.drain() {
			child.stop();
		}
		self.cancel_token.cancel();
		info!(id = %self.id, "interpreter torn down");
	}
}
