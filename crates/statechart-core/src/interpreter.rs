//! The Public Façade (§4.1 external interface, §6): `interpret(machine, options)`
//! and the `Interpreter<M>` handle it returns.
//!
//! An mpsc command channel feeds a background `Engine` task, a `watch` channel
//! broadcasts the latest settled `State`, and a `CancellationToken` drives teardown.
//! Subscriber dispatch (`subscribe`/`on_transition`/`on_done`) is layered on top via a
//! small forwarder task over a cloned `watch::Receiver`, per SPEC_FULL.md §4.5:
//! dropping the engine's `state_tx` sender on stop makes the forwarder's
//! `changed().await` return `Err`, which is read as "fire `complete` once, then exit".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use statechart_clock::{Clock, RealClock};
use statechart_types::{ActorHandle, ActorId, ActorRef, Event, Result, ScxmlEvent, StatechartError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::delayed::DelayedSendRegistry;
use crate::engine::{Command, Engine};
use crate::logging::{default_logger, Logger};
use crate::machine::{MachineDefinition, SerializedState, State};

type NextFn<C> = Arc<dyn Fn(&State<C>) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&StatechartError) + Send + Sync>;
type CompleteFn = Arc<dyn Fn() + Send + Sync>;
type DoneFn = Arc<dyn Fn() + Send + Sync>;

/// Identity of a listener registered via `Interpreter::on_transition`, returned so
/// it can later be removed with `Interpreter::off`. Stands in for the source's
/// `off(fn)` — Rust closures carry no usable identity to compare against, so the
/// handle returned at registration time is the identity instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A subscription created by `Interpreter::subscribe`. Dropping this has no
/// effect; call `unsubscribe()` explicitly, matching the source's `{ unsubscribe }`
/// return shape.
pub struct Subscription<C> {
	id: u64,
	registry: Weak<Registry<C>>,
}

impl<C> Subscription<C> {
	/// Idempotent: takes effect before the next delivery, and repeat calls are
	/// harmless no-ops, per §4.5's guarantee.
	pub fn unsubscribe(&self) {
		let Some(registry) = self.registry.upgrade() else { return };
		registry.remove(self.id);
	}
}

struct Registry<C> {
	next_id: AtomicU64,
	next_fns: StdMutex<HashMap<u64, NextFn<C>>>,
	error_fns: StdMutex<HashMap<u64, ErrorFn>>,
	complete_fns: StdMutex<HashMap<u64, CompleteFn>>,
	done_fns: StdMutex<Vec<DoneFn>>,
	done_fired: AtomicBool,
}

impl<C> Registry<C> {
	fn new() -> Self {
		Self {
			next_id: AtomicU64::new(0),
			next_fns: StdMutex::new(HashMap::new()),
			error_fns: StdMutex::new(HashMap::new()),
			complete_fns: StdMutex::new(HashMap::new()),
			done_fns: StdMutex::new(Vec::new()),
			done_fired: AtomicBool::new(false),
		}
	}

	fn alloc_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::Relaxed)
	}

	fn remove(&self, id: u64) {
		self.next_fns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id);
		self.error_fns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id);
		self.complete_fns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id);
	}

	fn notify_next(&self, state: &State<C>) {
		for f in self.next_fns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).values() {
			f(state);
		}
		if state.done && !self.done_fired.swap(true, Ordering::SeqCst) {
			for f in self.done_fns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).iter() {
				f();
			}
		}
	}

	fn notify_error(&self, err: &StatechartError) {
		for f in self.error_fns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).values() {
			f(err);
		}
	}

	fn notify_complete(&self) {
		for f in self.complete_fns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).values() {
			f();
		}
	}
}

/// A send buffered before `start()`, replayed (in order) once the interpreter
/// enters the running state. Only used when `defer_events` is `true` (the default).
enum Deferred {
	ToSelf(Event),
	ToChild(ActorId, Event),
}

/// Recognized construction options (§4.1's table), concretized per SPEC_FULL.md §1's
/// `OrchestratorConfig`-style configuration surface: every field has a total
/// default, so no `validate()` step is needed.
pub struct InterpreterOptions {
	/// Defaults to a `RealClock`.
	pub clock: Option<Arc<dyn Clock>>,
	/// Defaults to forwarding through `tracing::info!`.
	pub logger: Option<Logger>,
	/// Defaults to `true`: `send` before `start` buffers rather than erroring.
	pub defer_events: bool,
	/// Defaults to the machine's own id.
	pub id: Option<String>,
	/// Set when this interpreter is acting as a child actor.
	pub parent: Option<ActorRef>,
}

impl Default for InterpreterOptions {
	fn default() -> Self {
		Self {
			clock: None,
			logger: None,
			defer_events: true,
			id: None,
			parent: None,
		}
	}
}

impl InterpreterOptions {
	#[must_use]
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	#[must_use]
	pub fn with_logger(mut self, logger: Logger) -> Self {
		self.logger = Some(logger);
		self
	}

	#[must_use]
	pub fn with_defer_events(mut self, defer: bool) -> Self {
		self.defer_events = defer;
		self
	}

	#[must_use]
	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	#[must_use]
	pub fn with_parent(mut self, parent: ActorRef) -> Self {
		self.parent = Some(parent);
		self
	}
}

/// The interpreter handle returned by `interpret`. Cloning is not provided — a
/// single owner holds it directly (wrap in `Arc` if multiple owners are needed).
pub struct Interpreter<M: MachineDefinition> {
	id: ActorId,
	machine: Arc<M>,
	cmd_tx: mpsc::UnboundedSender<Command<M::Context>>,
	state_rx: watch::Receiver<Option<State<M::Context>>>,
	clock: Arc<dyn Clock>,
	cancel_token: CancellationToken,
	task_handle: StdMutex<Option<JoinHandle<()>>>,
	dispatcher_handle: StdMutex<Option<JoinHandle<()>>>,
	registry: Arc<Registry<M::Context>>,
	started: AtomicBool,
	stopped: AtomicBool,
	deferred: StdMutex<Vec<Deferred>>,
	defer_events: bool,
}

/// Construct an interpreter in the uninitialized state (§6). The background
/// engine task is spawned immediately but performs no side effects until
/// `start()` sends it the `Start` command, so reading `initial_state()` any
/// number of times beforehand remains side-effect-free.
#[must_use]
pub fn interpret<M: MachineDefinition>(machine: Arc<M>, options: InterpreterOptions) -> Interpreter<M> {
	let defer_events = options.defer_events;
	let id = options.id.map(ActorId::from).unwrap_or_else(|| ActorId::from(machine.id().to_string()));
	let clock: Arc<dyn Clock> = options.clock.unwrap_or_else(|| Arc::new(RealClock::new()));
	let logger = options.logger.unwrap_or_else(default_logger);
	let parent = options.parent;

	let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
	let (state_tx, state_rx) = watch::channel(None);
	let (error_tx, error_rx) = watch::channel(None);
	let cancel_token = CancellationToken::new();

	let engine = Engine {
		id: id.clone(),
		machine: machine.clone(),
		state: None,
		microstep_queue: std::collections::VecDeque::new(),
		children: HashMap::new(),
		delayed: DelayedSendRegistry::new(clock.clone()),
		parent,
		logger,
		clock: clock.clone(),
		cancel_token: cancel_token.clone(),
		cmd_rx,
		self_tx: cmd_tx.clone(),
		state_tx,
		error_tx,
		terminal: false,
	};
	let task_handle = tokio::spawn(engine.run());

	let registry = Arc::new(Registry::new());
	let dispatcher_handle = tokio::spawn(run_dispatcher(state_rx.clone(), error_rx, registry.clone()));

	Interpreter {
		id,
		machine,
		cmd_tx,
		state_rx,
		clock,
		cancel_token,
		task_handle: StdMutex::new(Some(task_handle)),
		dispatcher_handle: StdMutex::new(Some(dispatcher_handle)),
		registry,
		started: AtomicBool::new(false),
		stopped: AtomicBool::new(false),
		deferred: StdMutex::new(Vec::new()),
		defer_events,
	}
}

/// Turns `watch` updates into discrete per-observer callback invocations — a
/// `watch::Receiver` alone only exposes the latest value, not "deliver this
/// state to every registered closure, then fire `complete` exactly once when the
/// engine task ends". Exits (and fires `complete`) once the engine's `state_tx`/
/// `error_tx` senders are dropped, which happens when `Engine::run` returns.
async fn run_dispatcher<C>(mut state_rx: watch::Receiver<Option<State<C>>>, mut error_rx: watch::Receiver<Option<StatechartError>>, registry: Arc<Registry<C>>) {
	loop {
		tokio::select! {
			changed = state_rx.changed() => {
				if changed.is_err() {
					break;
				}
				let snapshot = state_rx.borrow_and_update().clone();
				if let Some(state) = snapshot {
					registry.notify_next(&state);
				}
			}
			changed = error_rx.changed() => {
				if changed.is_err() {
					break;
				}
				let guard = error_rx.borrow_and_update();
				if let Some(err) = guard.as_ref() {
					registry.notify_error(err);
				}
			}
		}
	}
	registry.notify_complete();
}

impl<M: MachineDefinition> Interpreter<M> {
	/// Enter the running state using `machine.initial_state()`. Idempotent: a
	/// second call is a no-op and does not re-emit the initial state or re-run
	/// its entry actions.
	pub fn start(&self) {
		self.start_from(None);
	}

	/// Enter the running state from a previously serialized state, rehydrated via
	/// `MachineDefinition::resolve_state`. Entry actions carried on the restored
	/// state *are* executed — this is intentional (§8's round-trip property).
	pub fn start_from_serialized(&self, serialized: SerializedState<M::Context>) -> Result<()> {
		let resolved = self.machine.resolve_state(serialized)?;
		self.start_from(Some(resolved));
		Ok(())
	}

	fn start_from(&self, initial: Option<State<M::Context>>) {
		if self.started.swap(true, Ordering::SeqCst) {
			return;
		}
		let _ = self.cmd_tx.send(Command::Start(initial));
		let deferred = std::mem::take(&mut *self.deferred.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
		for item in deferred {
			match item {
				Deferred::ToSelf(event) => {
					let _ = self.cmd_tx.send(Command::Send(event));
				}
				Deferred::ToChild(child, event) => {
					let _ = self.cmd_tx.send(Command::RouteSend(child, event));
				}
			}
		}
	}

	/// Cancel all scheduled delays, stop every child (post-order), and mark
	/// stopped. A no-op if already stopped or never started.
	pub fn stop(&self) {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return;
		}
		let _ = self.cmd_tx.send(Command::Stop);
		self.cancel_token.cancel();
	}

	/// `stop()` plus awaiting both background tasks to completion, for callers
	/// (chiefly tests) that need teardown to have fully run before proceeding.
	pub async fn shutdown(&self) {
		self.stop();
		let task = self.task_handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
		if let Some(task) = task {
			let _ = task.await;
		}
		let dispatcher = self.dispatcher_handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
		if let Some(dispatcher) = dispatcher {
			let _ = dispatcher.await;
		}
	}

	/// If running, enqueue and flush. If uninitialized, buffer (default) or fail
	/// with `UninitializedSend` when `defer_events` is disabled. If stopped,
	/// silently drop — not an error.
	pub fn send(&self, event: impl Into<Event>) -> Result<()> {
		let event = event.into();
		if self.stopped.load(Ordering::SeqCst) {
			return Ok(());
		}
		if !self.started.load(Ordering::SeqCst) {
			return self.defer_or_reject(Deferred::ToSelf(event));
		}
		let _ = self.cmd_tx.send(Command::Send(event));
		Ok(())
	}

	/// `send`, routed to a specific child's inbox by id, per §6's `sendTo`.
	pub fn send_to(&self, child: ActorId, event: impl Into<Event>) -> Result<()> {
		let event = event.into();
		if self.stopped.load(Ordering::SeqCst) {
			return Ok(());
		}
		if !self.started.load(Ordering::SeqCst) {
			return self.defer_or_reject(Deferred::ToChild(child, event));
		}
		let _ = self.cmd_tx.send(Command::RouteSend(child, event));
		Ok(())
	}

	fn defer_or_reject(&self, item: Deferred) -> Result<()> {
		if self.defer_events {
			self.deferred.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(item);
			return Ok(());
		}
		let event_type = match &item {
			Deferred::ToSelf(event) | Deferred::ToChild(_, event) => event.event_type.clone(),
		};
		Err(StatechartError::UninitializedSend {
			event_type,
			machine_id: self.id.clone(),
		})
	}

	/// Register an observer. If already running, the current state is delivered
	/// synchronously before this call returns (replay-latest). If not yet
	/// running, no delivery occurs until `start()`.
	pub fn subscribe(
		&self,
		next: impl Fn(&State<M::Context>) + Send + Sync + 'static,
		error: Option<Arc<dyn Fn(&StatechartError) + Send + Sync>>,
		complete: Option<Arc<dyn Fn() + Send + Sync>>,
	) -> Subscription<M::Context> {
		let id = self.registry.alloc_id();
		let next: NextFn<M::Context> = Arc::new(next);
		self
			.registry
			.next_fns
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
			.insert(id, next.clone());
		if let Some(error) = error {
			self.registry.error_fns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id, error);
		}
		if let Some(complete) = complete {
			self
				.registry
				.complete_fns
				.lock()
				.unwrap_or_else(std::sync::PoisonError::into_inner)
				.insert(id, complete);
		}

		if let Some(state) = self.state_rx.borrow().clone() {
			next(&state);
		}

		Subscription {
			id,
			registry: Arc::downgrade(&self.registry),
		}
	}

	/// Register a transition listener. Returns a `ListenerId` usable with `off`.
	pub fn on_transition(&self, f: impl Fn(&State<M::Context>) + Send + Sync + 'static) -> ListenerId {
		let id = self.registry.alloc_id();
		let f: NextFn<M::Context> = Arc::new(f);
		self.registry.next_fns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id, f.clone());
		if let Some(state) = self.state_rx.borrow().clone() {
			f(&state);
		}
		ListenerId(id)
	}

	/// Remove a listener previously registered via `on_transition`.
	pub fn off(&self, listener: ListenerId) {
		self.registry.remove(listener.0);
	}

	/// Fires once when the machine reaches a top-level final state. If the
	/// machine has already reached that state by the time this is called, `f`
	/// fires immediately (the one-shot analogue of subscribe's replay-latest).
	pub fn on_done(&self, f: impl Fn() + Send + Sync + 'static) {
		let already_done = self.state_rx.borrow().as_ref().is_some_and(|s| s.done);
		if already_done {
			f();
			return;
		}
		self.registry.done_fns.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(Arc::new(f));
	}

	/// Pure query: `machine.transition(state, event)` without mutating the
	/// interpreter or firing actions. Falls back to `initial_state()` if called
	/// before `start()`, since both are side-effect-free by contract.
	pub fn next_state(&self, event: impl Into<Event>) -> Result<State<M::Context>> {
		let scxml_event = ScxmlEvent::new(event.into());
		let current = match self.state() {
			Some(state) => state,
			None => self.machine.initial_state()?,
		};
		Ok(self.machine.transition(&current, &scxml_event))
	}

	/// The machine's initial state. Idempotent and side-effect-free: calling
	/// this repeatedly never spawns actors or fires entry actions.
	pub fn initial_state(&self) -> Result<State<M::Context>> {
		self.machine.initial_state()
	}

	/// The latest settled state, or `None` before the first `start()`.
	#[must_use]
	pub fn state(&self) -> Option<State<M::Context>> {
		self.state_rx.borrow().clone()
	}

	/// Alias for `state()`, for callers who want a synchronous, non-blocking read
	/// without the async-property naming.
	#[must_use]
	pub fn current_state(&self) -> Option<State<M::Context>> {
		self.state()
	}

	/// Ids of currently live children, per the latest settled state.
	#[must_use]
	pub fn children(&self) -> Vec<ActorId> {
		self.state_rx.borrow().as_ref().map(|s| s.children.keys().cloned().collect()).unwrap_or_default()
	}

	#[must_use]
	pub fn id(&self) -> &ActorId {
		&self.id
	}

	#[must_use]
	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}
}

/// The `ActorHandle` adapter a spawned `MachineBehavior` child is wrapped in
/// (see `crate::behaviors::machine_behavior`), delegating straight through to the
/// nested `Interpreter`.
pub(crate) struct NestedInterpreterHandle<M: MachineDefinition> {
	pub(crate) interpreter: Interpreter<M>,
}

impl<M: MachineDefinition> ActorHandle for NestedInterpreterHandle<M> {
	fn id(&self) -> &ActorId {
		self.interpreter.id()
	}

	fn send(&self, event: Event) {
		let _ = self.interpreter.send(event);
	}

	fn stop(&self) {
		self.interpreter.stop();
	}
}
