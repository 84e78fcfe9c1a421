//! The Behavior Abstraction (§4.3): four factories producing a `BehaviorSpec`, a
//! lazy thunk that, once invoked by the Action Executor's `start` action,
//! instantiates an actor and returns its uniform `ActorRef` capability.
//!
//! Per the §9 redesign note, callers never hold a `Behavior` trait object — only
//! these four constructor functions and the `ActorRef` they eventually produce.
//! That closed set is what replaces duck-typed behavior objects.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use futures::Stream;
use statechart_clock::Clock;
use statechart_types::{ActorHandle, ActorId, ActorRef, Event};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::interpreter::{interpret, InterpreterOptions, NestedInterpreterHandle};
use crate::logging::Logger;
use crate::machine::MachineDefinition;

/// Everything a spawned child needs from its parent at start time.
pub struct SpawnCtx {
	pub parent: ActorRef,
	pub cancel_token: CancellationToken,
	pub clock: Arc<dyn Clock>,
	pub logger: Logger,
}

/// A not-yet-instantiated actor template. Invoked exactly once, by the `start`
/// action, the first time the containing interpreter actually runs (never before
/// `Interpreter::start`, satisfying `PromiseBehavior`'s laziness requirement for
/// free: the closure simply isn't called any earlier).
pub type BehaviorSpec = Arc<dyn Fn(ActorId, SpawnCtx) -> ActorRef + Send + Sync>;

/// Closure invoked by a `CallbackBehavior` to emit an event to its parent.
pub type SendBack = Arc<dyn Fn(Event) + Send + Sync>;

/// Registers the handler a `CallbackBehavior` wants invoked for each event sent
/// to it, mirroring XState's `receive(handler)` registration call.
pub type ReceiveHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// Cleanup closure a `CallbackBehavior` factory may return; invoked once on stop.
pub type Disposer = Box<dyn FnOnce() + Send>;

/// The lightweight `ActorHandle` shared by the three non-machine behavior kinds:
/// they have no state of their own to broadcast, only an inbox (if they accept
/// events) and a cancellation token standing in for `stop()`.
struct ChildHandle {
	id: ActorId,
	inbox: Option<mpsc::UnboundedSender<Event>>,
	cancel: CancellationToken,
}

impl ActorHandle for ChildHandle {
	fn id(&self) -> &ActorId {
		&self.id
	}

	fn send(&self, event: Event) {
		if let Some(inbox) = &self.inbox {
			let _ = inbox.send(event);
		}
	}

	fn stop(&self) {
		self.cancel.cancel();
	}
}

/// `MachineBehavior(def)`: instantiates a nested `Interpreter` over `def`, wired
/// with `parent` set to the spawning actor so `sendParent` and the done-state
/// `done.invoke.<id>` emission (handled already by `Engine::finish` for any
/// interpreter with a parent) work without this factory doing anything extra.
/// The nested interpreter is started immediately — a `MachineBehavior` has no
/// lazy-start requirement the way `PromiseBehavior` does.
pub fn machine_behavior<M>(def: Arc<M>) -> BehaviorSpec
where
	M: MachineDefinition,
{
	Arc::new(move |id: ActorId, ctx: SpawnCtx| {
		let options = InterpreterOptions::default()
			.with_clock(ctx.clock.clone())
			.with_logger(ctx.logger.clone())
			.with_id(id.as_str().to_string())
			.with_parent(ctx.parent.clone());
		let interpreter = interpret(def.clone(), options);
		interpreter.start();
		Arc::new(NestedInterpreterHandle { interpreter }) as ActorRef
	})
}

/// `PromiseBehavior(factory)`: invokes `factory` once the behavior starts. On
/// resolve, emits `done.invoke.<id>` to the parent with the resolved value as
/// payload; on reject, `error.platform.<id>`. Accepts no events — a resolved or
/// rejected promise has nothing further to receive.
pub fn promise_behavior<F, Fut>(factory: F) -> BehaviorSpec
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<serde_json::Value, serde_json::Value>> + Send + 'static,
{
	let factory = Arc::new(factory);
	Arc::new(move |id: ActorId, ctx: SpawnCtx| {
		let factory = factory.clone();
		let parent = ctx.parent.clone();
		let cancel = ctx.cancel_token.clone();
		let id_for_task = id.clone();

		tokio::spawn(async move {
			tokio::select! {
				result = factory() => {
					let event = match result {
						Ok(data) => Event::with_payload(format!("done.invoke.{id_for_task}"), data),
						Err(data) => Event::with_payload(format!("error.platform.{id_for_task}"), data),
					};
					parent.send(event);
				}
				() = cancel.cancelled() => {}
			}
		});

		Arc::new(ChildHandle {
			id,
			inbox: None,
			cancel: ctx.cancel_token,
		}) as ActorRef
	})
}

/// `ObservableBehavior(factory)`: subscribes to the stream `factory` produces on
/// start, forwarding each emission to the parent as an event; completion emits a
/// done event. Dropping the stream on `stop` is the unsubscribe.
pub fn observable_behavior<F, S>(factory: F) -> BehaviorSpec
where
	F: Fn() -> S + Send + Sync + 'static,
	S: Stream<Item = Event> + Send + 'static,
{
	let factory = Arc::new(factory);
	Arc::new(move |id: ActorId, ctx: SpawnCtx| {
		use futures::StreamExt;

		let factory = factory.clone();
		let parent = ctx.parent.clone();
		let cancel = ctx.cancel_token.clone();
		let id_for_task = id.clone();

		tokio::spawn(async move {
			let mut stream = Box::pin(factory());
			loop {
				tokio::select! {
					next = stream.next() => {
						match next {
							Some(event) => parent.send(event),
							None => {
								parent.send(Event::new(format!("done.invoke.{id_for_task}")));
								break;
							}
						}
					}
					() = cancel.cancelled() => break,
				}
			}
		});

		Arc::new(ChildHandle {
			id,
			inbox: None,
			cancel: ctx.cancel_token,
		}) as ActorRef
	})
}

/// `CallbackBehavior(factory)`: `factory(sendBack, register)` runs synchronously
/// at spawn time, registering an event handler via `register`. Any event
/// addressed to this actor thereafter is delivered to that handler on a
/// background task until `stop()`, at which point the optional disposer runs.
pub fn callback_behavior<F>(factory: F) -> BehaviorSpec
where
	F: Fn(SendBack, &dyn Fn(ReceiveHandler)) -> Option<Disposer> + Send + Sync + 'static,
{
	let factory = Arc::new(factory);
	Arc::new(move |id: ActorId, ctx: SpawnCtx| {
		let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
		let parent = ctx.parent.clone();
		let send_back: SendBack = Arc::new(move |event| parent.send(event));

		let handler_slot: Arc<StdMutex<Option<ReceiveHandler>>> = Arc::new(StdMutex::new(None));
		let register = {
			let handler_slot = handler_slot.clone();
			move |handler: ReceiveHandler| {
				*handler_slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handler);
			}
		};

		let disposer = factory(send_back, &register);
		let cancel = ctx.cancel_token.clone();

		tokio::spawn(async move {
			loop {
				tokio::select! {
					maybe_event = rx.recv() => {
						match maybe_event {
							Some(event) => {
								let handler = handler_slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
								if let Some(handler) = handler {
									handler(event);
								}
							}
							None => break,
						}
					}
					() = cancel.cancelled() => break,
				}
			}
			if let Some(disposer) = disposer {
				disposer();
			}
		});

		Arc::new(ChildHandle {
			id,
			inbox: Some(tx),
			cancel: ctx.cancel_token,
		}) as ActorRef
	})
}
