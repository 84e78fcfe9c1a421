use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actor::ActorId;

/// A tagged record: `{ type: string, ...payload }`.
///
/// Bare strings are shorthand for `{ type: s }` per the external interface spec —
/// `Event::from("TIMER")` and `Event::new("TIMER")` are equivalent and carry no
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	#[serde(rename = "type")]
	pub event_type: String,
	#[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
	pub payload: Map<String, Value>,
}

impl Event {
	#[must_use]
	pub fn new(event_type: impl Into<String>) -> Self {
		Self {
			event_type: event_type.into(),
			payload: Map::new(),
		}
	}

	#[must_use]
	pub fn with_payload(event_type: impl Into<String>, payload: Value) -> Self {
		let payload = match payload {
			Value::Object(map) => map,
			other => {
				let mut map = Map::new();
				map.insert("data".to_string(), other);
				map
			}
		};
		Self {
			event_type: event_type.into(),
			payload,
		}
	}

	#[must_use]
	pub fn field(&self, key: &str) -> Option<&Value> {
		self.payload.get(key)
	}
}

impl From<&str> for Event {
	fn from(s: &str) -> Self {
		Self::new(s)
	}
}

impl From<String> for Event {
	fn from(s: String) -> Self {
		Self::new(s)
	}
}

/// Where an event originated, if not the host application itself. Needed so that
/// `respond` can route back to whoever sent the event that caused the current
/// state entry.
pub type ActorOrigin = ActorId;

/// Internal wrapper carrying routing metadata alongside the wire-visible `Event`.
///
/// `name` mirrors `data.event_type` for convenience in match arms and logging;
/// kept distinct from `data` because the machine definition sees only `data`
/// while the interpreter additionally needs `origin` for `respond`/`sendParent`.
#[derive(Debug, Clone)]
pub struct ScxmlEvent {
	pub name: String,
	pub data: Event,
	pub origin: Option<ActorOrigin>,
}

impl ScxmlEvent {
	#[must_use]
	pub fn new(data: Event) -> Self {
		Self {
			name: data.event_type.clone(),
			origin: None,
			data,
		}
	}

	#[must_use]
	pub fn from_origin(data: Event, origin: ActorOrigin) -> Self {
		Self {
			name: data.event_type.clone(),
			origin: Some(origin),
			data,
		}
	}
}

impl<T: Into<Event>> From<T> for ScxmlEvent {
	fn from(value: T) -> Self {
		Self::new(value.into())
	}
}
