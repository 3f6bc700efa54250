use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload of an event: string keys to arbitrary values
pub type EventData = Map<String, Value>;

/// Reserved event type whose handlers receive every event
pub const WILDCARD: &str = "*";

/// Event types published by the kernel itself
pub mod kernel_events {
    /// A module finished loading. Payload: `module` (module summary).
    pub const MODULE_LOADED: &str = "module_loaded";
    /// A module failed to load. Payload: `exception` (message), `name`.
    pub const MODULE_NOT_LOADED: &str = "module_not_loaded";
}

/// An immutable event record.
///
/// Keyword arguments given at publish time are merged into [`data`](Event::data)
/// and also kept separately in [`kwargs`](Event::kwargs) so handlers can tell
/// them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    event_type: String,
    data: EventData,
    kwargs: EventData,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(event_type: impl Into<String>, data: EventData, kwargs: EventData) -> Self {
        Self::with_timestamp(event_type, data, kwargs, Utc::now())
    }

    /// Create an event with an explicit timestamp
    pub fn with_timestamp(
        event_type: impl Into<String>,
        mut data: EventData,
        kwargs: EventData,
        timestamp: DateTime<Utc>,
    ) -> Self {
        // kwargs win on key collisions
        for (key, value) in &kwargs {
            data.insert(key.clone(), value.clone());
        }
        Self {
            event_type: event_type.into(),
            data,
            kwargs,
            timestamp,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Look up a single data value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn kwargs(&self) -> &EventData {
        &self.kwargs
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Event {} kwargs={}> {}",
            self.event_type,
            Value::Object(self.kwargs.clone()),
            Value::Object(self.data.clone())
        )
    }
}

/// Turn a JSON value into event data.
///
/// Objects are used as-is, `null` becomes empty data and any other value is
/// stored under the `value` key.
pub fn event_data(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
