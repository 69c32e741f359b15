//! Event dispatch inside a running instance.
//!
//! Events are named, payload-bearing messages delivered over `POST /event`.
//! Each event is consumed by exactly one dispatch: the registered handler is
//! invoked synchronously and its return value is merged into the response.
//! Handler failures are caught at the dispatch boundary and converted to
//! `success: false` responses; they never crash the serving task.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, error};

/// A named message with a JSON payload.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event name, required and non-empty.
    pub name: String,
    /// Remaining fields of the request body.
    pub payload: Map<String, Value>,
}

impl Event {
    /// Create an event with an empty payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Map::new(),
        }
    }

    /// Split a request body into an event. Returns `None` when the body is
    /// not an object or carries no non-empty string `name` field.
    pub fn from_body(body: Value) -> Option<Self> {
        let mut fields = match body {
            Value::Object(map) => map,
            _ => return None,
        };
        let name = match fields.remove("name") {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => return None,
        };
        Some(Self {
            name,
            payload: fields,
        })
    }

    /// Convenience accessor for a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// The JSON body every control-plane response reduces to:
/// `{success, message?, ...handler-contributed fields}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Response {
    /// A bare success with no message.
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            extra: Map::new(),
        }
    }

    /// A success carrying an informational message.
    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            extra: Map::new(),
        }
    }

    /// A success merged with handler-contributed fields.
    pub fn ok_with_fields(extra: Map<String, Value>) -> Self {
        Self {
            success: true,
            message: None,
            extra,
        }
    }

    /// A failure; `message` always explains what went wrong.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            extra: Map::new(),
        }
    }
}

/// Result type returned by event handlers: extra response fields on success.
pub type HandlerResult = anyhow::Result<Map<String, Value>>;

/// An event handler. Invoked synchronously on the serving task, one request
/// at a time per connection; handlers mutating shared state must provide
/// their own synchronization.
pub type Handler = Box<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Mapping from event name to handler. Last registration for a name wins.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, Handler>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for an event name, replacing any previous one.
    pub fn register<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let event = event.into();
        debug!("Registering handler for {:?} events", event);
        self.handlers.insert(event, Box::new(handler));
    }

    /// Remove the handler for an event name, if any.
    pub fn unregister(&mut self, event: &str) {
        debug!("Removing handler for {:?} events", event);
        self.handlers.remove(event);
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch one event to its registered handler.
    ///
    /// Unhandled events are acknowledged with `success: true` rather than
    /// treated as errors. A handler failure is logged with its full error
    /// chain and reported as `success: false`.
    pub fn dispatch(&self, event: &Event) -> Response {
        let Some(handler) = self.handlers.get(&event.name) else {
            return Response::ok_with_message(format!(
                "Event received. No handler found for {:?}.",
                event.name
            ));
        };

        match handler(event) {
            Ok(fields) => Response::ok_with_fields(fields),
            Err(e) => {
                error!("Event handler for {:?} failed: {:#}", event.name, e);
                Response::failure(format!(
                    "Handler for {:?} failed: {:#}",
                    event.name, e
                ))
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_with(name: &str, payload: Value) -> Event {
        let mut body = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        body.insert("name".to_string(), json!(name));
        Event::from_body(Value::Object(body)).unwrap()
    }

    #[test]
    fn test_from_body_splits_name_and_payload() {
        let event = Event::from_body(json!({"name": "ack", "value": 2})).unwrap();
        assert_eq!(event.name, "ack");
        assert_eq!(event.field("value"), Some(&json!(2)));
        assert!(event.field("name").is_none());
    }

    #[test]
    fn test_from_body_rejects_missing_name() {
        assert!(Event::from_body(json!({})).is_none());
        assert!(Event::from_body(json!({"name": 7})).is_none());
        assert!(Event::from_body(json!({"name": ""})).is_none());
        assert!(Event::from_body(json!([1, 2])).is_none());
    }

    #[test]
    fn test_dispatch_unhandled_is_acknowledged() {
        let dispatcher = EventDispatcher::new();
        let response = dispatcher.dispatch(&Event::new("nothing"));

        assert!(response.success);
        let message = response.message.unwrap();
        assert!(!message.is_empty());
        assert!(message.contains("nothing"));
    }

    #[test]
    fn test_dispatch_merges_handler_fields() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register("ack", |_event| {
            let mut fields = Map::new();
            fields.insert("message".to_string(), json!("Hello there!"));
            Ok(fields)
        });

        let response = dispatcher.dispatch(&Event::new("ack"));
        assert!(response.success);
        assert_eq!(response.extra.get("message"), Some(&json!("Hello there!")));
    }

    #[test]
    fn test_dispatch_handler_sees_payload() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register("echo", |event| {
            let mut fields = Map::new();
            fields.insert(
                "value".to_string(),
                event.field("value").cloned().unwrap_or(json!(null)),
            );
            Ok(fields)
        });

        let response = dispatcher.dispatch(&event_with("echo", json!({"value": 41})));
        assert_eq!(response.extra.get("value"), Some(&json!(41)));
    }

    #[test]
    fn test_dispatch_handler_failure_is_caught() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register("boom", |_event| anyhow::bail!("the disk is on fire"));

        let response = dispatcher.dispatch(&Event::new("boom"));
        assert!(!response.success);
        assert!(response.message.unwrap().contains("the disk is on fire"));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register("ack", |_| Ok(Map::new()));
        dispatcher.register("ack", |_| {
            let mut fields = Map::new();
            fields.insert("version".to_string(), json!(2));
            Ok(fields)
        });

        assert_eq!(dispatcher.len(), 1);
        let response = dispatcher.dispatch(&Event::new("ack"));
        assert_eq!(response.extra.get("version"), Some(&json!(2)));
    }

    #[test]
    fn test_unregister_restores_unhandled_behavior() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register("ack", |_| Ok(Map::new()));
        dispatcher.unregister("ack");

        let response = dispatcher.dispatch(&Event::new("ack"));
        assert!(response.success);
        assert!(response.message.is_some());
    }

    #[test]
    fn test_response_serializes_flat() {
        let mut fields = Map::new();
        fields.insert("value".to_string(), json!(4));
        let response = Response::ok_with_fields(fields);

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"success": true, "value": 4}));
    }
}
