//! Delivery to page contexts.
//!
//! A context is one script context inside one browser tab, registered as
//! `(tab_id, context_id)` and bound to the normalized origin of its page.
//! Responses go to exactly the context that made the call, and only while
//! it is attached for the origin that made it; events go to a tab or to
//! every tab.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broker::error::ProviderError;

/// Responses queued per context while it has no live channel.
const MAX_UNDELIVERED: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRef {
    pub tab_id: u64,
    pub context_id: String,
}

impl ContextRef {
    pub fn new(tab_id: u64, context_id: impl Into<String>) -> Self {
        Self {
            tab_id,
            context_id: context_id.into(),
        }
    }
}

/// A message pushed to a page context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContextMessage {
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ProviderError>,
    },
    Event {
        event: String,
        data: Value,
    },
}

impl ContextMessage {
    pub fn response(request_id: Uuid, outcome: Result<Value, ProviderError>) -> Self {
        match outcome {
            Ok(result) => Self::Response {
                request_id,
                result: Some(result),
                error: None,
            },
            Err(error) => Self::Response {
                request_id,
                result: None,
                error: Some(error),
            },
        }
    }

    pub fn event(event: &str, data: Value) -> Self {
        Self::Event {
            event: event.to_string(),
            data,
        }
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context {tab_id}/{context_id} is attached for another origin")]
    OriginConflict { tab_id: u64, context_id: String },
}

/// A live registration. Pass `id` back to [`ContextHub::unregister`].
#[derive(Debug)]
pub struct Attachment {
    pub id: Uuid,
    pub messages: mpsc::UnboundedReceiver<ContextMessage>,
}

#[derive(Debug)]
struct Attached {
    id: Uuid,
    origin: String,
    tx: mpsc::UnboundedSender<ContextMessage>,
}

/// Registry of live page contexts.
#[derive(Debug, Default)]
pub struct ContextHub {
    contexts: DashMap<ContextRef, Attached>,
    /// Keyed by context and the origin of the request that was resolved.
    undelivered: DashMap<(ContextRef, String), Vec<ContextMessage>>,
}

impl ContextHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a channel for `context` on behalf of `origin`.
    ///
    /// Reconnecting from the same origin replaces the previous channel and
    /// flushes responses resolved while detached. A live context bound to
    /// another origin is never taken over.
    pub fn register(&self, context: ContextRef, origin: &str) -> Result<Attachment, ContextError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        match self.contexts.entry(context.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if current.origin != origin && !current.tx.is_closed() {
                    tracing::warn!(
                        tab_id = context.tab_id,
                        context_id = %context.context_id,
                        origin = %origin,
                        "Context registration refused, attached for another origin"
                    );
                    return Err(ContextError::OriginConflict {
                        tab_id: context.tab_id,
                        context_id: context.context_id,
                    });
                }
                flush(&self.undelivered, &context, origin, &tx);
                entry.insert(Attached {
                    id,
                    origin: origin.to_string(),
                    tx,
                });
            }
            Entry::Vacant(entry) => {
                flush(&self.undelivered, &context, origin, &tx);
                entry.insert(Attached {
                    id,
                    origin: origin.to_string(),
                    tx,
                });
            }
        }

        tracing::debug!(tab_id = context.tab_id, context_id = %context.context_id, origin = %origin, "Context registered");
        Ok(Attachment { id, messages: rx })
    }

    /// Detach `context` if `id` is still its current registration.
    pub fn unregister(&self, context: &ContextRef, id: Uuid) {
        self.contexts.remove_if(context, |_, attached| attached.id == id);
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Send a response to one context, provided it is attached for `origin`.
    /// Otherwise the response is kept until that origin attaches it again.
    pub fn deliver(&self, context: &ContextRef, origin: &str, message: ContextMessage) {
        let message = match self.contexts.get(context) {
            Some(attached) if attached.origin == origin => match attached.tx.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => message,
            },
            _ => message,
        };

        self.contexts.remove_if(context, |_, attached| attached.tx.is_closed());
        let mut queue = self
            .undelivered
            .entry((context.clone(), origin.to_string()))
            .or_default();
        if queue.len() >= MAX_UNDELIVERED {
            queue.remove(0);
        }
        queue.push(message);
        tracing::debug!(tab_id = context.tab_id, context_id = %context.context_id, "Context detached, response queued");
    }

    /// Send an event to every context of one tab.
    pub fn broadcast_tab(&self, tab_id: u64, message: ContextMessage) {
        self.broadcast_with(|context, _| (context.tab_id == tab_id).then(|| message.clone()));
    }

    /// Send an event to every context of every tab.
    pub fn broadcast_all(&self, message: ContextMessage) {
        self.broadcast_with(|_, _| Some(message.clone()));
    }

    /// Send each context the message `make` builds for it, if any.
    pub fn broadcast_with(&self, make: impl Fn(&ContextRef, &str) -> Option<ContextMessage>) {
        let mut dead = Vec::new();
        for entry in self.contexts.iter() {
            let Some(message) = make(entry.key(), &entry.value().origin) else {
                continue;
            };
            if entry.value().tx.send(message).is_err() {
                dead.push((entry.key().clone(), entry.value().id));
            }
        }
        for (context, id) in dead {
            self.unregister(&context, id);
        }
    }
}

fn flush(
    undelivered: &DashMap<(ContextRef, String), Vec<ContextMessage>>,
    context: &ContextRef,
    origin: &str,
    tx: &mpsc::UnboundedSender<ContextMessage>,
) {
    if let Some((_, queued)) = undelivered.remove(&(context.clone(), origin.to_string())) {
        for message in queued {
            let _ = tx.send(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const APP: &str = "https://app.example";
    const EVIL: &str = "https://evil.example";

    #[tokio::test]
    async fn test_response_goes_to_one_context() {
        let hub = ContextHub::new();
        let a = ContextRef::new(1, "main");
        let b = ContextRef::new(1, "iframe");
        let mut rx_a = hub.register(a.clone(), APP).unwrap().messages;
        let mut rx_b = hub.register(b, APP).unwrap().messages;

        let id = Uuid::new_v4();
        hub.deliver(&a, APP, ContextMessage::response(id, Ok(json!("0x1"))));

        assert_eq!(
            rx_a.recv().await.unwrap(),
            ContextMessage::response(id, Ok(json!("0x1")))
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tab_and_global_broadcast() {
        let hub = ContextHub::new();
        let mut tab1 = hub.register(ContextRef::new(1, "main"), APP).unwrap().messages;
        let mut tab2 = hub.register(ContextRef::new(2, "main"), EVIL).unwrap().messages;

        hub.broadcast_tab(1, ContextMessage::event("connect", json!({"chainId": "0x1"})));
        assert!(matches!(tab1.recv().await, Some(ContextMessage::Event { .. })));
        assert!(tab2.try_recv().is_err());

        hub.broadcast_all(ContextMessage::event("chainChanged", json!("0x38")));
        assert!(tab1.recv().await.is_some());
        assert!(tab2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_with_sees_each_origin() {
        let hub = ContextHub::new();
        let mut app = hub.register(ContextRef::new(1, "main"), APP).unwrap().messages;
        let mut other = hub.register(ContextRef::new(2, "main"), EVIL).unwrap().messages;

        hub.broadcast_with(|_, origin| {
            Some(ContextMessage::event("accountsChanged", json!([origin])))
        });
        assert_eq!(
            app.recv().await.unwrap(),
            ContextMessage::event("accountsChanged", json!([APP]))
        );
        assert_eq!(
            other.recv().await.unwrap(),
            ContextMessage::event("accountsChanged", json!([EVIL]))
        );
    }

    #[tokio::test]
    async fn test_detached_context_gets_response_on_register() {
        let hub = ContextHub::new();
        let ctx = ContextRef::new(7, "main");
        let id = Uuid::new_v4();
        hub.deliver(&ctx, APP, ContextMessage::response(id, Err(ProviderError::user_rejected())));

        let mut rx = hub.register(ctx, APP).unwrap().messages;
        let message = rx.recv().await.unwrap();
        assert_eq!(
            message,
            ContextMessage::response(id, Err(ProviderError::user_rejected()))
        );
    }

    #[tokio::test]
    async fn test_other_origin_cannot_take_over_context() {
        let hub = ContextHub::new();
        let ctx = ContextRef::new(7, "main");
        let mut victim = hub.register(ctx.clone(), APP).unwrap().messages;

        assert!(matches!(
            hub.register(ctx.clone(), EVIL),
            Err(ContextError::OriginConflict { .. })
        ));

        let id = Uuid::new_v4();
        hub.deliver(&ctx, APP, ContextMessage::response(id, Ok(json!("0xsignature"))));
        assert_eq!(
            victim.recv().await.unwrap(),
            ContextMessage::response(id, Ok(json!("0xsignature")))
        );
    }

    #[tokio::test]
    async fn test_queued_responses_stay_with_their_origin() {
        let hub = ContextHub::new();
        let ctx = ContextRef::new(7, "main");
        let id = Uuid::new_v4();
        hub.deliver(&ctx, APP, ContextMessage::response(id, Ok(json!("0xsignature"))));

        // The pair is free, but nothing queued for APP goes to EVIL.
        let attacker = hub.register(ctx.clone(), EVIL).unwrap();
        let mut attacker_rx = attacker.messages;
        assert!(attacker_rx.try_recv().is_err());

        // Nor does a response resolved while EVIL holds the pair.
        let later = Uuid::new_v4();
        hub.deliver(&ctx, APP, ContextMessage::response(later, Ok(json!("0xhash"))));
        assert!(attacker_rx.try_recv().is_err());

        hub.unregister(&ctx, attacker.id);
        drop(attacker_rx);
        let mut rx = hub.register(ctx, APP).unwrap().messages;
        assert_eq!(
            rx.recv().await.unwrap(),
            ContextMessage::response(id, Ok(json!("0xsignature")))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ContextMessage::response(later, Ok(json!("0xhash")))
        );
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_new_channel() {
        let hub = ContextHub::new();
        let ctx = ContextRef::new(3, "main");
        let old = hub.register(ctx.clone(), APP).unwrap();
        let mut new = hub.register(ctx.clone(), APP).unwrap().messages;

        hub.unregister(&ctx, old.id);
        assert_eq!(hub.len(), 1);

        let id = Uuid::new_v4();
        hub.deliver(&ctx, APP, ContextMessage::response(id, Ok(json!(true))));
        assert_eq!(
            new.recv().await.unwrap(),
            ContextMessage::response(id, Ok(json!(true)))
        );
    }

    #[test]
    fn test_wire_format() {
        let id = Uuid::nil();
        let json = serde_json::to_value(ContextMessage::response(id, Ok(json!(["0xabc"])))).unwrap();
        assert_eq!(json["type"], "response");
        assert_eq!(json["requestId"], id.to_string());
        assert_eq!(json["result"], json!(["0xabc"]));
        assert!(json.get("error").is_none());

        let json = serde_json::to_value(ContextMessage::event("accountsChanged", json!([]))).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "accountsChanged");
    }
}
