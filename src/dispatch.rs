//! Dispatch layer - routing inbound events to handlers by name.
//!
//! [`EventRegistry`] maps event names to boxed async handlers. At most one
//! handler exists per name; re-registering replaces the prior handler.
//! Events arriving for unregistered names go to the default handler when
//! one is set, otherwise a diagnostic is logged - never a silent drop.
//!
//! Handlers run inline on the receive loop task: the loop does not move to
//! the next frame until the current handler returns, so a handler that
//! blocks indefinitely stalls further delivery.
//!
//! # Example
//!
//! ```
//! use broccoli_client::dispatch::EventRegistry;
//!
//! let mut registry = EventRegistry::new();
//! registry.set("foo", |event| async move {
//!     println!("foo with {} parameters", event.len());
//!     Ok(())
//! });
//! registry.set_unhandled(|event| async move {
//!     println!("unexpected event {:?}", event.name());
//!     Ok(())
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use crate::error::Result;
use crate::protocol::Event;

/// Result type for event handlers. Errors are logged by the receive loop;
/// they do not close the connection.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for event handler functions.
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one inbound event.
    fn call(&self, event: Event) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper turning an async closure into an [`EventHandler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> EventHandler for FnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, event: Event) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(event))
    }
}

/// Registry mapping event names to handlers.
#[derive(Default)]
pub struct EventRegistry {
    handlers: HashMap<String, Box<dyn EventHandler>>,
    unhandled: Option<Box<dyn EventHandler>>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `name`, replacing any prior handler.
    pub fn set<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let prior = self
            .handlers
            .insert(name.to_string(), Box::new(FnHandler::new(handler)));
        if prior.is_some() {
            tracing::debug!(event = name, "replaced existing event handler");
        }
    }

    /// Register the default handler for events with no named handler.
    pub fn set_unhandled<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.unhandled = Some(Box::new(FnHandler::new(handler)));
    }

    /// Whether a handler is registered for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of named handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no named handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route an event to its handler.
    ///
    /// Unregistered names fall through to the default handler; without
    /// one, the event is dropped with a `warn!` diagnostic.
    pub async fn dispatch(&self, event: Event) -> HandlerResult {
        match self.handlers.get(event.name()) {
            Some(handler) => handler.call(event).await,
            None => match &self.unhandled {
                Some(handler) => handler.call(event).await,
                None => {
                    tracing::warn!(
                        event = event.name(),
                        params = event.len(),
                        "no handler registered for inbound event, dropping"
                    );
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_handler(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static {
        move |_event| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = EventRegistry::new();
        registry.set("foo", counting_handler(count.clone()));

        registry.dispatch(Event::new("foo")).await.unwrap();
        registry.dispatch(Event::new("foo")).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_handler() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut registry = EventRegistry::new();
        registry.set("foo", counting_handler(first.clone()));
        registry.set("foo", counting_handler(second.clone()));
        assert_eq!(registry.len(), 1);

        registry.dispatch(Event::new("foo")).await.unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_event_reaches_default_handler() {
        let unhandled = Arc::new(AtomicUsize::new(0));
        let mut registry = EventRegistry::new();
        registry.set("foo", |_| async { Ok(()) });
        registry.set_unhandled(counting_handler(unhandled.clone()));

        registry.dispatch(Event::new("mystery")).await.unwrap();

        assert_eq!(unhandled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_event_without_default_is_ok() {
        let registry = EventRegistry::new();
        // Logged, not an error, no crash.
        assert!(registry.dispatch(Event::new("mystery")).await.is_ok());
    }

    #[tokio::test]
    async fn test_handler_receives_event_parameters() {
        let (tx, rx) = tokio::sync::oneshot::channel::<usize>();
        let tx = std::sync::Mutex::new(Some(tx));

        let mut registry = EventRegistry::new();
        registry.set("foo", move |event| {
            let tx = tx.lock().unwrap().take();
            async move {
                if let Some(tx) = tx {
                    let _ = tx.send(event.len());
                }
                Ok(())
            }
        });

        registry
            .dispatch(Event::new("foo").arg(true).arg(2u64))
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), 2);
    }

    #[test]
    fn test_contains() {
        let mut registry = EventRegistry::new();
        assert!(registry.is_empty());
        registry.set("foo", |_| async { Ok(()) });
        assert!(registry.contains("foo"));
        assert!(!registry.contains("bar"));
    }
}
