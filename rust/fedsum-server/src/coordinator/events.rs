//! This module provides the [`Coordinator`]'s `Event`, `EventSubscriber` and `EventPublisher`
//! types.
//!
//! [`Coordinator`]: crate::coordinator::Coordinator

use std::sync::Arc;

use tokio::sync::watch;

use fedsum_core::model::ModelWeights;

use super::history::LayerId;

/// An event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<E> {
    /// The newest model layer at the time the event was emitted.
    pub layer_id: LayerId,
    /// The event itself
    pub event: E,
}

/// Newest model event, in its wire form.
pub type ModelUpdate = Arc<ModelWeights>;

/// A convenience type to emit any coordinator event.
#[derive(Debug)]
pub struct EventPublisher {
    model_tx: EventBroadcaster<ModelUpdate>,
}

/// The `EventSubscriber` hands out `EventListener`s for any coordinator event.
#[derive(Debug, Clone)]
pub struct EventSubscriber {
    model_rx: EventListener<ModelUpdate>,
}

impl EventPublisher {
    /// Initialize a new event publisher with the given initial events.
    pub fn init(layer_id: LayerId, model: ModelUpdate) -> (Self, EventSubscriber) {
        let (model_tx, model_rx) = watch::channel::<Event<ModelUpdate>>(Event {
            layer_id,
            event: model,
        });

        let publisher = EventPublisher {
            model_tx: model_tx.into(),
        };
        let subscriber = EventSubscriber {
            model_rx: model_rx.into(),
        };
        (publisher, subscriber)
    }

    /// Emit a model event
    pub fn broadcast_model(&mut self, layer_id: LayerId, update: ModelUpdate) {
        self.model_tx.broadcast(Event {
            layer_id,
            event: update,
        });
    }
}

impl EventSubscriber {
    /// Get a listener for new model events
    pub fn model_listener(&self) -> EventListener<ModelUpdate> {
        self.model_rx.clone()
    }
}

/// A listener for coordinator events. It can be used to either retrieve the latest `Event<E>`
/// emitted by the coordinator (with `EventListener::get_latest`) or to wait for the next one (with
/// `EventListener::changed`).
#[derive(Debug, Clone)]
pub struct EventListener<E>(watch::Receiver<Event<E>>);

impl<E> From<watch::Receiver<Event<E>>> for EventListener<E> {
    fn from(receiver: watch::Receiver<Event<E>>) -> Self {
        EventListener(receiver)
    }
}

impl<E> EventListener<E>
where
    E: Clone,
{
    pub fn get_latest(&self) -> Event<E> {
        self.0.borrow().clone()
    }

    /// Waits for an event that this listener hasn't seen yet and returns it.
    ///
    /// Returns `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<Event<E>> {
        self.0.changed().await.ok()?;
        Some(self.0.borrow_and_update().clone())
    }
}

/// A channel to send `Event<E>` to all the `EventListener<E>`.
#[derive(Debug)]
pub struct EventBroadcaster<E>(watch::Sender<Event<E>>);

impl<E> EventBroadcaster<E> {
    /// Send `event` to all the `EventListener<E>`
    fn broadcast(&self, event: Event<E>) {
        // We don't care whether there's a listener or not
        let _ = self.0.send(event);
    }
}

impl<E> From<watch::Sender<Event<E>>> for EventBroadcaster<E> {
    fn from(sender: watch::Sender<Event<E>>) -> Self {
        Self(sender)
    }
}
