//! Services that serve coordinator state without going through the coordinator task.

use tracing::debug;

use crate::coordinator::events::{EventListener, EventSubscriber, ModelUpdate};

/// A service that serves the newest model.
#[derive(Debug, Clone)]
pub struct ModelFetcher(EventListener<ModelUpdate>);

impl ModelFetcher {
    pub fn new(events: &EventSubscriber) -> Self {
        Self(events.model_listener())
    }

    /// Returns the weights of the newest model layer.
    pub fn fetch(&self) -> ModelUpdate {
        let latest = self.0.get_latest();
        debug!("fetching model of layer {}", latest.layer_id);
        latest.event
    }
}
