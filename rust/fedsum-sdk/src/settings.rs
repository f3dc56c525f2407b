//! Settings of a participant.

use std::time::Duration;

use url::Url;

/// The default time a participant waits after submitting its partial sum before it asks for the
/// aggregated model.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ParticipantSettings {
    /// The websocket endpoint of the coordinator.
    pub url: Url,
    /// The delay between submitting the partial sum and requesting the aggregated model.
    pub settle_delay: Duration,
}

impl ParticipantSettings {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}
