use async_trait::async_trait;

use fedsum_core::message::Message;

/// A trait used by the [`StateMachine`] to emit notifications upon
/// certain events.
///
/// [`StateMachine`]: crate::StateMachine
pub trait Notify {
    /// Emit a notification when the connection to the coordinator
    /// is established
    fn notify_ready(&mut self) {}
    /// Emit a notification when a participant joins the party
    fn notify_new_participant(&mut self, _public_key: &str) {}
    /// Emit a notification when a participant leaves the party
    fn notify_removed_participant(&mut self, _public_key: &str) {}
    /// Emit a notification when the partial sum has been sent
    fn notify_partial_sum_submitted(&mut self) {}
}

/// A trait used by the [`StateMachine`] to talk to the coordinator.
///
/// [`StateMachine`]: crate::StateMachine
#[async_trait]
pub trait CoordinatorClient {
    type Error: ::std::error::Error + Send + Sync + 'static;

    /// Send a control message to the coordinator.
    async fn send(&mut self, message: Message) -> Result<(), Self::Error>;
}
