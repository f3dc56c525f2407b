use std::error::Error;

use async_trait::async_trait;

use fedsum_core::message::Message;

use crate::{CoordinatorClient, Notify};

pub(crate) type BoxedError = Box<dyn Error + Send + Sync>;

/// Returned a dynamically dispatched [`IO`] object
pub(crate) fn boxed_io<C, N>(client: C, notifier: N) -> Box<dyn IO>
where
    C: CoordinatorClient + Send + 'static,
    N: Notify + Send + 'static,
{
    Box::new(StateMachineIO::new(client, notifier))
}

/// A trait that gathers the [`Notify`] and [`CoordinatorClient`] methods.
///
/// Having a single trait lets the state machine hold a `Box<dyn IO>` instead of being generic
/// over the client and the notifier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait IO: Send + 'static {
    /// Send a message to the coordinator
    async fn send_message(&mut self, message: Message) -> Result<(), BoxedError>;

    /// Emit a notification when the connection is established
    fn notify_ready(&mut self);
    /// Emit a notification when a participant joins the party
    fn notify_new_participant(&mut self, public_key: &str);
    /// Emit a notification when a participant leaves the party
    fn notify_removed_participant(&mut self, public_key: &str);
    /// Emit a notification when the partial sum has been sent
    fn notify_partial_sum_submitted(&mut self);
}

/// The implementation of the [`IO`] trait used by the state machine.
struct StateMachineIO<C, N> {
    client: C,
    notifier: N,
}

impl<C, N> StateMachineIO<C, N> {
    fn new(client: C, notifier: N) -> Self {
        Self { client, notifier }
    }
}

#[async_trait]
impl<C, N> IO for StateMachineIO<C, N>
where
    C: CoordinatorClient + Send + 'static,
    N: Notify + Send + 'static,
{
    async fn send_message(&mut self, message: Message) -> Result<(), BoxedError> {
        self.client
            .send(message)
            .await
            .map_err(|e| Box::new(e) as BoxedError)
    }

    fn notify_ready(&mut self) {
        self.notifier.notify_ready()
    }

    fn notify_new_participant(&mut self, public_key: &str) {
        self.notifier.notify_new_participant(public_key)
    }

    fn notify_removed_participant(&mut self, public_key: &str) {
        self.notifier.notify_removed_participant(public_key)
    }

    fn notify_partial_sum_submitted(&mut self) {
        self.notifier.notify_partial_sum_submitted()
    }
}

/// A notifier that doesn't do anything.
pub struct PassiveNotifier;

impl Notify for PassiveNotifier {}
