//! A participant running in a background task.

use std::time::Duration;

use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn, Instrument};

use fedsum_core::{
    message::Message,
    model::{ModelWeights, PrivatePart},
    PublicKeyId,
};

use crate::{
    client::{self, ClientError, WsReceiver},
    settings::ParticipantSettings,
    Notify,
    PhaseName,
    Progress,
    ProtocolError,
    StartOutcome,
    StateMachine,
};

/// Errors of the [`Agent`].
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to connect to the coordinator: {0}")]
    Connect(#[from] ClientError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("the agent has stopped")]
    Stopped,
    #[error("no model was received before the connection closed")]
    ModelUnavailable,
}

type Reply<T> = oneshot::Sender<Result<T, AgentError>>;

enum Command {
    Enroll(Reply<PublicKeyId>),
    Start(PrivatePart, Reply<StartOutcome>),
    RetrieveModel(Reply<ModelWeights>),
}

/// A handle to a participant driven by a background task.
///
/// The task reads the coordinator connection and feeds every message to a [`StateMachine`].
/// Once the partial sum has been submitted it waits for the configured settle delay and asks
/// the coordinator for the aggregated model, which is then available from
/// [`Agent::wait_for_model`].
///
/// Dropping the handle closes the connection.
pub struct Agent {
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<PhaseName>,
    model: watch::Receiver<Option<ModelWeights>>,
    task: JoinHandle<()>,
}

impl Agent {
    /// Connects to the coordinator and spawns the background task.
    ///
    /// # Errors
    /// Fails if the coordinator can't be reached.
    pub async fn connect<N>(settings: ParticipantSettings, notifier: N) -> Result<Self, AgentError>
    where
        N: Notify + Send + 'static,
    {
        let (client, receiver) = client::connect(&settings.url).await?;
        let mut machine = StateMachine::new(client, notifier);
        machine.connected();
        Ok(Self::spawn(machine, receiver, settings.settle_delay))
    }

    fn spawn(machine: StateMachine, receiver: WsReceiver, settle_delay: Duration) -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (phase_tx, phase) = watch::channel(machine.phase());
        let (model_tx, model) = watch::channel(None);

        let task = AgentTask {
            machine,
            receiver,
            commands,
            settle_delay,
            settle_at: None,
            phase: phase_tx,
            model: model_tx,
            model_requests: Vec::new(),
        };
        let task = tokio::spawn(task.run().instrument(tracing::info_span!("agent")));

        Self {
            commands: commands_tx,
            phase,
            model,
            task,
        }
    }

    /// Generates a key pair and enrolls with the coordinator.
    ///
    /// # Errors
    /// Fails if the participant already enrolled or the agent stopped.
    pub async fn enroll(&self) -> Result<PublicKeyId, AgentError> {
        self.request(Command::Enroll).await
    }

    /// Starts the round with `update`, see [`StateMachine::start`].
    ///
    /// # Errors
    /// Fails if the round can't be started or the agent stopped.
    pub async fn start(&self, update: PrivatePart) -> Result<StartOutcome, AgentError> {
        self.request(|reply| Command::Start(update, reply)).await
    }

    /// Asks the coordinator for its newest model and waits for the answer.
    ///
    /// # Errors
    /// Fails with [`AgentError::ModelUnavailable`] if the connection closes first.
    pub async fn retrieve_model(&self) -> Result<ModelWeights, AgentError> {
        match self.request(Command::RetrieveModel).await {
            Err(AgentError::Stopped) => Err(AgentError::ModelUnavailable),
            res => res,
        }
    }

    /// The current phase of the participant.
    pub fn state(&self) -> PhaseName {
        *self.phase.borrow()
    }

    /// Waits until the participant reaches `phase`.
    ///
    /// # Errors
    /// Fails if the agent stops before.
    pub async fn wait_for(&self, phase: PhaseName) -> Result<(), AgentError> {
        let mut phases = self.phase.clone();
        loop {
            if *phases.borrow_and_update() == phase {
                return Ok(());
            }
            phases.changed().await.map_err(|_| AgentError::Stopped)?;
        }
    }

    /// The last model received from the coordinator, if any.
    pub fn latest_model(&self) -> Option<ModelWeights> {
        self.model.borrow().clone()
    }

    /// Waits until a model has been received from the coordinator.
    ///
    /// # Errors
    /// Fails with [`AgentError::ModelUnavailable`] if the agent stops before.
    pub async fn wait_for_model(&self) -> Result<ModelWeights, AgentError> {
        let mut models = self.model.clone();
        loop {
            if let Some(model) = models.borrow_and_update().clone() {
                return Ok(model);
            }
            models
                .changed()
                .await
                .map_err(|_| AgentError::ModelUnavailable)?;
        }
    }

    /// Closes the connection and waits for the background task to finish.
    pub async fn disconnect(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(err) = task.await {
            warn!("agent task failed: {}", err);
        }
    }

    async fn request<T, F>(&self, command: F) -> Result<T, AgentError>
    where
        F: FnOnce(Reply<T>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| AgentError::Stopped)?;
        response.await.map_err(|_| AgentError::Stopped)?
    }
}

struct AgentTask {
    machine: StateMachine,
    receiver: WsReceiver,
    commands: mpsc::UnboundedReceiver<Command>,
    settle_delay: Duration,
    /// When to ask for the aggregated model.
    settle_at: Option<Instant>,
    phase: watch::Sender<PhaseName>,
    model: watch::Sender<Option<ModelWeights>>,
    model_requests: Vec<Reply<ModelWeights>>,
}

impl AgentTask {
    async fn run(mut self) {
        loop {
            let before = self.machine.phase();
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = sleep_until(self.settle_at.unwrap_or_else(Instant::now)), if self.settle_at.is_some() => {
                    self.settle_at = None;
                    debug!("requesting the aggregated model");
                    if let Err(err) = self.machine.request_model().await {
                        warn!("failed to request the model: {}", err);
                    }
                }
            }

            let after = self.machine.phase();
            if after != before {
                debug!("phase {} -> {}", before, after);
                if after == PhaseName::PartialSumSubmitted {
                    self.settle_at = Some(Instant::now() + self.settle_delay);
                }
                let _ = self.phase.send(after);
            }
        }

        info!("connection to the coordinator closed");
        self.machine.disconnected();
        let _ = self.phase.send(PhaseName::Disconnected);
        // pending model requests resolve as unavailable when dropped
    }

    async fn handle_message(&mut self, message: Message) {
        match self.machine.handle_message(message).await {
            Ok(Progress::Model(model)) => {
                for reply in self.model_requests.drain(..) {
                    let _ = reply.send(Ok(model.clone()));
                }
                let _ = self.model.send(Some(model));
            }
            Ok(Progress::RoundReset) => info!("the round has to be started again"),
            Ok(Progress::Continue) | Ok(Progress::PartialSumSubmitted) => {}
            Err(err) => warn!("failed to handle message: {}", err),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enroll(reply) => {
                let res = self.machine.enroll().await.map_err(AgentError::from);
                let _ = reply.send(res);
            }
            Command::Start(update, reply) => {
                let res = self.machine.start(update).await.map_err(AgentError::from);
                let _ = reply.send(res);
            }
            Command::RetrieveModel(reply) => match self.machine.request_model().await {
                Ok(()) => self.model_requests.push(reply),
                Err(err) => {
                    let _ = reply.send(Err(err.into()));
                }
            },
        }
    }
}
