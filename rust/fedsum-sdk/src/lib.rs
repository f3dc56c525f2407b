#![cfg_attr(docsrs, feature(doc_cfg))]
//! This crate provides building blocks for implementing participants of the fedsum secure sum
//! protocol.
//!
//! A participant enrolls with the coordinator and is placed in a party. Once every member of the
//! party is known, it splits its private update into additive pieces, keeps one and sends one,
//! encrypted, to every other member. When it holds a piece from every other member it adds them
//! to the piece it kept and submits the result as its partial sum. No single partial sum reveals
//! an update, but their total is the total of the party's updates.
//!
//! # Running a participant
//!
//! The protocol is implemented by the [`StateMachine`]. It doesn't do any IO by itself: it sends
//! messages through a [`CoordinatorClient`] and emits notifications through a [`Notify`]
//! implementation, while the messages of the coordinator are fed to it by the caller.
//!
//! The [`Agent`] wraps a state machine and a websocket connection in a background task:
//!
//! ```no_run
//! # async fn run() -> Result<(), fedsum_sdk::AgentError> {
//! use fedsum_core::model::{PrivatePart, Weights};
//! use fedsum_sdk::{settings::ParticipantSettings, Agent, PassiveNotifier, StartOutcome};
//!
//! let url = "ws://127.0.0.1:4000".parse().expect("valid url");
//! let agent = Agent::connect(ParticipantSettings::new(url), PassiveNotifier).await?;
//! agent.enroll().await?;
//!
//! let update = PrivatePart::new(10, Weights::filled(&[vec![2, 2]], 0.5));
//! while let StartOutcome::RosterIncomplete { .. } = agent.start(update.clone()).await? {
//!     tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//! }
//! let model = agent.wait_for_model().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod client;
pub mod settings;
mod state_machine;
mod traits;

pub use self::{
    agent::{Agent, AgentError},
    state_machine::{
        PassiveNotifier,
        PhaseName,
        Progress,
        ProtocolError,
        StartOutcome,
        StateMachine,
    },
    traits::{CoordinatorClient, Notify},
};
