#![cfg_attr(docsrs, feature(doc_cfg))]
//! `fedsum-server` provides the coordinator of the secure sum protocol.
//!
//! The coordinator never sees an individual update. It
//! - forms parties of a fixed size out of enrolling participants and introduces their members to
//!   each other,
//! - relays encrypted pieces between members without being able to open them,
//! - collects the plaintext partial sums of a party and, once all of them arrived, folds their
//!   average into a new version of the model.
//!
//! The crate is organized as follows:
//! - [`coordinator`]: the single task owning the parties and the model history,
//! - [`services`]: the translation of connection messages into coordinator requests,
//! - [`api`]: the websocket endpoint,
//! - [`settings`]: configuration loading.
//!
//! The `coordinator` binary wires these together, see `configs/config.toml` for an example
//! configuration.

pub mod api;
pub mod coordinator;
pub mod services;
pub mod settings;
