mod io;
mod phase;
#[allow(clippy::module_inception)]
mod state_machine;

use self::{
    io::{boxed_io, BoxedError, IO},
    phase::{Friend, Round},
};

pub use self::{
    io::PassiveNotifier,
    phase::PhaseName,
    state_machine::{Progress, ProtocolError, StartOutcome, StateMachine},
};
