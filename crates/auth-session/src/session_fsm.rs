//! Loading-stage state machine using rust-fsm.
//!
//! The stage tells the UI whether it may decide between "show login" and
//! "show app". Only `Ready` is decisive; the other stages mean startup
//! rehydration has not finished yet.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐  Complete
//! │      Idle       │ ─────────────────────────────┐
//! └────────┬────────┘                              │
//!          │ Rehydrate                             │
//!          ▼                                       │
//! ┌─────────────────┐  Complete                    │
//! │   Rehydrating   │ ──────────────────────────┐  │
//! └────────┬────────┘                           │  │
//!          │ Validate                           │  │
//!          ▼                                    ▼  ▼
//! ┌─────────────────┐  Complete         ┌─────────────────┐
//! │   Validating    │ ────────────────► │      Ready      │
//! └─────────────────┘                   └────────┬────────┘
//!          ▲                                     │ Rehydrate
//!          └──────────── (via Rehydrating) ◄─────┘
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Idle)

    Idle => {
        Rehydrate => Rehydrating,
        Complete => Ready
    },
    Rehydrating => {
        // Waiting on the network to prove the session
        Validate => Validating,
        // Nothing to prove
        Complete => Ready
    },
    Validating => {
        Complete => Ready
    },
    Ready => {
        Rehydrate => Rehydrating,
        // Login, logout and refresh outcomes keep the stage decisive
        Complete => Ready
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Loading stage exposed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStage {
    /// Nothing has happened yet.
    Idle,
    /// Startup rehydration is running.
    Rehydrating,
    /// A network call is proving the session.
    Validating,
    /// Authentication state is settled.
    Ready,
}

impl LoadingStage {
    /// True while the UI must not decide between login and app.
    pub fn is_pending(&self) -> bool {
        !matches!(self, LoadingStage::Ready)
    }
}

impl From<&SessionMachineState> for LoadingStage {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Idle => LoadingStage::Idle,
            SessionMachineState::Rehydrating => LoadingStage::Rehydrating,
            SessionMachineState::Validating => LoadingStage::Validating,
            SessionMachineState::Ready => LoadingStage::Ready,
        }
    }
}

/// Build a machine positioned at `stage`.
pub(crate) fn machine_at(stage: LoadingStage) -> SessionMachine {
    let mut machine = SessionMachine::new();
    let path: &[SessionMachineInput] = match stage {
        LoadingStage::Idle => &[],
        LoadingStage::Rehydrating => &[SessionMachineInput::Rehydrate],
        LoadingStage::Validating => &[SessionMachineInput::Rehydrate, SessionMachineInput::Validate],
        LoadingStage::Ready => &[SessionMachineInput::Complete],
    };
    for input in path {
        // Every path above is valid from Idle.
        let _ = machine.consume(input);
    }
    machine
}
