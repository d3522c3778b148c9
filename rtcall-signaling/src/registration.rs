//! Registration state machine

use rtcall_core::{invalid_state, RtCallError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default reason surfaced when the server rejects without one
pub const DEFAULT_REGISTER_REJECTION: &str = "Unknown reason for register rejection";

/// Whether the local identity is registered with the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegistrationState {
    /// No registration
    #[default]
    NotRegistered,
    /// `register` sent, waiting for the result
    Registering,
    /// Server accepted the identity
    Registered,
}

impl RegistrationState {
    /// Wire-style name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::NotRegistered => "NOT_REGISTERED",
            RegistrationState::Registering => "REGISTERING",
            RegistrationState::Registered => "REGISTERED",
        }
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NOT_REGISTERED → REGISTERING → REGISTERED, falling back to NOT_REGISTERED
/// on rejection or expiry
#[derive(Debug, Clone, Default)]
pub struct RegistrationStateMachine {
    state: RegistrationState,
}

impl RegistrationStateMachine {
    /// Start unregistered
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Begin a registration attempt
    pub fn request(&mut self) -> Result<(), RtCallError> {
        if self.state != RegistrationState::NotRegistered {
            return Err(invalid_state("requestRegister", "NOT_REGISTERED", self.state));
        }
        self.state = RegistrationState::Registering;
        Ok(())
    }

    /// Apply the server's answer and return the new state
    pub fn on_result(&mut self, accepted: bool) -> Result<RegistrationState, RtCallError> {
        self.state = match (self.state, accepted) {
            (RegistrationState::Registering, true) => RegistrationState::Registered,
            (RegistrationState::Registering, false) | (RegistrationState::Registered, false) => {
                RegistrationState::NotRegistered
            }
            (state, _) => return Err(invalid_state("onRegisterResult", "REGISTERING", state)),
        };
        Ok(self.state)
    }

    /// Give up on a pending attempt; returns true if one was pending
    pub fn expire(&mut self) -> bool {
        if self.state == RegistrationState::Registering {
            self.state = RegistrationState::NotRegistered;
            true
        } else {
            false
        }
    }

    /// Drop registration unconditionally
    pub fn reset(&mut self) {
        self.state = RegistrationState::NotRegistered;
    }
}
