//! Two-phase sign-in handshake as an explicit state machine.
//!
//! `IDLE -> AWAITING_HANDSHAKE -> AWAITING_RESULT -> CLOSED`. The machine is
//! pure: every transition returns the effects the driver must perform, so
//! each (state, message) pair can be tested without windows or listeners.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Idle,
    AwaitingHandshake,
    AwaitingResult,
    Closed,
}

/// A message delivered from another browsing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossContextMessage {
    pub origin: String,
    pub data: String,
}

impl CrossContextMessage {
    pub fn new(origin: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            data: data.into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// The result payload was not valid JSON of the expected shape.
    Parse(String),
    /// The provider reported an error.
    Provider(String),
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeFailure::Parse(msg) => write!(f, "unreadable authorization result: {msg}"),
            HandshakeFailure::Provider(msg) => write!(f, "provider error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AddListener,
    RemoveListener,
    /// Echo a message back into the popup.
    Relay { data: String, target_origin: String },
    ClosePopup,
    Succeeded(Credential),
    Failed(HandshakeFailure),
}

#[derive(Deserialize)]
struct SuccessPayload {
    token: String,
}

/// Literal payload markers for one provider.
#[derive(Debug, Clone)]
pub struct Protocol {
    trusted_origin: String,
    handshake: String,
    success_prefix: String,
    error_prefix: String,
}

impl Protocol {
    pub fn new(trusted_origin: &str, provider: &str) -> Self {
        Self {
            trusted_origin: trusted_origin.to_string(),
            handshake: format!("authorizing:{provider}"),
            success_prefix: format!("authorization:{provider}:success:"),
            error_prefix: format!("authorization:{provider}:error:"),
        }
    }

    pub fn trusted_origin(&self) -> &str {
        &self.trusted_origin
    }

    pub fn handshake_marker(&self) -> &str {
        &self.handshake
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeMachine {
    protocol: Protocol,
    phase: HandshakePhase,
}

impl HandshakeMachine {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            phase: HandshakePhase::Idle,
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Start a sign-in attempt. Allowed from `Idle` and from `Closed`.
    pub fn begin(&mut self) -> Vec<Effect> {
        match self.phase {
            HandshakePhase::Idle | HandshakePhase::Closed => {
                self.phase = HandshakePhase::AwaitingHandshake;
                vec![Effect::AddListener]
            }
            _ => Vec::new(),
        }
    }

    /// Abandon an attempt in progress.
    pub fn cancel(&mut self) -> Vec<Effect> {
        match self.phase {
            HandshakePhase::AwaitingHandshake | HandshakePhase::AwaitingResult => {
                self.phase = HandshakePhase::Closed;
                vec![Effect::RemoveListener, Effect::ClosePopup]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_message(&mut self, message: &CrossContextMessage) -> Vec<Effect> {
        if message.origin != self.protocol.trusted_origin {
            return Vec::new();
        }

        match self.phase {
            HandshakePhase::AwaitingHandshake => self.on_handshake(message),
            HandshakePhase::AwaitingResult => self.on_result(&message.data),
            HandshakePhase::Idle | HandshakePhase::Closed => Vec::new(),
        }
    }

    fn on_handshake(&mut self, message: &CrossContextMessage) -> Vec<Effect> {
        if message.data != self.protocol.handshake {
            return Vec::new();
        }

        self.phase = HandshakePhase::AwaitingResult;
        // The result listener exists before the relay, so a popup that
        // answers straight away is still heard.
        vec![
            Effect::RemoveListener,
            Effect::AddListener,
            Effect::Relay {
                data: message.data.clone(),
                target_origin: message.origin.clone(),
            },
        ]
    }

    fn on_result(&mut self, data: &str) -> Vec<Effect> {
        if let Some(json) = data.strip_prefix(self.protocol.success_prefix.as_str()) {
            return match serde_json::from_str::<SuccessPayload>(json) {
                Ok(payload) => {
                    self.phase = HandshakePhase::Closed;
                    vec![
                        Effect::RemoveListener,
                        Effect::ClosePopup,
                        Effect::Succeeded(Credential::new(payload.token)),
                    ]
                }
                // Stays in AwaitingResult: the attempt is left open until a
                // valid result, a timeout, or cancellation.
                Err(e) => vec![Effect::Failed(HandshakeFailure::Parse(e.to_string()))],
            };
        }

        if let Some(json) = data.strip_prefix(self.protocol.error_prefix.as_str()) {
            return match serde_json::from_str::<Value>(json) {
                Ok(error) => {
                    self.phase = HandshakePhase::Closed;
                    let description = match error {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    vec![
                        Effect::RemoveListener,
                        Effect::ClosePopup,
                        Effect::Failed(HandshakeFailure::Provider(description)),
                    ]
                }
                Err(e) => vec![Effect::Failed(HandshakeFailure::Parse(e.to_string()))],
            };
        }

        Vec::new()
    }
}
