use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::bus::{ListenerId, MessageBus};
use crate::config::AuthConfig;
use crate::error::{AppError, Result};
use crate::store::{TokenStore, TOKEN_KEY};

use super::handshake::{
    CrossContextMessage, Credential, Effect, HandshakeFailure, HandshakeMachine, HandshakePhase,
    Protocol,
};
use super::{authorize_url, generate_state_token};

pub const POPUP_NAME: &str = "Threadline Authorization";

/// Host-side handle on the sign-in popup.
pub trait PopupWindow: Send + Sync {
    fn post_message(&self, data: &str, target_origin: &str);
    fn close(&self);
    fn is_closed(&self) -> bool;
    fn focus(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupFeatures {
    pub width: u32,
    pub height: u32,
    pub left: i64,
    pub top: i64,
}

impl PopupFeatures {
    /// Centre a `width`×`height` popup on a screen of the given size.
    pub fn centered(screen_width: u32, screen_height: u32, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            left: i64::from(screen_width) / 2 - i64::from(width) / 2,
            top: i64::from(screen_height) / 2 - i64::from(height) / 2,
        }
    }
}

pub trait WindowOpener: Send + Sync {
    fn screen_size(&self) -> (u32, u32);
    fn open(&self, url: &str, name: &str, features: &PopupFeatures) -> Result<Arc<dyn PopupWindow>>;
}

type Outcome = std::result::Result<Credential, HandshakeFailure>;

struct SessionState {
    machine: HandshakeMachine,
    listener: Option<ListenerId>,
    popup: Option<Arc<dyn PopupWindow>>,
}

/// Shared between the pending sign-in and its bus listener.
struct SessionCore {
    state: Mutex<SessionState>,
    messages: MessageBus<CrossContextMessage>,
    outcomes: mpsc::UnboundedSender<Outcome>,
}

impl SessionCore {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listen(self: &Arc<Self>) -> ListenerId {
        let weak: Weak<Self> = Arc::downgrade(self);
        let origin = self.lock().machine.protocol().trusted_origin().to_string();
        self.messages.subscribe(
            move |message: &CrossContextMessage| {
                let trusted = message.origin == origin;
                if !trusted {
                    tracing::trace!(origin = %message.origin, "Ignoring message from untrusted origin");
                }
                trusted
            },
            move |message| {
                if let Some(core) = weak.upgrade() {
                    core.receive(message);
                }
            },
        )
    }

    fn receive(self: &Arc<Self>, message: &CrossContextMessage) {
        let (before, effects, after) = {
            let mut state = self.lock();
            let before = state.machine.phase();
            let effects = state.machine.on_message(message);
            (before, effects, state.machine.phase())
        };
        if before != after {
            tracing::debug!(from = ?before, to = ?after, "Handshake phase changed");
        }
        self.apply(effects);
    }

    fn cancel(self: &Arc<Self>) {
        let effects = self.lock().machine.cancel();
        self.apply(effects);
    }

    /// Popups are called outside the session lock: a relayed message may come
    /// straight back through the bus.
    fn apply(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::AddListener => {
                    let id = self.listen();
                    self.lock().listener = Some(id);
                }
                Effect::RemoveListener => {
                    let id = self.lock().listener.take();
                    if let Some(id) = id {
                        self.messages.unsubscribe(id);
                    }
                }
                Effect::Relay {
                    data,
                    target_origin,
                } => {
                    tracing::debug!(origin = %target_origin, "Handshake received, relaying to popup");
                    let popup = self.lock().popup.clone();
                    if let Some(popup) = popup {
                        popup.post_message(&data, &target_origin);
                    }
                }
                Effect::ClosePopup => {
                    let popup = self.lock().popup.take();
                    if let Some(popup) = popup {
                        popup.close();
                    }
                }
                Effect::Succeeded(credential) => {
                    let _ = self.outcomes.send(Ok(credential));
                }
                Effect::Failed(failure) => {
                    let _ = self.outcomes.send(Err(failure));
                }
            }
        }
    }

    fn popup_closed(&self) -> bool {
        self.lock().popup.as_ref().is_some_and(|p| p.is_closed())
    }
}

/// Starts sign-in attempts: opens the popup and wires the handshake to the
/// host's message bus.
pub struct AuthHandshake {
    config: AuthConfig,
    messages: MessageBus<CrossContextMessage>,
    opener: Arc<dyn WindowOpener>,
    store: Arc<dyn TokenStore>,
}

impl AuthHandshake {
    pub fn new(
        config: AuthConfig,
        messages: MessageBus<CrossContextMessage>,
        opener: Arc<dyn WindowOpener>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            config,
            messages,
            opener,
            store,
        }
    }

    pub fn begin(&self) -> Result<PendingSignIn> {
        let protocol = Protocol::new(self.config.trusted_origin(), &self.config.provider);
        let (tx, rx) = mpsc::unbounded_channel();
        let core = Arc::new(SessionCore {
            state: Mutex::new(SessionState {
                machine: HandshakeMachine::new(protocol),
                listener: None,
                popup: None,
            }),
            messages: self.messages.clone(),
            outcomes: tx,
        });

        let effects = core.lock().machine.begin();
        core.apply(effects);

        let url = authorize_url(&self.config, &generate_state_token());
        let (screen_width, screen_height) = self.opener.screen_size();
        let features = PopupFeatures::centered(
            screen_width,
            screen_height,
            self.config.popup_width,
            self.config.popup_height,
        );

        let popup = match self.opener.open(&url, POPUP_NAME, &features) {
            Ok(popup) => popup,
            Err(e) => {
                core.cancel();
                return Err(e);
            }
        };
        popup.focus();
        core.lock().popup = Some(popup);

        tracing::info!(origin = %self.config.trusted_origin(), "Sign-in popup opened");

        Ok(PendingSignIn {
            core,
            outcomes: rx,
            store: Arc::clone(&self.store),
            deadline: Instant::now() + self.config.handshake_timeout(),
            poll_interval: self.config.popup_poll_interval(),
        })
    }
}

/// A sign-in attempt in flight. Dropping it tears the attempt down.
pub struct PendingSignIn {
    core: Arc<SessionCore>,
    outcomes: mpsc::UnboundedReceiver<Outcome>,
    store: Arc<dyn TokenStore>,
    deadline: Instant,
    poll_interval: Duration,
}

impl PendingSignIn {
    pub fn phase(&self) -> HandshakePhase {
        self.core.lock().machine.phase()
    }

    /// Wait for the next outcome.
    ///
    /// On success the credential is persisted before returning. A malformed
    /// result is returned as [`AppError::Parse`] while the attempt stays open,
    /// so a later valid result can still arrive. Timeout and a manually closed
    /// popup both tear the attempt down.
    pub async fn wait(&mut self) -> Result<Credential> {
        let mut poll = tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));

        loop {
            tokio::select! {
                biased;
                outcome = self.outcomes.recv() => {
                    return match outcome {
                        Some(Ok(credential)) => {
                            self.store.set(TOKEN_KEY, credential.token()).await?;
                            tracing::info!("Sign-in complete, credential stored");
                            Ok(credential)
                        }
                        Some(Err(HandshakeFailure::Parse(msg))) => {
                            tracing::warn!(error = %msg, "Unreadable authorization result");
                            Err(AppError::Parse(msg))
                        }
                        Some(Err(failure)) => {
                            tracing::warn!(error = %failure, "Sign-in rejected");
                            Err(AppError::Handshake(failure.to_string()))
                        }
                        None => Err(AppError::Internal("Handshake channel closed".to_string())),
                    };
                }
                _ = tokio::time::sleep_until(self.deadline) => {
                    tracing::warn!("Sign-in timed out");
                    self.cancel();
                    return Err(AppError::Handshake("timed out waiting for authorization".to_string()));
                }
                _ = poll.tick() => {
                    if self.core.popup_closed() {
                        tracing::info!("Sign-in popup closed before completing");
                        self.cancel();
                        return Err(AppError::Handshake("authorization window was closed".to_string()));
                    }
                }
            }
        }
    }

    pub fn cancel(&self) {
        self.core.cancel();
    }
}

impl Drop for PendingSignIn {
    fn drop(&mut self) {
        self.core.cancel();
    }
}
