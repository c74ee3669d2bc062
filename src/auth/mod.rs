//! Sign-in: the popup handshake and the authorize redirect.

pub mod handshake;
pub mod redirect;
pub mod session;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::config::AuthConfig;

pub use handshake::{CrossContextMessage, Credential, HandshakePhase};
pub use session::{AuthHandshake, PendingSignIn, PopupFeatures, PopupWindow, WindowOpener};

/// Unguessable value for the OAuth `state` parameter.
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Provider authorize URL for the popup.
pub fn authorize_url(config: &AuthConfig, state: &str) -> String {
    format!(
        "{}?client_id={}&state={}&allow_signup=false&scope={}",
        config.authorize_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(state),
        urlencoding::encode(&config.scope),
    )
}
