//! Login handshake rules.
//!
//! Pure decisions used by the client and server flows: secret generation,
//! validation of the login and secret-exchange payloads, and the login status
//! ladder. The flows themselves live in [`super::client`] and
//! [`super::server`].
//!
//! ## Status priority
//! The server answers with the first status that applies:
//!
//! 1. `ALREADY_LOGGED_IN`, the username has a live session
//! 2. `FULL_SERVER`, no free player slot
//! 3. `PROCEED_LOGIN`, followed by `LOGIN_SUCCESS` once the player is loaded
//!
//! Every other status is a terminal rejection on the client.

use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::config::MAX_USERNAME_LEN;
use crate::core::packet::{LoginRequest, LoginStatusKind, SecretExchange};
use crate::error::{constants, Result, SessionError};

/// Length of a generated session secret.
pub const SECRET_LEN: usize = 32;

/// Fresh per-connection secret. Not a cryptographic credential.
pub fn generate_secret() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

#[instrument(skip(request), fields(username = %request.username))]
pub fn validate_login_request(request: &LoginRequest, protocol_version: u32) -> Result<()> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(SessionError::HandshakeError(
            constants::ERR_EMPTY_USERNAME.into(),
        ));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(SessionError::HandshakeError(
            constants::ERR_USERNAME_TOO_LONG.into(),
        ));
    }
    if request.protocol_version != protocol_version {
        warn!(
            expected = protocol_version,
            actual = request.protocol_version,
            "Protocol version mismatch"
        );
        return Err(SessionError::HandshakeError(format!(
            "Protocol version {} is not supported (server speaks {protocol_version})",
            request.protocol_version
        )));
    }
    debug!("Login request accepted");
    Ok(())
}

pub fn validate_secret_exchange(exchange: &SecretExchange) -> Result<()> {
    if exchange.secret.is_empty() {
        return Err(SessionError::HandshakeError(
            constants::ERR_EMPTY_SECRET.into(),
        ));
    }
    if exchange.entity_uuid.is_empty() {
        return Err(SessionError::HandshakeError(
            constants::ERR_EMPTY_ENTITY.into(),
        ));
    }
    Ok(())
}

/// Server-side facts the login status is decided from.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginContext {
    pub already_logged_in: bool,
    pub server_full: bool,
}

pub fn evaluate_login_status(context: LoginContext) -> LoginStatusKind {
    if context.already_logged_in {
        LoginStatusKind::AlreadyLoggedIn
    } else if context.server_full {
        LoginStatusKind::FullServer
    } else {
        LoginStatusKind::ProceedLogin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Keep waiting, the server is loading the player
    Proceed,
    Success,
}

/// Client-side reading of a `LOGIN_STATUS` value.
pub fn interpret_login_status(status: i32) -> Result<LoginOutcome> {
    match LoginStatusKind::try_from(status).unwrap_or(LoginStatusKind::UnrecognizedStatus) {
        LoginStatusKind::ProceedLogin => Ok(LoginOutcome::Proceed),
        LoginStatusKind::LoginSuccess => Ok(LoginOutcome::Success),
        rejected => Err(SessionError::LoginRejected(rejected.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login(username: &str, version: u32) -> LoginRequest {
        LoginRequest {
            username: username.into(),
            protocol_version: version,
        }
    }

    #[test]
    fn test_secret_shape() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), SECRET_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_logins_rejected() {
        assert!(validate_login_request(&login("Alice", 1), 1).is_ok());
        assert!(validate_login_request(&login("   ", 1), 1).is_err());
        assert!(validate_login_request(&login("Alice", 2), 1).is_err());
        let long = "x".repeat(MAX_USERNAME_LEN + 1);
        assert!(validate_login_request(&login(&long, 1), 1).is_err());
    }

    #[test]
    fn test_secret_exchange_requires_both_fields() {
        let ok = SecretExchange {
            secret: "s1".into(),
            entity_uuid: "e1".into(),
        };
        assert!(validate_secret_exchange(&ok).is_ok());

        let no_secret = SecretExchange {
            secret: String::new(),
            ..ok.clone()
        };
        let no_entity = SecretExchange {
            entity_uuid: String::new(),
            ..ok
        };
        assert!(validate_secret_exchange(&no_secret).unwrap_err().is_fatal());
        assert!(validate_secret_exchange(&no_entity).unwrap_err().is_fatal());
    }

    #[test]
    fn test_status_priority() {
        let both = LoginContext {
            already_logged_in: true,
            server_full: true,
        };
        assert_eq!(evaluate_login_status(both), LoginStatusKind::AlreadyLoggedIn);

        let full = LoginContext {
            server_full: true,
            ..Default::default()
        };
        assert_eq!(evaluate_login_status(full), LoginStatusKind::FullServer);
        assert_eq!(
            evaluate_login_status(LoginContext::default()),
            LoginStatusKind::ProceedLogin
        );
    }

    #[test]
    fn test_client_interprets_rejections() {
        assert_eq!(
            interpret_login_status(LoginStatusKind::ProceedLogin as i32).unwrap(),
            LoginOutcome::Proceed
        );
        assert_eq!(
            interpret_login_status(LoginStatusKind::LoginSuccess as i32).unwrap(),
            LoginOutcome::Success
        );
        for rejected in [
            LoginStatusKind::AlreadyLoggedIn as i32,
            LoginStatusKind::FullServer as i32,
            LoginStatusKind::UnrecognizedStatus as i32,
            77,
        ] {
            assert!(matches!(
                interpret_login_status(rejected),
                Err(SessionError::LoginRejected(_))
            ));
        }
    }
}
