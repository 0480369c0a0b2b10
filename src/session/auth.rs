use async_trait::async_trait;
use chrono::Utc;
use log::info;

use crate::error::AuthError;
use crate::session::types::{Credentials, Session, SessionStatus, UserKind};

/// The authentication backend that issues sessions.
#[async_trait]
pub trait AuthService: Send + Sync + 'static {
    /// The status of any session persisted by a previous run.
    async fn restore(&self) -> SessionStatus;

    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError>;
}

/// Accepts any well-formed credentials without contacting a server.
pub struct OfflineAuthService {
    has_known_device: bool,
}

impl OfflineAuthService {
    pub fn new(has_known_device: bool) -> Self {
        OfflineAuthService { has_known_device }
    }
}

fn check_credentials(credentials: &Credentials) -> Result<(), AuthError> {
    let login = credentials.login.trim();

    if login.is_empty() {
        return Err(AuthError::MissingLogin);
    }
    if credentials.password.is_empty() {
        return Err(AuthError::MissingPassword);
    }

    match login.split_once('@') {
        Some((user, domain)) if !user.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AuthError::MalformedLogin(login.to_string())),
    }
}

#[async_trait]
impl AuthService for OfflineAuthService {
    async fn restore(&self) -> SessionStatus {
        // sessions are not persisted
        SessionStatus::AuthenticationRequired
    }

    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        check_credentials(credentials)?;

        let kind = if self.has_known_device { UserKind::ExistingUser } else { UserKind::NewUser };
        info!("Offline session started for {} ({:?})", credentials.login, kind);

        Ok(Session {
            login: credentials.login.trim().to_string(),
            kind,
            started_at: Utc::now(),
        })
    }
}
