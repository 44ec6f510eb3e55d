//! Identity/session collaborator.
//!
//! The sync engine only relies on `get_session` and `on_auth_change`; the rest
//! of the surface exists so an app can drive sign-in flows against the same
//! provider.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracker_core::Clock;
use tracker_core::model::{Session, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityError {
    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("an account already exists for {0}")]
    EmailTaken(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Extra fields captured at sign-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub display_name: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns `IdentityError::Unavailable` if the provider cannot be reached.
    async fn get_session(&self) -> Result<Option<Session>, IdentityError>;

    /// # Errors
    ///
    /// Returns `IdentityError::InvalidCredentials` on a bad email/password pair.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError>;

    /// Create an account and sign it in.
    ///
    /// # Errors
    ///
    /// Returns a validation error or `IdentityError::EmailTaken`.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: Profile,
    ) -> Result<Session, IdentityError>;

    /// # Errors
    ///
    /// Returns `IdentityError::Unavailable` if the provider cannot be reached.
    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Receiver that changes exactly once per signed-in/signed-out transition.
    fn on_auth_change(&self) -> watch::Receiver<Option<Session>>;

    /// Start a password reset. Unknown emails succeed silently.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidEmail` for malformed input.
    async fn reset_password(&self, email: &str) -> Result<(), IdentityError>;
}

const MIN_PASSWORD_LEN: usize = 8;

struct Account {
    user_id: UserId,
    password: String,
}

/// Process-local identity provider for tests and the headless CLI.
///
/// Holds credentials in memory; not a credential store.
pub struct InMemoryIdentity {
    clock: Clock,
    accounts: Mutex<HashMap<String, Account>>,
    session: watch::Sender<Option<Session>>,
    reset_requests: Mutex<Vec<String>>,
}

impl InMemoryIdentity {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            clock,
            accounts: Mutex::new(HashMap::new()),
            session,
            reset_requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that starts signed in as `user_id`.
    #[must_use]
    pub fn signed_in(clock: Clock, user_id: UserId, email: impl Into<String>) -> Self {
        let identity = Self::new(clock);
        identity.publish(Some(Session {
            user_id,
            email: email.into(),
            signed_in_at: clock.now(),
        }));
        identity
    }

    /// Replace the current session without going through credentials.
    pub fn set_session(&self, session: Option<Session>) {
        self.publish(session);
    }

    /// Emails for which a reset was requested, oldest first.
    #[must_use]
    pub fn reset_requests(&self) -> Vec<String> {
        self.reset_requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn publish(&self, next: Option<Session>) {
        self.session.send_if_modified(|current| {
            let transition = current.is_some() != next.is_some();
            *current = next;
            transition
        });
    }

    fn normalize_email(email: &str) -> Result<String, IdentityError> {
        let email = email.trim().to_lowercase();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
            _ => Err(IdentityError::InvalidEmail(email)),
        }
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentity {
    async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
        Ok(self.session.borrow().clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let email = Self::normalize_email(email)?;
        let user_id = {
            let accounts = self
                .accounts
                .lock()
                .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
            match accounts.get(&email) {
                Some(account) if account.password == password => account.user_id.clone(),
                _ => return Err(IdentityError::InvalidCredentials),
            }
        };
        let session = Session {
            user_id,
            email,
            signed_in_at: self.clock.now(),
        };
        self.publish(Some(session.clone()));
        tracing::info!(user = %session.user_id, "signed in");
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: Profile,
    ) -> Result<Session, IdentityError> {
        let email = Self::normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(IdentityError::WeakPassword {
                min: MIN_PASSWORD_LEN,
            });
        }
        let user_id = UserId::generate();
        {
            let mut accounts = self
                .accounts
                .lock()
                .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
            if accounts.contains_key(&email) {
                return Err(IdentityError::EmailTaken(email));
            }
            accounts.insert(
                email.clone(),
                Account {
                    user_id: user_id.clone(),
                    password: password.to_owned(),
                },
            );
        }
        tracing::info!(user = %user_id, display_name = ?profile.display_name, "account created");
        self.sign_in(&email, password).await
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.publish(None);
        Ok(())
    }

    fn on_auth_change(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    async fn reset_password(&self, email: &str) -> Result<(), IdentityError> {
        let email = Self::normalize_email(email)?;
        self.reset_requests
            .lock()
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?
            .push(email);
        Ok(())
    }
}
