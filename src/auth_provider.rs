//! Auth-provider seam.
//!
//! The external identity service is consumed through [`AuthProvider`];
//! session changes fan out over a `watch` channel so route gating can read
//! the latest snapshot synchronously. [`MemoryAuthProvider`] is the
//! in-process implementation: argon2id password hashes, an email outbox
//! instead of real mail, and a recent-sign-in window guarding sensitive
//! mutations.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::models::AuthSession;

/// Provider id for password accounts.
pub const PASSWORD_PROVIDER: &str = "password";
/// Federated provider whose accounts arrive pre-verified.
pub const GOOGLE_PROVIDER: &str = "google.com";

/// Session lifecycle: `Unknown` until the provider reports, then
/// `Anonymous` or `Authenticated`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unknown,
    Anonymous,
    Authenticated(AuthSession),
}

impl SessionState {
    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            SessionState::Authenticated(s) => Some(s),
            _ => None,
        }
    }
}

/// Kinds of mail the provider sends on our behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    Verification,
    PasswordReset,
}

/// Capability set consumed from the external auth service.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Create a password account and sign it in (unverified).
    async fn create_account(&self, email: &str, password: &str) -> AppResult<AuthSession>;

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession>;

    /// Sign in through the federated provider; the provider supplies the
    /// (pre-verified) email and display name.
    async fn sign_in_federated(&self, email: &str, display_name: &str) -> AppResult<AuthSession>;

    async fn sign_out(&self) -> AppResult<()>;

    /// Latest known session, no network round trip.
    fn current_session(&self) -> Option<AuthSession>;

    /// Watch the session lifecycle. The receiver always holds the latest
    /// snapshot.
    fn on_session_change(&self) -> watch::Receiver<SessionState>;

    async fn send_verification_email(&self) -> AppResult<()>;

    async fn send_password_reset(&self, email: &str) -> AppResult<()>;

    async fn update_display_name(&self, name: &str) -> AppResult<()>;

    /// Requires a recent sign-in; fails with [`AppError::ReauthRequired`]
    /// outside the window.
    async fn update_password(&self, new_password: &str) -> AppResult<()>;

    /// Same reauth rule as `update_password`.
    async fn delete_account(&self) -> AppResult<()>;
}

// ─── Password Hashing (Argon2id) ───────────────────────

fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid password hash: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

// ─── In-Memory Provider ────────────────────────────────

#[derive(Debug, Clone)]
struct Account {
    id: Uuid,
    email: String,
    display_name: Option<String>,
    password_hash: Option<String>,
    email_verified: bool,
    providers: Vec<String>,
}

impl Account {
    fn session(&self) -> AuthSession {
        AuthSession {
            id: self.id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            email_verified: self.email_verified,
            providers: self.providers.clone(),
        }
    }
}

pub struct MemoryAuthProvider {
    /// Keyed by case-folded email.
    accounts: DashMap<String, Account>,
    session_tx: watch::Sender<SessionState>,
    last_sign_in: Mutex<Option<Instant>>,
    /// (recipient email, kind), inspected by tests instead of real mail.
    outbox: Mutex<Vec<(String, EmailKind)>>,
    reauth_window: Duration,
}

impl MemoryAuthProvider {
    pub fn new(config: &AppConfig) -> Self {
        let (session_tx, _) = watch::channel(SessionState::Anonymous);
        Self {
            accounts: DashMap::new(),
            session_tx,
            last_sign_in: Mutex::new(None),
            outbox: Mutex::new(Vec::new()),
            reauth_window: Duration::from_secs(config.reauth_window_secs),
        }
    }

    fn set_session(&self, state: SessionState) {
        if matches!(state, SessionState::Authenticated(_)) {
            *self.last_sign_in.lock().expect("lock poisoned") = Some(Instant::now());
        }
        // send_replace updates the value even with no receiver subscribed
        self.session_tx.send_replace(state);
    }

    fn require_session(&self) -> AppResult<AuthSession> {
        self.current_session()
            .ok_or_else(|| AppError::AuthError("No user is currently signed in".into()))
    }

    fn require_recent_sign_in(&self) -> AppResult<()> {
        let recent = self
            .last_sign_in
            .lock()
            .expect("lock poisoned")
            .map(|at| at.elapsed() <= self.reauth_window)
            .unwrap_or(false);
        if recent {
            Ok(())
        } else {
            Err(AppError::ReauthRequired)
        }
    }

    /// Out-of-band completion of an emailed verification link.
    pub fn complete_verification(&self, email: &str) {
        if let Some(mut account) = self.accounts.get_mut(&email.to_lowercase()) {
            account.email_verified = true;
        }
    }

    /// Mail the provider "sent", oldest first.
    pub fn sent_emails(&self) -> Vec<(String, EmailKind)> {
        self.outbox.lock().expect("lock poisoned").clone()
    }

    #[doc(hidden)]
    pub fn expire_sign_in_window(&self) {
        *self.last_sign_in.lock().expect("lock poisoned") = None;
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn create_account(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let key = email.trim().to_lowercase();
        if self.accounts.contains_key(&key) {
            return Err(AppError::AuthError("Email already in use".into()));
        }

        let account = Account {
            id: Uuid::new_v4(),
            email: key.clone(),
            display_name: None,
            password_hash: Some(hash_password(password)?),
            email_verified: false,
            providers: vec![PASSWORD_PROVIDER.into()],
        };
        let session = account.session();
        self.accounts.insert(key, account);

        tracing::info!(user = %session.id, "account created");
        self.set_session(SessionState::Authenticated(session.clone()));
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let key = email.trim().to_lowercase();
        let account = self
            .accounts
            .get(&key)
            .ok_or(AppError::InvalidCredentials)?
            .clone();

        let hash = account
            .password_hash
            .as_deref()
            .ok_or(AppError::InvalidCredentials)?;
        if !verify_password(password, hash)? {
            return Err(AppError::InvalidCredentials);
        }

        let session = account.session();
        self.set_session(SessionState::Authenticated(session.clone()));
        Ok(session)
    }

    async fn sign_in_federated(&self, email: &str, display_name: &str) -> AppResult<AuthSession> {
        let key = email.trim().to_lowercase();

        let session = {
            let mut account = self.accounts.entry(key.clone()).or_insert_with(|| Account {
                id: Uuid::new_v4(),
                email: key.clone(),
                display_name: Some(display_name.to_string()),
                password_hash: None,
                email_verified: true,
                providers: Vec::new(),
            });
            if !account.providers.iter().any(|p| p == GOOGLE_PROVIDER) {
                account.providers.push(GOOGLE_PROVIDER.into());
            }
            // The federated provider vouches for the address
            account.email_verified = true;
            if account.display_name.is_none() {
                account.display_name = Some(display_name.to_string());
            }
            account.session()
        };

        self.set_session(SessionState::Authenticated(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> AppResult<()> {
        self.set_session(SessionState::Anonymous);
        Ok(())
    }

    fn current_session(&self) -> Option<AuthSession> {
        self.session_tx.borrow().session().cloned()
    }

    fn on_session_change(&self) -> watch::Receiver<SessionState> {
        self.session_tx.subscribe()
    }

    async fn send_verification_email(&self) -> AppResult<()> {
        let session = self.require_session()?;
        self.outbox
            .lock()
            .expect("lock poisoned")
            .push((session.email, EmailKind::Verification));
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> AppResult<()> {
        let key = email.trim().to_lowercase();
        if !self.accounts.contains_key(&key) {
            return Err(AppError::AuthError("No account for that email".into()));
        }
        self.outbox
            .lock()
            .expect("lock poisoned")
            .push((key, EmailKind::PasswordReset));
        Ok(())
    }

    async fn update_display_name(&self, name: &str) -> AppResult<()> {
        let session = self.require_session()?;
        let updated = {
            let mut account = self
                .accounts
                .get_mut(&session.email)
                .ok_or_else(|| AppError::AuthError("Account no longer exists".into()))?;
            account.display_name = Some(name.to_string());
            account.session()
        };
        self.set_session(SessionState::Authenticated(updated));
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> AppResult<()> {
        let session = self.require_session()?;
        self.require_recent_sign_in()?;

        let mut account = self
            .accounts
            .get_mut(&session.email)
            .ok_or_else(|| AppError::AuthError("Account no longer exists".into()))?;
        account.password_hash = Some(hash_password(new_password)?);
        Ok(())
    }

    async fn delete_account(&self) -> AppResult<()> {
        let session = self.require_session()?;
        self.require_recent_sign_in()?;

        self.accounts.remove(&session.email);
        tracing::info!(user = %session.id, "account deleted");
        self.set_session(SessionState::Anonymous);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> MemoryAuthProvider {
        MemoryAuthProvider::new(&AppConfig::test_default())
    }

    #[tokio::test]
    async fn create_account_signs_in_unverified() {
        let auth = provider();
        let session = auth.create_account("a@example.com", "hunter22").await.unwrap();
        assert!(!session.email_verified);
        assert_eq!(auth.current_session().unwrap().id, session.id);
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let auth = provider();
        auth.create_account("a@example.com", "hunter22").await.unwrap();
        assert!(auth.create_account("A@Example.com", "other").await.is_err());
    }

    #[tokio::test]
    async fn sign_in_wrong_password() {
        let auth = provider();
        auth.create_account("a@example.com", "hunter22").await.unwrap();
        auth.sign_out().await.unwrap();

        let err = auth.sign_in("a@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        assert!(auth.current_session().is_none());
    }

    #[tokio::test]
    async fn verification_roundtrip() {
        let auth = provider();
        auth.create_account("a@example.com", "hunter22").await.unwrap();
        auth.send_verification_email().await.unwrap();
        assert_eq!(
            auth.sent_emails(),
            vec![("a@example.com".to_string(), EmailKind::Verification)]
        );

        auth.complete_verification("a@example.com");
        auth.sign_out().await.unwrap();
        let session = auth.sign_in("a@example.com", "hunter22").await.unwrap();
        assert!(session.email_verified);
    }

    #[tokio::test]
    async fn federated_accounts_arrive_verified() {
        let auth = provider();
        let session = auth
            .sign_in_federated("g@example.com", "Grace")
            .await
            .unwrap();
        assert!(session.email_verified);
        assert!(session.has_provider(GOOGLE_PROVIDER));
        assert_eq!(session.display_name.as_deref(), Some("Grace"));
    }

    #[tokio::test]
    async fn password_change_needs_recent_sign_in() {
        let auth = provider();
        auth.create_account("a@example.com", "hunter22").await.unwrap();

        auth.update_password("newhunter22").await.unwrap();

        auth.expire_sign_in_window();
        let err = auth.update_password("again").await.unwrap_err();
        assert!(matches!(err, AppError::ReauthRequired));
    }

    #[tokio::test]
    async fn delete_account_needs_recent_sign_in() {
        let auth = provider();
        auth.create_account("a@example.com", "hunter22").await.unwrap();
        auth.expire_sign_in_window();
        assert!(matches!(
            auth.delete_account().await.unwrap_err(),
            AppError::ReauthRequired
        ));

        auth.sign_in("a@example.com", "hunter22").await.unwrap();
        auth.delete_account().await.unwrap();
        assert!(auth.current_session().is_none());
        assert!(auth.sign_in("a@example.com", "hunter22").await.is_err());
    }

    #[tokio::test]
    async fn session_watch_tracks_changes() {
        let auth = provider();
        let rx = auth.on_session_change();
        assert_eq!(*rx.borrow(), SessionState::Anonymous);

        auth.create_account("a@example.com", "hunter22").await.unwrap();
        assert!(matches!(*rx.borrow(), SessionState::Authenticated(_)));

        auth.sign_out().await.unwrap();
        assert_eq!(*rx.borrow(), SessionState::Anonymous);
    }
}
