// Client core for the Driftchat messaging app: identity registry, contact
// graph, channel resolution, and live message synchronization over a
// document-store backend. The backend and identity service are consumed
// through the `store::DocumentStore` and `auth_provider::AuthProvider`
// seams; in-memory implementations back the tests.

pub mod auth_provider;
pub mod channel;
pub mod config;
pub mod contacts;
pub mod errors;
pub mod models;
pub mod registry;
pub mod session;
pub mod store;
pub mod sync;

use std::sync::{Arc, Mutex};

use validator::Validate;

use auth_provider::AuthProvider;
use config::AppConfig;
use contacts::ContactStore;
use errors::{AppError, AppResult};
use models::{AuthSession, SignupForm, UserProfile};
use registry::UsernameRegistry;
use session::{gate, RouteAccess, SessionGate};
use store::DocumentStore;
use sync::ChatSync;

// ─── Client Assembly ───────────────────────────────────

/// Everything a UI needs, wired together over one store and one auth
/// provider. Holds at most one live [`ChatSync`]; identity switches tear
/// the old one down before the new one starts.
pub struct ChatClient {
    config: AppConfig,
    store: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    registry: UsernameRegistry,
    contacts: ContactStore,
    sync: Mutex<Option<Arc<ChatSync>>>,
}

impl ChatClient {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        config: AppConfig,
    ) -> Self {
        Self {
            registry: UsernameRegistry::new(store.clone(), config.clone()),
            contacts: ContactStore::new(store.clone(), config.clone()),
            config,
            store,
            auth,
            sync: Mutex::new(None),
        }
    }

    // ─── Account Lifecycle ─────────────────────────────

    /// Register a password account.
    ///
    /// Validates the form and the username (format plus availability),
    /// creates the account, sends the verification mail, writes the
    /// profile, and signs back out: the account stays unusable until the
    /// email is verified.
    pub async fn signup(&self, form: &SignupForm) -> AppResult<()> {
        form.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        registry::validate_username(&form.username)?;

        let check = self.registry.is_available(&form.username).await;
        if !check.available {
            return Err(AppError::Validation("Username is already taken".into()));
        }

        let session = self.auth.create_account(&form.email, &form.password).await?;
        self.auth.update_display_name(&form.display_name).await?;
        self.auth.send_verification_email().await?;

        let session = AuthSession {
            display_name: Some(form.display_name.clone()),
            ..session
        };
        self.registry
            .upsert_profile(&session, Some(&form.username))
            .await?;

        // Verification is enforced at sign-in, not here
        self.auth.sign_out().await?;
        tracing::info!(user = %session.id, "signup complete, awaiting verification");
        Ok(())
    }

    /// Sign in with an email, username, or other identifier.
    ///
    /// Non-email identifiers are resolved through the registry first; an
    /// unresolvable one fails the same way a wrong password does. On
    /// success the profile is refreshed and, for sessions that pass the
    /// route gate, live synchronization starts.
    pub async fn login(&self, identifier: &str, password: &str) -> AppResult<UserProfile> {
        let email = if identifier.contains('@') {
            identifier.to_string()
        } else {
            self.registry
                .find_by_identifier(identifier)
                .await?
                .ok_or(AppError::InvalidCredentials)?
                .email
        };

        let session = self.auth.sign_in(&email, password).await?;
        let profile = self.registry.upsert_profile(&session, None).await?;
        self.start_sync_if_allowed(&session, &profile);
        Ok(profile)
    }

    /// Federated sign-in. The provider supplies a verified email and a
    /// display name; the profile upsert never overwrites an existing
    /// username.
    pub async fn login_federated(
        &self,
        email: &str,
        display_name: &str,
    ) -> AppResult<UserProfile> {
        let session = self.auth.sign_in_federated(email, display_name).await?;
        let profile = self.registry.upsert_profile(&session, None).await?;
        self.start_sync_if_allowed(&session, &profile);
        Ok(profile)
    }

    pub async fn logout(&self) -> AppResult<()> {
        self.stop_sync();
        self.auth.sign_out().await
    }

    pub async fn resend_verification(&self) -> AppResult<()> {
        self.auth.send_verification_email().await
    }

    pub async fn reset_password(&self, email: &str) -> AppResult<()> {
        self.auth.send_password_reset(email).await
    }

    fn start_sync_if_allowed(&self, session: &AuthSession, profile: &UserProfile) {
        let state = auth_provider::SessionState::Authenticated(session.clone());
        if !matches!(gate(&state), RouteAccess::Allow(_)) {
            return;
        }
        let sync = Arc::new(ChatSync::new(
            self.store.clone(),
            self.config.clone(),
            session.id,
            profile.display_name.clone(),
        ));
        let previous = self.sync.lock().expect("lock poisoned").replace(sync);
        if let Some(old) = previous {
            old.shutdown();
        }
    }

    fn stop_sync(&self) {
        if let Some(sync) = self.sync.lock().expect("lock poisoned").take() {
            sync.shutdown();
        }
    }

    // ─── Search ────────────────────────────────────────

    /// Case-insensitive substring search over display name, email, and
    /// username. The current user is excluded from results.
    pub async fn search_users(&self, term: &str) -> AppResult<Vec<UserProfile>> {
        let session = self
            .auth
            .current_session()
            .ok_or_else(|| AppError::AuthError("No user is currently signed in".into()))?;

        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = self.registry.list_profiles().await?;
        Ok(profiles
            .into_iter()
            .filter(|p| p.id != session.id)
            .filter(|p| {
                p.display_name_lower.contains(&needle)
                    || p.email.to_lowercase().contains(&needle)
                    || p.username.to_lowercase().contains(&needle)
            })
            .collect())
    }

    // ─── Accessors ─────────────────────────────────────

    pub fn registry(&self) -> &UsernameRegistry {
        &self.registry
    }

    pub fn contacts(&self) -> &ContactStore {
        &self.contacts
    }

    /// The live synchronizer, present only while a gated session is signed
    /// in.
    pub fn sync(&self) -> Option<Arc<ChatSync>> {
        self.sync.lock().expect("lock poisoned").clone()
    }

    pub fn current_session(&self) -> Option<AuthSession> {
        self.auth.current_session()
    }

    pub fn session_gate(&self) -> SessionGate {
        SessionGate::new(self.auth.on_session_change())
    }
}
