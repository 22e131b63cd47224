//! Username registry: format validation, availability checks, unique-name
//! generation, and profile upserts against the `users` collection.
//!
//! Availability checking is availability-over-accuracy: when the backend
//! query fails, the answer degrades to an advisory one built from the
//! reserved-word list and a process-local cache of names this instance has
//! seen claimed. Advisory answers are tagged so callers can tell them apart.

use std::sync::{Arc, LazyLock};

use dashmap::DashSet;
use regex::Regex;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult, StoreError};
use crate::models::{
    created_at_field, email_field, username_field, username_value, AuthSession,
    AvailabilityCheck, AvailabilitySource, UserProfile,
};
use crate::store::{DocumentStore, Query};

/// Names no one may claim, matched case-insensitively.
const RESERVED_USERNAMES: &[&str] = &[
    "admin", "administrator", "root", "user", "guest", "test", "demo", "api", "www", "mail",
    "email", "support", "help", "info", "contact", "about", "privacy", "terms", "login", "signup",
    "register", "profile", "settings", "dashboard", "home", "index", "main", "app", "system",
];

static USERNAME_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_]+$").unwrap_or_else(|e| panic!("invalid charset pattern: {e}"))
});

/// Pure format check, no I/O. Rules are checked in order and the first
/// failure wins.
pub fn validate_username(username: &str) -> AppResult<()> {
    if username.is_empty() {
        return Err(AppError::Validation("Username is required".into()));
    }
    if username.len() < 3 {
        return Err(AppError::Validation(
            "Username must be at least 3 characters long".into(),
        ));
    }
    if username.len() > 20 {
        return Err(AppError::Validation(
            "Username must be no more than 20 characters long".into(),
        ));
    }
    if !USERNAME_CHARSET.is_match(username) {
        return Err(AppError::Validation(
            "Username can only contain letters, numbers, and underscores".into(),
        ));
    }
    if username.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "Username cannot start with a number".into(),
        ));
    }
    Ok(())
}

/// Lowercase alphanumeric stem derived from a display name or email, used as
/// the base for generated usernames. At most 15 characters; prefixed with
/// `user` when too short or digit-leading, so the stem always passes
/// [`validate_username`].
fn base_username(seed: &str) -> String {
    let seed = if seed.is_empty() { "user" } else { seed };
    let mut base: String = seed
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(15)
        .collect();
    if base.len() < 3 || base.starts_with(|c: char| c.is_ascii_digit()) {
        base = format!("user{base}");
        base.truncate(15);
    }
    base
}

pub struct UsernameRegistry {
    store: Arc<dyn DocumentStore>,
    config: AppConfig,
    /// Names this instance has seen claimed, for the advisory fallback.
    taken: DashSet<String>,
}

impl UsernameRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, config: AppConfig) -> Self {
        Self {
            store,
            config,
            taken: DashSet::new(),
        }
    }

    /// Record a claimed name so the advisory fallback knows about it.
    pub fn note_taken(&self, username: &str) {
        if !username.is_empty() {
            self.taken.insert(username.to_lowercase());
        }
    }

    fn advisory_available(&self, username: &str) -> bool {
        let lower = username.to_lowercase();
        !RESERVED_USERNAMES.contains(&lower.as_str()) && !self.taken.contains(&lower)
    }

    /// Check whether `username` can still be claimed.
    ///
    /// The authoritative path is a case-folded equality query against the
    /// registry. Any store failure degrades to the advisory path rather than
    /// blocking signup, so this never fails.
    pub async fn is_available(&self, username: &str) -> AvailabilityCheck {
        if username.len() < 3 {
            return AvailabilityCheck {
                source: AvailabilitySource::Authoritative,
                available: false,
            };
        }

        let query = Query::collection(&self.config.users_collection)
            .where_eq(username_field(), username_value(username))
            .limit(1);

        match self.store.query(&query).await {
            Ok(matches) => AvailabilityCheck {
                source: AvailabilitySource::Authoritative,
                available: matches.is_empty(),
            },
            Err(e) => {
                tracing::warn!(username, error = %e, "availability query failed, using local fallback");
                AvailabilityCheck {
                    source: AvailabilitySource::Advisory,
                    available: self.advisory_available(username),
                }
            }
        }
    }

    /// Derive an available username from a display name or email.
    ///
    /// Probes the bare stem, then numeric suffixes up to the configured
    /// limit, then falls back to a timestamp suffix without further
    /// checking. The result always passes [`validate_username`].
    pub async fn generate_unique(&self, seed: &str) -> String {
        let base = base_username(seed);

        if self.is_available(&base).await.available {
            return base;
        }

        for n in 1..=self.config.username_probe_limit {
            let candidate = format!("{base}{n}");
            if self.is_available(&candidate).await.available {
                return candidate;
            }
        }

        let millis = chrono::Utc::now().timestamp_millis().to_string();
        let suffix = &millis[millis.len().saturating_sub(6)..];
        // Keep the suffixed name inside the 20-char limit
        let mut base = base;
        base.truncate(14);
        format!("{base}{suffix}")
    }

    /// Available variations on a display name, at most `suggestion_limit`.
    /// Returns empty when the stem is too short to build anything sensible.
    pub async fn suggest_alternatives(&self, display_name: &str) -> Vec<String> {
        if display_name.is_empty() {
            return Vec::new();
        }

        let base: String = display_name
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            .take(15)
            .collect();
        if base.len() < 3 {
            return Vec::new();
        }

        let variations = [
            base.clone(),
            format!("{base}_"),
            format!("{base}123"),
            format!("{base}2024"),
            format!("the_{base}"),
            format!("{base}_user"),
        ];

        let mut suggestions = Vec::new();
        for candidate in variations {
            if suggestions.len() >= self.config.suggestion_limit {
                break;
            }
            if self.is_available(&candidate).await.available {
                suggestions.push(candidate);
            }
        }
        suggestions
    }

    /// Resolve a username or email to a profile. `Ok(None)` when nothing
    /// matches.
    ///
    /// Identifiers without an `@` are tried as usernames first; a missing
    /// backend index downgrades that path to a full-collection scan. The
    /// email path is last and its failures propagate.
    pub async fn find_by_identifier(&self, identifier: &str) -> AppResult<Option<UserProfile>> {
        if identifier.is_empty() {
            return Ok(None);
        }
        let lower = identifier.to_lowercase();

        if !identifier.contains('@') {
            let query = Query::collection(&self.config.users_collection)
                .where_eq(username_field(), username_value(identifier))
                .limit(1);

            match self.store.query(&query).await {
                Ok(matches) => {
                    if let Some(profile) = matches.first().and_then(UserProfile::from_doc) {
                        return Ok(Some(profile));
                    }
                }
                Err(StoreError::MissingIndex(_)) => {
                    if let Some(profile) = self.scan_for_username(&lower).await {
                        return Ok(Some(profile));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "username lookup failed, falling through to email");
                }
            }
        }

        let query = Query::collection(&self.config.users_collection)
            .where_eq(email_field(), serde_json::json!(lower))
            .limit(1);
        let matches = self.store.query(&query).await?;
        Ok(matches.first().and_then(UserProfile::from_doc))
    }

    async fn scan_for_username(&self, lower: &str) -> Option<UserProfile> {
        let query = Query::collection(&self.config.users_collection);
        match self.store.query(&query).await {
            Ok(docs) => docs
                .iter()
                .filter_map(UserProfile::from_doc)
                .find(|p| !p.username.is_empty() && p.username.to_lowercase() == lower),
            Err(e) => {
                tracing::error!(error = %e, "manual username scan failed");
                None
            }
        }
    }

    /// Create the profile for a fresh identity, or refresh an existing one.
    ///
    /// An existing non-empty username is never overwritten, regardless of
    /// `explicit_username`. Refreshes are merge writes so fields this client
    /// does not know about survive.
    pub async fn upsert_profile(
        &self,
        session: &AuthSession,
        explicit_username: Option<&str>,
    ) -> AppResult<UserProfile> {
        let path = format!("{}/{}", self.config.users_collection, session.id);
        let existing = self
            .store
            .get(&path)
            .await?
            .as_ref()
            .and_then(UserProfile::from_doc);

        let seed = session
            .display_name
            .clone()
            .unwrap_or_else(|| session.email.clone());

        match existing {
            None => {
                let username = match explicit_username {
                    Some(name) => name.to_string(),
                    None => self.generate_unique(&seed).await,
                };
                let display_name = session.display_name.as_deref().unwrap_or("User");
                let fields = UserProfile::create_fields(
                    display_name,
                    &username,
                    &session.email,
                    "",
                    session.email_verified,
                );
                self.store.set(&path, fields, false).await?;
                self.note_taken(&username);
                tracing::info!(user = %session.id, username, "profile created");
            }
            Some(current) => {
                // Only fill the username in when the profile has none
                let username_patch = if current.username.is_empty() {
                    Some(match explicit_username {
                        Some(name) => name.to_string(),
                        None => self.generate_unique(&seed).await,
                    })
                } else {
                    None
                };

                let display_name = session
                    .display_name
                    .clone()
                    .unwrap_or_else(|| current.display_name.clone());
                let email = if session.email.is_empty() {
                    current.email.clone()
                } else {
                    session.email.clone()
                };
                let fields = UserProfile::refresh_fields(
                    &display_name,
                    &email,
                    session.email_verified,
                    username_patch.as_deref(),
                );
                self.store.set(&path, fields, true).await?;
                if let Some(name) = &username_patch {
                    self.note_taken(name);
                }
                tracing::debug!(user = %session.id, "profile refreshed");
            }
        }

        self.store
            .get(&path)
            .await?
            .as_ref()
            .and_then(UserProfile::from_doc)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("profile missing after upsert")))
    }

    /// Explicit rename. Empty names are a no-op; the caller runs
    /// [`validate_username`] and an availability check first.
    pub async fn update_username(&self, user_id: Uuid, new_username: &str) -> AppResult<()> {
        let trimmed = new_username.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let path = format!("{}/{}", self.config.users_collection, user_id);
        self.store
            .set(&path, UserProfile::rename_fields(trimmed), true)
            .await?;
        self.note_taken(trimmed);
        Ok(())
    }

    pub async fn get_profile(&self, user_id: Uuid) -> AppResult<Option<UserProfile>> {
        let path = format!("{}/{}", self.config.users_collection, user_id);
        Ok(self
            .store
            .get(&path)
            .await?
            .as_ref()
            .and_then(UserProfile::from_doc))
    }

    /// Newest-first profile listing, for substring search at the UI layer.
    pub async fn list_profiles(&self) -> AppResult<Vec<UserProfile>> {
        let query = Query::collection(&self.config.users_collection)
            .order_by(created_at_field(), crate::store::Direction::Descending);
        let docs = self.store.query(&query).await?;
        Ok(docs.iter().filter_map(UserProfile::from_doc).collect())
    }
}
