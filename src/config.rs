use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    // Collection layout
    pub users_collection: String,
    pub public_collection: String,
    pub private_root: String,

    // Public room history cap (most-recent N)
    pub public_history_limit: usize,

    // Username generation
    pub username_probe_limit: u32,
    pub suggestion_limit: usize,

    // Sensitive auth mutations require a sign-in within this window
    pub reauth_window_secs: u64,
}

impl AppConfig {
    /// Config with test-appropriate defaults (no env vars needed).
    pub fn test_default() -> Self {
        Self {
            users_collection: "users".into(),
            public_collection: "messages".into(),
            private_root: "privateMessages".into(),
            public_history_limit: 100,
            username_probe_limit: 999,
            suggestion_limit: 5,
            reauth_window_secs: 300,
        }
    }

    pub fn from_env() -> Self {
        // Load .env if present; harmless when absent
        dotenvy::dotenv().ok();

        Self {
            users_collection: env::var("DRIFT_USERS_COLLECTION")
                .unwrap_or_else(|_| "users".into()),
            public_collection: env::var("DRIFT_PUBLIC_COLLECTION")
                .unwrap_or_else(|_| "messages".into()),
            private_root: env::var("DRIFT_PRIVATE_ROOT")
                .unwrap_or_else(|_| "privateMessages".into()),

            public_history_limit: env::var("DRIFT_PUBLIC_HISTORY_LIMIT")
                .unwrap_or_else(|_| "100".into())
                .parse()
                .unwrap_or(100),

            username_probe_limit: env::var("DRIFT_USERNAME_PROBE_LIMIT")
                .unwrap_or_else(|_| "999".into())
                .parse()
                .unwrap_or(999),
            suggestion_limit: env::var("DRIFT_SUGGESTION_LIMIT")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .unwrap_or(5),

            reauth_window_secs: env::var("DRIFT_REAUTH_WINDOW_SECS")
                .unwrap_or_else(|_| "300".into())
                .parse()
                .unwrap_or(300),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::test_default()
    }
}
