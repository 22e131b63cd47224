// Shared harness for integration tests: an in-memory backend, an in-memory
// auth provider, and a ChatClient wired over both. Several clients can share
// one backend to simulate multiple devices.

use std::sync::Arc;

use driftchat_core::auth_provider::MemoryAuthProvider;
use driftchat_core::config::AppConfig;
use driftchat_core::models::{SignupForm, UserProfile};
use driftchat_core::store::memory::MemoryBackend;
use driftchat_core::ChatClient;

pub const PASSWORD: &str = "hunter22!";

static TRACING: std::sync::Once = std::sync::Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .init();
    });
}

pub struct TestApp {
    pub store: Arc<MemoryBackend>,
    pub auth: Arc<MemoryAuthProvider>,
    pub client: ChatClient,
}

impl TestApp {
    /// Fresh backend, fresh auth provider, one client.
    pub fn spawn() -> Self {
        Self::on_store(Arc::new(MemoryBackend::new()))
    }

    /// A client with its own auth provider over a shared backend.
    pub fn on_store(store: Arc<MemoryBackend>) -> Self {
        init_tracing();
        let config = AppConfig::test_default();
        let auth = Arc::new(MemoryAuthProvider::new(&config));
        let client = ChatClient::new(store.clone(), auth.clone(), config);
        Self {
            store,
            auth,
            client,
        }
    }

    /// Full onboarding: signup, out-of-band email verification, login.
    pub async fn register(&self, display_name: &str, username: &str, email: &str) -> UserProfile {
        self.client
            .signup(&form(display_name, username, email))
            .await
            .unwrap_or_else(|e| panic!("signup for {username} failed: {e}"));
        self.auth.complete_verification(email);
        self.client
            .login(email, PASSWORD)
            .await
            .unwrap_or_else(|e| panic!("login for {username} failed: {e}"))
    }
}

pub fn form(display_name: &str, username: &str, email: &str) -> SignupForm {
    SignupForm {
        email: email.into(),
        password: PASSWORD.into(),
        display_name: display_name.into(),
        username: username.into(),
    }
}
