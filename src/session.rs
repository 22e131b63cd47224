//! Route gating over the session lifecycle.
//!
//! The gate is a pure function of the latest [`SessionState`] snapshot: no
//! I/O, no awaiting. Unverified password accounts are treated the same as
//! signed-out users; federated accounts pass because their provider vouches
//! for the email address.

use tokio::sync::watch;

use crate::auth_provider::{SessionState, GOOGLE_PROVIDER};
use crate::models::AuthSession;

/// Verdict for a protected route.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteAccess {
    /// Session state not yet known; hold rendering rather than redirecting.
    Pending,
    /// Signed in and verified (or federated).
    Allow(AuthSession),
    /// Signed out or unverified; send the user to the login screen.
    RedirectToLogin,
}

/// Evaluate one session snapshot.
pub fn gate(state: &SessionState) -> RouteAccess {
    match state {
        SessionState::Unknown => RouteAccess::Pending,
        SessionState::Anonymous => RouteAccess::RedirectToLogin,
        SessionState::Authenticated(session) => {
            if session.email_verified || session.has_provider(GOOGLE_PROVIDER) {
                RouteAccess::Allow(session.clone())
            } else {
                RouteAccess::RedirectToLogin
            }
        }
    }
}

/// A gate bound to a live session feed. Cheap to clone the receiver side;
/// evaluation always uses the latest snapshot.
pub struct SessionGate {
    rx: watch::Receiver<SessionState>,
}

impl SessionGate {
    pub fn new(rx: watch::Receiver<SessionState>) -> Self {
        Self { rx }
    }

    /// Current verdict, no await.
    pub fn check(&self) -> RouteAccess {
        gate(&self.rx.borrow())
    }

    /// Wait until the session state is known, then return the verdict.
    /// Never returns [`RouteAccess::Pending`].
    pub async fn resolved(&mut self) -> RouteAccess {
        loop {
            // Drop the watch borrow before awaiting
            let verdict = gate(&self.rx.borrow_and_update());
            match verdict {
                RouteAccess::Pending => {
                    if self.rx.changed().await.is_err() {
                        // Provider gone; fail closed
                        return RouteAccess::RedirectToLogin;
                    }
                }
                verdict => return verdict,
            }
        }
    }
}
