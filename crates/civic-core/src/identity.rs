//! Identity of the citizen using the application.
//!
//! Identity is an explicit dependency handed to dialogue sessions and
//! document stores; there is no process-wide "current user".

use serde::{Deserialize, Serialize};

/// An authenticated citizen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: Option<String>,
    /// Bearer token for the document store, when signed in with a provider.
    #[serde(default, skip_serializing)]
    pub id_token: Option<String>,
}

/// Source of the current identity.
///
/// `None` means a guest: proposals are written without an owner and the
/// author falls back to "Anonymous".
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;

    /// Display name to credit when the interview did not yield one.
    fn author_fallback(&self) -> String {
        self.current()
            .and_then(|identity| identity.display_name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string())
    }
}

pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// Guest identity provider, always signed out.
///
/// # Example
///
/// ```
/// use civic_core::identity::{GuestIdentity, IdentityProvider};
///
/// let provider = GuestIdentity;
/// assert!(provider.current().is_none());
/// assert_eq!(provider.author_fallback(), "Anonymous");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct GuestIdentity;

impl IdentityProvider for GuestIdentity {
    fn current(&self) -> Option<Identity> {
        None
    }
}
