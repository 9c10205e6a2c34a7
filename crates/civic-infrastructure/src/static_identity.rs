//! Identity provider backed by fixed values.

use civic_core::identity::{Identity, IdentityProvider};

pub const ENV_USER_ID: &str = "CIVIC_USER_ID";
pub const ENV_DISPLAY_NAME: &str = "CIVIC_DISPLAY_NAME";
pub const ENV_ID_TOKEN: &str = "FIRESTORE_ID_TOKEN";

/// Serves one identity for the lifetime of the process, or none (guest).
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    identity: Option<Identity>,
}

impl StaticIdentity {
    pub fn new(identity: Option<Identity>) -> Self {
        Self { identity }
    }

    /// Reads `CIVIC_USER_ID`, `CIVIC_DISPLAY_NAME` and `FIRESTORE_ID_TOKEN`.
    /// Without a user id the provider is a guest.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let identity = var(ENV_USER_ID).map(|user_id| Identity {
            user_id,
            display_name: var(ENV_DISPLAY_NAME),
            id_token: var(ENV_ID_TOKEN),
        });
        Self { identity }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Option<Identity> {
        self.identity.clone()
    }
}
