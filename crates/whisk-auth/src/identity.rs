//! Sources of the currently logged-in identity.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::Identity;

/// Exposes the identity the hosting application considers authenticated.
pub trait IdentitySource: Send + Sync {
    /// The current identity, or `None` when nobody is logged in.
    fn current_identity(&self) -> Option<Identity>;
}

/// An identity fixed at construction.
#[derive(Clone, Debug)]
pub struct StaticIdentity(Option<Identity>);

impl StaticIdentity {
    /// Always report `identity`.
    pub fn new(identity: impl Into<Identity>) -> Self {
        Self(Some(identity.into()))
    }

    /// Always report that nobody is logged in.
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentitySource for StaticIdentity {
    fn current_identity(&self) -> Option<Identity> {
        self.0.clone()
    }
}

/// An identity the application can swap on login/logout.
#[derive(Clone, Debug, Default)]
pub struct SharedIdentity(Arc<RwLock<Option<Identity>>>);

impl SharedIdentity {
    /// Start with nobody logged in.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current identity.
    pub fn set(&self, identity: Option<Identity>) {
        *self.0.write() = identity;
    }
}

impl IdentitySource for SharedIdentity {
    fn current_identity(&self) -> Option<Identity> {
        self.0.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_identity() {
        assert_eq!(
            StaticIdentity::new("U1").current_identity(),
            Some(Identity::from("U1"))
        );
        assert_eq!(StaticIdentity::anonymous().current_identity(), None);
    }

    #[test]
    fn shared_identity_follows_updates() {
        let shared = SharedIdentity::new();
        let view = shared.clone();
        assert_eq!(view.current_identity(), None);
        shared.set(Some(Identity::from("U9")));
        assert_eq!(view.current_identity(), Some(Identity::from("U9")));
        shared.set(None);
        assert_eq!(view.current_identity(), None);
    }
}
