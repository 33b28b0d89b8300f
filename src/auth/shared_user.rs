//! The shared, reference-counted view of a logged-in account.
//!
//! Many live sessions of the same account hold the same [`SharedUser`]. When
//! the backing account is deleted, disabled, or its impersonation changes,
//! the handle is *invalidated*: the name is cleared and subscribers are
//! notified so every session logs the user out. Invalidation is a cooperative
//! signal, never a forced teardown; the notification is delivered before the
//! last reference can go away because the authenticator still holds the
//! handle while it notifies.

use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use crate::net::rate_limit::{Limit, RateLimiter};
use crate::tvfs::{Backend, MountTree};

use super::user::ImpersonationToken;

/// Reference-counted handle to a logged-in user's shared state.
pub type SharedUser = Arc<SharedUserInner>;

/// The shared state itself; obtain it as a [`SharedUser`].
#[derive(Debug)]
pub struct SharedUserInner {
    name: RwLock<Option<String>>,
    mount_tree: RwLock<Arc<MountTree>>,
    backend: RwLock<Option<Arc<dyn Backend>>>,
    limiter: Arc<RateLimiter>,
    extra_limiters: RwLock<Vec<Arc<RateLimiter>>>,
    // The impersonation token is immutable by design: a change replaces the
    // whole shared user.
    token: Option<ImpersonationToken>,
    invalidated: watch::Sender<bool>,
}

impl SharedUserInner {
    /// A fresh shared user.
    pub fn new(
        name: String,
        mount_tree: Arc<MountTree>,
        backend: Option<Arc<dyn Backend>>,
        rate_limit: Limit,
        token: Option<ImpersonationToken>,
    ) -> SharedUser {
        let (invalidated, _) = watch::channel(false);
        Arc::new(SharedUserInner {
            name: RwLock::new(Some(name)),
            mount_tree: RwLock::new(mount_tree),
            backend: RwLock::new(backend),
            limiter: RateLimiter::new(rate_limit),
            extra_limiters: RwLock::new(Vec::new()),
            token,
            invalidated,
        })
    }

    /// The account name; `None` once invalidated.
    pub fn name(&self) -> Option<String> {
        self.name.read().expect("shared user lock").clone()
    }

    /// Tells whether the handle has been invalidated.
    pub fn is_invalidated(&self) -> bool {
        self.name().is_none()
    }

    /// The impersonation token the sessions of this user operate under.
    pub fn token(&self) -> Option<ImpersonationToken> {
        self.token
    }

    /// The current mount tree.
    pub fn mount_tree(&self) -> Arc<MountTree> {
        self.mount_tree.read().expect("shared user lock").clone()
    }

    /// The backend, when the user carries its own (impersonation).
    pub fn backend(&self) -> Option<Arc<dyn Backend>> {
        self.backend.read().expect("shared user lock").clone()
    }

    /// The account's own rate limiter.
    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    /// The group limiters the account inherits.
    pub fn extra_limiters(&self) -> Vec<Arc<RateLimiter>> {
        self.extra_limiters.read().expect("shared user lock").clone()
    }

    /// Subscribes to the invalidation signal. The receiver observes `true`
    /// exactly once, when [`SharedUserInner::invalidate`] runs.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.invalidated.subscribe()
    }

    /// Applies an updated configuration in place: mount tree, rate limits,
    /// group limiters. Running sessions observe the change on their next
    /// operation.
    pub fn update(&self, mount_tree: Arc<MountTree>, rate_limit: Limit, extra_limiters: Vec<Arc<RateLimiter>>) {
        *self.mount_tree.write().expect("shared user lock") = mount_tree;
        self.limiter.set_limit(rate_limit);
        *self.extra_limiters.write().expect("shared user lock") = extra_limiters;
    }

    /// Clears the name and notifies every subscriber. One-way: an
    /// invalidated shared user never becomes valid again.
    pub fn invalidate(&self) {
        *self.name.write().expect("shared user lock") = None;
        let _ = self.invalidated.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make(name: &str) -> SharedUser {
        SharedUserInner::new(name.to_string(), Arc::new(MountTree::new()), None, Limit::Unlimited, None)
    }

    #[tokio::test]
    async fn invalidation_clears_name_and_notifies() {
        let user = make("alice");
        let mut sub = user.subscribe();
        assert_eq!(user.name().as_deref(), Some("alice"));

        user.invalidate();

        sub.changed().await.unwrap();
        assert!(*sub.borrow());
        assert_eq!(user.name(), None);
        assert!(user.is_invalidated());
    }

    #[test]
    fn update_changes_limits_in_place() {
        let user = make("bob");
        user.update(Arc::new(MountTree::new()), Limit::BytesPerSecond(512), vec![RateLimiter::new(Limit::Unlimited)]);
        assert_eq!(user.limiter().limit(), Limit::BytesPerSecond(512));
        assert_eq!(user.extra_limiters().len(), 1);
    }
}
