//! Authentication state as plain values plus a `watch` channel.

use tokio::sync::watch;

use crate::history::Identity;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthStatus {
    #[default]
    SignedOut,
    SignedIn(Identity),
}

impl AuthStatus {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthStatus::SignedIn(identity) => Some(identity),
            AuthStatus::SignedOut => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthStatus::SignedIn(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
}

pub fn reduce_auth(_current: &AuthStatus, event: AuthEvent) -> AuthStatus {
    match event {
        AuthEvent::SignedIn(identity) => AuthStatus::SignedIn(identity),
        AuthEvent::SignedOut => AuthStatus::SignedOut,
    }
}

/// How a session must react to moving from one status to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthTransition {
    Unchanged,
    SignedIn,
    /// Carries the identity whose history must be dropped.
    SignedOut(Identity),
    IdentityChanged,
}

pub fn auth_transition(previous: &AuthStatus, current: &AuthStatus) -> AuthTransition {
    match (previous, current) {
        (AuthStatus::SignedIn(before), AuthStatus::SignedIn(after)) if before == after => {
            AuthTransition::Unchanged
        }
        (AuthStatus::SignedIn(_), AuthStatus::SignedIn(_)) => AuthTransition::IdentityChanged,
        (AuthStatus::SignedIn(before), AuthStatus::SignedOut) => {
            AuthTransition::SignedOut(before.clone())
        }
        (AuthStatus::SignedOut, AuthStatus::SignedIn(_)) => AuthTransition::SignedIn,
        (AuthStatus::SignedOut, AuthStatus::SignedOut) => AuthTransition::Unchanged,
    }
}

/// Publishes the current [`AuthStatus`] to every subscriber.
pub struct AuthState {
    tx: watch::Sender<AuthStatus>,
}

impl AuthState {
    pub fn new(initial: AuthStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> AuthStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.tx.subscribe()
    }

    /// Applies `event` and returns the new status. Subscribers are only
    /// woken when the status actually changed.
    pub fn dispatch(&self, event: AuthEvent) -> AuthStatus {
        let mut next = None;
        self.tx.send_if_modified(|status| {
            let reduced = reduce_auth(status, event);
            next = Some(reduced.clone());
            if *status == reduced {
                false
            } else {
                *status = reduced;
                true
            }
        });
        next.unwrap_or_default()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new(AuthStatus::SignedOut)
    }
}
