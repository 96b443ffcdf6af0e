//! Navigation collaborator contract and route guarding.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/";

/// Moves the user interface to the login surface.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self);

    fn current_path_is_login(&self) -> bool;
}

/// How a route may be entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    RequiresAuth,
    /// Login and registration: pointless once signed in
    RequiresGuest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    Redirect(&'static str),
}

pub fn guard(access: RouteAccess, is_authenticated: bool) -> GuardDecision {
    match (access, is_authenticated) {
        (RouteAccess::RequiresAuth, false) => GuardDecision::Redirect(LOGIN_PATH),
        (RouteAccess::RequiresGuest, true) => GuardDecision::Redirect(HOME_PATH),
        _ => GuardDecision::Proceed,
    }
}

/// Path-tracking navigator for hosts without a router of their own.
#[derive(Debug)]
pub struct PathNavigator {
    current: RwLock<String>,
    redirects: AtomicUsize,
}

impl PathNavigator {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(initial.into()),
            redirects: AtomicUsize::new(0),
        }
    }

    pub fn navigate(&self, path: impl Into<String>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = path.into();
    }

    pub fn current_path(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of redirects to login performed so far
    pub fn redirect_count(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl Default for PathNavigator {
    fn default() -> Self {
        Self::new(HOME_PATH)
    }
}

impl Navigator for PathNavigator {
    fn redirect_to_login(&self) {
        debug!(from = %self.current_path(), "Redirecting to login");
        self.redirects.fetch_add(1, Ordering::SeqCst);
        self.navigate(LOGIN_PATH);
    }

    fn current_path_is_login(&self) -> bool {
        self.current_path() == LOGIN_PATH
    }
}
