use std::sync::Arc;

use tracing::{debug, info, warn};

use super::credential::Credential;
use super::session::SessionStore;
use crate::navigation::Navigator;

/// Ends a lost session: wipes the store and sends the user to login.
///
/// Safe to call any number of times. The store wipe is idempotent and the
/// redirect is skipped while already on the login surface.
#[derive(Clone)]
pub struct SessionTerminator {
    session: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
}

impl SessionTerminator {
    pub fn new(session: Arc<SessionStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self { session, navigator }
    }

    pub fn terminate(&self) {
        if let Err(e) = self.session.expire() {
            warn!(error = %e, "Session cleared in memory only");
        }
        self.redirect();
    }

    /// Terminate only the session that holds `refresh`. A session that was
    /// logged out or replaced since is left alone. Returns whether the
    /// session was terminated.
    pub fn terminate_if_current(&self, refresh: &Credential) -> bool {
        let terminated = match self.session.expire_if(refresh) {
            Ok(terminated) => terminated,
            Err(e) => {
                warn!(error = %e, "Session cleared in memory only");
                true
            }
        };

        if terminated {
            self.redirect();
        } else {
            debug!("Session changed since renewal started, not terminating");
        }
        terminated
    }

    fn redirect(&self) {
        if self.navigator.current_path_is_login() {
            debug!("Session terminated while already on login");
        } else {
            info!("Session terminated, redirecting to login");
            self.navigator.redirect_to_login();
        }
    }
}
