//! Shared handler state.

use crate::auth::AuthService;

/// State injected into every auth handler through an `Extension`.
#[derive(Clone)]
pub struct AppState {
    auth: AuthService,
    expose_errors: bool,
}

impl AppState {
    #[must_use]
    pub fn new(auth: AuthService) -> Self {
        Self {
            auth,
            expose_errors: false,
        }
    }

    /// Include the internal error chain in 5xx response bodies (development only).
    #[must_use]
    pub fn with_expose_errors(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }

    #[must_use]
    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    #[must_use]
    pub fn expose_errors(&self) -> bool {
        self.expose_errors
    }
}
