use std::sync::Arc;

use thiserror::Error;

use crate::{
    config::ValidationError,
    core::{
        api::ApiSpec,
        router::{RouteError, Router},
    },
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("Invalid API specification: {0}")]
    InvalidSpec(#[from] ValidationError),

    #[error("API '{name}' has an invalid upstream '{target}': {reason}")]
    InvalidUpstream {
        name: String,
        target: String,
        reason: String,
    },

    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Owns the live proxy routes and their attachment to a [`Router`].
pub trait RouteRegistry: Send + Sync + 'static {
    /// Rebase the registry onto `router`; later materializations land there.
    fn bind_to(&self, router: Arc<Router>);

    /// The router currently bound.
    fn router(&self) -> Arc<Router>;

    /// Replace every route binding on the bound router with `specs`.
    /// Safe to call repeatedly. On error the bound router is untouched.
    /// Returns the number of routes installed.
    fn materialize(&self, specs: &[ApiSpec]) -> Result<usize, RegistryError>;
}
