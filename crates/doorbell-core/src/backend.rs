//! Startup-time selection between a primary and a fallback inference backend.
//!
//! Resolved once when the daemon starts; calls never re-probe. An
//! `Unavailable` backend keeps the pipeline running in degraded mode.

use std::fmt::Display;

/// An inference capability resolved to one of its interchangeable variants.
pub enum Backend<T> {
    Primary(T),
    Fallback(T),
    Unavailable,
}

impl<T> Backend<T> {
    /// Try `primary`, then `fallback`. Load errors are logged, never returned.
    pub fn resolve<E, P, F>(what: &str, primary: P, fallback: F) -> Self
    where
        E: Display,
        P: FnOnce() -> Result<T, E>,
        F: FnOnce() -> Result<T, E>,
    {
        match primary() {
            Ok(b) => {
                tracing::info!(backend = what, "using primary backend");
                return Backend::Primary(b);
            }
            Err(e) => {
                tracing::warn!(backend = what, error = %e, "primary backend unavailable; trying fallback");
            }
        }

        match fallback() {
            Ok(b) => {
                tracing::info!(backend = what, "using fallback backend");
                Backend::Fallback(b)
            }
            Err(e) => {
                tracing::warn!(
                    backend = what,
                    error = %e,
                    "fallback backend unavailable; running degraded"
                );
                Backend::Unavailable
            }
        }
    }

    /// Try a single backend; failure means `Unavailable`.
    pub fn single<E: Display>(what: &str, load: impl FnOnce() -> Result<T, E>) -> Self {
        match load() {
            Ok(b) => {
                tracing::info!(backend = what, "backend loaded");
                Backend::Primary(b)
            }
            Err(e) => {
                tracing::warn!(backend = what, error = %e, "backend unavailable; running degraded");
                Backend::Unavailable
            }
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Backend::Primary(b) | Backend::Fallback(b) => Some(b),
            Backend::Unavailable => None,
        }
    }

    /// Short label for status reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Primary(_) => "primary",
            Backend::Fallback(_) => "fallback",
            Backend::Unavailable => "unavailable",
        }
    }
}
