//! Backend selection module.
//!
//! This module defines the available computation backends for convolution
//! layers and provides functions to set and get the current backend.
//!
//! # Supported Backends
//!
//! - `Cpu`: Pure Rust backend, parallel over output feature maps (default).
//! - `Wgpu`: GPU compute backend using `wgpu` (requires the `wgpu` feature).
//!
//! The backend is stored globally using an `AtomicU8`, enabling fast
//! switching between CPU and GPU modes at runtime.
//!
//! # Configuration
//!
//! [`configure_from_env`] reads `BRINY_CONV_BACKEND` (`cpu` or `wgpu`) so
//! applications can pick the path without recompiling.

use core::convert::TryFrom;
use core::str::FromStr;
use core::sync::atomic::{AtomicU8, Ordering};

/// Environment variable consulted by [`Backend::from_env`].
pub const BACKEND_ENV: &str = "BRINY_CONV_BACKEND";

/// Enumeration of supported computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Backend {
    /// CPU reference path (default).
    #[default]
    Cpu = 0,
    /// GPU path using `wgpu`.
    Wgpu,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Wgpu),
            _ => Err(()),
        }
    }
}

/// Error returned when a backend name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backend `{0}` (expected `cpu` or `wgpu`)")]
pub struct ParseBackendError(pub String);

impl FromStr for Backend {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "wgpu" | "gpu" => Ok(Self::Wgpu),
            other => Err(ParseBackendError(other.to_string())),
        }
    }
}

impl Backend {
    /// Reads the backend from `BRINY_CONV_BACKEND`.
    ///
    /// Returns `None` when the variable is unset or not a known backend; an
    /// unknown value is logged.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let raw = std::env::var(BACKEND_ENV).ok()?;
        match raw.parse() {
            Ok(b) => Some(b),
            Err(e) => {
                tracing::warn!(%e, "ignoring {BACKEND_ENV}");
                None
            }
        }
    }
}

/// Internal global state for the active backend.
///
/// This uses acquire/release ordering; the backend is only expected to
/// change rarely, between forward calls.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the active backend used by [`Layer::forward`](crate::layer::Layer::forward).
///
/// # Example
///
/// ```
/// use briny_conv::backend::{get_backend, set_backend, Backend};
/// set_backend(Backend::Cpu);
/// assert_eq!(get_backend(), Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the currently active computation backend.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}

/// Applies `BRINY_CONV_BACKEND` if it is set, returning the active backend.
pub fn configure_from_env() -> Backend {
    if let Some(b) = Backend::from_env() {
        tracing::debug!(backend = ?b, "backend configured from environment");
        set_backend(b);
    }
    get_backend()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!("cpu".parse::<Backend>(), Ok(Backend::Cpu));
        assert_eq!(" WGPU ".parse::<Backend>(), Ok(Backend::Wgpu));
        assert_eq!("gpu".parse::<Backend>(), Ok(Backend::Wgpu));
        assert!("cuda".parse::<Backend>().is_err());
    }

    #[test]
    fn u8_round_trip() {
        assert_eq!(Backend::try_from(Backend::Wgpu as u8), Ok(Backend::Wgpu));
        assert_eq!(Backend::try_from(7), Err(()));
    }
}
