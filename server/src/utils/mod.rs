//! Small helpers shared by the configuration and management layers.
//!
//! [`env`] gives validated access to environment variables, used as the
//! fallback source for Azure AD secrets that should not live in
//! `config.toml`.

pub mod env;

pub use env::{EnvUtils, EnvVarError};
