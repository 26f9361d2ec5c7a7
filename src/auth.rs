//! Basic-auth gate for the mutating routes.
//!
//! # This is a placeholder
//!
//! Credentials are plaintext `user → password` pairs held in memory and
//! compared with `==`. There is no hashing, no rate limiting and no lockout.
//! It is good enough to keep a demo deployment from being edited by
//! passers-by and nothing more. Anything facing real users needs a proper
//! identity provider behind [`AuthGate::authorize`].
//!
//! The bypass mode authorizes every request, including ones with no header
//! at all. It exists for local runs and tests; never enable it on a
//! reachable deployment.

use std::collections::HashMap;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Why a request was refused. Each variant is a distinct, human-readable
/// reason sent back with the `401`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("authorization needed")]
    MissingHeader,

    #[error("authorization header must use the Basic scheme")]
    UnsupportedScheme,

    #[error("error while decoding credentials")]
    Decode,

    #[error("credentials must have the form user:password")]
    Malformed,

    #[error("unknown user")]
    UnknownUser,

    #[error("wrong password")]
    WrongPassword,
}

/// How a request got through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Bypass mode is on; nobody was checked.
    Bypassed,
    /// The named user presented a matching password.
    Granted(String),
}

/// The immutable credential table handed to the [`AuthGate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials(HashMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.0.insert(user.into(), password.into());
        self
    }

    /// The operator accounts available when none are configured.
    pub fn operators() -> Self {
        Self::new().with("masud", "pass").with("admin", "admin")
    }

    fn password(&self, user: &str) -> Option<&str> {
        self.0.get(user).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One `user:password` pair, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialEntry {
    pub user: String,
    pub password: String,
}

impl FromStr for CredentialEntry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((user, password)) if !user.is_empty() => Ok(Self {
                user: user.to_owned(),
                password: password.to_owned(),
            }),
            _ => Err(format!("expected USER:PASSWORD, got `{s}`")),
        }
    }
}

/// Validates `Authorization: Basic …` headers against a [`Credentials`]
/// table.
#[derive(Debug, Clone)]
pub struct AuthGate {
    credentials: Credentials,
    bypass: bool,
}

impl AuthGate {
    pub fn new(credentials: Credentials, bypass: bool) -> Self {
        Self { credentials, bypass }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Checks the raw value of the `Authorization` header, if any.
    pub fn authorize(&self, header: Option<&str>) -> Result<Access, AuthError> {
        if self.bypass {
            return Ok(Access::Bypassed);
        }

        let header = header.ok_or(AuthError::MissingHeader)?;
        let (scheme, encoded) = header.trim().split_once(' ').ok_or(AuthError::UnsupportedScheme)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(AuthError::UnsupportedScheme);
        }

        let decoded = STANDARD.decode(encoded.trim()).map_err(|_| AuthError::Decode)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Decode)?;
        let (user, password) = decoded.split_once(':').ok_or(AuthError::Malformed)?;

        match self.credentials.password(user) {
            None => Err(AuthError::UnknownUser),
            Some(expected) if expected != password => Err(AuthError::WrongPassword),
            Some(_) => Ok(Access::Granted(user.to_owned())),
        }
    }
}
