//! Identities and credentials of virtual users.

use std::fmt;

use rand::Rng;
use rand::rngs::SmallRng;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};

use crate::config::ConfigSecret;
use crate::error::ConfigurationError;

/// HTTP basic auth credentials of a virtual user.
#[derive(Clone, Debug)]
pub struct Credential {
    username: String,
    password: SecretBox<ConfigSecret>,
}

impl Credential {
    /// Creates new credentials.
    pub fn new(username: impl Into<String>, password: SecretBox<ConfigSecret>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// The username used to authenticate.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password used to authenticate.
    pub fn password(&self) -> &str {
        self.password.expose_secret().as_str()
    }
}

/// The identity a virtual user acts as.
#[derive(Clone, Debug)]
pub struct Identity {
    /// Name of the user, also used to build remote paths.
    pub username: String,
    /// Credentials sent with every request.
    pub credential: Credential,
}

/// Assigns identities to newly started virtual users.
pub trait IdentityFactory: Send + Sync + fmt::Debug {
    /// Returns the identity for the virtual user with the given index.
    fn identity(&self, index: usize, rng: &mut SmallRng) -> Identity;
}

/// How identities are picked from an [`IdentitySpace`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Assignment {
    /// Every user draws a random identity. Several users may share one.
    #[default]
    Random,
    /// The user at position `i` of a pool acts as identity `i % size`.
    RoundRobin,
}

/// A fixed space of `size` identities named `{prefix}{index}`, sharing one password.
pub struct IdentitySpace {
    prefix: String,
    size: usize,
    password: SecretBox<ConfigSecret>,
    assignment: Assignment,
}

impl IdentitySpace {
    /// Creates a new identity space.
    ///
    /// Fails if `size` is zero.
    pub fn new(
        prefix: impl Into<String>,
        size: usize,
        password: SecretBox<ConfigSecret>,
        assignment: Assignment,
    ) -> Result<Self, ConfigurationError> {
        if size == 0 {
            return Err(ConfigurationError::EmptyIdentitySpace);
        }

        Ok(Self {
            prefix: prefix.into(),
            size,
            password,
            assignment,
        })
    }

    fn username(&self, index: usize) -> String {
        format!("{}{index}", self.prefix)
    }
}

impl IdentityFactory for IdentitySpace {
    fn identity(&self, index: usize, rng: &mut SmallRng) -> Identity {
        let slot = match self.assignment {
            Assignment::Random => rng.random_range(0..self.size),
            Assignment::RoundRobin => index % self.size,
        };

        let username = self.username(slot);
        Identity {
            credential: Credential::new(username.clone(), self.password.clone()),
            username,
        }
    }
}

impl fmt::Debug for IdentitySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySpace")
            .field("prefix", &self.prefix)
            .field("size", &self.size)
            .field("assignment", &self.assignment)
            .finish_non_exhaustive()
    }
}
