//! Login credentials for the switch REST API.

use std::fmt;
use std::sync::Arc;

use crate::secret::SecretBox;

/// Username and password used to log into a switch.
#[derive(Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of the default credentials used for inventory rows without their own.
///
/// How the credentials are stored (and possibly encrypted at rest) is up to the
/// implementation. The orchestrator asks once at the start of every pass.
pub trait CredentialStore: Send + Sync {
    fn default_credentials(&self) -> Credentials;
}

impl CredentialStore for Credentials {
    fn default_credentials(&self) -> Credentials {
        self.clone()
    }
}

/// Default credentials whose password stays sealed until a pass asks for it.
#[derive(Clone)]
pub struct SealedCredentials {
    username: String,
    password: String,
    secrets: Arc<SecretBox>,
}

impl SealedCredentials {
    /// `password` may be sealed by `secrets` or plain.
    pub fn new(username: impl Into<String>, password: impl Into<String>, secrets: Arc<SecretBox>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            secrets,
        }
    }
}

impl fmt::Debug for SealedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl CredentialStore for SealedCredentials {
    fn default_credentials(&self) -> Credentials {
        match self.secrets.open(&self.password) {
            Ok(password) => Credentials::new(self.username.clone(), password),
            Err(e) => {
                log::error!(target: "credentials", "Default password unusable: {e}");
                Credentials::new(self.username.clone(), String::new())
            }
        }
    }
}
