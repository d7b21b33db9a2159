//! Downloads the running configuration of a single switch.
//!
//! Every fetch starts with a reachability probe. A failed probe ends the fetch
//! right away and doesn't use up any retry. After that each attempt runs
//! `login -> running-config -> logout` on a fresh session. Logout is tried once
//! per attempt no matter how the attempt went, and its failure is only logged.

use std::thread;
use std::time::Duration;

use derive_more::{Display, Error};

use crate::credentials::Credentials;
use crate::error::{BackupError, ErrorKind};

pub mod http;

pub use http::{HttpSettings, HttpTransport};

/// Network level failure of a single request.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
#[display("{_0}")]
pub struct TransportError(#[error(ignore)] pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self(err.to_string())
    }
}

/// Opens sessions to switches.
pub trait DeviceTransport: Send + Sync {
    /// Lightweight check whether the switch answers at all.
    fn probe(&self, address: &str) -> Result<(), TransportError>;

    /// Starts a new session without any cached login state.
    fn open_session(&self, address: &str) -> Result<Box<dyn DeviceSession>, TransportError>;
}

/// A session with one switch's REST API.
pub trait DeviceSession {
    fn login(&mut self, credentials: &Credentials) -> Result<(), TransportError>;

    /// Returns the running configuration as plain text.
    fn running_config(&mut self) -> Result<String, TransportError>;

    fn logout(&mut self) -> Result<(), TransportError>;
}

#[derive(Debug, Display, Error, PartialEq, Eq)]
/// Errors on fetching a switch configuration.
pub enum FetchError {
    /// The reachability probe failed.
    #[display("{address} is unreachable: {detail}")]
    Unreachable { address: String, detail: String },
    /// Every attempt to log in and download the configuration failed.
    #[display("fetching the configuration of {address} failed after {attempts} attempt(s): {detail}")]
    Exhausted {
        address: String,
        attempts: u32,
        detail: String,
    },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable { .. } => ErrorKind::DeviceUnreachable,
            Self::Exhausted { .. } => ErrorKind::DeviceAuthOrFetchFailed,
        }
    }
}

impl From<FetchError> for BackupError {
    fn from(err: FetchError) -> Self {
        BackupError::new(err.kind(), err.to_string())
    }
}

/// How often and how patiently a fetch is retried.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of login/fetch attempts, at least one is always made.
    pub max_retries: u32,
    /// Pause between two attempts.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Fetches running configurations with bounded retries.
pub struct ConfigFetcher {
    transport: Box<dyn DeviceTransport>,
    policy: RetryPolicy,
}

impl ConfigFetcher {
    pub fn new(transport: impl DeviceTransport + 'static, policy: RetryPolicy) -> Self {
        Self {
            transport: Box::new(transport),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Returns the running configuration of the switch at `address`.
    ///
    /// Stops at the first successful attempt.
    pub fn fetch(&self, address: &str, credentials: &Credentials) -> Result<String, FetchError> {
        if let Err(e) = self.transport.probe(address) {
            log::error!(target: "device", "Connectivity test to {address} failed: {e}");
            return Err(FetchError::Unreachable {
                address: address.to_string(),
                detail: e.to_string(),
            });
        }
        log::debug!(target: "device", "Connectivity test to {address} succeeded");

        let attempts = self.policy.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(address, credentials) {
                Ok(config) => {
                    log::info!(target: "device", "Retrieved config from {address}");
                    return Ok(config);
                }
                Err(e) if attempt < attempts => {
                    log::warn!(target: "device", "Attempt {attempt} failed for {address}: {e}. Retrying...");
                    thread::sleep(self.policy.retry_delay);
                    attempt += 1;
                }
                Err(e) => {
                    log::error!(target: "device", "Failed to get config from {address} after {attempts} attempt(s): {e}");
                    return Err(FetchError::Exhausted {
                        address: address.to_string(),
                        attempts,
                        detail: e.to_string(),
                    });
                }
            }
        }
    }

    fn attempt(&self, address: &str, credentials: &Credentials) -> Result<String, TransportError> {
        let mut session = self.transport.open_session(address)?;

        let result = session
            .login(credentials)
            .and_then(|()| session.running_config());

        match session.logout() {
            Ok(()) => log::debug!(target: "device", "Logged out from {address}"),
            Err(e) => log::error!(target: "device", "Failed to logout from {address}: {e}"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        Probe,
        Login,
        Fetch,
        Logout,
    }

    /// Transport whose fetch results are scripted per attempt.
    #[derive(Clone, Default)]
    struct Scripted {
        reachable: bool,
        fetches: Arc<Mutex<VecDeque<Result<String, TransportError>>>>,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl Scripted {
        fn new(fetches: Vec<Result<String, TransportError>>) -> Self {
            Self {
                reachable: true,
                fetches: Arc::new(Mutex::new(fetches.into())),
                calls: Default::default(),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct ScriptedSession(Scripted);

    impl DeviceTransport for Scripted {
        fn probe(&self, _address: &str) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(Call::Probe);
            if self.reachable {
                Ok(())
            } else {
                Err(TransportError::new("connection refused"))
            }
        }

        fn open_session(&self, _address: &str) -> Result<Box<dyn DeviceSession>, TransportError> {
            Ok(Box::new(ScriptedSession(self.clone())))
        }
    }

    impl DeviceSession for ScriptedSession {
        fn login(&mut self, _credentials: &Credentials) -> Result<(), TransportError> {
            self.0.calls.lock().unwrap().push(Call::Login);
            Ok(())
        }

        fn running_config(&mut self) -> Result<String, TransportError> {
            self.0.calls.lock().unwrap().push(Call::Fetch);
            self.0
                .fetches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new("no more scripted responses")))
        }

        fn logout(&mut self) -> Result<(), TransportError> {
            self.0.calls.lock().unwrap().push(Call::Logout);
            Err(TransportError::new("logout is best effort"))
        }
    }

    fn fetcher(transport: Scripted) -> ConfigFetcher {
        let policy = RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::ZERO,
        };
        ConfigFetcher::new(transport, policy)
    }

    fn creds() -> Credentials {
        Credentials::new("admin", "admin")
    }

    #[test]
    fn first_success_stops_retrying() {
        let transport = Scripted::new(vec![Ok("hostname sw1\n".into())]);
        let config = fetcher(transport.clone()).fetch("10.0.0.1", &creds()).unwrap();

        assert_eq!(config, "hostname sw1\n");
        assert_eq!(
            transport.calls(),
            [Call::Probe, Call::Login, Call::Fetch, Call::Logout]
        );
    }

    #[test]
    fn transient_failure_is_retried_and_logout_runs_every_attempt() {
        let transport = Scripted::new(vec![
            Err(TransportError::new("timeout")),
            Ok("hostname sw1\n".into()),
        ]);
        let config = fetcher(transport.clone()).fetch("10.0.0.1", &creds()).unwrap();

        assert_eq!(config, "hostname sw1\n");
        let logouts = transport.calls().iter().filter(|c| **c == Call::Logout).count();
        assert_eq!(logouts, 2);
    }

    #[test]
    fn exhausted_retries_report_attempt_count() {
        let transport = Scripted::new(vec![]);
        let err = fetcher(transport.clone())
            .fetch("10.0.0.1", &creds())
            .unwrap_err();

        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.kind(), ErrorKind::DeviceAuthOrFetchFailed);
        let fetches = transport.calls().iter().filter(|c| **c == Call::Fetch).count();
        assert_eq!(fetches, 3);
    }

    #[test]
    fn failed_probe_is_terminal() {
        let transport = Scripted {
            reachable: false,
            ..Scripted::new(vec![Ok("never fetched".into())])
        };
        let err = fetcher(transport.clone())
            .fetch("10.0.0.1", &creds())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DeviceUnreachable);
        assert_eq!(transport.calls(), [Call::Probe]);
    }
}
