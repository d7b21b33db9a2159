//! AOS-CX REST API over HTTPS.
//!
//! <div class="warning">
//! With `accept_invalid_certs` set (the default) certificate validation is
//! disabled, because switches usually ship self-signed certificates. This
//! exposes the login credentials to anyone able to intercept the connection.
//! </div>

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;

use super::{DeviceSession, DeviceTransport, TransportError};
use crate::credentials::Credentials;

const USER_AGENT: &str = concat!("cx_backup/", env!("CARGO_PKG_VERSION"));

/// Connection settings of the [HttpTransport].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpSettings {
    /// REST API version segment, e.g. `v10.04`.
    pub api_version: String,
    /// Timeout of every login, fetch and logout request.
    pub timeout: Duration,
    /// Timeout of the reachability probe.
    pub probe_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            api_version: "v10.04".to_string(),
            timeout: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(5),
            accept_invalid_certs: true,
        }
    }
}

/// [DeviceTransport] talking HTTPS to the switches.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    settings: HttpSettings,
    probe_client: Client,
}

impl HttpTransport {
    pub fn new(settings: HttpSettings) -> Result<Self, TransportError> {
        if settings.accept_invalid_certs {
            log::warn!(target: "device", "TLS certificate validation of switches is disabled");
        }
        let probe_client = build_client(&settings, settings.probe_timeout, false)?;

        Ok(Self {
            settings,
            probe_client,
        })
    }
}

fn build_client(
    settings: &HttpSettings,
    timeout: Duration,
    cookies: bool,
) -> Result<Client, TransportError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .danger_accept_invalid_certs(settings.accept_invalid_certs)
        .cookie_store(cookies)
        .build()?;
    Ok(client)
}

/// Host part of an URL, IPv6 addresses need brackets.
fn host(address: &str) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]")
    } else {
        address.to_string()
    }
}

impl DeviceTransport for HttpTransport {
    fn probe(&self, address: &str) -> Result<(), TransportError> {
        // any HTTP answer counts, the status code is irrelevant
        let response = self
            .probe_client
            .get(format!("https://{}", host(address)))
            .send()?;
        log::info!(target: "device", "Connectivity test to {address}: {}", response.status());
        Ok(())
    }

    fn open_session(&self, address: &str) -> Result<Box<dyn DeviceSession>, TransportError> {
        let client = build_client(&self.settings, self.settings.timeout, true)?;
        let base_url = format!(
            "https://{}/rest/{}",
            host(address),
            self.settings.api_version
        );

        Ok(Box::new(HttpSession {
            client,
            base_url,
            address: address.to_string(),
        }))
    }
}

/// Cookie based session with one switch.
struct HttpSession {
    client: Client,
    base_url: String,
    address: String,
}

impl DeviceSession for HttpSession {
    fn login(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        self.client
            .post(format!("{}/login", self.base_url))
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()?
            .error_for_status()?;
        log::info!(target: "device", "Login successful for {}", self.address);
        Ok(())
    }

    fn running_config(&mut self) -> Result<String, TransportError> {
        let config = self
            .client
            .get(format!("{}/configs/running-config", self.base_url))
            .header(ACCEPT, "text/plain")
            .send()?
            .error_for_status()?
            .text()?;
        Ok(config)
    }

    fn logout(&mut self) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}/logout", self.base_url))
            .send()?;
        log::trace!(target: "device", "Logout from {} answered {}", self.address, response.status());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(host("10.0.0.1"), "10.0.0.1");
        assert_eq!(host("fe80::1"), "[fe80::1]");
        assert_eq!(host("[fe80::1]"), "[fe80::1]");
        assert_eq!(host("switch.example.net"), "switch.example.net");
    }
}
