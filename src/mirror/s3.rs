//! Mirror into an S3 compatible bucket.
//!
//! Objects are written with a path-style `PUT` signed with
//! [AWS Signature Version 4]. Existing objects are overwritten.
//!
//! [AWS Signature Version 4]: https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_sigv-create-signed-request.html

use std::path::Path;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};

use super::{read_snapshot, MirrorError, MirrorSink};

/// Name of the sink in the status table.
pub const NAME: &str = "s3";

const SERVICE: &str = "s3";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
/// Configuration of the [S3Sink].
pub struct StorageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Endpoint URL, `https://s3.<region>.wasabisys.com` if unset.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_key: String::new(),
            secret_key: String::new(),
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Uploads snapshots as objects of a bucket.
#[derive(Debug)]
pub struct S3Sink {
    client: Client,
    endpoint: String,
    host: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl S3Sink {
    pub fn new(config: &StorageConfig) -> Result<Self, MirrorError> {
        if config.access_key.is_empty() || config.secret_key.is_empty() || config.bucket.is_empty()
        {
            return Err(MirrorError::Settings(
                "Storage settings incomplete".to_string(),
            ));
        }

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.wasabisys.com", config.region));
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let host = endpoint
            .split_once("://")
            .map_or(endpoint.as_str(), |(_, host)| host)
            .to_string();
        if host.is_empty() || host.contains('/') {
            return Err(MirrorError::Settings(format!(
                "Unsupported storage endpoint: {endpoint}"
            )));
        }

        Ok(Self {
            client: Client::new(),
            endpoint,
            host,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn object_path(&self, relative_path: &str) -> String {
        format!("/{}/{}", uri_encode(&self.bucket), uri_encode(relative_path))
    }

    /// `Authorization` header value of a `PUT` of `path`.
    fn authorization(&self, path: &str, payload_hash: &str, now: DateTime<Utc>) -> String {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.region);

        let canonical_request = format!(
            "PUT\n{path}\n\nhost:{}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{payload_hash}",
            self.host
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let key = signing_key(&self.secret_key, &date, &self.region, SERVICE);
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            self.access_key
        )
    }
}

impl MirrorSink for S3Sink {
    fn name(&self) -> &str {
        NAME
    }

    fn upload(&self, file: &Path, relative_path: &str) -> Result<(), MirrorError> {
        let content = read_snapshot(file)?;
        let path = self.object_path(relative_path);
        let payload_hash = hex::encode(Sha256::digest(&content));
        let now = Utc::now();

        let response = self
            .client
            .put(format!("{}{path}", self.endpoint))
            .header("x-amz-date", now.format("%Y%m%dT%H%M%SZ").to_string())
            .header("x-amz-content-sha256", &payload_hash)
            .header("authorization", self.authorization(&path, &payload_hash, now))
            .body(content)
            .send()?;
        if !response.status().is_success() {
            return Err(MirrorError::rejected(response));
        }
        log::debug!(target: "mirror::s3", "Uploaded {relative_path} to bucket {}", self.bucket);

        Ok(())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC should accept keys of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// Percent-encodes everything but unreserved characters and `/`.
fn uri_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
