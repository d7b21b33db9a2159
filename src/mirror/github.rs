//! Mirror into a GitHub repository using the [contents API].
//!
//! Existing files are updated, missing ones are created.
//!
//! [contents API]: https://docs.github.com/en/rest/repos/contents

use std::path::Path;
use std::sync::LazyLock;

use base64::prelude::*;
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::{read_snapshot, MirrorError, MirrorSink};

/// Name of the sink in the status table.
pub const NAME: &str = "git";

const DEFAULT_API_URL: &str = "https://api.github.com";

static REPO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://github\.com/)?([\w.-]+)/([\w.-]+?)(?:\.git)?/?$")
        .expect("repository url regex should be valid")
});

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
/// Configuration of the [GitHubSink].
pub struct GitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `https://github.com/<owner>/<repo>[.git]` or `<owner>/<repo>`.
    #[serde(default)]
    pub repo_url: String,
    /// Personal access token with write access to the repository contents.
    #[serde(default)]
    pub token: String,
    /// Target branch, the repository's default branch if unset.
    #[serde(default)]
    pub branch: Option<String>,
    /// API endpoint, for GitHub Enterprise installations.
    #[serde(default)]
    pub api_url: Option<String>,
}

/// Commits snapshots into a GitHub repository.
#[derive(Debug)]
pub struct GitHubSink {
    client: Client,
    api_url: String,
    owner: String,
    repo: String,
    token: String,
    branch: Option<String>,
}

/// Splits a repository URL into owner and repository name.
fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let captures = REPO_URL.captures(url.trim())?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

impl GitHubSink {
    pub fn new(config: &GitConfig) -> Result<Self, MirrorError> {
        if config.repo_url.is_empty() || config.token.is_empty() {
            return Err(MirrorError::Settings(
                "Git settings incomplete".to_string(),
            ));
        }
        let (owner, repo) = parse_repo_url(&config.repo_url).ok_or_else(|| {
            MirrorError::Settings(format!("Unsupported repository url: {}", config.repo_url))
        })?;

        Ok(Self {
            client: Client::new(),
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            owner,
            repo,
            token: config.token.clone(),
            branch: config.branch.clone(),
        })
    }

    fn contents_url(&self, relative_path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{relative_path}",
            self.api_url.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, concat!("cx_backup/", env!("CARGO_PKG_VERSION")))
    }

    /// Blob sha of the file if it already exists.
    fn existing_sha(&self, url: &str) -> Result<Option<String>, MirrorError> {
        let mut request = self.client.get(url);
        if let Some(branch) = &self.branch {
            request = request.query(&[("ref", branch)]);
        }
        let response = self.authorized(request).send()?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: Value = response.json()?;
                Ok(body.get("sha").and_then(Value::as_str).map(str::to_string))
            }
            _ => Err(MirrorError::rejected(response)),
        }
    }
}

impl MirrorSink for GitHubSink {
    fn name(&self) -> &str {
        NAME
    }

    fn upload(&self, file: &Path, relative_path: &str) -> Result<(), MirrorError> {
        let content = read_snapshot(file)?;
        let url = self.contents_url(relative_path);
        let sha = self.existing_sha(&url)?;

        let message = match sha {
            Some(_) => format!("Update {relative_path}"),
            None => format!("Add {relative_path}"),
        };
        let mut body = json!({
            "message": message,
            "content": BASE64_STANDARD.encode(content),
        });
        if let Some(sha) = sha {
            body["sha"] = Value::String(sha);
        }
        if let Some(branch) = &self.branch {
            body["branch"] = Value::String(branch.clone());
        }

        let response = self.authorized(self.client.put(&url)).json(&body).send()?;
        if !response.status().is_success() {
            return Err(MirrorError::rejected(response));
        }
        log::debug!(target: "mirror::git", "{message} in {}/{}", self.owner, self.repo);

        Ok(())
    }
}
