//! Application identity

use std::fmt;

use serde::{Serialize, Serializer};

use crate::errors::DeployError;

const MAX_LEN: usize = 128;

/// Normalized application identifier.
///
/// Doubles as the image repository and the container name, so it is always
/// lowercase and follows the repository path-component grammar
/// `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*`.
///
/// `-` and `.` both map to `_` in [`AppId::env_key`], so `my-app`, `my.app`
/// and `my_app` read the same per-app configuration. The orchestrator locks
/// on that key so aliases never write to the shared checkout concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(String);

impl AppId {
    /// Normalize a raw identifier, rejecting anything that is not a valid
    /// image tag and container name once lowercased.
    pub fn parse(raw: &str) -> Result<Self, DeployError> {
        let normalized = normalize(raw);

        if normalized.is_empty() {
            return Err(DeployError::InvalidAppId("appId is required".to_string()));
        }
        if normalized.len() > MAX_LEN {
            return Err(DeployError::InvalidAppId(format!(
                "{} is longer than {} characters",
                normalized, MAX_LEN
            )));
        }

        if !is_path_component(&normalized) {
            return Err(DeployError::InvalidAppId(raw.to_string()));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Image reference the lifecycle manager creates containers from
    pub fn image_ref(&self) -> String {
        format!("{}:latest", self.0)
    }

    /// Suffix used for per-app environment variables, e.g. `MY_APP` for `my-app`.
    /// Not injective: ids differing only in `-`, `.` and `_` share a key.
    pub fn env_key(&self) -> String {
        self.0
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }
}

/// Whether `name` matches `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*`
fn is_path_component(name: &str) -> bool {
    let mut separator = String::new();
    let mut last_alnum = false;

    for c in name.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if !separator.is_empty() && !is_separator(&separator) {
                return false;
            }
            separator.clear();
            last_alnum = true;
        } else if matches!(c, '.' | '_' | '-') {
            if !last_alnum && separator.is_empty() {
                return false;
            }
            separator.push(c);
            last_alnum = false;
        } else {
            return false;
        }
    }

    last_alnum
}

fn is_separator(sep: &str) -> bool {
    matches!(sep, "." | "_" | "__") || sep.chars().all(|c| c == '-')
}

/// Canonical form of a raw identifier: trimmed and lowercased
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AppId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for AppId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}
