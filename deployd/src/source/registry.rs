//! Per-app configuration from environment variables

use std::collections::HashMap;
use std::path::PathBuf;

use crate::deploy::identity::AppId;
use crate::source::{AppRegistry, AppSource};

pub const REPOSITORY_PATH_PREFIX: &str = "REPOSITORY_PATH_";
pub const REPOSITORY_URL_PREFIX: &str = "REPOSITORY_URL_";
pub const PORTS_PREFIX: &str = "PORTS_";

/// Reads `REPOSITORY_PATH_<APP>`, `REPOSITORY_URL_<APP>` and `PORTS_<APP>`.
///
/// Reads the process environment by default; [`EnvRegistry::from_vars`]
/// pins a fixed set of variables instead.
#[derive(Debug, Clone, Default)]
pub struct EnvRegistry {
    vars: Option<HashMap<String, String>>,
}

impl EnvRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        let value = match &self.vars {
            Some(vars) => vars.get(key).cloned(),
            None => std::env::var(key).ok(),
        };
        value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }
}

impl AppRegistry for EnvRegistry {
    fn resolve(&self, app_id: &AppId) -> Option<AppSource> {
        let key = app_id.env_key();
        let repository_path = self.var(&format!("{}{}", REPOSITORY_PATH_PREFIX, key))?;
        let repository_url = self.var(&format!("{}{}", REPOSITORY_URL_PREFIX, key))?;

        Some(AppSource {
            repository_path: PathBuf::from(repository_path),
            repository_url,
            ports: self.var(&format!("{}{}", PORTS_PREFIX, key)),
        })
    }
}
