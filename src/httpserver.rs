use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const KIND: &str = "HTTPServer";

const HTTP_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "CONNECT", "OPTIONS", "TRACE",
];
const MIN_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration carried by routables of kind `HTTPServer`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Spec {
    pub port: u16,
    pub keep_alive: bool,
    pub keep_alive_timeout: String,
    pub max_connections: u32,
    pub https: bool,
    pub cert_base64: String,
    pub key_base64: String,
    pub cache_size: u32,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    pub host: String,
    pub host_regexp: String,
    pub paths: Vec<Path>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Path {
    pub path: String,
    pub path_prefix: String,
    pub path_regexp: String,
    pub methods: Vec<String>,
    pub backend: String,
}

impl Spec {
    pub fn from_config(config: &serde_json::Value) -> Result<Spec> {
        serde_json::from_value(config.clone()).context("decode http server spec")
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.port >= 1, "port must be at least 1");
        ensure!(self.max_connections >= 1, "maxConnections must be at least 1");

        if !self.keep_alive_timeout.is_empty() {
            let timeout = humantime::parse_duration(&self.keep_alive_timeout)
                .with_context(|| format!("invalid keepAliveTimeout {}", self.keep_alive_timeout))?;
            ensure!(
                timeout >= MIN_KEEP_ALIVE_TIMEOUT,
                "keepAliveTimeout {} is less than 1s",
                self.keep_alive_timeout
            );
        }

        if self.https {
            ensure!(!self.cert_base64.is_empty(), "cert is empty when https enabled");
            ensure!(!self.key_base64.is_empty(), "key is empty when https enabled");
        }

        let tls = [("certBase64", &self.cert_base64), ("keyBase64", &self.key_base64)];
        for (field, value) in tls {
            if !value.is_empty() {
                STANDARD
                    .decode(value)
                    .with_context(|| format!("{field} is not valid base64"))?;
            }
        }

        for rule in self.rules.iter() {
            rule.validate()?;
        }

        Ok(())
    }
}

impl Rule {
    fn validate(&self) -> Result<()> {
        if !self.host_regexp.is_empty() {
            Regex::new(&self.host_regexp)
                .with_context(|| format!("invalid hostRegexp {}", self.host_regexp))?;
        }

        for path in self.paths.iter() {
            path.validate()?;
        }

        Ok(())
    }
}

impl Path {
    fn validate(&self) -> Result<()> {
        for (field, value) in [("path", &self.path), ("pathPrefix", &self.path_prefix)] {
            if !value.is_empty() && !value.starts_with('/') {
                bail!("{field} {value} does not start with /");
            }
        }

        if !self.path_regexp.is_empty() {
            Regex::new(&self.path_regexp)
                .with_context(|| format!("invalid pathRegexp {}", self.path_regexp))?;
        }

        let mut seen = HashSet::new();
        for method in self.methods.iter() {
            ensure!(HTTP_METHODS.contains(&method.as_str()), "unknown http method {method}");
            ensure!(seen.insert(method), "repeated http method {method}");
        }

        ensure!(!self.backend.is_empty(), "backend is required");

        Ok(())
    }
}

/// Validator registered for the `HTTPServer` kind.
pub fn validate_config(config: &serde_json::Value) -> Result<()> {
    Spec::from_config(config)?.validate()
}
