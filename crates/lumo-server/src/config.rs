use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub public_url: String,
    pub jwt_secret: String,
    pub upload_concurrency: usize,
    pub max_file_bytes: u64,
    pub intake_redirect: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("LUMO_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("LUMO_JWT_SECRET is unset or still a placeholder");
        }

        Ok(Self {
            host: or("LUMO_HOST", "0.0.0.0"),
            port: or("LUMO_PORT", "3000")
                .parse()
                .context("LUMO_PORT must be a port number")?,
            db_path: or("LUMO_DB_PATH", "lumo.db").into(),
            storage_dir: or("LUMO_STORAGE_DIR", "./blob-storage").into(),
            public_url: or("LUMO_PUBLIC_URL", "http://localhost:3000"),
            jwt_secret,
            upload_concurrency: or("LUMO_UPLOAD_CONCURRENCY", "4")
                .parse()
                .context("LUMO_UPLOAD_CONCURRENCY must be a positive integer")?,
            max_file_bytes: or("LUMO_MAX_FILE_BYTES", "104857600")
                .parse()
                .context("LUMO_MAX_FILE_BYTES must be a byte count")?,
            intake_redirect: or("LUMO_INTAKE_REDIRECT", "/"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("LUMO_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.upload_concurrency, 4);
        assert_eq!(config.max_file_bytes, 100 * 1024 * 1024);
        assert_eq!(config.intake_redirect, "/");
        assert_eq!(config.db_path, PathBuf::from("lumo.db"));
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(load(&[]).is_err());
        assert!(load(&[("LUMO_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_numbers_are_errors() {
        let err = load(&[("LUMO_JWT_SECRET", "s3cret"), ("LUMO_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("LUMO_PORT"));
    }
}
