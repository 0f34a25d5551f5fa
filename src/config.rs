use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Root of the public file store (uploads and contracts live below it).
    pub public_dir: PathBuf,
    /// Maximum accepted request body for multipart uploads, in bytes.
    pub max_upload_bytes: usize,
    pub db_max_connections: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            public_dir: std::env::var("PUBLIC_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public")),
            max_upload_bytes: std::env::var("MAX_UPLOAD_MB")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("MAX_UPLOAD_MB must be a positive number"))
                .and_then(|mb| {
                    if mb == 0 {
                        anyhow::bail!("MAX_UPLOAD_MB must be greater than zero");
                    }
                    Ok(mb * 1024 * 1024)
                })?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid number"))?,
        };

        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            redacted_url(&config.database_url)
        );
        tracing::debug!("Public directory: {}", config.public_dir.display());
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

/// First 20 characters of the URL, enough to tell hosts apart without the password.
fn redacted_url(url: &str) -> String {
    url.chars().take(20).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_url_truncates_on_char_boundaries() {
        assert_eq!(
            redacted_url("postgres://user:abcéfg@db/app"),
            "postgres://user:abcé"
        );
        assert_eq!(redacted_url("postgres://db"), "postgres://db");
    }
}
