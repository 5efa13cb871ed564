use std::env;
use std::path::PathBuf;

use crate::error::RedArchiveError;
use crate::politeness::Politeness;

pub const DEFAULT_ROOT_DIR_NAME: &str = "reddit-posts";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
/// Seconds between outbound requests, `(min, max)`.
pub const DEFAULT_REQUEST_DELAY_SECS: (u64, u64) = (1, 3);
/// Seconds between listing pages, `(min, max)`.
pub const DEFAULT_PAGE_DELAY_SECS: (u64, u64) = (3, 5);

/// Which relational backend to talk to, parsed from a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbEngine {
    Postgres { url: String },
    Sqlite { url: String },
}

impl DbEngine {
    pub fn parse(url: &str) -> Result<Self, RedArchiveError> {
        let url = url.trim();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres {
                url: url.to_string(),
            })
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite {
                url: url.to_string(),
            })
        } else {
            Err(RedArchiveError::Config(format!(
                "unsupported database url scheme: {}",
                url.split(':').next().unwrap_or_default()
            )))
        }
    }

    pub fn url(&self) -> &str {
        match self {
            DbEngine::Postgres { url } | DbEngine::Sqlite { url } => url,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DbEngine::Postgres { .. } => "postgres",
            DbEngine::Sqlite { .. } => "sqlite",
        }
    }
}

/// Where blobs land. The container (`root_dir_name`) is a sub-directory of
/// `root` for the filesystem backend and a bucket for S3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackend {
    Fs {
        root: PathBuf,
    },
    S3 {
        endpoint: String,
        region: String,
        access_key: String,
        secret_key: String,
    },
}

/// Everything a crawl, resolver or migration run needs. Built once at
/// process start and passed down by reference.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub reddit_username: String,
    pub reddit_password: String,
    pub db_engine: DbEngine,
    pub root_dir_name: String,
    /// Default upload content type when a caller does not supply one.
    pub content_type: String,
    pub blob_backend: BlobBackend,
    pub browserless_url: String,
    pub browserless_token: Option<String>,
    /// Delay between outbound requests to the scraped site.
    pub politeness: Politeness,
    /// Delay between listing pages.
    pub page_delay: Politeness,
    pub max_pages: Option<usize>,
}

impl IngestConfig {
    /// Load from the process environment (after an optional `.env` file).
    pub fn from_env() -> Result<Self, RedArchiveError> {
        dotenvy::dotenv().ok();

        let db_engine = DbEngine::parse(&required_env("DATABASE_URL")?)?;

        let blob_backend = match env::var("BLOB_BACKEND")
            .unwrap_or_else(|_| "fs".to_string())
            .as_str()
        {
            "fs" => BlobBackend::Fs {
                root: PathBuf::from(env::var("BLOB_ROOT").unwrap_or_else(|_| ".".to_string())),
            },
            "s3" => BlobBackend::S3 {
                endpoint: required_env("S3_ENDPOINT")?,
                region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                access_key: required_env("S3_ACCESS_KEY")?,
                secret_key: required_env("S3_SECRET_KEY")?,
            },
            other => {
                return Err(RedArchiveError::Config(format!(
                    "BLOB_BACKEND must be fs or s3, got {other}"
                )))
            }
        };

        let config = Self {
            reddit_username: env::var("REDDIT_USERNAME").unwrap_or_default(),
            reddit_password: env::var("REDDIT_PASSWORD").unwrap_or_default(),
            db_engine,
            root_dir_name: env::var("ROOT_DIR_NAME")
                .unwrap_or_else(|_| DEFAULT_ROOT_DIR_NAME.to_string()),
            content_type: env::var("DEFAULT_CONTENT_TYPE")
                .unwrap_or_else(|_| DEFAULT_CONTENT_TYPE.to_string()),
            blob_backend,
            browserless_url: env::var("BROWSERLESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            browserless_token: env::var("BROWSERLESS_TOKEN").ok(),
            politeness: delay_bounds(
                "REQUEST_DELAY",
                env::var("REQUEST_DELAY_MIN_SECS").ok(),
                env::var("REQUEST_DELAY_MAX_SECS").ok(),
                DEFAULT_REQUEST_DELAY_SECS,
            )?,
            page_delay: delay_bounds(
                "PAGE_DELAY",
                env::var("PAGE_DELAY_MIN_SECS").ok(),
                env::var("PAGE_DELAY_MAX_SECS").ok(),
                DEFAULT_PAGE_DELAY_SECS,
            )?,
            max_pages: env::var("MAX_PAGES")
                .ok()
                .map(|raw| parse_number::<usize>("MAX_PAGES", &raw))
                .transpose()?,
        };

        config.log_redacted();
        Ok(config)
    }

    pub fn log_redacted(&self) {
        fn preview(val: &str) -> String {
            if val.is_empty() {
                return "<not set>".to_string();
            }
            let head: String = val.chars().take(3).collect();
            format!("{head}...({} chars)", val.chars().count())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE: {}", self.db_engine.name());
        tracing::info!("  ROOT_DIR_NAME: {}", self.root_dir_name);
        tracing::info!("  REDDIT_USERNAME: {}", preview(&self.reddit_username));
        tracing::info!("  REDDIT_PASSWORD: {}", preview(&self.reddit_password));
        tracing::info!("  BROWSERLESS_URL: {}", self.browserless_url);
        tracing::info!("  REQUEST_DELAY: {:?}", self.politeness);
        tracing::info!("  PAGE_DELAY: {:?}", self.page_delay);
        if let Some(max_pages) = self.max_pages {
            tracing::info!("  MAX_PAGES: {max_pages}");
        }
        match &self.blob_backend {
            BlobBackend::Fs { root } => tracing::info!("  BLOB_BACKEND: fs ({})", root.display()),
            BlobBackend::S3 {
                endpoint,
                access_key,
                ..
            } => tracing::info!(
                "  BLOB_BACKEND: s3 ({endpoint}, key {})",
                preview(access_key)
            ),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.reddit_username.is_empty() && !self.reddit_password.is_empty()
    }
}

fn required_env(key: &str) -> Result<String, RedArchiveError> {
    env::var(key).map_err(|_| RedArchiveError::Config(format!("{key} environment variable is required")))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, RedArchiveError> {
    raw.trim()
        .parse()
        .map_err(|_| RedArchiveError::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}

/// `{prefix}_MIN_SECS` / `{prefix}_MAX_SECS`, each falling back to its default.
fn delay_bounds(
    prefix: &str,
    min: Option<String>,
    max: Option<String>,
    (default_min, default_max): (u64, u64),
) -> Result<Politeness, RedArchiveError> {
    let min = match min {
        Some(raw) => parse_number(&format!("{prefix}_MIN_SECS"), &raw)?,
        None => default_min,
    };
    let max = match max {
        Some(raw) => parse_number(&format!("{prefix}_MAX_SECS"), &raw)?,
        None => default_max,
    };
    if max < min {
        return Err(RedArchiveError::Config(format!(
            "{prefix}_MAX_SECS ({max}) is below {prefix}_MIN_SECS ({min})"
        )));
    }
    Ok(Politeness::from_secs(min, max))
}
