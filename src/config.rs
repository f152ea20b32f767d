use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables (optionally from `.env`) and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthMode,
    pub metrics: MetricsConfig,
    pub http: HttpLimits,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEnvironment {
    Local,
    Gke,
}

impl FromStr for DeploymentEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "gke" | "cluster" => Ok(Self::Gke),
            other => bail!("unknown environment `{}` (expected local or gke)", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Files beneath a local directory.
    Local { base_dir: PathBuf },
    /// Google Cloud Storage.
    Gcs {
        api_base: String,
        service_account_key_path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub environment: DeploymentEnvironment,
    pub backend: StorageBackend,
}

/// Which authentication guard protects the API.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Static {
        username: String,
        password: String,
    },
    Database {
        seed_username: String,
        seed_password: String,
    },
}

impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Static { username, .. } => f
                .debug_struct("Static")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Database { seed_username, .. } => f
                .debug_struct("Database")
                .field("seed_username", seed_username)
                .field("seed_password", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub sample_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpLimits {
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Users, instructors, courses and trace uploads API")]
pub struct Args {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Apply the schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // A missing .env is normal outside development.
        let _ = dotenv::dotenv();

        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_lookup(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Build the config from parsed args and a variable lookup.
    pub fn from_lookup<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database = DatabaseConfig {
            url: args
                .database_url
                .or_else(|| lookup("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/api.db".into()),
            max_connections: nonzero_var(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            acquire_timeout: Duration::from_secs(nonzero_var(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 5)?),
        };

        let environment = parse_var(&lookup, "ENVIRONMENT", DeploymentEnvironment::Local)?;
        let backend_name = lookup("STORAGE_BACKEND").unwrap_or_else(|| "local".into());
        let (bucket, backend) = match backend_name.to_ascii_lowercase().as_str() {
            "local" => (
                lookup("BUCKET_NAME").unwrap_or_else(|| "traces".into()),
                StorageBackend::Local {
                    base_dir: lookup("LOCAL_STORAGE_DIR")
                        .unwrap_or_else(|| "./data/objects".into())
                        .into(),
                },
            ),
            "gcs" => (
                lookup("BUCKET_NAME")
                    .filter(|b| !b.is_empty())
                    .context("BUCKET_NAME is required when STORAGE_BACKEND=gcs")?,
                StorageBackend::Gcs {
                    api_base: lookup("GCS_API_BASE")
                        .unwrap_or_else(|| crate::storage::gcs::DEFAULT_API_BASE.into()),
                    service_account_key_path: lookup("SERVICE_ACCOUNT_KEY_PATH")
                        .filter(|p| !p.is_empty())
                        .map(PathBuf::from),
                },
            ),
            other => bail!("unknown STORAGE_BACKEND `{}` (expected local or gcs)", other),
        };

        let auth_name = lookup("AUTH_MODE").unwrap_or_else(|| "database".into());
        let auth = match auth_name.to_ascii_lowercase().as_str() {
            "none" => AuthMode::None,
            "static" => AuthMode::Static {
                username: lookup("BASIC_AUTH_USERNAME")
                    .context("BASIC_AUTH_USERNAME is required when AUTH_MODE=static")?,
                password: lookup("BASIC_AUTH_PASSWORD")
                    .context("BASIC_AUTH_PASSWORD is required when AUTH_MODE=static")?,
            },
            "database" => AuthMode::Database {
                seed_username: lookup("DEFAULT_ADMIN_USERNAME")
                    .unwrap_or_else(|| "admin@example.com".into()),
                seed_password: lookup("DEFAULT_ADMIN_PASSWORD")
                    .unwrap_or_else(|| "admin123".into()),
            },
            other => bail!("unknown AUTH_MODE `{}` (expected none, static or database)", other),
        };

        let metrics = MetricsConfig {
            enabled: parse_var(&lookup, "METRICS_ENABLED", true)?,
            sample_interval: Duration::from_secs(nonzero_var(
                &lookup,
                "METRICS_SAMPLE_INTERVAL_SECS",
                30,
            )?),
        };

        let http = HttpLimits {
            request_timeout: Duration::from_secs(nonzero_var(&lookup, "REQUEST_TIMEOUT_SECS", 30)?),
            max_upload_bytes: nonzero_var(&lookup, "MAX_UPLOAD_BYTES", 32 * 1024 * 1024)?,
        };

        Ok(Self {
            host: args
                .host
                .or_else(|| lookup("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: match args.port {
                Some(port) => port,
                None => parse_var(&lookup, "PORT", 8080)?,
            },
            database,
            storage: StorageConfig {
                bucket,
                environment,
                backend,
            },
            auth,
            metrics,
            http,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        _ => Ok(default),
    }
}

/// Like [`parse_var`], but zero is a configuration error.
fn nonzero_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr + Default + PartialEq,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_var(lookup, name, default)?;
    if value == T::default() {
        bail!("{} must be greater than zero", name);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(Args::default(), move |name| map.get(name).cloned())
    }

    #[test]
    fn defaults_are_local_and_database_auth() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.storage.bucket, "traces");
        assert_eq!(cfg.storage.environment, DeploymentEnvironment::Local);
        assert!(matches!(cfg.storage.backend, StorageBackend::Local { .. }));
        assert!(matches!(cfg.auth, AuthMode::Database { .. }));
        assert!(cfg.metrics.enabled);
        assert_eq!(cfg.http.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn gcs_requires_a_bucket() {
        let err = config_from(&[("STORAGE_BACKEND", "gcs")]).unwrap_err();
        assert!(err.to_string().contains("BUCKET_NAME"));

        let cfg = config_from(&[
            ("STORAGE_BACKEND", "gcs"),
            ("BUCKET_NAME", "trace-bucket"),
            ("ENVIRONMENT", "gke"),
        ])
        .unwrap();
        assert_eq!(cfg.storage.environment, DeploymentEnvironment::Gke);
        assert_eq!(
            cfg.storage.backend,
            StorageBackend::Gcs {
                api_base: crate::storage::gcs::DEFAULT_API_BASE.into(),
                service_account_key_path: None,
            }
        );
    }

    #[test]
    fn static_auth_needs_both_credentials() {
        assert!(config_from(&[("AUTH_MODE", "static"), ("BASIC_AUTH_USERNAME", "u")]).is_err());
        let cfg = config_from(&[
            ("AUTH_MODE", "static"),
            ("BASIC_AUTH_USERNAME", "u"),
            ("BASIC_AUTH_PASSWORD", "p"),
        ])
        .unwrap();
        assert_eq!(
            cfg.auth,
            AuthMode::Static {
                username: "u".into(),
                password: "p".into()
            }
        );
        assert!(!format!("{:?}", cfg.auth).contains("\"p\""));
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert!(format!("{:#}", err).contains("PORT"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        for name in [
            "DB_MAX_CONNECTIONS",
            "DB_ACQUIRE_TIMEOUT_SECS",
            "METRICS_SAMPLE_INTERVAL_SECS",
            "REQUEST_TIMEOUT_SECS",
            "MAX_UPLOAD_BYTES",
        ] {
            let err = config_from(&[(name, "0")]).unwrap_err();
            assert!(err.to_string().contains(name), "{name}: {err:#}");
        }

        let cfg = config_from(&[
            ("METRICS_SAMPLE_INTERVAL_SECS", "1"),
            ("DB_MAX_CONNECTIONS", "2"),
        ])
        .unwrap();
        assert_eq!(cfg.metrics.sample_interval, Duration::from_secs(1));
        assert_eq!(cfg.database.max_connections, 2);
    }

    #[test]
    fn unknown_modes_are_rejected() {
        assert!(config_from(&[("AUTH_MODE", "ldap")]).is_err());
        assert!(config_from(&[("STORAGE_BACKEND", "s3")]).is_err());
        assert!(config_from(&[("ENVIRONMENT", "mars")]).is_err());
    }
}
