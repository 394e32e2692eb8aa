use crate::cli::Args;
use crate::error::ConfigError;
use crate::readings::{parse_timestamp, TimeRange};
use crate::transport::DEFAULT_REQUEST_TIMEOUT;
use dotenvy::dotenv;
use std::env;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Values read from the process environment (after `.env` is applied).
#[derive(Debug, Clone, Default)]
pub struct EnvSettings {
    pub hmac_secret: Option<String>,
    pub site_url: Option<String>,
    pub request_timeout_secs: Option<String>,
}

impl EnvSettings {
    pub fn load() -> Self {
        dotenv().ok();
        Self {
            hmac_secret: env_optional("HMAC_SECRET"),
            site_url: env_optional("NEXT_PUBLIC_SITE_URL"),
            request_timeout_secs: env_optional("INGEST_REQUEST_TIMEOUT_SECS"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub csv_path: PathBuf,
    pub api_url: String,
    pub hmac_secret: String,
    pub device_id: String,
    pub speed: f64,
    pub batch_size: NonZeroUsize,
    pub time_range: TimeRange,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env(args: Args) -> Result<Self, ConfigError> {
        Self::resolve(args, EnvSettings::load())
    }

    /// Command-line flags win over the environment. Every fatal configuration problem is
    /// reported here, before anything touches the filesystem or network.
    pub fn resolve(args: Args, env: EnvSettings) -> Result<Self, ConfigError> {
        let hmac_secret = env.hmac_secret.ok_or(ConfigError::MissingSecret)?;

        let batch_size = usize::try_from(args.batch_size)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or(ConfigError::InvalidBatchSize(args.batch_size))?;

        if !args.speed.is_finite() {
            return Err(ConfigError::InvalidSpeed(args.speed));
        }

        let time_range = TimeRange {
            start: parse_bound("start", args.start.as_deref())?,
            end: parse_bound("end", args.end.as_deref())?,
        };
        if let (Some(start), Some(end)) = (time_range.start, time_range.end) {
            if start > end {
                return Err(ConfigError::InvertedRange {
                    start: start.to_rfc3339(),
                    end: end.to_rfc3339(),
                });
            }
        }

        let raw_url = args
            .api_url
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or(env.site_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = normalize_api_url(&raw_url)?;

        let request_timeout = match (args.timeout_secs, env.request_timeout_secs) {
            (Some(secs), _) => timeout_from_secs(secs, &secs.to_string())?,
            (None, Some(raw)) => {
                let secs = raw
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidTimeout(raw.clone()))?;
                timeout_from_secs(secs, &raw)?
            }
            (None, None) => DEFAULT_REQUEST_TIMEOUT,
        };

        let device_id = args
            .device_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self {
            csv_path: args.csv,
            api_url,
            hmac_secret,
            device_id,
            speed: args.speed,
            batch_size,
            time_range,
            request_timeout,
        })
    }
}

fn parse_bound(
    which: &'static str,
    raw: Option<&str>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, ConfigError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    parse_timestamp(raw)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidBound {
            which,
            value: raw.to_string(),
        })
}

fn normalize_api_url(raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidApiUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn timeout_from_secs(secs: u64, raw: &str) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidTimeout(raw.to_string()));
    }
    Ok(Duration::from_secs(secs))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            csv: PathBuf::from("data.csv"),
            speed: 1.0,
            start: None,
            end: None,
            batch_size: 100,
            device_id: None,
            api_url: None,
            timeout_secs: None,
        }
    }

    fn env_with_secret() -> EnvSettings {
        EnvSettings {
            hmac_secret: Some("s3cr3t".to_string()),
            ..EnvSettings::default()
        }
    }

    #[test]
    fn defaults_apply() {
        let config = Config::resolve(args(), env_with_secret()).unwrap();

        assert_eq!(config.api_url, "http://localhost:3000");
        assert_eq!(config.batch_size.get(), 100);
        assert_eq!(config.speed, 1.0);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.time_range, TimeRange::default());
        assert!(Uuid::parse_str(&config.device_id).is_ok());
    }

    #[test]
    fn missing_secret_is_fatal() {
        let err = Config::resolve(args(), EnvSettings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret));
    }

    #[test]
    fn zero_and_negative_batch_sizes_are_rejected() {
        for size in [0, -5] {
            let err = Config::resolve(
                Args {
                    batch_size: size,
                    ..args()
                },
                env_with_secret(),
            )
            .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidBatchSize(n) if n == size));
        }
    }

    #[test]
    fn non_positive_speed_is_allowed_but_nan_is_not() {
        let config = Config::resolve(Args { speed: -1.0, ..args() }, env_with_secret()).unwrap();
        assert_eq!(config.speed, -1.0);

        let err =
            Config::resolve(Args { speed: f64::NAN, ..args() }, env_with_secret()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSpeed(_)));
    }

    #[test]
    fn bounds_are_parsed_and_checked() {
        let config = Config::resolve(
            Args {
                start: Some("2024-01-01T00:00:00Z".to_string()),
                end: Some("2024-01-02T00:00:00+00:00".to_string()),
                ..args()
            },
            env_with_secret(),
        )
        .unwrap();
        assert!(config.time_range.start.is_some());
        assert!(config.time_range.end.is_some());

        let err = Config::resolve(
            Args {
                start: Some("soon".to_string()),
                ..args()
            },
            env_with_secret(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBound { which: "start", .. }));

        let err = Config::resolve(
            Args {
                start: Some("2024-01-02T00:00:00Z".to_string()),
                end: Some("2024-01-01T00:00:00Z".to_string()),
                ..args()
            },
            env_with_secret(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvertedRange { .. }));
    }

    #[test]
    fn bare_date_and_minute_bounds_are_accepted() {
        let config = Config::resolve(
            Args {
                start: Some("2024-01-01".to_string()),
                end: Some("2024-01-01T00:05Z".to_string()),
                ..args()
            },
            env_with_secret(),
        )
        .unwrap();
        assert_eq!(
            config.time_range.start.map(|start| start.to_rfc3339()),
            Some("2024-01-01T00:00:00+00:00".to_string())
        );
        assert_eq!(
            config.time_range.end.map(|end| end.to_rfc3339()),
            Some("2024-01-01T00:05:00+00:00".to_string())
        );
    }

    #[test]
    fn flag_url_wins_and_trailing_slash_is_dropped() {
        let env = EnvSettings {
            site_url: Some("https://dashboard.example.com".to_string()),
            ..env_with_secret()
        };
        let config = Config::resolve(
            Args {
                api_url: Some("http://127.0.0.1:8080/".to_string()),
                ..args()
            },
            env.clone(),
        )
        .unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:8080");

        let config = Config::resolve(args(), env).unwrap();
        assert_eq!(config.api_url, "https://dashboard.example.com");

        let err = Config::resolve(
            Args {
                api_url: Some("ftp://example.com".to_string()),
                ..args()
            },
            env_with_secret(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidApiUrl { .. }));
    }

    #[test]
    fn timeout_comes_from_flag_then_env() {
        let env = EnvSettings {
            request_timeout_secs: Some("5".to_string()),
            ..env_with_secret()
        };
        let config = Config::resolve(args(), env.clone()).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));

        let config = Config::resolve(
            Args {
                timeout_secs: Some(9),
                ..args()
            },
            env,
        )
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(9));

        let err = Config::resolve(
            args(),
            EnvSettings {
                request_timeout_secs: Some("soon".to_string()),
                ..env_with_secret()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout(_)));
    }

    #[test]
    fn explicit_device_id_is_kept() {
        let config = Config::resolve(
            Args {
                device_id: Some(" bench-rig-1 ".to_string()),
                ..args()
            },
            env_with_secret(),
        )
        .unwrap();
        assert_eq!(config.device_id, "bench-rig-1");
    }
}
