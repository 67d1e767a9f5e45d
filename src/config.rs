use std::time::Duration;

use clap::Parser;

use crate::error::{RelayError, Result};
use crate::models::{ProxyEndpoint, Target};
use crate::proxy::handler::ProxyHandlerConfig;
use crate::proxy::trigger::TriggerSet;

/// Command-line flags with environment fallbacks.
///
/// Single values from a flag win over the environment. Proxy and trigger lists are additive:
/// repeated flag values are appended to the list read from the environment.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rota-relay",
    version,
    about = "Reverse proxy that rotates forward-proxies on trigger status codes"
)]
pub struct Args {
    /// Server listen address
    #[arg(long = "listen", env = "LISTEN_ADDR", default_value = "0.0.0.0:8888")]
    pub listen: String,

    /// Target URL every request is forwarded to
    #[arg(long = "target", env = "TARGET_URL")]
    pub target: Option<String>,

    /// Comma separated forward-proxy URLs, in rotation order
    #[arg(long = "proxy-list", env = "PROXY_LIST", value_delimiter = ',')]
    pub proxy_list: Vec<String>,

    /// Forward-proxy URL appended to the list, repeatable
    #[arg(long = "proxy")]
    pub proxies: Vec<String>,

    /// Comma separated status codes that trigger a proxy switch; `*` for all
    #[arg(long = "trigger-codes", env = "TRIGGER_CODES", value_delimiter = ',')]
    pub trigger_code_list: Vec<String>,

    /// Trigger status code appended to the list, repeatable
    #[arg(long = "trigger-code")]
    pub trigger_codes: Vec<String>,

    /// Relay upstream response headers to the client
    #[arg(long, env = "RELAY_HEADERS")]
    pub relay_headers: bool,

    /// Connection establishment timeout in seconds
    #[arg(long, env = "CONNECT_TIMEOUT", default_value_t = 5)]
    pub connect_timeout: u64,

    /// Upstream request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 60)]
    pub request_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (pretty, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Validated startup configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the relay listens on
    pub listen_addr: String,
    /// Upstream service
    pub target: Target,
    /// Forward-proxies in rotation order, never empty
    pub proxies: Vec<ProxyEndpoint>,
    /// Status codes that trigger rotation
    pub triggers: TriggerSet,
    /// Request handling settings
    pub handler: ProxyHandlerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter level when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Config {
    /// Load configuration from flags and environment variables
    pub fn load() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self> {
        let target = Target::parse(args.target.as_deref().unwrap_or_default())?;

        let proxies = normalize_list(&[args.proxy_list, args.proxies].concat())
            .iter()
            .map(|raw| ProxyEndpoint::parse(raw))
            .collect::<Result<Vec<_>>>()?;
        if proxies.is_empty() {
            return Err(RelayError::NoProxiesConfigured);
        }

        let triggers =
            TriggerSet::new(normalize_list(&[args.trigger_code_list, args.trigger_codes].concat()));

        if args.connect_timeout == 0 {
            return Err(RelayError::InvalidConfig(
                "CONNECT_TIMEOUT must be greater than zero".into(),
            ));
        }
        if args.request_timeout == 0 {
            return Err(RelayError::InvalidConfig(
                "REQUEST_TIMEOUT must be greater than zero".into(),
            ));
        }

        let listen_addr = args.listen.trim().to_string();
        if listen_addr.is_empty() {
            return Err(RelayError::InvalidConfig("LISTEN_ADDR must not be empty".into()));
        }

        Ok(Config {
            listen_addr,
            target,
            proxies,
            triggers,
            handler: ProxyHandlerConfig {
                connect_timeout: Duration::from_secs(args.connect_timeout),
                request_timeout: Duration::from_secs(args.request_timeout),
                relay_headers: args.relay_headers,
            },
            log: LogConfig {
                level: args.log_level.trim().to_lowercase(),
                format: parse_log_format(&args.log_format)?,
            },
        })
    }
}

fn parse_log_format(raw: &str) -> Result<LogFormat> {
    match raw.trim().to_lowercase().as_str() {
        "pretty" | "text" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(RelayError::InvalidConfig(format!(
            "LOG_FORMAT must be pretty or json, got {}",
            other
        ))),
    }
}

/// Trim every entry, drop empty ones and keep the first occurrence of duplicates
fn normalize_list(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values.iter().flat_map(|v| v.split(',')) {
        let value = value.trim();
        if value.is_empty() || out.iter().any(|v| v == value) {
            continue;
        }
        out.push(value.to_string());
    }
    out
}
