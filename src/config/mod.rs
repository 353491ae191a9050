//! Configuration management for the Vaiz MCP proxy.

use clap::Parser;

use crate::error::{Error, Result};
use crate::proxy::health::HEALTH_CHECK_INTERVAL_MS;
use crate::upstream::retry::{MAX_RETRIES, RETRY_DELAY_MS};

/// Default upstream endpoint for the Vaiz MCP API.
pub const DEFAULT_API_URL: &str = "https://api.vaiz.com/mcp";

/// MCP proxy bridging stdio clients to the Vaiz API.
///
/// Unknown positional arguments are collected and ignored so an editor can
/// pass extra flags without preventing startup.
#[derive(Parser, Debug, Clone)]
#[command(name = "vaiz-mcp-proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP proxy bridging stdio clients to the Vaiz API")]
#[command(disable_version_flag = true)]
pub struct Args {
    /// Vaiz API token
    #[arg(long, env = "VAIZ_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Workspace selector sent as Current-Space-Id
    #[arg(long, env = "VAIZ_SPACE_ID")]
    pub space_id: Option<String>,

    /// Upstream MCP endpoint
    #[arg(long, default_value = DEFAULT_API_URL, env = "VAIZ_API_URL")]
    pub api_url: String,

    /// Enable debug logging on stderr
    #[arg(long, env = "VAIZ_DEBUG")]
    pub debug: bool,

    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Ignored extra arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    pub rest: Vec<String>,
}

/// Proxy configuration.
///
/// Timing knobs default to the production schedule; tests shrink them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream API token (Bearer credential)
    pub token: String,
    /// Optional workspace selector
    pub space_id: Option<String>,
    /// Upstream MCP endpoint
    pub api_url: String,
    /// Debug logging
    pub debug: bool,
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Base backoff delay; doubles per retry
    pub retry_delay_ms: u64,
    /// Interval between health prober ticks while the API is down
    pub health_check_interval_ms: u64,
}

impl Config {
    /// Build a configuration from parsed arguments.
    ///
    /// Fails when no API token was provided; the caller exits with code 1.
    pub fn from_args(args: Args) -> Result<Self> {
        let token = args
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Config("VAIZ_API_TOKEN is required".to_string()))?;

        Ok(Self {
            token,
            space_id: args.space_id,
            api_url: args.api_url,
            debug: args.debug,
            ..Self::default_timings()
        })
    }

    /// Configuration with production timing defaults and placeholder
    /// credentials; callers overwrite the connection fields.
    fn default_timings() -> Self {
        Self {
            token: String::new(),
            space_id: None,
            api_url: DEFAULT_API_URL.to_string(),
            debug: false,
            max_retries: MAX_RETRIES,
            retry_delay_ms: RETRY_DELAY_MS,
            health_check_interval_ms: HEALTH_CHECK_INTERVAL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(token: Option<&str>) -> Args {
        Args {
            token: token.map(String::from),
            space_id: None,
            api_url: DEFAULT_API_URL.to_string(),
            debug: false,
            version: None,
            rest: Vec::new(),
        }
    }

    #[test]
    fn test_config_requires_token() {
        assert!(Config::from_args(args(None)).is_err());
        assert!(Config::from_args(args(Some(""))).is_err());
        assert!(Config::from_args(args(Some("tok"))).is_ok());
    }

    #[test]
    fn test_config_timing_defaults() {
        let config = Config::from_args(args(Some("tok"))).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
        assert_eq!(config.health_check_interval_ms, 5000);
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_extra_arguments_are_ignored() {
        let args = Args::parse_from(["vaiz-mcp-proxy", "--token", "tok", "serve", "--weird-flag"]);
        assert_eq!(args.rest, vec!["serve", "--weird-flag"]);
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.token, "tok");
    }
}
