//! CLI argument parsing using clap.

use clap::Parser;
use std::time::Duration;

use crate::config::{
    HostList, UnfurlConfig, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT,
};

/// Unfurl Gate - SSRF-hardened link preview service
#[derive(Parser, Debug, Clone)]
#[command(name = "unfurl-gate")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose/debug logging
    #[arg(short, long, env = "UNFURL_VERBOSE")]
    pub verbose: bool,

    /// Port for web server (default: 3000)
    #[arg(long, default_value = "3000", env = "UNFURL_PORT")]
    pub port: u16,

    /// Host address to bind web server to (default: 0.0.0.0)
    #[arg(long, default_value = "0.0.0.0", env = "UNFURL_HOST")]
    pub host: String,

    /// Only these hosts may be unfurled (comma separated, `*.` prefix wildcard)
    #[arg(long, value_delimiter = ',', env = "UNFURL_ALLOW_HOSTS")]
    pub allow_hosts: Vec<String>,

    /// Hosts that are always refused (comma separated, `*.` prefix wildcard)
    #[arg(long, value_delimiter = ',', env = "UNFURL_DENY_HOSTS")]
    pub deny_hosts: Vec<String>,

    /// Deadline for a whole unfurl (all network steps combined), in seconds
    #[arg(long, default_value = "5", env = "UNFURL_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// Largest response body read, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES, env = "UNFURL_MAX_BODY_BYTES")]
    pub max_body_bytes: u64,

    /// Redirect hops followed before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_REDIRECTS, env = "UNFURL_MAX_REDIRECTS")]
    pub max_redirects: usize,

    /// Allow targets on private/loopback addresses (local development only)
    #[arg(long, env = "UNFURL_ALLOW_PRIVATE")]
    pub allow_private: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build the pipeline configuration from the parsed arguments
    pub fn unfurl_config(&self) -> UnfurlConfig {
        UnfurlConfig {
            allow_hosts: HostList::from_patterns(&self.allow_hosts),
            deny_hosts: HostList::from_patterns(&self.deny_hosts),
            timeout: Duration::from_secs(self.timeout_secs),
            max_body_bytes: self.max_body_bytes,
            max_redirects: self.max_redirects,
            allow_private_addresses: self.allow_private,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}
