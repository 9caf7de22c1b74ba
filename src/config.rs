//! Daemon configuration
//!
//! Settings come from `BLOBD_*` environment variables and may be overridden
//! on the command line.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::store::blob_store::{
    DEFAULT_ENTRY_LIFETIME, DEFAULT_MAX_ENTRY_SIZE, DEFAULT_SWEEP_INTERVAL,
};
use crate::store::StoreConfig;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// CLI command
#[derive(Debug)]
pub enum Command {
    /// Run the daemon
    Serve(DaemonConfig),
    /// Show help
    Help,
}

/// Runtime configuration for the daemon
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Directory where blobs are written
    pub dir: PathBuf,
    /// TCP port to listen on (all interfaces)
    pub port: u16,
    /// Maximum blob size in bytes
    pub max_entry_size: usize,
    /// Time between eviction sweeps
    pub sweep_interval: Duration,
    /// Inactivity window before a blob is evicted
    pub entry_lifetime: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            port: DEFAULT_PORT,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            entry_lifetime: DEFAULT_ENTRY_LIFETIME,
        }
    }
}

impl DaemonConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.dir)
            .with_max_entry_size(self.max_entry_size)
            .with_sweep_interval(self.sweep_interval)
            .with_entry_lifetime(self.entry_lifetime)
    }

    /// Apply a single setting by key
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "dir" => self.dir = PathBuf::from(value),
            "port" => {
                self.port = value
                    .parse()
                    .with_context(|| format!("Invalid port: {}", value))?
            }
            "max-size" => {
                self.max_entry_size = value
                    .parse()
                    .with_context(|| format!("Invalid max size: {}", value))?
            }
            "sweep-secs" => self.sweep_interval = parse_secs(key, value)?,
            "lifetime-secs" => self.entry_lifetime = parse_secs(key, value)?,
            _ => bail!("Unknown option: --{}", key),
        }
        Ok(())
    }
}

/// Platform cache directory, falling back to /tmp
fn default_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("blobd")
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: u64 = value
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))?;
    if secs == 0 {
        bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_secs(secs))
}

/// Environment variable backing each option
const ENV_KEYS: &[(&str, &str)] = &[
    ("BLOBD_DIR", "dir"),
    ("BLOBD_PORT", "port"),
    ("BLOBD_MAX_SIZE", "max-size"),
    ("BLOBD_SWEEP_SECS", "sweep-secs"),
    ("BLOBD_LIFETIME_SECS", "lifetime-secs"),
];

/// Parse a command from CLI arguments (without the program name) and an
/// environment lookup. Flags take precedence over the environment.
pub fn parse_args<E>(args: &[String], env: E) -> Result<Command>
where
    E: Fn(&str) -> Option<String>,
{
    let mut config = DaemonConfig::default();

    for &(var, key) in ENV_KEYS {
        if let Some(value) = env(var) {
            config
                .set(key, &value)
                .with_context(|| format!("From environment variable {}", var))?;
        }
    }

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "help" | "--help" | "-h" => return Ok(Command::Help),
            flag if flag.starts_with("--") => {
                let key = &flag[2..];
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("Missing value for {}", flag))?;
                config.set(key, value)?;
            }
            other => bail!("Unexpected argument: {}", other),
        }
    }

    Ok(Command::Serve(config))
}

pub fn print_help() {
    eprintln!(
        r#"blobd - Ephemeral blob store over HTTP

USAGE:
    blobd [OPTIONS]
    blobd help

OPTIONS:
    --dir <path>             Storage directory (default: <cache dir>/blobd)
    --port <port>            HTTP port (default: 8080)
    --max-size <bytes>       Maximum blob size (default: 104857600)
    --sweep-secs <secs>      Seconds between eviction sweeps (default: 3600)
    --lifetime-secs <secs>   Idle seconds before a blob expires (default: 86400)

ENVIRONMENT:
    BLOBD_DIR, BLOBD_PORT, BLOBD_MAX_SIZE, BLOBD_SWEEP_SECS, BLOBD_LIFETIME_SECS
                             Same as the options above; flags take precedence
    RUST_LOG                 Log level (trace, debug, info, warn, error)

API:
    PUT    /            Upload the request body, responds 201 with the blob name
    GET    /?name=N     Download a blob (refreshes its lifetime)
    DELETE /?name=N     Delete a blob
    GET    /health      Store status
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn serve(cmd: Command) -> DaemonConfig {
        match cmd {
            Command::Serve(config) => config,
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = serve(parse_args(&[], no_env).unwrap());
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_entry_size, 100 * 1024 * 1024);
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.entry_lifetime, Duration::from_secs(86400));
        assert!(config.dir.ends_with("blobd"));
    }

    #[test]
    fn test_flags() {
        let cmd = parse_args(
            &args(&[
                "--dir",
                "/var/blobs",
                "--port",
                "9000",
                "--max-size",
                "1024",
                "--sweep-secs",
                "60",
                "--lifetime-secs",
                "300",
            ]),
            no_env,
        )
        .unwrap();
        let config = serve(cmd);

        assert_eq!(config.dir, PathBuf::from("/var/blobs"));
        assert_eq!(config.listen_addr().port(), 9000);
        assert_eq!(config.max_entry_size, 1024);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.entry_lifetime, Duration::from_secs(300));

        let store = config.store_config();
        assert_eq!(store.max_entry_size, 1024);
        assert_eq!(store.entry_lifetime, Duration::from_secs(300));
    }

    #[test]
    fn test_env_overridden_by_flags() {
        let env: HashMap<&str, &str> =
            HashMap::from([("BLOBD_PORT", "7000"), ("BLOBD_MAX_SIZE", "64")]);
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let config = serve(parse_args(&args(&["--port", "7001"]), lookup).unwrap());
        assert_eq!(config.port, 7001);
        assert_eq!(config.max_entry_size, 64);
    }

    #[test]
    fn test_help() {
        assert!(matches!(
            parse_args(&args(&["--help"]), no_env).unwrap(),
            Command::Help
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse_args(&args(&["--port", "http"]), no_env).is_err());
        assert!(parse_args(&args(&["--sweep-secs", "0"]), no_env).is_err());
        assert!(parse_args(&args(&["--lifetime-secs"]), no_env).is_err());
        assert!(parse_args(&args(&["--colour", "red"]), no_env).is_err());
        assert!(parse_args(&args(&["serve"]), no_env).is_err());

        let bad_env = |key: &str| (key == "BLOBD_LIFETIME_SECS").then(|| "soon".to_string());
        assert!(parse_args(&[], bad_env).is_err());
    }
}
