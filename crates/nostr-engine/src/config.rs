use std::env;
use std::time::Duration;

use log::warn;
use url::Url;

pub const RELAYS_VAR: &str = "NOSTR_RELAYS";
pub const QUERY_TIMEOUT_VAR: &str = "NOSTR_QUERY_TIMEOUT_SECS";
pub const LOG_VAR: &str = "NOSTR_LOG";

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_RELAYS: [&str; 2] = ["wss://relay.damus.io", "wss://nos.lol"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySetting {
  pub url: String,
  pub read: bool,
  pub write: bool,
}

impl RelaySetting {
  pub fn new(url: &str) -> Self {
    Self {
      url: url.to_string(),
      read: true,
      write: true,
    }
  }

  ///
  /// `wss://relay` (read and write), `wss://relay|r`, `wss://relay|w`
  /// or `wss://relay|rw`. `None` for anything that is not a websocket URL
  /// with known flags.
  ///
  pub fn parse(entry: &str) -> Option<Self> {
    let (url, flags) = match entry.trim().split_once('|') {
      Some((url, flags)) => (url.trim(), flags.trim()),
      None => (entry.trim(), "rw"),
    };

    let (read, write) = match flags {
      "r" => (true, false),
      "w" => (false, true),
      "rw" | "wr" => (true, true),
      _ => return None,
    };

    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "ws" | "wss") || parsed.host_str().is_none() {
      return None;
    }

    Some(Self {
      url: url.to_string(),
      read,
      write,
    })
  }
}

///
/// Everything the coordinator and the binary need to run.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  pub relays: Vec<RelaySetting>,
  /// How long a one-shot query waits for relays before giving up.
  pub query_timeout: Duration,
  /// `env_logger` filter, e.g. `info` or `nostr_engine=debug`.
  pub log_filter: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      relays: DEFAULT_RELAYS.iter().map(|url| RelaySetting::new(url)).collect(),
      query_timeout: DEFAULT_QUERY_TIMEOUT,
      log_filter: DEFAULT_LOG_FILTER.to_string(),
    }
  }
}

impl Config {
  /// Reads the configuration from the process environment.
  pub fn from_env() -> Self {
    Self::from_lookup(|key| env::var(key).ok())
  }

  ///
  /// Builds the configuration from a variable lookup. Malformed values
  /// fall back to their defaults with a warning, invalid relay entries
  /// are dropped.
  ///
  pub fn from_lookup<F>(lookup: F) -> Self
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();

    if let Some(relays) = lookup(RELAYS_VAR) {
      let mut settings: Vec<RelaySetting> = vec![];
      for entry in relays.split(',').filter(|entry| !entry.trim().is_empty()) {
        match RelaySetting::parse(entry) {
          Some(setting) if settings.iter().any(|s| s.url == setting.url) => {
            warn!("{RELAYS_VAR}: duplicate relay {}", setting.url)
          }
          Some(setting) => settings.push(setting),
          None => warn!("{RELAYS_VAR}: ignoring invalid relay entry {entry:?}"),
        }
      }
      if settings.is_empty() {
        warn!("{RELAYS_VAR} has no valid relay, using the defaults");
      } else {
        config.relays = settings;
      }
    }

    if let Some(timeout) = lookup(QUERY_TIMEOUT_VAR) {
      match timeout.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => config.query_timeout = Duration::from_secs(secs),
        _ => warn!(
          "{QUERY_TIMEOUT_VAR}={timeout:?} is not a positive number of seconds, using {}s",
          DEFAULT_QUERY_TIMEOUT.as_secs()
        ),
      }
    }

    if let Some(filter) = lookup(LOG_VAR) {
      if filter.trim().is_empty() {
        warn!("{LOG_VAR} is empty, using {DEFAULT_LOG_FILTER}");
      } else {
        config.log_filter = filter.trim().to_string();
      }
    }

    config
  }
}
