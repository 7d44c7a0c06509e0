use std::sync::Once;

pub use env_logger::Env;
pub use log::{debug, error, info, warn};

pub mod bech32;
pub mod nip19;
pub mod schnorr;

pub mod event;
pub mod filter;

pub mod client_to_relay_communication;
pub mod relay_to_client_communication;

pub mod relay;

pub mod cache;
pub mod observable;
pub mod replaceable;

pub mod client;
pub mod config;
pub mod nip05;

pub use cache::coordinator::Coordinator;
pub use client::Client;
pub use config::Config;
pub use event::{Event, VerifiedEvent};
pub use filter::Filter;
pub use schnorr::Keys;

static INIT_LOGGER: Once = Once::new();

///
/// Installs `env_logger` once per process, reading `RUST_LOG` and
/// falling back to `default_filter`. Later calls do nothing.
///
pub fn init_logger(default_filter: &str) {
  INIT_LOGGER.call_once(|| {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
      .format_timestamp_millis()
      .try_init();
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn init_logger_is_idempotent() {
    init_logger("debug");
    init_logger("info");
    assert!(INIT_LOGGER.is_completed());
  }
}
