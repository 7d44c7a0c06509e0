use std::{collections::HashMap, sync::Arc};

use futures_util::future::join_all;
use log::{debug, error, info};
use tokio::sync::{
  mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
  oneshot, Mutex, MutexGuard,
};

use super::{ConnectionInfo, Error, PostResult, RelayConnection, RelayNotification};
use crate::{event::Event, schnorr::Keys};

///
/// The set of relay connections. Every connection reports on the
/// same notification channel, handed out by [`RelayPool::new`].
///
/// The map lock is only held to read or change the set, never while
/// talking to a relay.
///
#[derive(Debug)]
pub struct RelayPool {
  relays: Arc<Mutex<HashMap<String, Arc<RelayConnection>>>>,
  notifier: UnboundedSender<RelayNotification>,
}

impl RelayPool {
  pub fn new() -> (Self, UnboundedReceiver<RelayNotification>) {
    // create channel to allow relays to communicate with the pool owner
    let (notifier, notifications) = unbounded_channel();

    let pool = Self {
      relays: Arc::new(Mutex::new(HashMap::new())),
      notifier,
    };
    (pool, notifications)
  }

  /// Gets a snapshot of the relays.
  ///
  /// This is fine if you want to just read the contents of the HashMap of relays.
  /// But not if you want to mutate it.
  ///
  pub async fn relays(&self) -> HashMap<String, Arc<RelayConnection>> {
    let relays = self.relays.lock().await;
    relays.clone()
  }

  /// Gets a `mutable` version of the HashMap of relays.
  ///
  pub async fn relays_mut(&self) -> MutexGuard<HashMap<String, Arc<RelayConnection>>> {
    self.relays.lock().await
  }

  pub async fn relay(&self, url: &str) -> Option<Arc<RelayConnection>> {
    self.relays.lock().await.get(url).cloned()
  }

  /// Adds a relay to the pool without connecting to it.
  /// An existing relay with the same url is returned as is.
  ///
  pub async fn add_relay(
    &self,
    url: &str,
    read: bool,
    write: bool,
  ) -> Result<Arc<RelayConnection>, Error> {
    let mut relays = self.relays_mut().await;

    if let Some(relay) = relays.get(url) {
      return Ok(Arc::clone(relay));
    }

    let relay = Arc::new(RelayConnection::new(url, read, write, self.notifier.clone())?);
    relays.insert(url.to_string(), Arc::clone(&relay));
    info!("❯ Added relay {url} (read: {read}, write: {write})");
    Ok(relay)
  }

  /// Removes from the pool and disconnects from the relay.
  ///
  pub async fn remove_relay(&self, url: &str) -> Option<Arc<RelayConnection>> {
    let relay = self.relays_mut().await.remove(url)?;
    relay.disconnect();
    Some(relay)
  }

  pub async fn reconfigure_relay(&self, url: &str, read: bool, write: bool) -> bool {
    match self.relay(url).await {
      Some(relay) => {
        relay.set_permissions(read, write);
        true
      }
      None => false,
    }
  }

  /// Connects to every relay that is not connected yet, concurrently.
  ///
  pub async fn connect(&self) {
    let relays = self.relays().await;
    let pending = relays
      .values()
      .filter(|relay| relay.status() == super::ConnectionStatus::Disconnected)
      .cloned()
      .collect();
    Self::connect_all(pending).await;
  }

  /// Connects again to the relays whose last close was abnormal.
  ///
  pub async fn reconnect(&self) {
    let relays = self.relays().await;
    let pending = relays
      .values()
      .filter(|relay| relay.needs_reconnect())
      .cloned()
      .collect();
    Self::connect_all(pending).await;
  }

  async fn connect_all(relays: Vec<Arc<RelayConnection>>) {
    let attempts = relays.iter().map(|relay| async move {
      if let Err(err) = relay.connect().await {
        error!("❯ {}: {err}", relay.url());
      }
    });
    join_all(attempts).await;
  }

  /// Disconnects from a relay (does not remove it from the pool).
  ///
  pub async fn disconnect_relay(&self, url: &str) {
    if let Some(relay) = self.relay(url).await {
      relay.disconnect();
    }
  }

  pub async fn disconnect(&self) {
    for relay in self.relays().await.values() {
      relay.disconnect();
    }
  }

  ///
  /// Sends an event to every writable relay. Relays that refuse it right
  /// away (disconnected) are reported with their error.
  ///
  pub async fn broadcast_event(
    &self,
    event: &Event,
    keys: Option<Keys>,
  ) -> Vec<(String, Result<oneshot::Receiver<PostResult>, Error>)> {
    let relays = self.relays().await;
    relays
      .values()
      .filter(|relay| relay.can_write())
      .map(|relay| {
        debug!("❯ Sending {} to {}", event.id, relay.url());
        (relay.url().to_string(), relay.send_event(event.clone(), keys))
      })
      .collect()
  }

  pub async fn infos(&self) -> Vec<ConnectionInfo> {
    let mut infos: Vec<ConnectionInfo> =
      self.relays().await.values().map(|relay| relay.info()).collect();
    infos.sort_by(|a, b| a.url.cmp(&b.url));
    infos
  }
}

#[cfg(test)]
mod tests {
  use tokio_tungstenite::tungstenite::Message;

  use super::*;

  #[cfg(test)]
  use pretty_assertions::assert_eq;

  #[tokio::test]
  async fn relaypool_add_relay_once() {
    let (relay_pool, _notifications) = RelayPool::new();

    let first = relay_pool.add_relay("wss://potato.relay", true, true).await.unwrap();
    let second = relay_pool.add_relay("wss://potato.relay", false, false).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(second.can_read());
    assert_eq!(relay_pool.relays().await.len(), 1);
    assert!(relay_pool.add_relay("http://potato.relay", true, true).await.is_err());
  }

  #[tokio::test]
  async fn relaypool_remove_relay() {
    let (relay_pool, _notifications) = RelayPool::new();
    relay_pool.add_relay("wss://potato.relay", true, true).await.unwrap();

    // if the key does not exist, should not do anything
    assert!(relay_pool.remove_relay("wss://nope.relay").await.is_none());
    assert_eq!(relay_pool.relays().await.len(), 1);

    let removed = relay_pool.remove_relay("wss://potato.relay").await.unwrap();
    assert!(!removed.needs_reconnect());
    assert_eq!(relay_pool.relays().await.len(), 0);
  }

  #[tokio::test]
  async fn relaypool_reconfigure_relay() {
    let (relay_pool, _notifications) = RelayPool::new();
    relay_pool.add_relay("wss://potato.relay", true, true).await.unwrap();

    assert!(relay_pool.reconfigure_relay("wss://potato.relay", false, true).await);
    assert!(!relay_pool.reconfigure_relay("wss://nope.relay", false, true).await);

    let infos = relay_pool.infos().await;
    assert_eq!(infos.len(), 1);
    assert_eq!((infos[0].read, infos[0].write), (false, true));
  }

  #[tokio::test]
  async fn relaypool_broadcasts_to_writable_relays_only() {
    let (relay_pool, _notifications) = RelayPool::new();
    let writable = relay_pool.add_relay("wss://a.relay", true, true).await.unwrap();
    let read_only = relay_pool.add_relay("wss://b.relay", true, false).await.unwrap();
    relay_pool.add_relay("wss://c.relay", true, true).await.unwrap();

    let (tx, mut frames) = unbounded_channel::<Message>();
    writable.on_open(tx);
    let (tx, _read_only_frames) = unbounded_channel::<Message>();
    read_only.on_open(tx);

    let mut results = relay_pool.broadcast_event(&Event::default(), None).await;
    results.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "wss://a.relay");
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(Error::NotConnected(_))));
    assert!(matches!(frames.try_recv(), Ok(Message::Text(_))));
  }
}
