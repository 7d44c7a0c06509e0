use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::sync::{mpsc::UnboundedReceiver, watch};
use tokio::time::timeout;

use super::{
  registry::{SubscriptionData, SubscriptionRegistry},
  EventCache, EventInfo, Ingested,
};
use crate::{
  config::Config,
  event::{timestamp_now, Event, VerifiedEvent},
  filter::Filter,
  observable::{LoadingData, Observable},
  relay::{self, pool::RelayPool, ConnectionInfo, PostResult, RelayConnection, RelayNotification},
  replaceable::{ReplaceableEvent, ReplaceableKey},
  schnorr::Keys,
};

/// [`Coordinator`] error
#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error(transparent)]
  Relay(#[from] relay::Error),
  #[error("Unknown subscription {0}")]
  UnknownSubscription(String),
  #[error("Unknown relay {0}")]
  UnknownRelay(String),
  #[error("Query to {0} timed out")]
  Timeout(String),
}

pub type RelayStatus = BTreeMap<String, ConnectionInfo>;
pub type ReplaceableData = LoadingData<ReplaceableEvent>;

///
/// Glue between the relay pool and the event cache.
///
/// Every verified event goes through [`Coordinator::ingest`], which
/// deduplicates it, refreshes the live subscriptions and the replaceable
/// views. Callers read results through `watch` receivers.
///
/// Locks are taken registry first, then cache, and never held across an
/// await.
///
#[derive(Debug)]
pub struct Coordinator {
  config: Config,
  pool: RelayPool,
  cache: Mutex<EventCache>,
  registry: Mutex<SubscriptionRegistry>,
  status: Observable<RelayStatus>,
  replaceables: Mutex<HashMap<ReplaceableKey, Observable<ReplaceableData>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Coordinator {
  ///
  /// Builds the coordinator and adds the configured relays, without
  /// connecting. The receiver must be handed to [`Coordinator::run`].
  ///
  pub async fn new(config: Config) -> (Arc<Self>, UnboundedReceiver<RelayNotification>) {
    let (pool, notifications) = RelayPool::new();
    let coordinator = Arc::new(Self {
      config,
      pool,
      cache: Mutex::new(EventCache::new()),
      registry: Mutex::new(SubscriptionRegistry::new()),
      status: Observable::default(),
      replaceables: Mutex::new(HashMap::new()),
    });

    for setting in coordinator.config.relays.clone() {
      if let Err(err) = coordinator
        .add_relay(&setting.url, setting.read, setting.write)
        .await
      {
        warn!("Skipping relay {}: {err}", setting.url);
      }
    }

    (coordinator, notifications)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn pool(&self) -> &RelayPool {
    &self.pool
  }

  fn cache(&self) -> MutexGuard<'_, EventCache> {
    lock(&self.cache)
  }

  fn registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
    lock(&self.registry)
  }

  ///
  /// Handles the pool notifications. The pool keeps a sender of its own,
  /// so this runs for as long as the coordinator lives: spawn it and abort
  /// the task to stop.
  ///
  pub async fn run(self: Arc<Self>, mut notifications: UnboundedReceiver<RelayNotification>) {
    while let Some(notification) = notifications.recv().await {
      self.handle_notification(notification).await;
    }
    debug!("❯ Notification channel closed");
  }

  pub async fn handle_notification(&self, notification: RelayNotification) {
    match notification {
      RelayNotification::Event {
        relay_url, event, ..
      } => {
        self.ingest(event, &relay_url);
      }
      RelayNotification::Connected { relay_url } => {
        // live tail: only ask for what is newer than this relay already sent
        if let Some(relay) = self.pool.relay(&relay_url).await {
          relay.set_stream_filters(self.anchored_stream_filters(&relay_url));
        }
        self.refresh_status().await;
      }
      RelayNotification::Disconnected {
        relay_url,
        graceful,
      } => {
        if !graceful {
          info!("❯ {relay_url} closed abnormally, it will be retried on reconnect");
        }
        self.refresh_status().await;
      }
      RelayNotification::Eose {
        relay_url,
        subscription_id,
      } => debug!("[{relay_url}] stream {subscription_id} caught up"),
      RelayNotification::Notice { relay_url, message } => {
        debug!("[{relay_url}] notice: {message}")
      }
      // byte counters are read on demand through `relay_status`
      RelayNotification::Transmitted { .. } => {}
    }
  }

  ///
  /// Stores a verified event delivered by `relay_url`, then wakes the
  /// subscriptions and replaceable observers whose view changed.
  ///
  pub fn ingest(&self, event: VerifiedEvent, relay_url: &str) -> Ingested {
    let (ingested, view) = {
      let registry = self.registry();
      let mut cache = self.cache();
      let (ingested, replaceable) = cache.insert(event, relay_url);
      if ingested.changed() {
        registry.publish(&cache);
      }
      let view = replaceable.and_then(|key| cache.replaceable(&key).cloned().map(|view| (key, view)));
      (ingested, view)
    };

    if let Some((key, view)) = view {
      if let Some(observer) = lock(&self.replaceables).get(&key) {
        observer.set(LoadingData::Valid(view));
      }
    }
    ingested
  }

  /// Cached matches of `filter`, newest first, without asking any relay.
  pub fn cached(&self, filter: &Filter) -> Vec<EventInfo> {
    self.cache().matching(filter)
  }

  pub fn replaceable(&self, key: &ReplaceableKey) -> Option<ReplaceableEvent> {
    self.cache().replaceable(key).cloned()
  }

  /// Filters of every live subscription, each anchored after the newest
  /// cached match that `relay_url` delivered.
  pub fn anchored_stream_filters(&self, relay_url: &str) -> Vec<Filter> {
    let registry = self.registry();
    let cache = self.cache();
    registry
      .filters()
      .into_iter()
      .map(|filter| match cache.newest_created_at(&filter, relay_url) {
        Some(newest) => filter.live_tail(newest),
        None => filter,
      })
      .collect()
  }

  async fn refresh_stream_filters(&self) {
    for relay in self.pool.relays().await.values() {
      relay.set_stream_filters(self.anchored_stream_filters(relay.url()));
    }
  }

  ///
  /// Current state of every relay, byte counters included. The observable
  /// from [`Coordinator::observe_status`] only changes on connection and
  /// pool changes, so its counters lag behind this one.
  ///
  pub async fn relay_status(&self) -> RelayStatus {
    self
      .pool
      .infos()
      .await
      .into_iter()
      .map(|info| (info.url.clone(), info))
      .collect()
  }

  async fn refresh_status(&self) {
    let status = self.relay_status().await;
    self.status.set(status);
  }

  pub async fn add_relay(&self, url: &str, read: bool, write: bool) -> Result<(), Error> {
    let relay = self.pool.add_relay(url, read, write).await?;
    relay.set_stream_filters(self.anchored_stream_filters(url));
    self.refresh_status().await;
    Ok(())
  }

  pub async fn remove_relay(&self, url: &str) -> bool {
    let removed = self.pool.remove_relay(url).await.is_some();
    self.refresh_status().await;
    removed
  }

  pub async fn reconfigure_relay(&self, url: &str, read: bool, write: bool) -> bool {
    let changed = self.pool.reconfigure_relay(url, read, write).await;
    self.refresh_status().await;
    changed
  }

  pub async fn connect(&self) {
    self.pool.connect().await;
    self.refresh_status().await;
  }

  /// Connects again to the relays that closed abnormally.
  pub async fn reconnect(&self) {
    self.pool.reconnect().await;
    self.refresh_status().await;
  }

  pub async fn disconnect(&self) {
    self.pool.disconnect().await;
    self.refresh_status().await;
  }

  ///
  /// Opens (or shares) the live subscription `id`. The receiver starts
  /// with the cached matches and follows every change.
  ///
  pub async fn subscribe(&self, id: &str, filter: Filter) -> watch::Receiver<SubscriptionData> {
    let (receiver, created) = {
      let mut registry = self.registry();
      let (receiver, created) = registry.subscribe(id, filter);
      if created {
        let cache = self.cache();
        registry.publish_one(id, &cache);
      }
      (receiver, created)
    };

    if created {
      self.refresh_stream_filters().await;
    }
    receiver
  }

  pub async fn unsubscribe(&self, id: &str) {
    let removed = self.registry().unsubscribe(id);
    if removed {
      self.refresh_stream_filters().await;
    }
  }

  ///
  /// One-shot query on every connected read relay. Relays that do not
  /// answer within the configured timeout are cancelled. Returns the
  /// cached matches once every relay is done.
  ///
  pub async fn query(&self, filter: Filter) -> Vec<EventInfo> {
    let relays: Vec<Arc<RelayConnection>> = self
      .pool
      .relays()
      .await
      .into_values()
      .filter(|relay| relay.can_read() && relay.is_connected())
      .collect();

    let batches = join_all(
      relays
        .iter()
        .map(|relay| self.query_relay(relay, filter.clone())),
    )
    .await;

    for (relay, batch) in relays.iter().zip(batches) {
      match batch {
        Ok(events) => {
          for event in events {
            self.ingest(event, relay.url());
          }
        }
        Err(err) => warn!("{err}"),
      }
    }

    self.cached(&filter)
  }

  async fn query_relay(
    &self,
    relay: &RelayConnection,
    filter: Filter,
  ) -> Result<Vec<VerifiedEvent>, Error> {
    let (subscription_id, receiver) = relay.query(vec![filter]);
    match timeout(self.config.query_timeout, receiver).await {
      Ok(Ok(events)) => Ok(events),
      Ok(Err(_)) => {
        debug!("[{}] query {subscription_id} was dropped", relay.url());
        Ok(vec![])
      }
      Err(_) => {
        relay.cancel_one_shot(&subscription_id);
        Err(Error::Timeout(relay.url().to_string()))
      }
    }
  }

  ///
  /// Fetches from one relay the page of subscription `id` older than the
  /// oldest cached match that relay delivered. Returns how many events
  /// were new.
  ///
  pub async fn backfill(&self, id: &str, relay_url: &str) -> Result<usize, Error> {
    let filter = self
      .registry()
      .filter(id)
      .ok_or_else(|| Error::UnknownSubscription(id.to_string()))?;
    let relay = self
      .pool
      .relay(relay_url)
      .await
      .ok_or_else(|| Error::UnknownRelay(relay_url.to_string()))?;

    let until = self
      .cache()
      .oldest_created_at(&filter, relay_url)
      .unwrap_or_else(timestamp_now);
    let events = self.query_relay(&relay, filter.backfill(until)).await?;

    let new = events
      .into_iter()
      .filter(|event| self.ingest(event.clone(), relay_url) == Ingested::New)
      .count();
    debug!("[{relay_url}] backfill of {id} before {until}: {new} new events");
    Ok(new)
  }

  ///
  /// Sends `event` to every writable relay and waits for their answers.
  /// With `keys`, relays rejecting the id get a re-signed retry. Relays that
  /// accepted the event are recorded as its provenance.
  ///
  pub async fn publish(&self, event: Event, keys: Option<Keys>) -> Vec<PostResult> {
    let attempts = self.pool.broadcast_event(&event, keys).await;
    let event_id = &event.id;
    let wait = self.config.query_timeout;

    let results = join_all(attempts.into_iter().map(|(relay_url, attempt)| async move {
      let rejected = |message: String| PostResult {
        relay_url: relay_url.clone(),
        event_id: event_id.clone(),
        accepted: false,
        message,
      };
      match attempt {
        Err(err) => rejected(err.to_string()),
        Ok(receiver) => match timeout(wait, receiver).await {
          Ok(Ok(result)) => result,
          Ok(Err(_)) => rejected(String::from("no answer")),
          Err(_) => rejected(String::from("timed out")),
        },
      }
    }))
    .await;

    match event.clone().into_verified() {
      Ok(verified) => {
        for result in results.iter().filter(|r| r.accepted && r.event_id == event.id) {
          self.ingest(verified.clone(), &result.relay_url);
        }
      }
      Err(err) => warn!("Published event {} does not verify: {err}", event.id),
    }

    for result in results.iter().filter(|r| !r.accepted) {
      info!("[{}] rejected {}: {}", result.relay_url, result.event_id, result.message);
    }
    results
  }

  pub fn observe_status(&self) -> watch::Receiver<RelayStatus> {
    self.status.subscribe()
  }

  ///
  /// Follows the replaceable view `key`: `Loading` until an event for it
  /// is cached, then every newer version.
  ///
  pub fn observe_replaceable(&self, key: ReplaceableKey) -> watch::Receiver<ReplaceableData> {
    let mut observers = lock(&self.replaceables);
    let observer = observers.entry(key.clone()).or_insert_with(|| {
      let current = match self.cache().replaceable(&key) {
        Some(view) => LoadingData::Valid(view.clone()),
        None => LoadingData::Loading,
      };
      Observable::new(current)
    });
    observer.subscribe()
  }
}
