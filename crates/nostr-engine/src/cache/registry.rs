use std::collections::HashMap;

use log::{debug, warn};
use tokio::sync::watch;

use super::{EventCache, EventInfo};
use crate::{
  filter::Filter,
  observable::{LoadingData, Observable},
};

pub type SubscriptionData = LoadingData<Vec<EventInfo>>;

#[derive(Debug)]
struct Subscription {
  filter: Filter,
  refs: usize,
  results: Observable<SubscriptionData>,
}

///
/// Live subscriptions by caller-chosen id, reference counted: the first
/// subscribe creates it, the same id subscribed again shares it.
///
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
  subscriptions: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  ///
  /// Returns a receiver of the subscription's result set, and whether
  /// the subscription was created by this call.
  ///
  pub fn subscribe(
    &mut self,
    id: &str,
    filter: Filter,
  ) -> (watch::Receiver<SubscriptionData>, bool) {
    if let Some(subscription) = self.subscriptions.get_mut(id) {
      if subscription.filter != filter {
        warn!("[subscribe] {id} already exists with another filter, sharing the existing one");
      }
      subscription.refs += 1;
      return (subscription.results.subscribe(), false);
    }

    let results = Observable::new(LoadingData::Loading);
    let receiver = results.subscribe();
    self.subscriptions.insert(
      id.to_string(),
      Subscription {
        filter,
        refs: 1,
        results,
      },
    );
    (receiver, true)
  }

  /// Drops one reference. Returns true when the subscription is gone.
  /// Unknown ids are ignored.
  pub fn unsubscribe(&mut self, id: &str) -> bool {
    let Some(subscription) = self.subscriptions.get_mut(id) else {
      debug!("[unsubscribe] {id} is not subscribed");
      return false;
    };

    subscription.refs -= 1;
    if subscription.refs > 0 {
      return false;
    }
    self.subscriptions.remove(id);
    true
  }

  pub fn contains(&self, id: &str) -> bool {
    self.subscriptions.contains_key(id)
  }

  pub fn len(&self) -> usize {
    self.subscriptions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.subscriptions.is_empty()
  }

  pub fn filter(&self, id: &str) -> Option<Filter> {
    self.subscriptions.get(id).map(|s| s.filter.clone())
  }

  /// Distinct filters of every live subscription, in a stable order.
  pub fn filters(&self) -> Vec<Filter> {
    let mut ids: Vec<&String> = self.subscriptions.keys().collect();
    ids.sort();

    let mut filters: Vec<Filter> = vec![];
    for id in ids {
      let filter = &self.subscriptions[id].filter;
      if !filters.contains(filter) {
        filters.push(filter.clone());
      }
    }
    filters
  }

  ///
  /// Recomputes every result set from the cache and wakes only the
  /// subscriptions whose result changed.
  ///
  pub fn publish(&self, cache: &EventCache) -> usize {
    self
      .subscriptions
      .values()
      .filter(|subscription| Self::publish_subscription(subscription, cache))
      .count()
  }

  pub fn publish_one(&self, id: &str, cache: &EventCache) -> bool {
    self
      .subscriptions
      .get(id)
      .map_or(false, |subscription| Self::publish_subscription(subscription, cache))
  }

  fn publish_subscription(subscription: &Subscription, cache: &EventCache) -> bool {
    let result = LoadingData::Valid(cache.matching(&subscription.filter));
    subscription.results.set(result)
  }
}
