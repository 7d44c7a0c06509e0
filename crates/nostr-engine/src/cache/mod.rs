pub mod coordinator;
pub mod registry;

use std::collections::{BTreeSet, HashMap};

use crate::{
  event::{Timestamp, VerifiedEvent},
  filter::Filter,
  replaceable::{ReplaceableEvent, ReplaceableIndex, ReplaceableKey},
};

///
/// A cached event and the relays that delivered it.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInfo {
  pub event: VerifiedEvent,
  pub relays: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
  /// First time this event is seen.
  New,
  /// Known event, delivered by a relay that had not sent it before.
  NewRelay,
  Duplicate,
}

impl Ingested {
  pub fn changed(&self) -> bool {
    !matches!(self, Self::Duplicate)
  }
}

///
/// In-memory event store: events in arrival order plus an index keyed by
/// the whole event for duplicate detection, and the replaceable views.
///
/// Only verified events get in.
///
#[derive(Debug, Default)]
pub struct EventCache {
  events: Vec<EventInfo>,
  index: HashMap<VerifiedEvent, usize>,
  replaceables: ReplaceableIndex,
}

impl EventCache {
  pub fn new() -> Self {
    Self::default()
  }

  ///
  /// Stores an event received from `relay_url`. Returns what changed and
  /// the replaceable view it updated, if any.
  ///
  pub fn insert(
    &mut self,
    event: VerifiedEvent,
    relay_url: &str,
  ) -> (Ingested, Option<ReplaceableKey>) {
    if let Some(&position) = self.index.get(&event) {
      let inserted = self.events[position].relays.insert(relay_url.to_string());
      let ingested = if inserted {
        Ingested::NewRelay
      } else {
        Ingested::Duplicate
      };
      return (ingested, None);
    }

    let replaceable = self.replaceables.offer(&event);
    self.index.insert(event.clone(), self.events.len());
    self.events.push(EventInfo {
      event,
      relays: BTreeSet::from([relay_url.to_string()]),
    });
    (Ingested::New, replaceable)
  }

  pub fn len(&self) -> usize {
    self.events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }

  pub fn events(&self) -> &[EventInfo] {
    &self.events
  }

  pub fn get(&self, event: &VerifiedEvent) -> Option<&EventInfo> {
    self.index.get(event).map(|&position| &self.events[position])
  }

  ///
  /// Cached events matching `filter`, newest first. Events with the same
  /// `created_at` keep their arrival order. A `limit` keeps the newest N.
  ///
  pub fn matching(&self, filter: &Filter) -> Vec<EventInfo> {
    let mut matches: Vec<EventInfo> = self
      .events
      .iter()
      .filter(|info| filter.matches(&info.event))
      .cloned()
      .collect();
    matches.sort_by(|a, b| b.event.created_at.cmp(&a.event.created_at));

    if let Some(limit) = filter.limit {
      matches.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }
    matches
  }

  ///
  /// `created_at` of the newest cached match delivered by `relay_url`, the
  /// anchor for a live tail on that relay.
  ///
  pub fn newest_created_at(&self, filter: &Filter, relay_url: &str) -> Option<Timestamp> {
    self.created_at_from(filter, relay_url).max()
  }

  /// `created_at` of the oldest cached match delivered by `relay_url`.
  pub fn oldest_created_at(&self, filter: &Filter, relay_url: &str) -> Option<Timestamp> {
    self.created_at_from(filter, relay_url).min()
  }

  fn created_at_from<'a>(
    &'a self,
    filter: &'a Filter,
    relay_url: &'a str,
  ) -> impl Iterator<Item = Timestamp> + 'a {
    self
      .events
      .iter()
      .filter(move |info| info.relays.contains(relay_url) && filter.matches(&info.event))
      .map(|info| info.event.created_at)
  }

  pub fn replaceable(&self, key: &ReplaceableKey) -> Option<&ReplaceableEvent> {
    self.replaceables.get(key)
  }
}
