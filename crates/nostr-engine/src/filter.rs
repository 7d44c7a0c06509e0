use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::{kind::EventKind, Event, PubKey, Timestamp};

/// [`Filter`] error
#[derive(thiserror::Error, Debug)]
pub enum Error {
  /// Error serializing or deserializing JSON data
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error("Filter must be a JSON object")]
  NotAnObject,
}

///
/// Filters are data structures that clients send to relays
/// to request data from other clients.
/// The attributes of a Filter work as `&&` (in other words, all the conditions set must be present
/// in the event in order to pass the filter). Inside one attribute the values work as `||`.
/// P.S.: a "REQ" communication from the client can have multiple filters. In this case, all filters will be
/// used as `||` operator: anything that matches any of the filters will be sent.
///
/// - ids: a list of event ids
/// - authors: a list of publickeys, the pubkey of an event must be one of these
/// - kinds: a list of kind numbers
/// - tags: `"#<name>": [values]`, the event must have a `[<name>, <value>, ...]` tag
///   with a value in the list, for every name
/// - since: a timestamp. Events must be at least this new to pass
/// - until: a timestamp. Events must be at most this old to pass
/// - limit: maximum number of events to be returned in the initial query
///
/// A filter with `until` is a backward page: a one-shot query closed on EOSE.
/// Without it, it is a standing subscription.
///
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
  pub ids: Option<Vec<String>>,
  pub authors: Option<Vec<PubKey>>,
  pub kinds: Option<Vec<EventKind>>,
  /// Tag name (without `#`) to accepted values.
  pub tags: BTreeMap<String, Vec<String>>,
  pub since: Option<Timestamp>,
  pub until: Option<Timestamp>,
  pub limit: Option<u64>,
}

impl Filter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_ids(&mut self, ids: Vec<String>) -> &mut Self {
    if ids.is_empty() {
      return self;
    }

    self.ids = Some(ids);
    self
  }

  pub fn add_authors(&mut self, authors: Vec<String>) -> &mut Self {
    if authors.is_empty() {
      return self;
    }

    self.authors = Some(authors);
    self
  }

  pub fn add_kinds(&mut self, kinds: Vec<u64>) -> &mut Self {
    if kinds.is_empty() {
      return self;
    }

    self.kinds = Some(kinds.into_iter().map(EventKind::from).collect());
    self
  }

  pub fn add_tag<S: Into<String>>(&mut self, name: S, values: Vec<String>) -> &mut Self {
    if values.is_empty() {
      return self;
    }

    self.tags.insert(name.into(), values);
    self
  }

  pub fn add_e_tags(&mut self, e_tags: Vec<String>) -> &mut Self {
    self.add_tag("e", e_tags)
  }

  pub fn add_p_tags(&mut self, p_tags: Vec<String>) -> &mut Self {
    self.add_tag("p", p_tags)
  }

  pub fn add_since(&mut self, since: u64) -> &mut Self {
    self.since = Some(since);
    self
  }

  pub fn add_until(&mut self, until: u64) -> &mut Self {
    self.until = Some(until);
    self
  }

  pub fn add_limit(&mut self, limit: u64) -> &mut Self {
    self.limit = Some(limit);
    self
  }

  /// Copy anchored after the newest cached event. Never carries `until`.
  pub fn live_tail(&self, since: Timestamp) -> Self {
    Self {
      since: Some(since),
      until: None,
      ..self.clone()
    }
  }

  /// Copy anchored before the oldest cached event. Never carries `since`.
  pub fn backfill(&self, until: Timestamp) -> Self {
    Self {
      since: None,
      until: Some(until),
      ..self.clone()
    }
  }

  pub fn is_one_shot(&self) -> bool {
    self.until.is_some()
  }

  pub fn matches(&self, event: &Event) -> bool {
    if !contains_or_empty(&self.ids, &event.id) {
      return false;
    }

    if !contains_or_empty(&self.authors, &event.pubkey) {
      return false;
    }

    if !contains_or_empty(&self.kinds, &event.kind) {
      return false;
    }

    let tags_match = self.tags.iter().all(|(name, values)| {
      event.tags.iter().any(|tag| {
        tag.name() == Some(name.as_str())
          && tag.value().map_or(false, |value| values.iter().any(|v| v == value))
      })
    });
    if !tags_match {
      return false;
    }

    match self.since {
      Some(since) if since > 0 && event.created_at < since => return false,
      _ => {}
    }

    match self.until {
      Some(until) if until > 0 && event.created_at > until => return false,
      _ => {}
    }

    true
  }

  /// Serialize as [`Value`]
  pub fn as_value(&self) -> Value {
    serde_json::to_value(self).unwrap_or_default()
  }

  /// Deserializes from [`Value`]. Unknown keys are ignored.
  pub fn from_value(value: Value) -> Result<Self, Error> {
    let Value::Object(map) = value else {
      return Err(Error::NotAnObject);
    };

    let mut filter = Self::new();
    for (key, value) in map {
      match key.as_str() {
        "ids" => filter.ids = Some(serde_json::from_value(value)?),
        "authors" => filter.authors = Some(serde_json::from_value(value)?),
        "kinds" => filter.kinds = Some(serde_json::from_value(value)?),
        "since" => filter.since = Some(serde_json::from_value(value)?),
        "until" => filter.until = Some(serde_json::from_value(value)?),
        "limit" => filter.limit = Some(serde_json::from_value(value)?),
        tag if tag.len() > 1 && tag.starts_with('#') => {
          filter
            .tags
            .insert(tag[1..].to_string(), serde_json::from_value(value)?);
        }
        unknown => log::debug!("[Filter::from_value] ignoring key {unknown}"),
      }
    }

    Ok(filter)
  }

  pub fn as_json(&self) -> String {
    self.as_value().to_string()
  }

  pub fn from_json<S: AsRef<str>>(data: S) -> Result<Self, Error> {
    let value: Value = serde_json::from_str(data.as_ref())?;
    Self::from_value(value)
  }

  pub fn from_json_array<S: AsRef<str>>(data: S) -> Result<Vec<Self>, Error> {
    let values: Vec<Value> = serde_json::from_str(data.as_ref())?;
    values.into_iter().map(Self::from_value).collect()
  }
}

fn contains_or_empty<T: PartialEq>(list: &Option<Vec<T>>, item: &T) -> bool {
  match list {
    Some(list) if !list.is_empty() => list.contains(item),
    _ => true,
  }
}

impl Serialize for Filter {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut map = serializer.serialize_map(None)?;
    if let Some(ids) = &self.ids {
      map.serialize_entry("ids", ids)?;
    }
    if let Some(authors) = &self.authors {
      map.serialize_entry("authors", authors)?;
    }
    if let Some(kinds) = &self.kinds {
      map.serialize_entry("kinds", kinds)?;
    }
    for (name, values) in &self.tags {
      map.serialize_entry(&format!("#{name}"), values)?;
    }
    if let Some(since) = &self.since {
      map.serialize_entry("since", since)?;
    }
    if let Some(until) = &self.until {
      map.serialize_entry("until", until)?;
    }
    if let Some(limit) = &self.limit {
      map.serialize_entry("limit", limit)?;
    }
    map.end()
  }
}

impl<'de> Deserialize<'de> for Filter {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let value = Value::Object(Map::deserialize(deserializer)?);
    Self::from_value(value).map_err(de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::tag::Tag;

  #[cfg(test)]
  use pretty_assertions::assert_eq;
  use serde_json::json;

  const AUTHOR: &str = "02c7e1b1e9c175ab2d100baf1d5a66e73ecc044e9f8093d0c965741f26aa3abf76";
  const OTHER_AUTHOR: &str = "02c891b1e9c175ab2d100baf1d5a66e73ecc044e9f8093d0c965741f26aa3abf76";

  fn make_event(pubkey: &str, kind: u64, created_at: u64, tags: Vec<Tag>) -> Event {
    Event {
      id: String::from("05b25af3"),
      pubkey: pubkey.to_string(),
      kind: EventKind::from(kind),
      created_at,
      tags,
      ..Default::default()
    }
  }

  #[test]
  fn test_filter_chaining_methods() {
    let mut filter = Filter::new();
    filter
      .add_ids(vec![String::from("id1")])
      .add_authors(vec![String::from("author1")])
      .add_kinds(vec![0, 1])
      .add_e_tags(vec![String::from("e_tag1")])
      .add_p_tags(vec![])
      .add_since(10)
      .add_until(11)
      .add_limit(12);

    assert_eq!(filter.ids, Some(vec![String::from("id1")]));
    assert_eq!(filter.kinds, Some(vec![EventKind::Metadata, EventKind::Text]));
    assert_eq!(filter.tags.get("e"), Some(&vec![String::from("e_tag1")]));
    assert_eq!(filter.tags.get("p"), None);
    assert_eq!((filter.since, filter.until, filter.limit), (Some(10), Some(11), Some(12)));
  }

  #[test]
  fn matches_kinds_and_authors() {
    let mut filter = Filter::new();
    filter.add_kinds(vec![1, 3]).add_authors(vec![AUTHOR.to_string()]);

    assert!(filter.matches(&make_event(AUTHOR, 1, 5, vec![])));
    assert!(filter.matches(&make_event(AUTHOR, 3, 5, vec![])));
    assert!(!filter.matches(&make_event(AUTHOR, 0, 5, vec![])));
    assert!(!filter.matches(&make_event(OTHER_AUTHOR, 1, 5, vec![])));
  }

  #[test]
  fn empty_filter_matches_everything() {
    let filter = Filter {
      ids: Some(vec![]),
      ..Default::default()
    };
    assert!(filter.matches(&make_event(AUTHOR, 42, 0, vec![])));
    assert!(Filter::new().matches(&Event::default()));
  }

  #[test]
  fn matches_tags_and_across_names_or_within() {
    let mut filter = Filter::new();
    filter
      .add_e_tags(vec![String::from("root1"), String::from("root2")])
      .add_p_tags(vec![AUTHOR.to_string()]);

    let both = make_event(
      OTHER_AUTHOR,
      1,
      5,
      vec![
        Tag::pubkey(OTHER_AUTHOR, None, None),
        Tag::event("root2", None, None),
        Tag::pubkey(AUTHOR, None, None),
      ],
    );
    let only_e = make_event(OTHER_AUTHOR, 1, 5, vec![Tag::event("root1", None, None)]);
    let wrong_value = make_event(
      OTHER_AUTHOR,
      1,
      5,
      vec![Tag::event("root3", None, None), Tag::pubkey(AUTHOR, None, None)],
    );
    let name_only = make_event(
      OTHER_AUTHOR,
      1,
      5,
      vec![Tag::new(vec!["e"]), Tag::pubkey(AUTHOR, None, None)],
    );

    assert!(filter.matches(&both));
    assert!(!filter.matches(&only_e));
    assert!(!filter.matches(&wrong_value));
    assert!(!filter.matches(&name_only));
  }

  #[test]
  fn matches_custom_tags() {
    let mut filter = Filter::new();
    filter.add_tag("t", vec![String::from("nostr")]);
    assert!(filter.matches(&make_event(AUTHOR, 1, 5, vec![Tag::new(vec!["t", "nostr"])])));
    assert!(!filter.matches(&make_event(AUTHOR, 1, 5, vec![Tag::new(vec!["t", "rust"])])));
  }

  #[test]
  fn time_bounds_are_inclusive_and_zero_means_unbounded() {
    let mut filter = Filter::new();
    filter.add_since(10).add_until(20);
    assert!(filter.matches(&make_event(AUTHOR, 1, 10, vec![])));
    assert!(filter.matches(&make_event(AUTHOR, 1, 20, vec![])));
    assert!(!filter.matches(&make_event(AUTHOR, 1, 9, vec![])));
    assert!(!filter.matches(&make_event(AUTHOR, 1, 21, vec![])));

    let zero = Filter {
      since: Some(0),
      until: Some(0),
      ..Default::default()
    };
    assert!(zero.matches(&make_event(AUTHOR, 1, 1_000_000, vec![])));
  }

  #[test]
  fn anchors_never_carry_both_bounds() {
    let mut filter = Filter::new();
    filter.add_kinds(vec![1]).add_since(3).add_until(9);

    let tail = filter.live_tail(50);
    assert_eq!((tail.since, tail.until), (Some(50), None));
    assert!(!tail.is_one_shot());

    let page = filter.backfill(40);
    assert_eq!((page.since, page.until), (None, Some(40)));
    assert!(page.is_one_shot());
    assert_eq!(page.kinds, filter.kinds);
  }

  #[test]
  fn serializes_to_wire_form() {
    let mut filter = Filter::new();
    filter
      .add_kinds(vec![1])
      .add_p_tags(vec![String::from("potato")])
      .add_limit(10);
    assert_eq!(filter.as_json(), r##"{"#p":["potato"],"kinds":[1],"limit":10}"##);
    assert_eq!(
      serde_json::to_string(&filter).unwrap(),
      r##"{"kinds":[1],"#p":["potato"],"limit":10}"##
    );
  }

  #[test]
  fn parses_wire_form_ignoring_unknown_keys() {
    let filter = Filter::from_json(
      json!({
        "#e": ["44b17a5acd66694cbdf5aea08968453658446368d978a15e61e599b8404d82c4"],
        "#p": ["potato"],
        "kinds": [1, 6, 7, 9735],
        "search": "ignored",
        "since": 5
      })
      .to_string(),
    )
    .unwrap();

    assert_eq!(filter.tags.len(), 2);
    assert_eq!(filter.tags["p"], vec![String::from("potato")]);
    assert_eq!(filter.kinds.as_ref().map(Vec::len), Some(4));
    assert_eq!(filter.since, Some(5));
    assert_eq!(Filter::from_json(filter.as_json()).unwrap(), filter);
  }

  #[test]
  fn parses_filter_arrays() {
    let filters = Filter::from_json_array(r##"[{"kinds":[1]},{"#t":["rust"]}]"##).unwrap();
    assert_eq!(filters.len(), 2);
    assert_eq!(filters[1].tags["t"], vec![String::from("rust")]);
  }

  #[test]
  fn rejects_malformed_filters() {
    assert!(matches!(Filter::from_json("[]"), Err(Error::NotAnObject)));
    assert!(Filter::from_json(r#"{"kinds":"1"}"#).is_err());
    assert!(serde_json::from_str::<Filter>(r#"{"since":-1}"#).is_err());
  }
}
