use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Holds the types of `<marker>`
/// that an event tag (`"e"`) can have (NIP-10).
///
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Marker {
  Root,
  Reply,
  Mention,
  #[default]
  Default,
}

impl fmt::Display for Marker {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Self::Root => write!(f, "root"),
      Self::Reply => write!(f, "reply"),
      Self::Mention => write!(f, "mention"),
      Self::Default => write!(f, ""),
    }
  }
}

impl<S> From<S> for Marker
where
  S: Into<String>,
{
  fn from(s: S) -> Self {
    let s: String = s.into();
    match s.as_str() {
      "root" => Self::Root,
      "reply" => Self::Reply,
      "mention" => Self::Mention,
      _ => Self::Default,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagKind {
  /// `["p", <pub-key>, <relay-url>, <petname>]`
  PubKey,
  /// `["e", <event-id>, <relay-url>, <marker>]`
  ///
  /// where:
  ///   - `<event-id>`: id of the other event that this event is replying/mentioning to.
  ///   - `<relay-url>`: URL of a recommended relay associated with this reference.
  ///      It is OPTIONAL. Ideally it would exist, but can be left with just `""`.
  ///   - `<marker>`: the type of event it is referencing. It is OPTIONAL.
  ///
  Event,
  /// Custom tag
  Custom(String),
}

impl fmt::Display for TagKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Self::PubKey => write!(f, "p"),
      Self::Event => write!(f, "e"),
      Self::Custom(tag) => write!(f, "{tag}"),
    }
  }
}

impl<S> From<S> for TagKind
where
  S: Into<String>,
{
  fn from(s: S) -> Self {
    let s: String = s.into();
    match s.as_str() {
      "p" => Self::PubKey,
      "e" => Self::Event,
      tag => Self::Custom(tag.to_string()),
    }
  }
}

///
/// A tag is an ordered list of strings whose first element names it.
///
/// The raw strings are kept untouched: the event id is computed over them,
/// so any normalisation would break signatures of events received from relays.
///
///   `["p", <32-bytes hex of the key>, <recommended relay URL>]`
///   ```json
///   ["p", "02c7e1b1e9c175ab2d100baf1d5a66e73ecc044e9f8093d0c965741f26aa3abf76", ""]
///   ```
///
///   `["e", <32-bytes hex of the id of another event>, <recommended relay URL>, <marker>]`
///   ```json
///   ["e", "688787d8ff144c502c7f5cffaafe2cc588d86079f9de88304c26b0cb99ce91c6", "wss://relay.damus.io", "root"]
///   ```
///
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub Vec<String>);

impl Tag {
  pub fn new<S: Into<String>>(values: Vec<S>) -> Self {
    Self(values.into_iter().map(|v| v.into()).collect())
  }

  /// `["e", <id>, <relay>, <marker>]`, dropping empty trailing fields.
  pub fn event(id: &str, relay: Option<&str>, marker: Option<Marker>) -> Self {
    let mut tag = vec![TagKind::Event.to_string(), id.to_string()];
    let marker = marker.filter(|marker| *marker != Marker::Default);
    if relay.is_some() || marker.is_some() {
      tag.push(relay.unwrap_or_default().to_string());
    }
    if let Some(marker) = marker {
      tag.push(marker.to_string());
    }
    Self(tag)
  }

  /// `["p", <pubkey>, <relay>, <petname>]`, dropping empty trailing fields.
  pub fn pubkey(pubkey: &str, relay: Option<&str>, petname: Option<&str>) -> Self {
    let mut tag = vec![TagKind::PubKey.to_string(), pubkey.to_string()];
    if relay.is_some() || petname.is_some() {
      tag.push(relay.unwrap_or_default().to_string());
    }
    if let Some(petname) = petname {
      tag.push(petname.to_string());
    }
    Self(tag)
  }

  pub fn kind(&self) -> Option<TagKind> {
    self.0.first().map(TagKind::from)
  }

  pub fn name(&self) -> Option<&str> {
    self.0.first().map(String::as_str)
  }

  /// Second element: the id, pubkey or value the tag carries.
  pub fn value(&self) -> Option<&str> {
    self.0.get(1).map(String::as_str)
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.0.get(index).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Third element when it parses as a URL.
  pub fn relay_url(&self) -> Option<Url> {
    self.get(2).and_then(|relay| Url::parse(relay).ok())
  }

  pub fn marker(&self) -> Option<Marker> {
    self.get(3).map(Marker::from).filter(|marker| *marker != Marker::Default)
  }

  pub fn is_event(&self) -> bool {
    self.kind() == Some(TagKind::Event)
  }

  pub fn is_pubkey(&self) -> bool {
    self.kind() == Some(TagKind::PubKey)
  }

  pub fn as_vec(&self) -> Vec<String> {
    self.0.clone()
  }
}

impl From<Vec<String>> for Tag {
  fn from(values: Vec<String>) -> Self {
    Self(values)
  }
}

impl From<Tag> for Vec<String> {
  fn from(tag: Tag) -> Self {
    tag.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(test)]
  use pretty_assertions::assert_eq;

  const ID: &str = "688787d8ff144c502c7f5cffaafe2cc588d86079f9de88304c26b0cb99ce91c6";

  #[test]
  fn builds_event_tags() {
    assert_eq!(Tag::event(ID, None, None).as_vec(), vec!["e", ID]);
    assert_eq!(
      Tag::event(ID, None, Some(Marker::Root)).as_vec(),
      vec!["e", ID, "", "root"]
    );
    assert_eq!(
      Tag::event(ID, Some("wss://relay.damus.io"), Some(Marker::Reply)).as_vec(),
      vec!["e", ID, "wss://relay.damus.io", "reply"]
    );
  }

  #[test]
  fn builds_pubkey_tags() {
    assert_eq!(Tag::pubkey("abc", None, None).as_vec(), vec!["p", "abc"]);
    assert_eq!(
      Tag::pubkey("abc", None, Some("alice")).as_vec(),
      vec!["p", "abc", "", "alice"]
    );
  }

  #[test]
  fn reads_fields() {
    let tag = Tag::new(vec!["e", ID, "wss://relay.damus.io", "root"]);
    assert!(tag.is_event());
    assert!(!tag.is_pubkey());
    assert_eq!(tag.value(), Some(ID));
    assert_eq!(tag.relay_url().unwrap().as_str(), "wss://relay.damus.io/");
    assert_eq!(tag.marker(), Some(Marker::Root));

    let custom = Tag::new(vec!["t", "nostr"]);
    assert_eq!(custom.kind(), Some(TagKind::Custom("t".to_string())));
    assert_eq!(custom.relay_url(), None);
    assert_eq!(Tag::default().kind(), None);
  }

  #[test]
  fn serializes_as_plain_array() {
    let tag = Tag::new(vec!["p", "abc", ""]);
    assert_eq!(serde_json::to_string(&tag).unwrap(), r#"["p","abc",""]"#);
    let parsed: Tag = serde_json::from_str(r#"["e","x","","mention","extra"]"#).unwrap();
    assert_eq!(parsed.len(), 5);
    assert_eq!(parsed.marker(), Some(Marker::Mention));
  }
}
