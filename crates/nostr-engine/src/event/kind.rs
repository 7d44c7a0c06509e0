use serde::de::{Deserialize, Deserializer, Error, Visitor};
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Defines the type of the event.
/// Different types will change the meaning of different keys
/// of event object.
/// `Text` is the default.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
  /// The content is set to a stringfied JSON object
  /// `{name: <username>, about: <string>, picture: <url, string>, nip05: <string>}`
  /// describing the user who created the event.
  /// Only the newest one per pubkey is meaningful.
  Metadata,
  /// The content is set to the plaintext content of a note.
  #[default]
  Text,
  /// The content is set to the URL (e.g.: `wss://somerelay.com`) of a relay
  /// the event creator wants to recommend to its followers.
  RecommendRelay,
  /// Follow list (NIP-02): `["p", <pubkey>, <relay>, <petname>]` tags.
  /// Only the newest one per pubkey is meaningful.
  Contacts,
  /// Public chat creation (NIP-28). The content carries the channel metadata.
  ChannelCreation,
  /// Public chat metadata update (NIP-28), pointing at its channel with an `e` tag.
  ChannelMetadata,
  /// Public chat message (NIP-28).
  ChannelMessage,
  /// List of pinned notes (NIP-51), `e` tags.
  PinList,
  /// List of public chats the user joined (NIP-51), `e` tags.
  ChannelList,
  /// A custom kind that we haven't implemented yet.
  Custom(u64),
}

impl EventKind {
  /// Get [`EventKind`] as `u64`
  pub fn as_u64(&self) -> u64 {
    (*self).into()
  }

  /// Kinds whose newest instance per author replaces the older ones.
  pub fn is_replaceable(&self) -> bool {
    matches!(
      self,
      Self::Metadata | Self::Contacts | Self::PinList | Self::ChannelList
    ) || (10000..20000).contains(&self.as_u64())
  }
}

impl FromStr for EventKind {
  type Err = ParseIntError;
  fn from_str(event_kind: &str) -> Result<Self, Self::Err> {
    let event_kind: u64 = event_kind.parse()?;
    Ok(Self::from(event_kind))
  }
}

impl From<u64> for EventKind {
  fn from(u: u64) -> Self {
    match u {
      0 => Self::Metadata,
      1 => Self::Text,
      2 => Self::RecommendRelay,
      3 => Self::Contacts,
      40 => Self::ChannelCreation,
      41 => Self::ChannelMetadata,
      42 => Self::ChannelMessage,
      10001 => Self::PinList,
      10005 => Self::ChannelList,
      x => Self::Custom(x),
    }
  }
}

impl From<EventKind> for u64 {
  fn from(e: EventKind) -> u64 {
    match e {
      EventKind::Metadata => 0,
      EventKind::Text => 1,
      EventKind::RecommendRelay => 2,
      EventKind::Contacts => 3,
      EventKind::ChannelCreation => 40,
      EventKind::ChannelMetadata => 41,
      EventKind::ChannelMessage => 42,
      EventKind::PinList => 10001,
      EventKind::ChannelList => 10005,
      EventKind::Custom(u) => u,
    }
  }
}

impl Serialize for EventKind {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_u64(From::from(*self))
  }
}

struct EventKindVisitor;

impl Visitor<'_> for EventKindVisitor {
  type Value = EventKind;

  fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "an unsigned number of maximum length of 64 bits")
  }

  fn visit_u64<E>(self, v: u64) -> Result<EventKind, E>
  where
    E: Error,
  {
    Ok(From::<u64>::from(v))
  }
}

impl<'de> Deserialize<'de> for EventKind {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    deserializer.deserialize_u64(EventKindVisitor)
  }
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.as_u64())
  }
}
