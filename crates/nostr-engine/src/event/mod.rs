use std::ops::Deref;
use std::time::{SystemTime, UNIX_EPOCH};

use secp256k1::Secp256k1;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// Event Modules
pub mod id;
pub mod kind;
pub mod tag;

use self::id::{EscapeMode, EventId};
use self::kind::EventKind;
use self::tag::{Tag, TagKind};
use crate::schnorr::{self, Keys, SchnorrError};

pub type PubKey = String;
pub type Timestamp = u64;

#[cfg(not(test))]
fn get_time_now() -> SystemTime {
  SystemTime::now()
}

#[allow(dead_code)]
pub(crate) const SECONDS_AFTER_UNIX_EPOCH_FOR_TIME_NOW_CONFIG_TEST: u64 = 20u64;
#[cfg(test)]
fn get_time_now() -> SystemTime {
  UNIX_EPOCH + std::time::Duration::new(SECONDS_AFTER_UNIX_EPOCH_FOR_TIME_NOW_CONFIG_TEST, 0)
}

/// Seconds since the unix epoch, `0` if the clock is before it.
pub fn timestamp_now() -> Timestamp {
  get_time_now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.as_secs())
    .unwrap_or_default()
}

/// [`Event`] error
#[derive(thiserror::Error, Debug)]
pub enum Error {
  /// Error serializing or deserializing JSON data
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error(transparent)]
  Hex(#[from] hex::FromHexError),
  #[error(transparent)]
  Schnorr(#[from] SchnorrError),
  #[error("Invalid data")]
  InvalidData,
  /// Id or signature do not check out
  #[error("Invalid event {0}")]
  InvalidEvent(String),
}

///
/// Event is the only object that exists in the Nostr protocol.
///
/// Two events are the same event only when every field is the same,
/// which is what [`Hash`] and [`Eq`] compare.
///
/// Example:
///   ```json
///   {
///     "id": "00960bd35499f8c63a4f65e79d6b1a2b7f1b8c97e76652325567b78c496350ae",
///     "pubkey": "614a695bab54e8dc98946abdb8ec019599ece6dada0c23890977d0fa128081d6",
///     "created_at": 1684589418,
///     "kind": 1,
///     "tags": [],
///     "content": "potato",
///     "sig": "bf073c935f71de50ec72bdb79f75b0bf32f9049305c3b22f97c06422c6f2edc86e0d7e07d7d7222678b238b1daee071be5f6fa653c611971395ec0d1c6407caf"
///   }
///   ```
///
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct Event {
  /// 32-bytes SHA256 of the serialized event data
  pub id: String,
  /// 32-bytes hex-encoded public key of the event creator
  pub pubkey: PubKey,
  /// Unix timestamp in seconds
  pub created_at: Timestamp,
  /// Kind of event
  pub kind: EventKind,
  /// An array of arrays with more info about the event,
  /// like, for example, if it is replying to someone.
  /// The kind of event will change its tags and contents.
  pub tags: Vec<Tag>,
  /// Arbitrary string. Meaning depends on the kind of the event.
  pub content: String,
  /// 64-bytes hex signature of the id field
  pub sig: String,
}

impl Event {
  pub fn new_without_signature(
    pubkey: PubKey,
    created_at: Timestamp,
    kind: EventKind,
    tags: Vec<Tag>,
    content: String,
    mode: EscapeMode,
  ) -> Self {
    let id = EventId::new(&pubkey, created_at, kind, &tags, &content, mode);
    Self {
      id: id.0,
      pubkey,
      created_at,
      kind,
      tags,
      content,
      ..Default::default()
    }
  }

  /// Builds, hashes and signs an event authored by `keys`.
  pub fn new_signed(
    keys: &Keys,
    created_at: Timestamp,
    kind: EventKind,
    tags: Vec<Tag>,
    content: String,
    mode: EscapeMode,
  ) -> Result<Self, Error> {
    let mut event =
      Self::new_without_signature(keys.public_key_hex(), created_at, kind, tags, content, mode);
    event.sign_event(keys)?;
    Ok(event)
  }

  /// Signs the current `id`. Every call draws new auxiliary randomness.
  pub fn sign_event(&mut self, keys: &Keys) -> Result<(), Error> {
    let secp = Secp256k1::new();
    let msg: [u8; 32] = hex::decode(&self.id)?
      .try_into()
      .map_err(|_| Error::InvalidEvent(self.id.clone()))?;
    let signature = schnorr::sign_schnorr(&secp, &msg, keys)?;
    self.sig = signature.to_string();
    Ok(())
  }

  /// Same event content, id recomputed with `mode` and signed again.
  pub fn resigned(&self, keys: &Keys, mode: EscapeMode) -> Result<Self, Error> {
    Self::new_signed(
      keys,
      self.created_at,
      self.kind,
      self.tags.clone(),
      self.content.clone(),
      mode,
    )
  }

  pub fn compute_id(&self, mode: EscapeMode) -> String {
    EventId::new(
      &self.pubkey,
      self.created_at,
      self.kind,
      &self.tags,
      &self.content,
      mode,
    )
    .0
  }

  /// Which escape mode produced the current id, if any. `Plain` wins when both do.
  pub fn id_escape_mode(&self) -> Option<EscapeMode> {
    [EscapeMode::Plain, EscapeMode::EscapedSlash]
      .into_iter()
      .find(|mode| self.compute_id(*mode) == self.id)
  }

  pub fn check_event_id(&self) -> bool {
    self.id_escape_mode().is_some()
  }

  pub fn check_event_signature(&self) -> bool {
    let (Ok(id), Ok(pubkey), Ok(sig)) = (
      hex::decode(&self.id),
      hex::decode(&self.pubkey),
      hex::decode(&self.sig),
    ) else {
      return false;
    };
    if id.len() != 32 || pubkey.len() != 32 || sig.len() != 64 {
      return false;
    }

    let secp = Secp256k1::verification_only();
    schnorr::verify_schnorr(&secp, &id, &sig, &pubkey).unwrap_or(false)
  }

  ///
  /// An event is valid when its id is the hash of its content and its
  /// signature verifies against its pubkey over that id.
  /// Malformed fields make it invalid, never panic.
  ///
  pub fn verify(&self) -> bool {
    self.check_event_signature() && self.check_event_id()
  }

  pub fn into_verified(self) -> Result<VerifiedEvent, Error> {
    if self.verify() {
      Ok(VerifiedEvent(self))
    } else {
      Err(Error::InvalidEvent(self.id))
    }
  }

  pub fn tags_of_kind(&self, kind: TagKind) -> impl Iterator<Item = &Tag> {
    self
      .tags
      .iter()
      .filter(move |tag| tag.kind().as_ref() == Some(&kind))
  }

  /// Values of the `e` tags, in order.
  pub fn event_tag_ids(&self) -> Vec<String> {
    self
      .tags_of_kind(TagKind::Event)
      .filter_map(|tag| tag.value().map(str::to_string))
      .collect()
  }

  /// Values of the `p` tags, in order.
  pub fn pubkey_tag_keys(&self) -> Vec<String> {
    self
      .tags_of_kind(TagKind::PubKey)
      .filter_map(|tag| tag.value().map(str::to_string))
      .collect()
  }

  /// Deserializes from [`Value`]
  pub fn from_value(msg: Value) -> Result<Self, Error> {
    serde_json::from_value(msg).map_err(Error::Json)
  }

  /// Serialize as [`Value`]
  pub fn as_value(&self) -> Value {
    json!(self)
  }

  /// Deserialize [`Event`] from JSON string
  pub fn from_json<S>(msg: S) -> Result<Self, Error>
  where
    S: Into<String>,
  {
    let msg: &str = &msg.into();

    if msg.is_empty() {
      return Err(Error::InvalidData);
    }

    let value: Value = serde_json::from_str(msg)?;
    Self::from_value(value)
  }

  /// Get [`Event`] in JSON string
  pub fn as_json(&self) -> String {
    // strings and numbers only, serializing cannot fail
    serde_json::to_string(self).unwrap_or_default()
  }
}

///
/// An [`Event`] whose id and signature have been checked.
///
/// The only way to build one is [`Event::into_verified`], so anything
/// holding a `VerifiedEvent` can skip verification.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VerifiedEvent(Event);

impl VerifiedEvent {
  pub fn into_inner(self) -> Event {
    self.0
  }
}

impl Deref for VerifiedEvent {
  type Target = Event;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl AsRef<Event> for VerifiedEvent {
  fn as_ref(&self) -> &Event {
    &self.0
  }
}

impl TryFrom<Event> for VerifiedEvent {
  type Error = Error;

  fn try_from(event: Event) -> Result<Self, Self::Error> {
    event.into_verified()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schnorr::generate_keys;

  #[cfg(test)]
  use pretty_assertions::assert_eq;

  const POTATO: &str = r#"{"content":"potato","created_at":1684589418,"id":"00960bd35499f8c63a4f65e79d6b1a2b7f1b8c97e76652325567b78c496350ae","kind":1,"pubkey":"614a695bab54e8dc98946abdb8ec019599ece6dada0c23890977d0fa128081d6","sig":"bf073c935f71de50ec72bdb79f75b0bf32f9049305c3b22f97c06422c6f2edc86e0d7e07d7d7222678b238b1daee071be5f6fa653c611971395ec0d1c6407caf","tags":[]}"#;

  #[test]
  fn timestamp_now_uses_the_test_clock() {
    assert_eq!(timestamp_now(), SECONDS_AFTER_UNIX_EPOCH_FOR_TIME_NOW_CONFIG_TEST);
  }

  struct Sut {
    keys: Keys,
  }

  fn make_sut() -> Sut {
    Sut {
      keys: generate_keys(),
    }
  }

  fn signed(sut: &Sut, content: &str, mode: EscapeMode) -> Event {
    Event::new_signed(
      &sut.keys,
      1684589418,
      EventKind::Text,
      vec![Tag::event(
        "688787d8ff144c502c7f5cffaafe2cc588d86079f9de88304c26b0cb99ce91c6",
        Some("wss://relay.damus.io"),
        None,
      )],
      content.to_string(),
      mode,
    )
    .unwrap()
  }

  #[test]
  fn verifies_known_event() {
    let event = Event::from_json(POTATO).unwrap();
    assert!(event.verify());
    assert_eq!(event.id_escape_mode(), Some(EscapeMode::Plain));
    assert_eq!(event.kind, EventKind::Text);
  }

  #[test]
  fn serializes_fields_in_wire_order() {
    let event = Event::from_json(POTATO).unwrap();
    assert_eq!(
      event.as_json(),
      r#"{"id":"00960bd35499f8c63a4f65e79d6b1a2b7f1b8c97e76652325567b78c496350ae","pubkey":"614a695bab54e8dc98946abdb8ec019599ece6dada0c23890977d0fa128081d6","created_at":1684589418,"kind":1,"tags":[],"content":"potato","sig":"bf073c935f71de50ec72bdb79f75b0bf32f9049305c3b22f97c06422c6f2edc86e0d7e07d7d7222678b238b1daee071be5f6fa653c611971395ec0d1c6407caf"}"#
    );
    assert_eq!(Event::from_json(event.as_json()).unwrap(), event);
  }

  #[test]
  fn rejects_empty_json() {
    assert!(matches!(Event::from_json(""), Err(Error::InvalidData)));
    assert!(Event::from_json("{}").is_err());
  }

  #[test]
  fn signs_verifiable_events_in_both_modes() {
    let sut = make_sut();
    let plain = signed(&sut, "https://nostr.com", EscapeMode::Plain);
    let escaped = signed(&sut, "https://nostr.com", EscapeMode::EscapedSlash);

    assert!(plain.verify());
    assert!(escaped.verify());
    assert_ne!(plain.id, escaped.id);
    assert_eq!(plain.id_escape_mode(), Some(EscapeMode::Plain));
    assert_eq!(escaped.id_escape_mode(), Some(EscapeMode::EscapedSlash));
    assert_eq!(plain.pubkey, sut.keys.public_key_hex());
  }

  #[test]
  fn signing_twice_gives_different_signatures() {
    let sut = make_sut();
    let mut event = signed(&sut, "hello", EscapeMode::Plain);
    let first = event.sig.clone();
    event.sign_event(&sut.keys).unwrap();
    assert_ne!(first, event.sig);
    assert!(event.verify());
  }

  #[test]
  fn tampered_events_do_not_verify() {
    let event = Event::from_json(POTATO).unwrap();

    let mut content = event.clone();
    content.content = String::from("tomato");
    assert!(!content.verify());

    let mut id = event.clone();
    id.id = content.compute_id(EscapeMode::Plain);
    assert!(!id.verify());

    let mut sig = event.clone();
    sig.sig.replace_range(0..2, "00");
    assert!(!sig.verify());
  }

  #[test]
  fn wrong_lengths_are_invalid_not_panics() {
    let event = Event::from_json(POTATO).unwrap();

    let mut short_sig = event.clone();
    short_sig.sig.truncate(126);
    assert!(!short_sig.verify());

    let mut long_pubkey = event.clone();
    long_pubkey.pubkey.push_str("00");
    assert!(!long_pubkey.verify());

    let mut short_id = event.clone();
    short_id.id.truncate(62);
    assert!(!short_id.verify());

    let mut not_hex = event;
    not_hex.sig = "zz".repeat(64);
    assert!(!not_hex.verify());
  }

  #[test]
  fn only_valid_events_become_verified() {
    let event = Event::from_json(POTATO).unwrap();
    let verified = event.clone().into_verified().unwrap();
    assert_eq!(*verified, event);

    let mut bad = event;
    bad.created_at += 1;
    assert!(matches!(
      VerifiedEvent::try_from(bad),
      Err(Error::InvalidEvent(_))
    ));
  }

  #[test]
  fn resigns_with_the_other_mode() {
    let sut = make_sut();
    let plain = signed(&sut, "a/b", EscapeMode::Plain);
    let escaped = plain.resigned(&sut.keys, EscapeMode::EscapedSlash).unwrap();
    assert_eq!(escaped.content, plain.content);
    assert_eq!(escaped.tags, plain.tags);
    assert_eq!(escaped.id_escape_mode(), Some(EscapeMode::EscapedSlash));
    assert!(escaped.verify());
  }

  #[test]
  fn reads_tag_values() {
    let sut = make_sut();
    let mut event = signed(&sut, "x", EscapeMode::Plain);
    event.tags.push(Tag::pubkey("abc", None, None));
    assert_eq!(
      event.event_tag_ids(),
      vec!["688787d8ff144c502c7f5cffaafe2cc588d86079f9de88304c26b0cb99ce91c6"]
    );
    assert_eq!(event.pubkey_tag_keys(), vec!["abc"]);
  }
}
