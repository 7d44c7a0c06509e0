use bitcoin_hashes::{sha256, Hash};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{kind::EventKind, tag::Tag, Timestamp};

///
/// How forward slashes are written when serializing an event for its id.
///
/// `serde_json` never escapes `/`, which is what NIP-01 asks for. Some older
/// clients (and relays validating with them) escape it as `\/`, so a relay
/// may reject an id computed the plain way.
///
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscapeMode {
  #[default]
  Plain,
  EscapedSlash,
}

impl EscapeMode {
  pub fn alternate(self) -> Self {
    match self {
      Self::Plain => Self::EscapedSlash,
      Self::EscapedSlash => Self::Plain,
    }
  }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct EventId(pub String);

impl EventId {
  ///
  /// This is the way used to serialize and get the SHA256. This will equal to `event.id`.
  /// 32-bytes lowercase hex-encoded sha256 of the the serialized event data
  ///
  /// <https://github.com/nostr-protocol/nips/blob/master/01.md>
  ///
  pub fn new(
    pubkey: &str,
    created_at: Timestamp,
    kind: EventKind,
    tags: &[Tag],
    content: &str,
    mode: EscapeMode,
  ) -> Self {
    let data = serialize_for_id(pubkey, created_at, kind, tags, content, mode);
    let hash = sha256::Hash::hash(data.as_bytes());
    Self(hash.to_string())
  }
}

///
/// `[0, <pubkey>, <created_at>, <kind>, <tags>, <content>]` without any whitespace.
///
pub fn serialize_for_id(
  pubkey: &str,
  created_at: Timestamp,
  kind: EventKind,
  tags: &[Tag],
  content: &str,
  mode: EscapeMode,
) -> String {
  let data = json!([0, pubkey, created_at, kind, tags, content]).to_string();
  match mode {
    EscapeMode::Plain => data,
    // a '/' can only show up inside a JSON string here
    EscapeMode::EscapedSlash => data.replace('/', "\\/"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(test)]
  use pretty_assertions::assert_eq;

  struct Sut {
    pubkey: String,
    created_at: Timestamp,
    kind: EventKind,
    tags: Vec<Tag>,
    content: String,
  }

  fn make_sut(content: &str) -> Sut {
    Sut {
      pubkey: String::from("614a695bab54e8dc98946abdb8ec019599ece6dada0c23890977d0fa128081d6"),
      created_at: 1684589418,
      kind: EventKind::Text,
      tags: vec![],
      content: content.to_string(),
    }
  }

  fn id_of(sut: &Sut, mode: EscapeMode) -> EventId {
    EventId::new(&sut.pubkey, sut.created_at, sut.kind, &sut.tags, &sut.content, mode)
  }

  #[test]
  fn creates_known_id() {
    let sut = make_sut("potato");
    assert_eq!(
      id_of(&sut, EscapeMode::Plain).0,
      "00960bd35499f8c63a4f65e79d6b1a2b7f1b8c97e76652325567b78c496350ae"
    );
  }

  #[test]
  fn is_deterministic_per_mode() {
    let sut = make_sut("see https://nostr.com/");
    assert_eq!(id_of(&sut, EscapeMode::Plain), id_of(&sut, EscapeMode::Plain));
    assert_eq!(
      id_of(&sut, EscapeMode::EscapedSlash),
      id_of(&sut, EscapeMode::EscapedSlash)
    );
    assert_ne!(id_of(&sut, EscapeMode::Plain), id_of(&sut, EscapeMode::EscapedSlash));
  }

  #[test]
  fn modes_agree_without_slashes() {
    let sut = make_sut("potato");
    assert_eq!(id_of(&sut, EscapeMode::Plain), id_of(&sut, EscapeMode::EscapedSlash));
  }

  #[test]
  fn serializes_without_whitespace() {
    let mut sut = make_sut("a \"quoted\"\nline /x");
    sut.pubkey = String::from("aa");
    sut.created_at = 5;
    sut.tags = vec![Tag::new(vec!["e", "x", "wss://r.x.com"])];

    assert_eq!(
      serialize_for_id(&sut.pubkey, sut.created_at, sut.kind, &sut.tags, &sut.content, EscapeMode::Plain),
      r#"[0,"aa",5,1,[["e","x","wss://r.x.com"]],"a \"quoted\"\nline /x"]"#
    );
    assert_eq!(
      serialize_for_id(
        &sut.pubkey,
        sut.created_at,
        sut.kind,
        &sut.tags,
        &sut.content,
        EscapeMode::EscapedSlash
      ),
      r#"[0,"aa",5,1,[["e","x","wss:\/\/r.x.com"]],"a \"quoted\"\nline \/x"]"#
    );
  }

  #[test]
  fn alternates() {
    assert_eq!(EscapeMode::Plain.alternate(), EscapeMode::EscapedSlash);
    assert_eq!(EscapeMode::EscapedSlash.alternate(), EscapeMode::Plain);
  }
}
