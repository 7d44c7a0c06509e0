//! NIP-19 human readable identifiers.
//!
//! <https://github.com/nostr-protocol/nips/blob/master/19.md>

use std::fmt;
use std::str::FromStr;

use crate::bech32;

const HRP_PUBLIC_KEY: &str = "npub";
const HRP_SECRET_KEY: &str = "nsec";
const HRP_NOTE: &str = "note";
const HRP_EVENT: &str = "nevent";
const HRP_PROFILE: &str = "nprofile";

const URI_PREFIX: &str = "nostr:";

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

/// [`Nip19`] error
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  #[error(transparent)]
  Bech32(#[from] bech32::Error),
  #[error("unknown prefix {0}")]
  UnknownPrefix(String),
  #[error("expected {expected} bytes, got {got}")]
  InvalidLength { expected: usize, got: usize },
  #[error("truncated TLV record")]
  TruncatedTlv,
  #[error("zero-length TLV record of type {0}")]
  EmptyTlv(u8),
  #[error("TLV record {0} is missing")]
  MissingTlv(u8),
  #[error("TLV value too long ({0} bytes)")]
  TlvTooLong(usize),
  #[error("relay hint is not valid UTF-8")]
  InvalidRelay,
}

/// A single `type | length | value` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvRecord {
  pub kind: u8,
  pub value: Vec<u8>,
}

///
/// Parses a TLV byte stream.
///
/// Fails closed: a record whose header or value runs past the end of
/// the buffer, or whose length is zero, invalidates the whole stream.
///
pub fn parse_tlv(data: &[u8]) -> Result<Vec<TlvRecord>, Error> {
  let mut records = vec![];
  let mut rest = data;

  while !rest.is_empty() {
    if rest.len() < 2 {
      return Err(Error::TruncatedTlv);
    }
    let (kind, length) = (rest[0], usize::from(rest[1]));
    if length == 0 {
      return Err(Error::EmptyTlv(kind));
    }
    let value = rest.get(2..2 + length).ok_or(Error::TruncatedTlv)?;
    records.push(TlvRecord {
      kind,
      value: value.to_vec(),
    });
    rest = &rest[2 + length..];
  }

  Ok(records)
}

/// Serializes records back into a TLV byte stream.
pub fn write_tlv(records: &[TlvRecord]) -> Result<Vec<u8>, Error> {
  let mut data = vec![];
  for record in records {
    let length = u8::try_from(record.value.len()).map_err(|_| Error::TlvTooLong(record.value.len()))?;
    if length == 0 {
      return Err(Error::EmptyTlv(record.kind));
    }
    data.push(record.kind);
    data.push(length);
    data.extend_from_slice(&record.value);
  }
  Ok(data)
}

fn to_32_bytes(data: &[u8]) -> Result<[u8; 32], Error> {
  data.try_into().map_err(|_| Error::InvalidLength {
    expected: 32,
    got: data.len(),
  })
}

/// `nevent` payload: an event pointer with optional hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPointer {
  pub id: [u8; 32],
  pub relays: Vec<String>,
  pub author: Option<[u8; 32]>,
  pub kind: Option<u32>,
}

/// `nprofile` payload: a public key with relay hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePointer {
  pub public_key: [u8; 32],
  pub relays: Vec<String>,
}

/// Every identifier this client understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nip19 {
  PublicKey([u8; 32]),
  SecretKey([u8; 32]),
  Note([u8; 32]),
  Event(EventPointer),
  Profile(ProfilePointer),
}

impl Nip19 {
  pub fn hrp(&self) -> &'static str {
    match self {
      Self::PublicKey(_) => HRP_PUBLIC_KEY,
      Self::SecretKey(_) => HRP_SECRET_KEY,
      Self::Note(_) => HRP_NOTE,
      Self::Event(_) => HRP_EVENT,
      Self::Profile(_) => HRP_PROFILE,
    }
  }

  /// Hex of the key or id this identifier points to.
  pub fn hex(&self) -> String {
    match self {
      Self::PublicKey(bytes) | Self::SecretKey(bytes) | Self::Note(bytes) => hex::encode(bytes),
      Self::Event(pointer) => hex::encode(pointer.id),
      Self::Profile(pointer) => hex::encode(pointer.public_key),
    }
  }

  ///
  /// Parses any supported identifier. A leading `nostr:` URI scheme is stripped.
  ///
  /// ## Examples
  ///
  /// ```
  ///   use nostr_engine::nip19::Nip19;
  ///
  ///   let npub = "nostr:npub10elfcs4fr0l0r8af98jlmgdh9c8tcxjvz9qkw038js35mp4dma8qzvjptg";
  ///   let parsed = Nip19::parse(npub).unwrap();
  ///   assert_eq!(parsed.hex(), "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e");
  /// ```
  pub fn parse(s: &str) -> Result<Self, Error> {
    let s = s.trim();
    let s = s.strip_prefix(URI_PREFIX).unwrap_or(s);
    let (hrp, data) = bech32::decode(s)?;

    match hrp.as_str() {
      HRP_PUBLIC_KEY => Ok(Self::PublicKey(to_32_bytes(&data)?)),
      HRP_SECRET_KEY => Ok(Self::SecretKey(to_32_bytes(&data)?)),
      HRP_NOTE => Ok(Self::Note(to_32_bytes(&data)?)),
      HRP_EVENT => Self::parse_event(&data),
      HRP_PROFILE => Self::parse_profile(&data),
      _ => Err(Error::UnknownPrefix(hrp)),
    }
  }

  fn parse_event(data: &[u8]) -> Result<Self, Error> {
    let mut id = None;
    let mut relays = vec![];
    let mut author = None;
    let mut kind = None;

    for record in parse_tlv(data)? {
      match record.kind {
        TLV_SPECIAL => id = Some(to_32_bytes(&record.value)?),
        TLV_RELAY => relays.push(String::from_utf8(record.value).map_err(|_| Error::InvalidRelay)?),
        TLV_AUTHOR => author = Some(to_32_bytes(&record.value)?),
        TLV_KIND => {
          let bytes: [u8; 4] = record.value.as_slice().try_into().map_err(|_| Error::InvalidLength {
            expected: 4,
            got: record.value.len(),
          })?;
          kind = Some(u32::from_be_bytes(bytes));
        }
        _ => {}
      }
    }

    Ok(Self::Event(EventPointer {
      id: id.ok_or(Error::MissingTlv(TLV_SPECIAL))?,
      relays,
      author,
      kind,
    }))
  }

  fn parse_profile(data: &[u8]) -> Result<Self, Error> {
    let mut public_key = None;
    let mut relays = vec![];

    for record in parse_tlv(data)? {
      match record.kind {
        TLV_SPECIAL => public_key = Some(to_32_bytes(&record.value)?),
        TLV_RELAY => relays.push(String::from_utf8(record.value).map_err(|_| Error::InvalidRelay)?),
        _ => {}
      }
    }

    Ok(Self::Profile(ProfilePointer {
      public_key: public_key.ok_or(Error::MissingTlv(TLV_SPECIAL))?,
      relays,
    }))
  }

  fn relay_records(relays: &[String]) -> impl Iterator<Item = TlvRecord> + '_ {
    relays.iter().filter(|relay| !relay.is_empty()).map(|relay| TlvRecord {
      kind: TLV_RELAY,
      value: relay.as_bytes().to_vec(),
    })
  }

  /// Encodes into the bech32 text form.
  pub fn encode(&self) -> Result<String, Error> {
    let data = match self {
      Self::PublicKey(bytes) | Self::SecretKey(bytes) | Self::Note(bytes) => bytes.to_vec(),
      Self::Event(pointer) => {
        let mut records = vec![TlvRecord {
          kind: TLV_SPECIAL,
          value: pointer.id.to_vec(),
        }];
        records.extend(Self::relay_records(&pointer.relays));
        if let Some(author) = pointer.author {
          records.push(TlvRecord {
            kind: TLV_AUTHOR,
            value: author.to_vec(),
          });
        }
        if let Some(kind) = pointer.kind {
          records.push(TlvRecord {
            kind: TLV_KIND,
            value: kind.to_be_bytes().to_vec(),
          });
        }
        write_tlv(&records)?
      }
      Self::Profile(pointer) => {
        let mut records = vec![TlvRecord {
          kind: TLV_SPECIAL,
          value: pointer.public_key.to_vec(),
        }];
        records.extend(Self::relay_records(&pointer.relays));
        write_tlv(&records)?
      }
    };

    Ok(bech32::encode(self.hrp(), &data)?)
  }

  /// `nostr:` URI form.
  pub fn to_uri(&self) -> Result<String, Error> {
    Ok(format!("{URI_PREFIX}{}", self.encode()?))
  }
}

impl FromStr for Nip19 {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl fmt::Display for Nip19 {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self.encode() {
      Ok(encoded) => write!(f, "{encoded}"),
      Err(_) => Err(fmt::Error),
    }
  }
}

/// Hex public key → `npub`.
pub fn public_key_to_npub(hex_public_key: &str) -> Result<String, Error> {
  let bytes = hex::decode(hex_public_key).map_err(|_| Error::InvalidLength {
    expected: 32,
    got: hex_public_key.len() / 2,
  })?;
  Nip19::PublicKey(to_32_bytes(&bytes)?).encode()
}

/// Hex event id → `note`.
pub fn event_id_to_note(hex_id: &str) -> Result<String, Error> {
  let bytes = hex::decode(hex_id).map_err(|_| Error::InvalidLength {
    expected: 32,
    got: hex_id.len() / 2,
  })?;
  Nip19::Note(to_32_bytes(&bytes)?).encode()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(test)]
  use pretty_assertions::assert_eq;

  const NPUB: &str = "npub10elfcs4fr0l0r8af98jlmgdh9c8tcxjvz9qkw038js35mp4dma8qzvjptg";
  const NPUB_HEX: &str = "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e";
  const NSEC: &str = "nsec1vl029mgpspedva04g90vltkh6fvh240zqtv9k0t9af8935ke9laqsnlfe5";
  const NSEC_HEX: &str = "67dea2ed018072d675f5415ecfaed7d2597555e202d85b3d65ea4e58d2d92ffa";
  const NPROFILE: &str = "nprofile1qqsrhuxx8l9ex335q7he0f09aej04zpazpl0ne2cgukyawd24mayt8gpp4mhxue69uhhytnc9e3k7mgpz4mhxue69uhkg6nzv9ejuumpv34kytnrdaksjlyr9p";

  #[test]
  fn parses_keys() {
    assert_eq!(Nip19::parse(NPUB).unwrap().hex(), NPUB_HEX);
    assert!(matches!(Nip19::parse(NPUB).unwrap(), Nip19::PublicKey(_)));

    let nsec = Nip19::parse(NSEC).unwrap();
    assert!(matches!(nsec, Nip19::SecretKey(_)));
    assert_eq!(nsec.hex(), NSEC_HEX);
    assert_eq!(nsec.encode().unwrap(), NSEC);
  }

  #[test]
  fn parses_nprofile_with_relay_hints() {
    let expected = Nip19::Profile(ProfilePointer {
      public_key: to_32_bytes(
        &hex::decode("3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d").unwrap(),
      )
      .unwrap(),
      relays: vec!["wss://r.x.com".to_string(), "wss://djbas.sadkb.com".to_string()],
    });

    let parsed = Nip19::parse(NPROFILE).unwrap();
    assert_eq!(parsed, expected);
    assert_eq!(expected.encode().unwrap(), NPROFILE);
  }

  #[test]
  fn nevent_round_trip_keeps_every_field() {
    let event = Nip19::Event(EventPointer {
      id: [0xab; 32],
      relays: vec!["wss://relay.damus.io".to_string(), "wss://nos.lol".to_string()],
      author: Some([0x11; 32]),
      kind: Some(40),
    });

    let encoded = event.to_uri().unwrap();
    assert!(encoded.starts_with("nostr:nevent1"));
    assert_eq!(Nip19::parse(&encoded).unwrap(), event);
  }

  #[test]
  fn note_helpers_encode_hex() {
    let note = event_id_to_note(NPUB_HEX).unwrap();
    assert!(note.starts_with("note1"));
    assert_eq!(Nip19::parse(&note).unwrap(), Nip19::Note(to_32_bytes(&hex::decode(NPUB_HEX).unwrap()).unwrap()));
    assert_eq!(public_key_to_npub(NPUB_HEX).unwrap(), NPUB);
    assert!(public_key_to_npub("zz").is_err());
  }

  #[test]
  fn rejects_wrong_payload_sizes_and_prefixes() {
    let short = bech32::encode("npub", &[1u8; 31]).unwrap();
    assert_eq!(
      Nip19::parse(&short),
      Err(Error::InvalidLength { expected: 32, got: 31 })
    );

    let unknown = bech32::encode("nfoo", &[1u8; 32]).unwrap();
    assert_eq!(Nip19::parse(&unknown), Err(Error::UnknownPrefix("nfoo".to_string())));
  }

  #[test]
  fn tlv_fails_closed() {
    assert_eq!(parse_tlv(&[0]), Err(Error::TruncatedTlv));
    assert_eq!(parse_tlv(&[0, 4, 1, 2]), Err(Error::TruncatedTlv));
    assert_eq!(parse_tlv(&[1, 0]), Err(Error::EmptyTlv(1)));
    assert_eq!(
      parse_tlv(&[1, 2, b'a', b'b', 3, 1, 9]).unwrap(),
      vec![
        TlvRecord { kind: 1, value: b"ab".to_vec() },
        TlvRecord { kind: 3, value: vec![9] },
      ]
    );
  }

  #[test]
  fn nevent_without_id_record_is_rejected() {
    let data = write_tlv(&[TlvRecord {
      kind: TLV_RELAY,
      value: b"wss://relay.example".to_vec(),
    }])
    .unwrap();
    let encoded = bech32::encode("nevent", &data).unwrap();
    assert_eq!(Nip19::parse(&encoded), Err(Error::MissingTlv(TLV_SPECIAL)));

    let truncated = bech32::encode("nevent", &[0, 32, 1, 2, 3]).unwrap();
    assert_eq!(Nip19::parse(&truncated), Err(Error::TruncatedTlv));
  }
}
