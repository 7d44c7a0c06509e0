//! Bech32 (BIP-173) encoding as used by NIP-19 identifiers.
//!
//! Only the original bech32 checksum constant is implemented; nostr
//! identifiers never use bech32m.

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];
const SEPARATOR: char = '1';
const CHECKSUM_LENGTH: usize = 6;
/// Separator must sit in `[1, MAX_SEPARATOR_POSITION)`.
const MAX_SEPARATOR_POSITION: usize = 83;

/// [`bech32`](self) error
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  #[error("missing separator")]
  MissingSeparator,
  #[error("invalid separator position {0}")]
  InvalidSeparatorPosition(usize),
  #[error("data part shorter than the checksum")]
  TooShort,
  #[error("invalid character {0:?}")]
  InvalidChar(char),
  #[error("mixed case string")]
  MixedCase,
  #[error("invalid checksum")]
  InvalidChecksum,
  #[error("invalid human readable part")]
  InvalidHrp,
  #[error("invalid data value {0} for {1}-bit groups")]
  InvalidData(u8, u32),
  #[error("non-zero padding")]
  InvalidPadding,
}

fn polymod(values: &[u8]) -> u32 {
  let mut chk: u32 = 1;
  for value in values {
    let top = chk >> 25;
    chk = (chk & 0x1ffffff) << 5 ^ u32::from(*value);
    for (i, generator) in GENERATOR.iter().enumerate() {
      if (top >> i) & 1 == 1 {
        chk ^= generator;
      }
    }
  }
  chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
  let bytes = hrp.as_bytes();
  let mut expanded = Vec::with_capacity(bytes.len() * 2 + 1);
  expanded.extend(bytes.iter().map(|b| b >> 5));
  expanded.push(0);
  expanded.extend(bytes.iter().map(|b| b & 0x1f));
  expanded
}

fn verify_checksum(hrp: &str, data: &[u8]) -> bool {
  let mut values = hrp_expand(hrp);
  values.extend_from_slice(data);
  polymod(&values) == 1
}

fn create_checksum(hrp: &str, data: &[u8]) -> [u8; CHECKSUM_LENGTH] {
  let mut values = hrp_expand(hrp);
  values.extend_from_slice(data);
  values.extend_from_slice(&[0u8; CHECKSUM_LENGTH]);
  let polymod = polymod(&values) ^ 1;

  let mut checksum = [0u8; CHECKSUM_LENGTH];
  for (i, item) in checksum.iter_mut().enumerate() {
    *item = ((polymod >> (5 * (5 - i))) & 0x1f) as u8;
  }
  checksum
}

fn check_hrp(hrp: &str) -> Result<(), Error> {
  if hrp.is_empty() || hrp.bytes().any(|b| !(33..=126).contains(&b)) {
    return Err(Error::InvalidHrp);
  }
  Ok(())
}

///
/// Regroups a sequence of `from_bits`-wide values into `to_bits`-wide values.
///
/// With `pad = true` a final partial group is always flushed (zero filled).
/// With `pad = false` the trailing bits must be fewer than `from_bits` and all zero,
/// otherwise data would be lost and [`Error::InvalidPadding`] is returned.
///
/// ## Examples
///
/// ```
///   use nostr_engine::bech32::convert_bits;
///
///   let five = convert_bits(&[0xff], 8, 5, true).unwrap();
///   assert_eq!(five, vec![31, 28]);
///   assert_eq!(convert_bits(&five, 5, 8, false).unwrap(), vec![0xff]);
/// ```
pub fn convert_bits(data: &[u8], from_bits: u32, to_bits: u32, pad: bool) -> Result<Vec<u8>, Error> {
  let mut acc: u32 = 0;
  let mut bits: u32 = 0;
  let max_value: u32 = (1 << to_bits) - 1;
  let mut result = Vec::with_capacity(data.len() * from_bits as usize / to_bits as usize + 1);

  for byte in data {
    let value = u32::from(*byte);
    if value >> from_bits != 0 {
      return Err(Error::InvalidData(*byte, from_bits));
    }
    acc = (acc << from_bits) | value;
    bits += from_bits;
    while bits >= to_bits {
      bits -= to_bits;
      result.push(((acc >> bits) & max_value) as u8);
    }
  }

  if pad {
    if bits > 0 {
      result.push(((acc << (to_bits - bits)) & max_value) as u8);
    }
  } else if bits >= from_bits || ((acc << (to_bits - bits)) & max_value) != 0 {
    return Err(Error::InvalidPadding);
  }

  Ok(result)
}

/// Encodes 5-bit `data` under the human readable part `hrp`.
pub fn encode_5bit(hrp: &str, data: &[u8]) -> Result<String, Error> {
  check_hrp(hrp)?;
  let hrp = hrp.to_lowercase();
  let checksum = create_checksum(&hrp, data);

  let mut encoded = String::with_capacity(hrp.len() + 1 + data.len() + CHECKSUM_LENGTH);
  encoded.push_str(&hrp);
  encoded.push(SEPARATOR);
  for value in data.iter().chain(checksum.iter()) {
    let index = usize::from(*value);
    let c = CHARSET.get(index).ok_or(Error::InvalidData(*value, 5))?;
    encoded.push(char::from(*c));
  }
  Ok(encoded)
}

///
/// Encodes raw bytes as a bech32 string: `<hrp>1<data><checksum>`.
///
/// ## Examples
///
/// ```
///   use nostr_engine::bech32::{decode, encode};
///
///   let encoded = encode("note", &[7u8; 32]).unwrap();
///   assert!(encoded.starts_with("note1"));
///   assert_eq!(decode(&encoded).unwrap(), ("note".to_string(), vec![7u8; 32]));
/// ```
pub fn encode(hrp: &str, data: &[u8]) -> Result<String, Error> {
  let five_bit = convert_bits(data, 8, 5, true)?;
  encode_5bit(hrp, &five_bit)
}

/// Decodes a bech32 string into its human readable part and 5-bit data (checksum stripped).
pub fn decode_5bit(s: &str) -> Result<(String, Vec<u8>), Error> {
  let has_lower = s.chars().any(|c| c.is_ascii_lowercase());
  let has_upper = s.chars().any(|c| c.is_ascii_uppercase());
  if has_lower && has_upper {
    return Err(Error::MixedCase);
  }
  let s = s.to_lowercase();

  let separator = s.rfind(SEPARATOR).ok_or(Error::MissingSeparator)?;
  if separator < 1 || separator >= MAX_SEPARATOR_POSITION {
    return Err(Error::InvalidSeparatorPosition(separator));
  }

  let (hrp, data_part) = (&s[..separator], &s[separator + 1..]);
  check_hrp(hrp)?;
  if data_part.len() < CHECKSUM_LENGTH {
    return Err(Error::TooShort);
  }

  let mut data = Vec::with_capacity(data_part.len());
  for c in data_part.chars() {
    let position = CHARSET
      .iter()
      .position(|charset_byte| char::from(*charset_byte) == c)
      .ok_or(Error::InvalidChar(c))?;
    data.push(position as u8);
  }

  if !verify_checksum(hrp, &data) {
    return Err(Error::InvalidChecksum);
  }

  data.truncate(data.len() - CHECKSUM_LENGTH);
  Ok((hrp.to_string(), data))
}

/// Decodes a bech32 string into its human readable part and raw bytes.
pub fn decode(s: &str) -> Result<(String, Vec<u8>), Error> {
  let (hrp, five_bit) = decode_5bit(s)?;
  let data = convert_bits(&five_bit, 5, 8, false)?;
  Ok((hrp, data))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(test)]
  use pretty_assertions::assert_eq;

  const NPUB: &str = "npub10elfcs4fr0l0r8af98jlmgdh9c8tcxjvz9qkw038js35mp4dma8qzvjptg";
  const NPUB_HEX: &str = "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e";

  #[test]
  fn decodes_known_valid_strings() {
    let (hrp, data) = decode_5bit("A12UEL5L").unwrap();
    assert_eq!(hrp, "a");
    assert!(data.is_empty());

    let (hrp, data) = decode_5bit("abcdef1qpzry9x8gf2tvdw0s3jn54khce6mua7lmqqqxw").unwrap();
    assert_eq!(hrp, "abcdef");
    assert_eq!(data, (0u8..32).collect::<Vec<u8>>());
  }

  #[test]
  fn decodes_npub_into_public_key_bytes() {
    let (hrp, data) = decode(NPUB).unwrap();
    assert_eq!(hrp, "npub");
    assert_eq!(hex::encode(data), NPUB_HEX);
  }

  #[test]
  fn encodes_public_key_bytes_into_npub() {
    let data = hex::decode(NPUB_HEX).unwrap();
    assert_eq!(encode("npub", &data).unwrap(), NPUB);
  }

  #[test]
  fn round_trips_32_byte_payloads() {
    for seed in 0u8..16 {
      let data: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(31).wrapping_add(seed.wrapping_mul(17))).collect();
      let encoded = encode("note", &data).unwrap();
      assert_eq!(decode(&encoded).unwrap(), ("note".to_string(), data));
    }
  }

  #[test]
  fn rejects_every_single_character_substitution() {
    let separator = NPUB.rfind('1').unwrap();
    for position in separator + 1..NPUB.len() {
      let original = NPUB.as_bytes()[position];
      for replacement in CHARSET.iter().filter(|c| **c != original) {
        let mut mutated = NPUB.as_bytes().to_vec();
        mutated[position] = *replacement;
        let mutated = String::from_utf8(mutated).unwrap();
        assert!(decode(&mutated).is_err(), "accepted {mutated}");
      }
    }
  }

  #[test]
  fn rejects_adjacent_transpositions() {
    let separator = NPUB.rfind('1').unwrap();
    let bytes = NPUB.as_bytes();
    for position in separator + 1..NPUB.len() - 1 {
      if bytes[position] == bytes[position + 1] {
        continue;
      }
      let mut mutated = bytes.to_vec();
      mutated.swap(position, position + 1);
      let mutated = String::from_utf8(mutated).unwrap();
      assert!(decode(&mutated).is_err(), "accepted {mutated}");
    }
  }

  #[test]
  fn rejects_malformed_strings() {
    assert_eq!(decode_5bit("pzry9x0s0muk"), Err(Error::MissingSeparator));
    assert_eq!(decode_5bit("1pzry9x0s0muk"), Err(Error::InvalidSeparatorPosition(0)));
    assert_eq!(decode_5bit("x1b4n0q5v"), Err(Error::InvalidChar('b')));
    assert_eq!(decode_5bit("li1dgmt3"), Err(Error::TooShort));
    assert_eq!(decode_5bit("A12uEL5L"), Err(Error::MixedCase));

    let long_hrp = format!("{}1qqqqqq", "a".repeat(83));
    assert_eq!(decode_5bit(&long_hrp), Err(Error::InvalidSeparatorPosition(83)));
  }

  #[test]
  fn uses_the_last_separator() {
    let encoded = encode("a1b", &[1, 2, 3]).unwrap();
    let (hrp, data) = decode(&encoded).unwrap();
    assert_eq!(hrp, "a1b");
    assert_eq!(data, vec![1, 2, 3]);
  }

  #[test]
  fn convert_bits_pads_and_rejects_lost_bits() {
    assert_eq!(convert_bits(&[0xff, 0xff], 8, 5, true).unwrap(), vec![31, 31, 31, 16]);
    // the last group only carries zero padding bits
    assert_eq!(convert_bits(&[31, 31, 31, 16], 5, 8, false).unwrap(), vec![0xff, 0xff]);
    // a trailing non-zero bit cannot be dropped
    assert_eq!(convert_bits(&[31, 31, 31, 17], 5, 8, false), Err(Error::InvalidPadding));
    // values wider than the source group are rejected
    assert_eq!(convert_bits(&[32], 5, 8, true), Err(Error::InvalidData(32, 5)));
  }
}
