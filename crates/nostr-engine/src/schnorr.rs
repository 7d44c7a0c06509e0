use rand::Rng;
use secp256k1::{schnorr, KeyPair, Message, Secp256k1, SecretKey, Signing, Verification, XOnlyPublicKey};

use crate::nip19::{self, Nip19};

/// [`Schnorr`] error
#[derive(thiserror::Error, Debug)]
pub enum SchnorrError {
  /// Error decoding a hex key
  #[error(transparent)]
  Hex(#[from] hex::FromHexError),

  /// Error secp256k1
  #[error(transparent)]
  SECP256K1(#[from] secp256k1::Error),

  #[error(transparent)]
  Nip19(#[from] nip19::Error),

  #[error("expected a secret key, got {0}")]
  NotASecretKey(&'static str),
}

///
/// Key pair of the local author.
///
/// Only x-only public keys are exposed, which is what nostr events carry
/// in their `pubkey` field.
///
#[derive(Debug, Clone, Copy)]
pub struct Keys {
  pub secret_key: SecretKey,
  pub public_key: XOnlyPublicKey,
}

impl Keys {
  pub fn new(secret_key: SecretKey) -> Self {
    let secp = Secp256k1::new();
    let keypair = KeyPair::from_secret_key(&secp, &secret_key);
    let (public_key, _parity) = XOnlyPublicKey::from_keypair(&keypair);
    Self {
      secret_key,
      public_key,
    }
  }

  pub fn from_secret_hex(secret_key: &str) -> Result<Self, SchnorrError> {
    let bytes = hex::decode(secret_key)?;
    Ok(Self::new(SecretKey::from_slice(&bytes)?))
  }

  /// Accepts an `nsec` or a 64 character hex secret key.
  pub fn parse(secret_key: &str) -> Result<Self, SchnorrError> {
    if secret_key.starts_with("nsec") {
      return match Nip19::parse(secret_key)? {
        Nip19::SecretKey(bytes) => Ok(Self::new(SecretKey::from_slice(&bytes)?)),
        other => Err(SchnorrError::NotASecretKey(other.hrp())),
      };
    }
    Self::from_secret_hex(secret_key)
  }

  pub fn public_key_hex(&self) -> String {
    hex::encode(self.public_key.serialize())
  }

  pub fn npub(&self) -> Result<String, SchnorrError> {
    Ok(Nip19::PublicKey(self.public_key.serialize()).encode()?)
  }

  pub fn nsec(&self) -> Result<String, SchnorrError> {
    Ok(Nip19::SecretKey(self.secret_key.secret_bytes()).encode()?)
  }

  pub(crate) fn keypair<C: Signing>(&self, secp: &Secp256k1<C>) -> KeyPair {
    KeyPair::from_secret_key(secp, &self.secret_key)
  }
}

///
/// Generates a random key pair that can be used to sign events.
///
pub fn generate_keys() -> Keys {
  Keys::new(SecretKey::new(&mut rand::thread_rng()))
}

///
/// Signs a Schnorr signature over a 32-byte message (an event id).
///
/// A fresh 32-byte auxiliary random value is drawn for every signature,
/// as BIP-340 recommends, so signing the same id twice yields two
/// different (both valid) signatures.
///
/// ## Arguments
///
/// * `secp` - A Secp256k1 engine to execute signature.
/// * `msg` - The already hashed message.
/// * `keys` - The keys of the signer.
///
/// ## Examples
///
/// ```
///     use nostr_engine::schnorr::*;
///     use secp256k1::Secp256k1;
///
///     let keys = generate_keys();
///     let secp = Secp256k1::new();
///     let msg = [7u8; 32];
///     let signature = sign_schnorr(&secp, &msg, &keys).unwrap();
///     assert!(verify_schnorr(&secp, &msg, &signature[..], &keys.public_key.serialize()).unwrap());
/// ```
pub fn sign_schnorr<C: Signing>(
  secp: &Secp256k1<C>,
  msg: &[u8; 32],
  keys: &Keys,
) -> Result<schnorr::Signature, SchnorrError> {
  let msg = Message::from_slice(msg)?;
  let aux_rand: [u8; 32] = rand::thread_rng().gen();
  Ok(secp.sign_schnorr_with_aux_rand(&msg, &keys.keypair(secp), &aux_rand))
}

///
/// Verifies a Schnorr signature for a 32-byte message.
///
/// Returns `Ok(false)` when the signature does not match, and an error
/// when any of the inputs has the wrong length or is not a valid
/// curve point / signature encoding.
///
pub fn verify_schnorr<C: Verification>(
  secp: &Secp256k1<C>,
  msg: &[u8],
  sig: &[u8],
  pubkey: &[u8],
) -> Result<bool, SchnorrError> {
  let msg = Message::from_slice(msg)?;
  let sig = schnorr::Signature::from_slice(sig)?;
  let x_only_pubkey = XOnlyPublicKey::from_slice(pubkey)?;

  match secp.verify_schnorr(&sig, &msg, &x_only_pubkey) {
    Ok(_) => Ok(true),
    Err(err) => {
      log::debug!("[verify_schnorr] {err}");
      Ok(false)
    }
  }
}

#[cfg(test)]
mod tests {
  use bitcoin_hashes::{sha256, Hash};
  use secp256k1::All;

  use super::*;

  #[cfg(test)]
  use pretty_assertions::assert_eq;

  struct Sut {
    keys: Keys,
    msg: [u8; 32],
    secp: Secp256k1<All>,
  }

  fn make_sut() -> Sut {
    let seckey = [
      59, 148, 11, 85, 134, 130, 61, 253, 2, 174, 59, 70, 27, 180, 51, 107, 94, 203, 174, 253, 102,
      39, 170, 146, 46, 252, 4, 143, 236, 12, 136, 28,
    ];
    let keys = Keys::new(SecretKey::from_slice(&seckey).unwrap());
    let msg = sha256::Hash::hash(b"This is some message").into_inner();

    Sut {
      keys,
      msg,
      secp: Secp256k1::new(),
    }
  }

  #[test]
  fn signs_and_verifies() {
    let sut = make_sut();
    let signature = sign_schnorr(&sut.secp, &sut.msg, &sut.keys).unwrap();
    let result = verify_schnorr(
      &sut.secp,
      &sut.msg,
      &signature[..],
      &sut.keys.public_key.serialize(),
    );
    assert!(result.unwrap());
  }

  #[test]
  fn uses_fresh_aux_randomness_per_signature() {
    let sut = make_sut();
    let first = sign_schnorr(&sut.secp, &sut.msg, &sut.keys).unwrap();
    let second = sign_schnorr(&sut.secp, &sut.msg, &sut.keys).unwrap();
    assert_ne!(first, second);
  }

  #[test]
  fn signature_for_another_message_does_not_verify() {
    let sut = make_sut();
    let other_msg = sha256::Hash::hash(b"another message").into_inner();
    let signature = sign_schnorr(&sut.secp, &other_msg, &sut.keys).unwrap();
    let result = verify_schnorr(
      &sut.secp,
      &sut.msg,
      &signature[..],
      &sut.keys.public_key.serialize(),
    );
    assert_eq!(result.unwrap(), false);
  }

  #[test]
  fn verifies_known_event_signature() {
    let sut = make_sut();
    let msg = hex::decode("00960bd35499f8c63a4f65e79d6b1a2b7f1b8c97e76652325567b78c496350ae").unwrap();
    let pubkey = hex::decode("614a695bab54e8dc98946abdb8ec019599ece6dada0c23890977d0fa128081d6").unwrap();
    let sig = hex::decode("bf073c935f71de50ec72bdb79f75b0bf32f9049305c3b22f97c06422c6f2edc86e0d7e07d7d7222678b238b1daee071be5f6fa653c611971395ec0d1c6407caf").unwrap();
    assert!(verify_schnorr(&sut.secp, &msg, &sig, &pubkey).unwrap());
  }

  #[test]
  fn wrong_lengths_are_errors() {
    let sut = make_sut();
    let signature = sign_schnorr(&sut.secp, &sut.msg, &sut.keys).unwrap();
    let pubkey = sut.keys.public_key.serialize();
    assert!(verify_schnorr(&sut.secp, &sut.msg[..31], &signature[..], &pubkey).is_err());
    assert!(verify_schnorr(&sut.secp, &sut.msg, &signature[..63], &pubkey).is_err());
    assert!(verify_schnorr(&sut.secp, &sut.msg, &signature[..], &pubkey[..31]).is_err());
  }

  #[test]
  fn keys_parse_nsec_and_hex() {
    let nsec = "nsec1vl029mgpspedva04g90vltkh6fvh240zqtv9k0t9af8935ke9laqsnlfe5";
    let from_nsec = Keys::parse(nsec).unwrap();
    let from_hex = Keys::parse("67dea2ed018072d675f5415ecfaed7d2597555e202d85b3d65ea4e58d2d92ffa").unwrap();
    assert_eq!(from_nsec.public_key_hex(), from_hex.public_key_hex());
    assert_eq!(from_nsec.nsec().unwrap(), nsec);
    assert!(from_nsec.npub().unwrap().starts_with("npub1"));
    assert!(Keys::parse("npub10elfcs4fr0l0r8af98jlmgdh9c8tcxjvz9qkw038js35mp4dma8qzvjptg").is_err());
  }
}
