//! NIP-05: mapping a `name@domain` identifier to a public key through
//! `https://<domain>/.well-known/nostr.json?name=<name>`.

use std::fmt;
use std::str::FromStr;

use futures_util::future::BoxFuture;
use log::debug;
use serde_json::Value;
use url::Url;

use crate::observable::LoadingData;

/// [`Nip05Id`] and verification error
#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("Invalid NIP-05 identifier {0:?}")]
  InvalidIdentifier(String),
  #[error("Fetching {url} failed: {reason}")]
  Fetch { url: String, reason: String },
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error("Response has no names object")]
  MissingNames,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nip05Id {
  pub name: String,
  pub domain: String,
}

impl Nip05Id {
  ///
  /// Parses `name@domain`. A bare `domain` stands for `_@domain`.
  ///
  pub fn parse(identifier: &str) -> Result<Self, Error> {
    let invalid = || Error::InvalidIdentifier(identifier.to_string());
    let identifier = identifier.trim();

    let (name, domain) = match identifier.rsplit_once('@') {
      Some((name, domain)) => (name, domain),
      None => ("_", identifier),
    };

    let name_is_valid = !name.is_empty()
      && name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !name_is_valid || domain.is_empty() || domain.contains(['/', '?', '#', '@']) {
      return Err(invalid());
    }

    let url = Url::parse(&format!("https://{domain}")).map_err(|_| invalid())?;
    if url.host_str().is_none() {
      return Err(invalid());
    }

    Ok(Self {
      name: name.to_string(),
      domain: domain.to_lowercase(),
    })
  }

  /// Where the domain publishes its names.
  pub fn url(&self) -> String {
    format!(
      "https://{}/.well-known/nostr.json?name={}",
      self.domain, self.name
    )
  }
}

impl FromStr for Nip05Id {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl fmt::Display for Nip05Id {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.name == "_" {
      write!(f, "{}", self.domain)
    } else {
      write!(f, "{}@{}", self.name, self.domain)
    }
  }
}

///
/// Fetches a document over HTTPS and returns its body.
///
/// Implementations must not follow redirects: the answer has to come
/// from the domain named in the identifier.
///
pub trait Nip05Fetcher: Send + Sync {
  fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, Error>>;
}

///
/// Checks a `nostr.json` body: `names[<name>]` must be `pubkey`.
/// The lower-cased name is looked up first, then the name as given.
///
pub fn verify_response(body: &str, name: &str, pubkey: &str) -> Result<bool, Error> {
  let value: Value = serde_json::from_str(body)?;
  let names = value
    .get("names")
    .and_then(Value::as_object)
    .ok_or(Error::MissingNames)?;

  let found = names
    .get(&name.to_lowercase())
    .or_else(|| names.get(name))
    .and_then(Value::as_str);

  Ok(found.map_or(false, |key| key.eq_ignore_ascii_case(pubkey)))
}

///
/// Verifies that `identifier` points to `pubkey` (hex). Malformed
/// identifiers, fetch failures and bad documents are `Invalid`.
///
pub async fn verify<F>(fetcher: &F, identifier: &str, pubkey: &str) -> LoadingData<bool>
where
  F: Nip05Fetcher + ?Sized,
{
  let id = match Nip05Id::parse(identifier) {
    Ok(id) => id,
    Err(err) => return LoadingData::Invalid(err.to_string()),
  };

  let url = id.url();
  debug!("Verifying {id} at {url}");
  let result = match fetcher.fetch(&url).await {
    Ok(body) => verify_response(&body, &id.name, pubkey),
    Err(err) => Err(err),
  };
  result.into()
}
