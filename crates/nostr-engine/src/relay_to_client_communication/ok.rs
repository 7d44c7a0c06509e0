use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use super::Error;

const INVALID_PREFIX: &str = "invalid:";

///
/// `["OK", <event_id>, <true|false>, <message>]`, the relay's answer
/// to an `EVENT` we published (NIP-20).
///
/// Some relays omit the message, it is then empty.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayToClientCommOk {
  pub code: String, // "OK"
  pub event_id: String,
  pub accepted: bool,
  pub message: String,
}

impl RelayToClientCommOk {
  pub fn new_ok(event_id: String, accepted: bool, message: String) -> Self {
    Self {
      code: "OK".to_string(),
      event_id,
      accepted,
      message,
    }
  }

  /// Rejected because the relay computed a different id,
  /// e.g. `"invalid: event id does not match"`.
  pub fn is_invalid_id(&self) -> bool {
    !self.accepted
      && self
        .message
        .strip_prefix(INVALID_PREFIX)
        .map_or(false, |reason| reason.contains("id"))
  }

  pub fn as_value(&self) -> Value {
    json!(["OK", self.event_id, self.accepted, self.message])
  }

  pub fn from_value(msg: Value) -> Result<Self, Error> {
    let v = msg.as_array().ok_or(Error::InvalidData)?;

    if !(3..=4).contains(&v.len()) || v[0] != "OK" {
      return Err(Error::InvalidData);
    }

    let event_id = serde_json::from_value(v[1].clone())?;
    let accepted = serde_json::from_value(v[2].clone())?;
    let message = match v.get(3) {
      Some(message) => serde_json::from_value(message.clone())?,
      None => String::new(),
    };
    Ok(Self::new_ok(event_id, accepted, message))
  }

  pub fn as_json(&self) -> String {
    self.as_value().to_string()
  }

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
}

impl Serialize for RelayToClientCommOk {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    self.as_value().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for RelayToClientCommOk {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let json_value: Value = Value::deserialize(deserializer)?;
    RelayToClientCommOk::from_value(json_value).map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(test)]
  use pretty_assertions::assert_eq;

  #[test]
  fn test_ok_parses_with_and_without_message() {
    let ok = RelayToClientCommOk::from_json(r#"["OK","abc",true,""]"#).unwrap();
    assert_eq!(ok, RelayToClientCommOk::new_ok(String::from("abc"), true, String::new()));

    let short = RelayToClientCommOk::from_json(r#"["OK","abc",false]"#).unwrap();
    assert_eq!(short.accepted, false);
    assert_eq!(short.message, "");

    assert!(RelayToClientCommOk::from_json(r#"["OK","abc","true",""]"#).is_err());
  }

  #[test]
  fn test_ok_detects_invalid_id_rejections() {
    let reject = |message: &str| {
      RelayToClientCommOk::new_ok(String::from("abc"), false, message.to_string())
    };
    assert!(reject("invalid: id").is_invalid_id());
    assert!(reject("invalid: event id does not match").is_invalid_id());
    assert!(!reject("invalid: bad signature").is_invalid_id());
    assert!(!reject("blocked: id banned").is_invalid_id());
    assert!(!RelayToClientCommOk::new_ok(String::from("abc"), true, String::from("invalid: id"))
      .is_invalid_id());
  }
}
