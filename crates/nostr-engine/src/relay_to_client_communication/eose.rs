use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use super::Error;

/// Used to indicate the End Of Stored Events (EOSE)
/// and the beginning of events newly received in
/// real-time.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayToClientCommEose {
  pub code: String, // "EOSE"
  pub subscription_id: String,
}

impl RelayToClientCommEose {
  // Create new `EOSE` message
  pub fn new_eose(subscription_id: String) -> Self {
    Self {
      code: "EOSE".to_string(),
      subscription_id,
    }
  }

  pub fn as_value(&self) -> Value {
    json!(["EOSE", self.subscription_id])
  }

  pub fn from_value(msg: Value) -> Result<Self, Error> {
    let v = msg.as_array().ok_or(Error::InvalidData)?;

    // ["EOSE", <subscription_id>]
    if v.len() != 2 || v[0] != "EOSE" {
      return Err(Error::InvalidData);
    }

    let subscription_id = serde_json::from_value(v[1].clone())?;
    Ok(Self::new_eose(subscription_id))
  }

  /// Get [`RelayToClientCommEose`] as JSON string
  pub fn as_json(&self) -> String {
    self.as_value().to_string()
  }

  /// Get [`RelayToClientCommEose`] from JSON
  pub fn from_json<S>(msg: S) -> Result<Self, Error>
  where
    S: Into<String>,
  {
    let msg: &str = &msg.into();

    if msg.is_empty() {
      return Err(Error::InvalidData);
    }

    let json_value: Value = serde_json::from_str(msg)?;
    Self::from_value(json_value)
  }
}

impl Default for RelayToClientCommEose {
  fn default() -> Self {
    Self::new_eose(String::new())
  }
}

impl Serialize for RelayToClientCommEose {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    self.as_value().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for RelayToClientCommEose {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let json_value: Value = Value::deserialize(deserializer)?;
    RelayToClientCommEose::from_value(json_value).map_err(serde::de::Error::custom)
  }
}
