use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::filter::Filter;

use super::Error;

/// `["REQ", <subscription_id>, <filter JSON>...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientToRelayCommRequest {
  pub code: String, // "REQ"
  pub subscription_id: String,
  pub filters: Vec<Filter>,
}

impl ClientToRelayCommRequest {
  pub fn new_req(subscription_id: String, filters: Vec<Filter>) -> Self {
    Self {
      code: String::from("REQ"),
      subscription_id,
      filters,
    }
  }

  pub fn as_value(&self) -> Value {
    let mut values = vec![
      Value::String(self.code.clone()),
      Value::String(self.subscription_id.clone()),
    ];
    values.extend(self.filters.iter().map(Filter::as_value));
    Value::Array(values)
  }

  pub fn from_value(msg: Value) -> Result<Self, Error> {
    let v = msg.as_array().ok_or(Error::InvalidData)?;

    if v.len() < 3 || v[0] != "REQ" {
      return Err(Error::InvalidData);
    }

    let subscription_id = serde_json::from_value(v[1].clone())?;
    let filters = v[2..]
      .iter()
      .map(|filter| Filter::from_value(filter.clone()))
      .collect::<Result<Vec<Filter>, _>>()?;

    Ok(Self::new_req(subscription_id, filters))
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

impl Default for ClientToRelayCommRequest {
  fn default() -> Self {
    Self::new_req(String::new(), vec![])
  }
}

impl Serialize for ClientToRelayCommRequest {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    self.as_value().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for ClientToRelayCommRequest {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let json_value: Value = Value::deserialize(deserializer)?;
    ClientToRelayCommRequest::from_value(json_value).map_err(serde::de::Error::custom)
  }
}
