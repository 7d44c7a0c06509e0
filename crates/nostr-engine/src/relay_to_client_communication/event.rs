use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::event::Event;

use super::Error;

/// `["EVENT", <subscription_id>, <event JSON>]`, an event
/// matching one of our subscriptions.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayToClientCommEvent {
  pub code: String, // "EVENT"
  pub subscription_id: String,
  pub event: Event,
}

impl RelayToClientCommEvent {
  pub fn new_event(subscription_id: String, event: Event) -> Self {
    Self {
      code: "EVENT".to_string(),
      subscription_id,
      event,
    }
  }

  pub fn as_value(&self) -> Value {
    json!(["EVENT", self.subscription_id, self.event])
  }

  pub fn from_value(msg: Value) -> Result<Self, Error> {
    let v = msg.as_array().ok_or(Error::InvalidData)?;

    if v.len() != 3 || v[0] != "EVENT" {
      return Err(Error::InvalidData);
    }

    let subscription_id = serde_json::from_value(v[1].clone())?;
    let event = Event::from_value(v[2].clone()).map_err(|_| Error::InvalidData)?;
    Ok(Self::new_event(subscription_id, event))
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

impl Default for RelayToClientCommEvent {
  fn default() -> Self {
    Self::new_event(String::new(), Event::default())
  }
}

impl Serialize for RelayToClientCommEvent {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    self.as_value().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for RelayToClientCommEvent {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let json_value: Value = Value::deserialize(deserializer)?;
    RelayToClientCommEvent::from_value(json_value).map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(test)]
  use pretty_assertions::assert_eq;

  const POTATO: &str = r#"{"content":"potato","created_at":1684589418,"id":"00960bd35499f8c63a4f65e79d6b1a2b7f1b8c97e76652325567b78c496350ae","kind":1,"pubkey":"614a695bab54e8dc98946abdb8ec019599ece6dada0c23890977d0fa128081d6","sig":"bf073c935f71de50ec72bdb79f75b0bf32f9049305c3b22f97c06422c6f2edc86e0d7e07d7d7222678b238b1daee071be5f6fa653c611971395ec0d1c6407caf","tags":[]}"#;

  #[test]
  fn test_event_parses_and_serializes() {
    let raw = format!(r#"["EVENT","potato_subs",{POTATO}]"#);
    let message = RelayToClientCommEvent::from_json(raw.clone()).unwrap();
    assert_eq!(message.subscription_id, "potato_subs");
    assert_eq!(message.event.content, "potato");
    assert_eq!(message.as_json(), raw);
  }

  #[test]
  fn test_event_needs_a_subscription_id() {
    assert!(RelayToClientCommEvent::from_json(format!(r#"["EVENT",{POTATO}]"#)).is_err());
    assert!(RelayToClientCommEvent::from_json(r#"["EVENT","sub",{"id":"x"}]"#).is_err());
  }
}
