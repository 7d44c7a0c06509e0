//! The `relay -> client` communications we understand.
//!
//!  - `["EVENT", subscription_id, event_JSON]`
//!  - `["EOSE", subscription_id]`
//!  - `["NOTICE", message]`
//!  - `["OK", event_id, accepted, message]`

use serde_json::Value;

// internal modules
pub mod eose;
pub mod event;
pub mod notice;
pub mod ok;

use self::eose::RelayToClientCommEose;
use self::event::RelayToClientCommEvent;
use self::notice::RelayToClientCommNotice;
use self::ok::RelayToClientCommOk;

/// [`RelayToClientCommunication`] error
#[derive(thiserror::Error, Debug)]
pub enum Error {
  /// Error serializing or deserializing JSON data
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error("Invalid data")]
  InvalidData,
  #[error("Unknown message type {0}")]
  UnknownMessage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
  Event(RelayToClientCommEvent),
  Eose(RelayToClientCommEose),
  Notice(RelayToClientCommNotice),
  Ok(RelayToClientCommOk),
}

///
/// Parses a text frame received from a relay, dispatching on its first element.
///
pub fn parse_message_received_from_relay(msg: &str) -> Result<RelayMessage, Error> {
  let value: Value = serde_json::from_str(msg)?;
  let code = value
    .as_array()
    .and_then(|v| v.first())
    .and_then(Value::as_str)
    .ok_or(Error::InvalidData)?
    .to_string();

  match code.as_str() {
    "EVENT" => Ok(RelayMessage::Event(RelayToClientCommEvent::from_value(value)?)),
    "EOSE" => Ok(RelayMessage::Eose(RelayToClientCommEose::from_value(value)?)),
    "NOTICE" => Ok(RelayMessage::Notice(RelayToClientCommNotice::from_value(value)?)),
    "OK" => Ok(RelayMessage::Ok(RelayToClientCommOk::from_value(value)?)),
    _ => Err(Error::UnknownMessage(code)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(test)]
  use pretty_assertions::assert_eq;

  #[test]
  fn parse_eose_message() {
    let result = parse_message_received_from_relay(r#"["EOSE","sub"]"#).unwrap();
    assert_eq!(
      result,
      RelayMessage::Eose(RelayToClientCommEose::new_eose(String::from("sub")))
    );
  }

  #[test]
  fn parse_notice_message() {
    let result = parse_message_received_from_relay(r#"["NOTICE","hi"]"#).unwrap();
    assert!(matches!(result, RelayMessage::Notice(notice) if notice.message == "hi"));
  }

  #[test]
  fn parse_ok_message() {
    let result = parse_message_received_from_relay(r#"["OK","abc",false,"invalid: id"]"#).unwrap();
    assert!(matches!(result, RelayMessage::Ok(ok) if ok.is_invalid_id()));
  }

  #[test]
  fn parse_noop_message() {
    assert!(matches!(parse_message_received_from_relay("{}"), Err(Error::InvalidData)));
    assert!(matches!(parse_message_received_from_relay("not json"), Err(Error::Json(_))));
    assert!(matches!(
      parse_message_received_from_relay(r#"["AUTH","challenge"]"#),
      Err(Error::UnknownMessage(code)) if code == "AUTH"
    ));
    assert!(parse_message_received_from_relay(r#"["EOSE"]"#).is_err());
  }
}
