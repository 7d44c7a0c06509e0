use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::event::{kind::EventKind, tag::TagKind, Event, Timestamp};

///
/// Profile of an author, the JSON content of a kind 0 event.
///
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub about: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub picture: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub nip05: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub banner: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub website: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lud16: Option<String>,
}

impl Metadata {
  pub fn from_content(content: &str) -> Option<Self> {
    serde_json::from_str(content).ok()
  }

  pub fn as_content(&self) -> String {
    serde_json::to_string(self).unwrap_or_default()
  }
}

/// One `["p", <pubkey>, <relay>, <petname>]` entry of a follow list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
  pub pubkey: String,
  pub relay: String,
  pub petname: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct ChannelContent {
  name: Option<String>,
  about: Option<String>,
  picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMetadata {
  pub channel_id: String,
  pub name: Option<String>,
  pub about: Option<String>,
  pub picture: Option<String>,
  /// Relay recommended by the first `e` tag of a kind 41 event.
  pub relay: Option<String>,
}

///
/// Typed view of the newest event of a replaceable kind.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceableEvent {
  MetaData {
    created_at: Timestamp,
    metadata: Metadata,
  },
  Contacts {
    created_at: Timestamp,
    contacts: Vec<Contact>,
  },
  ChannelMetaData {
    created_at: Timestamp,
    channel: ChannelMetadata,
  },
  ChannelList {
    created_at: Timestamp,
    channel_ids: Vec<String>,
  },
  PinList {
    created_at: Timestamp,
    event_ids: Vec<String>,
  },
}

impl ReplaceableEvent {
  pub fn created_at(&self) -> Timestamp {
    match self {
      Self::MetaData { created_at, .. }
      | Self::Contacts { created_at, .. }
      | Self::ChannelMetaData { created_at, .. }
      | Self::ChannelList { created_at, .. }
      | Self::PinList { created_at, .. } => *created_at,
    }
  }
}

///
/// Which view an event replaces: per author for profiles and lists,
/// per channel for channel metadata.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReplaceableKey {
  Metadata(String),
  Contacts(String),
  Channel(String),
  ChannelList(String),
  PinList(String),
}

impl ReplaceableKey {
  pub fn of(event: &Event) -> Option<Self> {
    let author = event.pubkey.clone();
    match event.kind {
      EventKind::Metadata => Some(Self::Metadata(author)),
      EventKind::Contacts => Some(Self::Contacts(author)),
      EventKind::ChannelCreation => Some(Self::Channel(event.id.clone())),
      EventKind::ChannelMetadata => first_event_tag(event).map(Self::Channel),
      EventKind::ChannelList => Some(Self::ChannelList(author)),
      EventKind::PinList => Some(Self::PinList(author)),
      _ => None,
    }
  }
}

fn first_event_tag(event: &Event) -> Option<String> {
  event.event_tag_ids().into_iter().next()
}

///
/// Projects an event onto its replaceable view. `None` for other kinds
/// and for content that does not parse.
///
pub fn project(event: &Event) -> Option<ReplaceableEvent> {
  let created_at = event.created_at;

  match event.kind {
    EventKind::Metadata => Some(ReplaceableEvent::MetaData {
      created_at,
      metadata: Metadata::from_content(&event.content)?,
    }),
    EventKind::Contacts => {
      let contacts = event
        .tags_of_kind(TagKind::PubKey)
        .filter(|tag| tag.len() == 3 || tag.len() == 4)
        .filter_map(|tag| {
          Some(Contact {
            pubkey: tag.value()?.to_string(),
            relay: tag.get(2)?.to_string(),
            petname: tag.get(3).map(str::to_string),
          })
        })
        .collect();
      Some(ReplaceableEvent::Contacts {
        created_at,
        contacts,
      })
    }
    EventKind::ChannelCreation => {
      let content: ChannelContent = serde_json::from_str(&event.content).ok()?;
      Some(ReplaceableEvent::ChannelMetaData {
        created_at,
        channel: ChannelMetadata {
          channel_id: event.id.clone(),
          name: content.name,
          about: content.about,
          picture: content.picture,
          relay: None,
        },
      })
    }
    EventKind::ChannelMetadata => {
      let content: ChannelContent = serde_json::from_str(&event.content).ok()?;
      let relay = event
        .tags_of_kind(TagKind::Event)
        .find(|tag| tag.len() >= 3)
        .and_then(|tag| tag.get(2))
        .map(str::to_string);
      Some(ReplaceableEvent::ChannelMetaData {
        created_at,
        channel: ChannelMetadata {
          channel_id: first_event_tag(event)?,
          name: content.name,
          about: content.about,
          picture: content.picture,
          relay,
        },
      })
    }
    EventKind::ChannelList => Some(ReplaceableEvent::ChannelList {
      created_at,
      channel_ids: event.event_tag_ids(),
    }),
    EventKind::PinList => Some(ReplaceableEvent::PinList {
      created_at,
      event_ids: event.event_tag_ids(),
    }),
    _ => None,
  }
}

#[derive(Debug, Clone)]
struct Latest {
  id: String,
  created_at: Timestamp,
  view: ReplaceableEvent,
}

///
/// Latest-wins index of replaceable views.
///
/// Newer `created_at` replaces; on a tie the lexicographically smallest
/// id wins, so the outcome does not depend on arrival order.
///
/// Channel metadata (kind 41) only counts when signed by the channel's
/// creator. Updates that arrive before their kind 40 are held until it does.
///
#[derive(Debug, Default)]
pub struct ReplaceableIndex {
  latest: HashMap<ReplaceableKey, Latest>,
  channel_creators: HashMap<String, String>,
  held_channel_updates: HashMap<String, Vec<Event>>,
}

impl ReplaceableIndex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Offers an event. Returns the key whose view changed, if any.
  pub fn offer(&mut self, event: &Event) -> Option<ReplaceableKey> {
    let key = ReplaceableKey::of(event)?;

    if let (EventKind::ChannelMetadata, ReplaceableKey::Channel(channel_id)) = (event.kind, &key) {
      match self.channel_creators.get(channel_id) {
        Some(creator) if *creator == event.pubkey => {}
        Some(_) => {
          debug!("Ignoring metadata of channel {channel_id} from {}", event.pubkey);
          return None;
        }
        None => {
          self
            .held_channel_updates
            .entry(channel_id.clone())
            .or_default()
            .push(event.clone());
          return None;
        }
      }
    }

    let mut changed = self.replace(&key, event);

    if event.kind == EventKind::ChannelCreation {
      self
        .channel_creators
        .insert(event.id.clone(), event.pubkey.clone());
      let held = self
        .held_channel_updates
        .remove(&event.id)
        .unwrap_or_default();
      for update in held.iter().filter(|update| update.pubkey == event.pubkey) {
        changed |= self.replace(&key, update);
      }
    }

    changed.then_some(key)
  }

  fn replace(&mut self, key: &ReplaceableKey, event: &Event) -> bool {
    let Some(view) = project(event) else {
      return false;
    };

    if let Some(current) = self.latest.get(key) {
      let newer = event.created_at > current.created_at
        || (event.created_at == current.created_at && event.id < current.id);
      if !newer {
        return false;
      }
    }

    self.latest.insert(
      key.clone(),
      Latest {
        id: event.id.clone(),
        created_at: event.created_at,
        view,
      },
    );
    true
  }

  pub fn get(&self, key: &ReplaceableKey) -> Option<&ReplaceableEvent> {
    self.latest.get(key).map(|latest| &latest.view)
  }

  pub fn len(&self) -> usize {
    self.latest.len()
  }

  pub fn is_empty(&self) -> bool {
    self.latest.is_empty()
  }
}
