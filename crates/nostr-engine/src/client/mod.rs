use std::sync::Arc;

use log::debug;
use tokio::sync::watch;

use crate::{
  cache::{coordinator::Coordinator, registry::SubscriptionData, EventInfo},
  event::{
    id::EscapeMode,
    kind::EventKind,
    tag::{Marker, Tag},
    timestamp_now, Error, Event,
  },
  filter::Filter,
  nip05::{self, Nip05Fetcher},
  observable::LoadingData,
  relay::PostResult,
  replaceable::{Contact, Metadata, ReplaceableEvent, ReplaceableKey},
  schnorr::Keys,
};

///
/// The local author: its keys and profile, on top of a [`Coordinator`].
///
/// Events are signed here and published through the coordinator, which
/// retries "invalid id" rejections with the other escape mode.
///
#[derive(Debug, Clone)]
pub struct Client {
  keys: Keys,
  pub metadata: Metadata,
  coordinator: Arc<Coordinator>,
}

impl Client {
  pub fn new(keys: Keys, coordinator: Arc<Coordinator>) -> Self {
    Self {
      keys,
      metadata: Metadata::default(),
      coordinator,
    }
  }

  pub fn keys(&self) -> &Keys {
    &self.keys
  }

  pub fn coordinator(&self) -> &Arc<Coordinator> {
    &self.coordinator
  }

  pub fn name(&mut self, name: &str) -> &mut Self {
    self.metadata.name = Some(name.to_string());
    self
  }

  pub fn about(&mut self, about: &str) -> &mut Self {
    self.metadata.about = Some(about.to_string());
    self
  }

  pub fn picture(&mut self, picture: &str) -> &mut Self {
    self.metadata.picture = Some(picture.to_string());
    self
  }

  pub fn nip05(&mut self, nip05: &str) -> &mut Self {
    self.metadata.nip05 = Some(nip05.to_string());
    self
  }

  pub fn get_hex_public_key(&self) -> String {
    self.keys.public_key_hex()
  }

  fn create_event(&self, kind: EventKind, content: String, tags: Vec<Tag>) -> Result<Event, Error> {
    Event::new_signed(&self.keys, timestamp_now(), kind, tags, content, EscapeMode::Plain)
  }

  pub fn create_text_note_event(&self, note: &str) -> Result<Event, Error> {
    self.create_event(EventKind::Text, note.to_string(), vec![])
  }

  ///
  /// Reply following NIP-10: a `root` `e` tag for the thread start, a
  /// `reply` one for the direct parent when it is not the root, and a
  /// `p` tag for the parent's author and everyone it mentioned.
  ///
  pub fn create_reply_to_event(
    &self,
    parent: &Event,
    relay: Option<&str>,
    content: &str,
  ) -> Result<Event, Error> {
    let root = parent
      .tags
      .iter()
      .find(|tag| tag.is_event() && tag.marker() == Some(Marker::Root));

    let mut tags = match root.and_then(Tag::value) {
      Some(root_id) => vec![
        Tag::event(
          root_id,
          root
            .and_then(|tag| tag.get(2))
            .filter(|hint| !hint.is_empty())
            .or(relay),
          Some(Marker::Root),
        ),
        Tag::event(&parent.id, relay, Some(Marker::Reply)),
      ],
      None => vec![Tag::event(&parent.id, relay, Some(Marker::Root))],
    };

    let mut pubkeys: Vec<String> = vec![parent.pubkey.clone()];
    for pubkey in parent.pubkey_tag_keys() {
      if !pubkeys.contains(&pubkey) {
        pubkeys.push(pubkey);
      }
    }
    tags.extend(pubkeys.iter().map(|pubkey| Tag::pubkey(pubkey, None, None)));

    self.create_event(EventKind::Text, content.to_string(), tags)
  }

  pub fn get_event_metadata(&self) -> Result<Event, Error> {
    self.create_event(EventKind::Metadata, self.metadata.as_content(), vec![])
  }

  /// Kind 3 follow list, one `p` tag per contact.
  pub fn create_contact_list_event(&self, contacts: &[Contact]) -> Result<Event, Error> {
    let tags = contacts
      .iter()
      .map(|contact| {
        Tag::pubkey(
          &contact.pubkey,
          Some(contact.relay.as_str()),
          contact.petname.as_deref(),
        )
      })
      .collect();
    self.create_event(EventKind::Contacts, String::new(), tags)
  }

  /// Publishes to every writable relay, one result per relay.
  pub async fn publish(&self, event: Event) -> Vec<PostResult> {
    debug!("Publishing {} (kind {})", event.id, event.kind);
    self.coordinator.publish(event, Some(self.keys)).await
  }

  pub async fn send_updated_metadata(&self) -> Result<Vec<PostResult>, Error> {
    let event = self.get_event_metadata()?;
    Ok(self.publish(event).await)
  }

  pub async fn subscribe(&self, id: &str, filter: Filter) -> watch::Receiver<SubscriptionData> {
    self.coordinator.subscribe(id, filter).await
  }

  pub async fn unsubscribe(&self, id: &str) {
    self.coordinator.unsubscribe(id).await;
  }

  pub async fn query(&self, filter: Filter) -> Vec<EventInfo> {
    self.coordinator.query(filter).await
  }

  /// Live subscription to everything `author_pubkey` publishes.
  pub async fn follow_author(&self, author_pubkey: &str) -> watch::Receiver<SubscriptionData> {
    let mut filter = Filter::new();
    filter.add_authors(vec![author_pubkey.to_string()]);
    self.subscribe(&format!("author:{author_pubkey}"), filter).await
  }

  pub async fn follow_myself(&self) -> watch::Receiver<SubscriptionData> {
    self.follow_author(&self.get_hex_public_key()).await
  }

  ///
  /// Checks the NIP-05 identifier in the cached profile of `pubkey`.
  /// `NotLoading` when there is no cached profile or it has none.
  ///
  pub async fn verify_nip05<F>(&self, fetcher: &F, pubkey: &str) -> LoadingData<bool>
  where
    F: Nip05Fetcher + ?Sized,
  {
    let identifier = match self
      .coordinator
      .replaceable(&ReplaceableKey::Metadata(pubkey.to_string()))
    {
      Some(ReplaceableEvent::MetaData { metadata, .. }) => metadata.nip05,
      _ => None,
    };

    match identifier {
      Some(identifier) => nip05::verify(fetcher, &identifier, pubkey).await,
      None => LoadingData::NotLoading,
    }
  }
}
