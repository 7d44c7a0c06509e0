pub mod pool;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{
  mpsc::{unbounded_channel, UnboundedSender},
  oneshot,
};
use tokio_tungstenite::{
  connect_async,
  tungstenite::{
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
  },
};
use url::Url;
use uuid::Uuid;

use crate::{
  client_to_relay_communication::{
    close::ClientToRelayCommClose, event::ClientToRelayCommEvent,
    request::ClientToRelayCommRequest,
  },
  event::{id::EscapeMode, Event, VerifiedEvent},
  filter::Filter,
  relay_to_client_communication::{
    ok::RelayToClientCommOk, parse_message_received_from_relay, RelayMessage,
  },
  schnorr::Keys,
};

/// [`RelayConnection`] error
#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error(transparent)]
  WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
  #[error("Invalid relay url {0}")]
  InvalidUrl(String),
  #[error("Not connected to {0}")]
  NotConnected(String),
  #[error("Relay {0} is not writable")]
  NotWritable(String),
  #[error("Already connected or connecting to {0}")]
  AlreadyConnected(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
  #[default]
  Disconnected,
  Connecting,
  Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Sent,
  Received,
}

///
/// Everything a connection reports upwards, over the pool's channel.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayNotification {
  Connected {
    relay_url: String,
  },
  /// `graceful` is true for a normal close (code 1000) or a local disconnect.
  /// Those are never retried.
  Disconnected {
    relay_url: String,
    graceful: bool,
  },
  /// Verified event received on the stream subscription.
  Event {
    relay_url: String,
    subscription_id: String,
    event: VerifiedEvent,
  },
  Eose {
    relay_url: String,
    subscription_id: String,
  },
  Notice {
    relay_url: String,
    message: String,
  },
  Transmitted {
    relay_url: String,
    direction: Direction,
    bytes: u64,
  },
}

/// Final answer for a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostResult {
  pub relay_url: String,
  /// Id of the last version sent, which differs from the original after a retry.
  pub event_id: String,
  pub accepted: bool,
  pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
  pub url: String,
  pub connected: bool,
  pub bytes_sent: u64,
  pub bytes_received: u64,
  pub read: bool,
  pub write: bool,
}

type Outgoing = Option<UnboundedSender<Message>>;

#[derive(Debug)]
struct OneShot {
  subscription_id: String,
  filters: Vec<Filter>,
  events: Vec<VerifiedEvent>,
  reply: oneshot::Sender<Vec<VerifiedEvent>>,
}

impl OneShot {
  fn request(&self) -> String {
    ClientToRelayCommRequest::new_req(self.subscription_id.clone(), self.filters.clone()).as_json()
  }
}

#[derive(Debug)]
struct PendingPost {
  event: Event,
  keys: Option<Keys>,
  retried: bool,
  reply: oneshot::Sender<PostResult>,
}

#[derive(Debug, Default)]
struct ConnectionState {
  status: ConnectionStatus,
  /// Bumped on every open, so a stale socket task cannot close a newer one.
  generation: u64,
  outgoing: Outgoing,
  stream_id: String,
  stream_filters: Vec<Filter>,
  /// A `REQ` for the stream is open on the current socket.
  stream_open: bool,
  queue: VecDeque<OneShot>,
  in_flight: Option<OneShot>,
  pending_posts: HashMap<String, PendingPost>,
  closing: bool,
  last_close_graceful: bool,
}

///
/// One relay server: socket lifecycle plus the protocol state on top of it.
///
/// At most two subscriptions are open on the socket: the stream one, carrying
/// the union of every live filter, and one one-shot query at a time.
///
/// All protocol state is behind a `std::sync::Mutex` that is never held
/// across an await: frames are pushed to the writer task's channel.
///
#[derive(Debug)]
pub struct RelayConnection {
  url: String,
  read: AtomicBool,
  write: AtomicBool,
  notifier: UnboundedSender<RelayNotification>,
  state: Mutex<ConnectionState>,
  bytes_sent: AtomicU64,
  bytes_received: AtomicU64,
}

impl RelayConnection {
  pub fn new(
    url: &str,
    read: bool,
    write: bool,
    notifier: UnboundedSender<RelayNotification>,
  ) -> Result<Self, Error> {
    let parsed = Url::parse(url).map_err(|_| Error::InvalidUrl(url.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") || parsed.host_str().is_none() {
      return Err(Error::InvalidUrl(url.to_string()));
    }

    Ok(Self {
      url: url.to_string(),
      read: AtomicBool::new(read),
      write: AtomicBool::new(write),
      notifier,
      state: Mutex::new(ConnectionState {
        stream_id: Uuid::new_v4().to_string(),
        ..Default::default()
      }),
      bytes_sent: AtomicU64::new(0),
      bytes_received: AtomicU64::new(0),
    })
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn can_read(&self) -> bool {
    self.read.load(Ordering::Relaxed)
  }

  pub fn can_write(&self) -> bool {
    self.write.load(Ordering::Relaxed)
  }

  pub fn status(&self) -> ConnectionStatus {
    self.state().status
  }

  pub fn is_connected(&self) -> bool {
    self.status() == ConnectionStatus::Connected
  }

  /// Disconnected after an abnormal close (or a failed attempt).
  pub fn needs_reconnect(&self) -> bool {
    let state = self.state();
    state.status == ConnectionStatus::Disconnected && !state.last_close_graceful
  }

  pub fn stream_subscription_id(&self) -> String {
    self.state().stream_id.clone()
  }

  pub fn info(&self) -> ConnectionInfo {
    ConnectionInfo {
      url: self.url.clone(),
      connected: self.is_connected(),
      bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
      bytes_received: self.bytes_received.load(Ordering::Relaxed),
      read: self.can_read(),
      write: self.can_write(),
    }
  }

  fn state(&self) -> MutexGuard<'_, ConnectionState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn notify(&self, notification: RelayNotification) {
    if self.notifier.send(notification).is_err() {
      debug!("[{}] nobody is listening to notifications", self.url);
    }
  }

  fn transmit(&self, outgoing: &Outgoing, text: String) -> bool {
    let Some(tx) = outgoing else {
      return false;
    };
    let bytes = text.len() as u64;
    if tx.send(Message::Text(text)).is_err() {
      return false;
    }

    self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    self.notify(RelayNotification::Transmitted {
      relay_url: self.url.clone(),
      direction: Direction::Sent,
      bytes,
    });
    true
  }

  /// Updates the permission flags. Losing `read` closes the stream subscription.
  pub fn set_permissions(&self, read: bool, write: bool) {
    self.read.store(read, Ordering::Relaxed);
    self.write.store(write, Ordering::Relaxed);
    let mut state = self.state();
    self.sync_stream(&mut state);
  }

  ///
  /// Replaces the stream filters. A new `REQ` goes out when the set
  /// changed, a `CLOSE` when it became empty.
  ///
  pub fn set_stream_filters(&self, filters: Vec<Filter>) {
    let mut state = self.state();
    if state.stream_filters == filters {
      return;
    }
    state.stream_filters = filters;
    self.sync_stream(&mut state);
  }

  fn sync_stream(&self, state: &mut ConnectionState) {
    if state.outgoing.is_none() {
      return;
    }

    if !self.can_read() || state.stream_filters.is_empty() {
      if state.stream_open {
        let close = ClientToRelayCommClose::new_close(state.stream_id.clone());
        self.transmit(&state.outgoing, close.as_json());
        state.stream_open = false;
      }
      return;
    }

    // same subscription id: the relay replaces the previous REQ
    let request =
      ClientToRelayCommRequest::new_req(state.stream_id.clone(), state.stream_filters.clone());
    state.stream_open = self.transmit(&state.outgoing, request.as_json());
  }

  ///
  /// Queues a one-shot query. The receiver gets every event the relay
  /// sent for it once the relay signals `EOSE`.
  ///
  /// Queries run one at a time, in order. A relay without `read`
  /// answers with an empty batch right away.
  ///
  pub fn query(&self, filters: Vec<Filter>) -> (String, oneshot::Receiver<Vec<VerifiedEvent>>) {
    let subscription_id = Uuid::new_v4().to_string();
    let (reply, receiver) = oneshot::channel();

    if !self.can_read() {
      let _ = reply.send(vec![]);
      return (subscription_id, receiver);
    }

    let mut state = self.state();
    state.queue.push_back(OneShot {
      subscription_id: subscription_id.clone(),
      filters,
      events: vec![],
      reply,
    });
    self.advance_queue(&mut state);

    (subscription_id, receiver)
  }

  /// Drops a one-shot query, closing it on the relay when it is in flight.
  pub fn cancel_one_shot(&self, subscription_id: &str) {
    let mut state = self.state();
    let in_flight = state
      .in_flight
      .as_ref()
      .map_or(false, |one_shot| one_shot.subscription_id == subscription_id);

    if in_flight {
      state.in_flight = None;
      let close = ClientToRelayCommClose::new_close(subscription_id.to_string());
      self.transmit(&state.outgoing, close.as_json());
      self.advance_queue(&mut state);
    } else {
      state
        .queue
        .retain(|one_shot| one_shot.subscription_id != subscription_id);
    }
  }

  fn advance_queue(&self, state: &mut ConnectionState) {
    if state.in_flight.is_some() || state.outgoing.is_none() {
      return;
    }

    while let Some(one_shot) = state.queue.pop_front() {
      if one_shot.reply.is_closed() {
        debug!("[{}] skipping abandoned query {}", self.url, one_shot.subscription_id);
        continue;
      }
      self.transmit(&state.outgoing, one_shot.request());
      state.in_flight = Some(one_shot);
      return;
    }
  }

  ///
  /// Publishes an event. The receiver resolves with the relay's `OK`.
  ///
  /// Rejected right away when disconnected or without `write`: posts are
  /// never queued. With `keys`, an "invalid id" rejection is retried once
  /// with the id computed in the other escape mode.
  ///
  pub fn send_event(
    &self,
    event: Event,
    keys: Option<Keys>,
  ) -> Result<oneshot::Receiver<PostResult>, Error> {
    if !self.can_write() {
      return Err(Error::NotWritable(self.url.clone()));
    }

    let mut state = self.state();
    if state.status != ConnectionStatus::Connected {
      return Err(Error::NotConnected(self.url.clone()));
    }

    let (reply, receiver) = oneshot::channel();
    let message = ClientToRelayCommEvent::new_event(event.clone());
    if !self.transmit(&state.outgoing, message.as_json()) {
      return Err(Error::NotConnected(self.url.clone()));
    }

    state.pending_posts.insert(
      event.id.clone(),
      PendingPost {
        event,
        keys,
        retried: false,
        reply,
      },
    );
    Ok(receiver)
  }

  ///
  /// Handles a text frame from the relay. Anything malformed, unverifiable
  /// or for a subscription we do not track is logged and dropped.
  ///
  pub fn on_text(&self, text: &str) {
    let bytes = text.len() as u64;
    self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    self.notify(RelayNotification::Transmitted {
      relay_url: self.url.clone(),
      direction: Direction::Received,
      bytes,
    });

    let message = match parse_message_received_from_relay(text) {
      Ok(message) => message,
      Err(err) => {
        warn!("[{}] dropping message: {err}", self.url);
        debug!("[{}] dropped: {text}", self.url);
        return;
      }
    };

    match message {
      RelayMessage::Event(message) => {
        let event = match message.event.into_verified() {
          Ok(event) => event,
          Err(err) => {
            warn!("[{}] dropping event: {err}", self.url);
            return;
          }
        };
        self.on_event(message.subscription_id, event);
      }
      RelayMessage::Eose(message) => self.on_eose(message.subscription_id),
      RelayMessage::Notice(notice) => {
        info!("[{}] NOTICE: {}", self.url, notice.message);
        self.notify(RelayNotification::Notice {
          relay_url: self.url.clone(),
          message: notice.message,
        });
      }
      RelayMessage::Ok(ok) => self.on_ok(ok),
    }
  }

  fn on_event(&self, subscription_id: String, event: VerifiedEvent) {
    let mut state = self.state();

    if let Some(one_shot) = state.in_flight.as_mut() {
      if one_shot.subscription_id == subscription_id {
        one_shot.events.push(event);
        return;
      }
    }

    if state.stream_open && state.stream_id == subscription_id {
      drop(state);
      self.notify(RelayNotification::Event {
        relay_url: self.url.clone(),
        subscription_id,
        event,
      });
      return;
    }

    debug!("[{}] dropping event for untracked subscription {subscription_id}", self.url);
  }

  fn on_eose(&self, subscription_id: String) {
    let mut state = self.state();

    let is_in_flight = state
      .in_flight
      .as_ref()
      .map_or(false, |one_shot| one_shot.subscription_id == subscription_id);
    if is_in_flight {
      if let Some(one_shot) = state.in_flight.take() {
        if one_shot.reply.send(one_shot.events).is_err() {
          debug!("[{}] query {subscription_id} was abandoned", self.url);
        }
      }
      let close = ClientToRelayCommClose::new_close(subscription_id);
      self.transmit(&state.outgoing, close.as_json());
      self.advance_queue(&mut state);
      return;
    }

    if state.stream_id == subscription_id {
      drop(state);
      self.notify(RelayNotification::Eose {
        relay_url: self.url.clone(),
        subscription_id,
      });
      return;
    }

    debug!("[{}] EOSE for untracked subscription {subscription_id}", self.url);
  }

  fn on_ok(&self, ok: RelayToClientCommOk) {
    let mut state = self.state();
    let Some(pending) = state.pending_posts.remove(&ok.event_id) else {
      debug!("[{}] OK for an event we are not waiting on: {}", self.url, ok.event_id);
      return;
    };

    if !ok.accepted && ok.is_invalid_id() && !pending.retried {
      let mode = pending
        .event
        .id_escape_mode()
        .unwrap_or(EscapeMode::Plain)
        .alternate();
      // without a '/' both modes give the same id
      let differs = pending.event.compute_id(mode) != pending.event.id;

      if let (Some(keys), true) = (pending.keys, differs) {
        match pending.event.resigned(&keys, mode) {
          Ok(event) => {
            info!("[{}] {} rejected: {}, retrying as {mode:?}", self.url, ok.event_id, ok.message);
            let message = ClientToRelayCommEvent::new_event(event.clone());
            if self.transmit(&state.outgoing, message.as_json()) {
              state.pending_posts.insert(
                event.id.clone(),
                PendingPost {
                  event,
                  keys: Some(keys),
                  retried: true,
                  reply: pending.reply,
                },
              );
              return;
            }
          }
          Err(err) => error!("[{}] could not re-sign {}: {err}", self.url, ok.event_id),
        }
      }
    }

    let result = PostResult {
      relay_url: self.url.clone(),
      event_id: ok.event_id,
      accepted: ok.accepted,
      message: ok.message,
    };
    let _ = pending.reply.send(result);
  }

  ///
  /// Attaches the writer side of a freshly opened socket: the stream
  /// subscription and any interrupted one-shot are sent again.
  /// Returns the generation to hand back to [`Self::on_close`].
  ///
  pub fn on_open(&self, outgoing: UnboundedSender<Message>) -> u64 {
    let mut state = self.state();
    state.generation += 1;
    state.status = ConnectionStatus::Connected;
    state.outgoing = Some(outgoing);
    state.stream_open = false;
    state.closing = false;
    state.last_close_graceful = false;

    self.sync_stream(&mut state);
    // an interrupted one-shot was put back at the front of the queue
    self.advance_queue(&mut state);
    let generation = state.generation;
    drop(state);

    info!("❯ Connected to {}", self.url);
    self.notify(RelayNotification::Connected {
      relay_url: self.url.clone(),
    });
    generation
  }

  ///
  /// Marks the socket of `generation` as gone. Calls for an older
  /// socket, or repeated calls, are ignored.
  ///
  pub fn on_close(&self, generation: u64, graceful: bool) {
    let mut state = self.state();
    if state.generation != generation || state.status == ConnectionStatus::Disconnected {
      return;
    }

    let graceful = graceful || state.closing;
    state.status = ConnectionStatus::Disconnected;
    state.outgoing = None;
    state.stream_open = false;
    state.closing = false;
    state.last_close_graceful = graceful;

    // the relay sends the stored events again after reconnecting
    if let Some(mut one_shot) = state.in_flight.take() {
      one_shot.events.clear();
      state.queue.push_front(one_shot);
    }

    let pending: Vec<(String, PendingPost)> = state.pending_posts.drain().collect();
    drop(state);

    for (event_id, post) in pending {
      let _ = post.reply.send(PostResult {
        relay_url: self.url.clone(),
        event_id,
        accepted: false,
        message: String::from("connection closed"),
      });
    }

    info!("❯ Disconnected from {} (graceful: {graceful})", self.url);
    self.notify(RelayNotification::Disconnected {
      relay_url: self.url.clone(),
      graceful,
    });
  }

  fn on_connect_failed(&self) {
    let mut state = self.state();
    state.status = ConnectionStatus::Disconnected;
    state.last_close_graceful = false;
    drop(state);

    self.notify(RelayNotification::Disconnected {
      relay_url: self.url.clone(),
      graceful: false,
    });
  }

  ///
  /// Opens the socket and spawns its reader and writer tasks.
  ///
  pub async fn connect(self: &Arc<Self>) -> Result<(), Error> {
    {
      let mut state = self.state();
      if state.status != ConnectionStatus::Disconnected {
        return Err(Error::AlreadyConnected(self.url.clone()));
      }
      state.status = ConnectionStatus::Connecting;
      state.closing = false;
    }

    debug!("❯ Connecting to {}", self.url);
    let ws_stream = match connect_async(self.url.clone()).await {
      Ok((ws_stream, _)) => ws_stream,
      Err(err) => {
        error!("Impossible to connect to {}: {}", self.url, err);
        self.on_connect_failed();
        return Err(Error::WebSocket(err));
      }
    };

    {
      let mut state = self.state();
      if state.closing {
        debug!("❯ {} was disconnected while connecting", self.url);
        state.status = ConnectionStatus::Disconnected;
        state.last_close_graceful = true;
        return Ok(());
      }
    }

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, mut rx) = unbounded_channel::<Message>();
    let generation = self.on_open(tx);

    // Frames queued by this connection go out to the relay.
    tokio::spawn(async move {
      while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if let Err(err) = ws_tx.send(msg).await {
          debug!("❯ Writer stopped: {err}");
          break;
        }
        if is_close {
          break;
        }
      }
      let _ = ws_tx.close().await;
    });

    // Whatever the relay sends goes through `on_text`.
    let relay = Arc::clone(self);
    tokio::spawn(async move {
      debug!("❯ Relay Message Thread Started for {}", relay.url);
      let mut graceful = false;

      while let Some(frame) = ws_rx.next().await {
        match frame {
          Ok(Message::Text(text)) => relay.on_text(&text),
          Ok(Message::Close(frame)) => {
            graceful = frame.map_or(false, |frame| frame.code == CloseCode::Normal);
            break;
          }
          Ok(_) => {}
          Err(err) => {
            warn!("[{}] socket error: {err}", relay.url);
            break;
          }
        }
      }

      relay.on_close(generation, graceful);
      debug!("❯ Exited from Message Thread of {}", relay.url);
    });

    Ok(())
  }

  /// Closes the socket with code 1000. Never retried.
  pub fn disconnect(&self) {
    debug!("❯ Disconnecting from {}", self.url);
    let generation = {
      let mut state = self.state();
      state.closing = true;
      state.last_close_graceful = true;
      if state.status != ConnectionStatus::Connected {
        // a pending `connect` checks `closing` once the socket opens
        return;
      }
      if let Some(tx) = &state.outgoing {
        let _ = tx.send(Message::Close(Some(CloseFrame {
          code: CloseCode::Normal,
          reason: "".into(),
        })));
      }
      state.generation
    };
    self.on_close(generation, true);
  }
}
