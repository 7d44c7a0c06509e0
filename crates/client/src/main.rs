use std::{collections::HashSet, env, sync::Arc, time::Duration};

use env_logger::Env;
use futures_util::future::{select, Either};
use log::{error, info, warn};

use nostr_engine::{
  cache::coordinator::Coordinator,
  client::Client,
  config::Config,
  filter::Filter,
  schnorr::{generate_keys, Keys},
};

const SECRET_KEY_VAR: &str = "NOSTR_SECRET_KEY";
const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

fn load_keys() -> Keys {
  match env::var(SECRET_KEY_VAR) {
    Ok(secret) => match Keys::parse(secret.trim()) {
      Ok(keys) => keys,
      Err(err) => {
        warn!("{SECRET_KEY_VAR} is not a valid key ({err}), using a fresh one");
        generate_keys()
      }
    },
    Err(_) => generate_keys(),
  }
}

async fn reconnect_forever(coordinator: Arc<Coordinator>) {
  let mut interval = tokio::time::interval(RECONNECT_INTERVAL);
  loop {
    interval.tick().await;
    coordinator.reconnect().await;
  }
}

#[tokio::main]
async fn main() {
  dotenv::dotenv().ok();
  let config = Config::from_env();
  env_logger::Builder::from_env(Env::default().default_filter_or(config.log_filter.as_str()))
    .try_init()
    .unwrap();

  let keys = load_keys();
  match keys.npub() {
    Ok(npub) => info!("Running as {npub}"),
    Err(err) => error!("Could not encode the public key: {err}"),
  }

  let (coordinator, notifications) = Coordinator::new(config).await;
  tokio::spawn(Arc::clone(&coordinator).run(notifications));
  tokio::spawn(reconnect_forever(Arc::clone(&coordinator)));

  let client = Client::new(keys, Arc::clone(&coordinator));
  client.coordinator().connect().await;

  let mut filter = Filter::new();
  filter.add_kinds(vec![1]).add_limit(50);
  let mut notes = client.subscribe("notes", filter).await;

  let feed = async {
    let mut seen: HashSet<String> = HashSet::new();
    while notes.changed().await.is_ok() {
      let Some(infos) = notes.borrow_and_update().valid().cloned() else {
        continue;
      };
      // oldest first
      for info in infos.iter().rev() {
        if !seen.insert(info.event.id.clone()) {
          continue;
        }
        let relays: Vec<&str> = info.relays.iter().map(String::as_str).collect();
        info!(
          "[{}] {}: {}",
          relays.join(","),
          info.event.pubkey.get(..8).unwrap_or_default(),
          info.event.content
        );
      }
    }
  };

  let ctrl_c = async {
    tokio::signal::ctrl_c().await.unwrap();
  };

  tokio::pin!(feed);
  tokio::pin!(ctrl_c);
  if let Either::Left(_) = select(ctrl_c, feed).await {
    info!("Shutting down");
  }
  client.unsubscribe("notes").await;
  coordinator.disconnect().await;
}
