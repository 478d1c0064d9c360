use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use pcmi_sync::admin::AdminClient;
use pcmi_sync::cache::{BackgroundTasks, CacheLayer, NoopKv, SqliteKv};
use pcmi_sync::config::Config;
use pcmi_sync::network::NetworkMonitor;
use pcmi_sync::store::FirestoreStore;

use crate::{AdminCommand, CacheCommand, Command, MeetingCommand};

/// Main application state
pub struct App {
  config: Config,
  client: AdminClient,
  store: FirestoreStore,
  network: NetworkMonitor,
  /// Connectivity logger and probe
  services: BackgroundTasks,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

impl App {
  pub async fn new(config: Config) -> Result<Self> {
    let store = FirestoreStore::new(&config.firestore, Config::get_id_token())?;
    let network = NetworkMonitor::new(true);

    let cache = if config.cache.enabled {
      CacheLayer::new(SqliteKv::open(config.cache.path.as_deref())?, network.clone())
    } else {
      CacheLayer::new(NoopKv, network.clone())
    }
    .with_ttl(config.cache.ttl());

    let client = AdminClient::from_config(&config, Arc::new(store.clone()), cache);

    let services = BackgroundTasks::new();
    services.spawn(network.clone().log_transitions());

    if !store.reachable().await {
      warn!("Firestore is unreachable, working from cache");
      network.set_online(false);
    }

    Ok(Self {
      config,
      client,
      store,
      network,
      services,
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Users { refresh } => {
        let users = if refresh {
          self.client.refresh_all_users().await
        } else {
          self.client.get_all_users().await
        };
        print_json(&users)?;
      }
      Command::Stats => print_json(&self.client.admin_stats().await)?,
      Command::Admin(command) => self.run_admin(command).await?,
      Command::Meeting(command) => self.run_meeting(command).await?,
      Command::Sync => {
        self.client.sync_auth_users().await;
        info!("User sync finished");
      }
      Command::Cache(CacheCommand::Clear { key }) => match key {
        Some(key) => self.client.cache().remove(&key),
        None => self.client.cache().clear()?,
      },
    }

    Ok(())
  }

  async fn run_admin(&self, command: AdminCommand) -> Result<()> {
    match command {
      AdminCommand::Check { uid } => println!("{}", self.client.check_is_admin(&uid).await),
      AdminCommand::Grant { uid } => self.client.make_user_admin(&uid).await?,
      AdminCommand::Revoke { uid } => self.client.remove_user_admin(&uid).await?,
    }
    Ok(())
  }

  async fn run_meeting(&self, command: MeetingCommand) -> Result<()> {
    match command {
      MeetingCommand::Status => match self.client.get_meeting_status().await {
        Some(status) => print_json(&status)?,
        None => println!("No meeting status for room {}", self.client.room_id()),
      },
      MeetingCommand::Start { by, name } => {
        let identity = self.config.identity.as_ref();
        let admin_id = by
          .or_else(|| identity.map(|i| i.uid.clone()))
          .ok_or_else(|| eyre!("No admin id: pass --by or set identity.uid in the config"))?;
        let admin_name = name
          .or_else(|| identity.and_then(|i| i.display_name.clone()))
          .unwrap_or_else(|| admin_id.clone());

        let status = self.client.start_meeting(&admin_id, &admin_name).await?;
        print_json(&status)?;
      }
      MeetingCommand::End => self.client.end_meeting().await?,
      MeetingCommand::Participants { count } => self.client.update_participant_count(count).await,
      MeetingCommand::Watch => self.watch_meeting().await?,
    }
    Ok(())
  }

  /// Print every meeting status change until Ctrl-C.
  async fn watch_meeting(&self) -> Result<()> {
    let store = self.store.clone();
    let period = Duration::from_secs(self.config.firestore.poll_interval_secs.max(1));
    self.services.spawn(self.network.clone().poll(period, move || {
      let store = store.clone();
      async move { store.reachable().await }
    }));

    let subscription = self.client.listen_to_meeting_status(|status| match status {
      Some(status) => match serde_json::to_string(&status) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to print meeting status: {}", e),
      },
      None => println!("null"),
    });

    tokio::signal::ctrl_c()
      .await
      .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
    subscription.unsubscribe();
    Ok(())
  }

  /// Stop background services and let pending cache refreshes land.
  pub async fn shutdown(&self) {
    self.services.shutdown().await;
    self.client.cache().tasks().join_all().await;
  }
}
