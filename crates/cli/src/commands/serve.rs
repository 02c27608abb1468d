//! `kb serve` — run the embedding worker in the foreground until interrupted.

use std::path::PathBuf;

use anyhow::Result;
use kb_core::Config;
use kb_daemon::{Daemon, DaemonConfig};
use tracing::info;

pub async fn run(data_dir: PathBuf, config: Config) -> Result<()> {
  let mut daemon = Daemon::start(DaemonConfig::new(data_dir, config), None, None).await?;
  info!("embedding worker running, press ctrl-c to stop");
  daemon.run_until_signal().await?;
  Ok(())
}
