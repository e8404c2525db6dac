//! Local relay publisher (`onboard serve`).

use anyhow::Result;

use onboard::publisher::{RelayConfig, start_server};

pub async fn cmd_serve(port: u16, dev: bool) -> Result<()> {
    start_server(RelayConfig {
        port,
        dev_mode: dev,
    })
    .await
}
