//! # Oz Controller
//!
//! Entry point of the controller process. See the library documentation for
//! what the controller does.

use anyhow::Result;
use clap::Parser;
use oz_controller::config::{ControllerArgs, ControllerConfig};
use oz_controller::runtime::initialization::initialize;
use oz_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ControllerConfig::from_args(ControllerArgs::parse());

    let init_result = initialize(&config).await?;

    run_watch_loop(
        init_result.client,
        init_result.ctx,
        init_result.server_state,
        init_result.leader,
    )
    .await
}
