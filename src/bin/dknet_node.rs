// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Runs a standalone DKNet node: loads configuration, sets up logging, wires
//! storage/routing/the engine together, and idles until shut down.
//!
//! The actual libp2p transport (dialing, listening, NAT traversal, peer
//! discovery) is an external collaborator DKNet calls into through
//! [`dknet::routing::comm::PeerTransport`]; this binary wires up a transport
//! placeholder that reports every peer unreachable, so a real deployment
//! has a thin, well-defined seam to plug its own host in at.

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use dknet::config::Config;
use dknet::error::Error;
use dknet::ids::NodeId;
use dknet::node::Node;
use dknet::routing::comm::{BoxedDuplex, PeerTransport};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

const MODULE_NAME: &str = "dknet";

fn main() -> Result<()> {
    color_eyre::install()?;

    let handle = std::thread::Builder::new()
        .name("dknet_node".to_string())
        .stack_size(16 * 1024 * 1024)
        .spawn(move || {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_node())?;
            Ok(())
        })
        .wrap_err("failed to spawn node thread")?;

    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

async fn run_node() -> Result<()> {
    let config = Config::from_sources()?;

    let filter = match EnvFilter::try_from_env("RUST_LOG") {
        Ok(filter) => filter,
        Err(_) => {
            let level_filter = match config.verbosity {
                0 => "info",
                1 => "debug",
                _ => "trace",
            };
            let module_filter = format!("{}={}", MODULE_NAME, level_filter)
                .parse()
                .wrap_err("BUG: invalid module filter constructed")?;
            EnvFilter::from_default_env().add_directive(module_filter)
        }
    };

    let _optional_guard = if let Some(log_dir) = &config.log_dir {
        println!("Starting logging to file");
        let file_appender = tracing_appender::rolling::hourly(log_dir, "dknet_node.log");
        let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
            .lossy(false)
            .finish(file_appender);

        let builder = tracing_subscriber::fmt()
            .with_writer(non_blocking)
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_ansi(false);

        if config.json_logs {
            builder.json().init();
        } else {
            builder.compact().init();
        }
        Some(guard)
    } else {
        println!("Starting logging to stdout");
        tracing_subscriber::fmt::init();
        None
    };

    info!(moniker = %config.moniker, "starting dknet-node v{}", env!("CARGO_PKG_VERSION"));

    let self_id = NodeId::new(config.moniker.clone());
    let transport: Arc<dyn PeerTransport> = Arc::new(UnwiredTransport);
    let node = Node::bootstrap(config, self_id, transport)
        .await
        .wrap_err("failed to bootstrap node")?;

    info!(self_id = %node.self_id(), "node is up, idling until shut down");
    tokio::signal::ctrl_c().await.wrap_err("failed to listen for shutdown signal")?;
    info!("shutdown signal received, exiting");
    Ok(())
}

/// A [`PeerTransport`] that reports no connected peers and refuses every dial,
/// standing in for the libp2p host until one is wired in.
struct UnwiredTransport;

#[async_trait]
impl PeerTransport for UnwiredTransport {
    fn is_connected(&self, _peer: &NodeId) -> bool {
        false
    }

    fn connected_peers(&self) -> Vec<NodeId> {
        Vec::new()
    }

    async fn open_stream(&self, peer: &NodeId, _protocol_id: &str) -> dknet::Result<BoxedDuplex> {
        Err(Error::TransportError(format!(
            "no network transport wired in; cannot reach {}",
            peer
        )))
    }
}
