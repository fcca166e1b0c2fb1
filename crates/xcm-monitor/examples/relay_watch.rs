//! Example: follow a relay chain and print every block carrying upward messages of a parachain.
//!
//! No database or alerting; the cursor lives in memory only.
//!
//! Usage:
//!
//! ```text
//! cargo run -p xcm-monitor --example relay_watch -- \
//!     --relay-url URL --para-id ID [--from BLOCK]
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use xcm_monitor::{
    BlockHandler, BlockRef, GapFillingPoller, MessagingBundle, MonitorError, ReconnectingExecutor,
    ReconnectionConfig, SidecarConnector,
};

struct PrintHandler;

#[async_trait]
impl BlockHandler for PrintHandler {
    async fn on_xcm_detected(
        &self,
        block: &BlockRef,
        bundle: &MessagingBundle,
    ) -> Result<(), MonitorError> {
        println!(
            "block={} para_block={} executed={} failed={}",
            block,
            bundle.source_block_hash,
            bundle.triggering_events.len(),
            bundle.failures().len()
        );
        for ev in bundle.failures() {
            println!("  {}", ev);
        }
        Ok(())
    }

    async fn on_error(&self, block_number: u64, error: &MonitorError) {
        eprintln!("block={} error: {}", block_number, error);
    }

    async fn on_checkpoint(&self, _block_number: u64) -> Result<(), MonitorError> {
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    let mut relay_url = String::new();
    let mut para_id = String::new();
    let mut from = String::new();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--relay-url" => {
                i += 1;
                relay_url = args.get(i).cloned().unwrap_or_default();
            }
            "--para-id" => {
                i += 1;
                para_id = args.get(i).cloned().unwrap_or_default();
            }
            "--from" => {
                i += 1;
                from = args.get(i).cloned().unwrap_or_default();
            }
            _ => {}
        }
        i += 1;
    }
    if relay_url.is_empty() || para_id.is_empty() {
        eprintln!("Usage: relay_watch --relay-url URL --para-id ID [--from BLOCK]");
        std::process::exit(1);
    }
    let para_id: u32 = para_id.parse()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let reconnection = ReconnectionConfig {
            attempts: 3,
            delay: Duration::from_secs(5),
        };
        let connector = Arc::new(SidecarConnector::new(&relay_url, Duration::from_secs(30)));
        let relay =
            Arc::new(ReconnectingExecutor::connect("relay", connector, reconnection).await?);
        let last_fired = if from.is_empty() {
            relay.latest_header().await?.number
        } else {
            from.parse::<u64>()?.saturating_sub(1)
        };

        let poller = GapFillingPoller::new(
            relay,
            para_id,
            Arc::new(PrintHandler),
            last_fired,
            Duration::from_secs(6),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            let _ = shutdown_tx.send(true);
        });
        poller.run(shutdown_rx).await?;
        Ok::<_, Box<dyn std::error::Error>>(())
    })
}
