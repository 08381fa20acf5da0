//! topup-watch - follow one order over the realtime channel until it settles.
//!
//! Usage: `topup-watch <principal-id> <order-id>`

use std::path::Path;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use topup_realtime::{ChannelError, EventKind, OrderWatch, RealtimeConfig, RealtimeOrderChannel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    topup_realtime::config::load_dotenv(Path::new("."));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "topup_realtime=debug,topup_watch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(principal_id), Some(order_id)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: topup-watch <principal-id> <order-id>");
    };

    let config = RealtimeConfig::from_env()?;
    tracing::info!("Connecting to {}", config.realtime_url);

    let channel = RealtimeOrderChannel::from_config(&config);
    channel.on_fn(EventKind::Authenticated, |_| {
        tracing::info!("Authenticated");
    });
    channel.on_fn(EventKind::AuthenticationError, |payload| {
        tracing::error!("Authentication failed: {}", payload);
    });
    channel.on_fn(EventKind::Disconnect, |payload| {
        tracing::warn!("Connection lost: {}", payload);
    });
    channel.on_fn(EventKind::Reconnect, |payload| {
        tracing::info!("Reconnected: {}", payload);
    });
    channel.on_fn(EventKind::ReconnectError, |payload| {
        tracing::warn!("Reconnect failed: {}", payload);
    });

    channel.connect(&principal_id).await?;
    channel.ping();

    let mut watch = OrderWatch::start(&channel, order_id.as_str());
    let outcome = loop {
        tokio::select! {
            update = watch.next_update() => match update {
                Some(update) => {
                    tracing::info!(
                        order_id = %update.order_id,
                        event = %update.kind,
                        status = ?update.status,
                        "Order update"
                    );
                    if update.is_terminal() {
                        break Ok(Some(update));
                    }
                }
                None => break Err(ChannelError::WatchEnded),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break Ok(None);
            }
        }
    };

    if let Some(rtt) = channel.last_round_trip() {
        tracing::debug!(?rtt, "Last ping round trip");
    }
    drop(watch);
    channel.disconnect().await;

    match outcome {
        Ok(Some(update)) => {
            let status = update
                .status
                .map_or_else(|| "unknown".to_string(), |s| s.to_string());
            tracing::info!(order_id = %update.order_id, %status, "Order settled");
            println!("{} {}", update.order_id, status);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(ChannelError::WatchEnded) => {
            anyhow::bail!("connection ended before order {} settled", order_id)
        }
        Err(e) => Err(e.into()),
    }
}
