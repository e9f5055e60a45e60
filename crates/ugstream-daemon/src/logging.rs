use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use ugstream_core::BroadcastMessage;

const DEFAULT_FILTER: &str = "info,ugstream_core=debug,ugstream_daemon=debug";

/// Forwards WARN and ERROR events to connected clients as log lines.
pub struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    pub fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

/// Install the global subscriber: `<data_dir>/daemon.log` plus the broadcast
/// layer, filtered by `RUST_LOG`.  Returns the log file path.
pub fn init(
    data_dir: &Path,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(data_dir)?;
    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init()?;

    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_only_warnings_and_errors_are_forwarded() {
        let (tx, mut rx) = broadcast::channel(8);
        let subscriber = tracing_subscriber::registry().with(BroadcastLayer::new(tx));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("tuning in");
            tracing::warn!("stream stalled");
            tracing::error!(code = 7, "mpv gone");
        });

        match rx.try_recv().unwrap() {
            BroadcastMessage::Log(line) => assert!(line.ends_with("[WARN] stream stalled")),
            other => panic!("expected log line, got {:?}", other),
        }
        match rx.try_recv().unwrap() {
            BroadcastMessage::Log(line) => {
                assert!(line.contains("[ERROR]"));
                assert!(line.contains("mpv gone"));
                assert!(line.contains("code=7"));
            }
            other => panic!("expected log line, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
