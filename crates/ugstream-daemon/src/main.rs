mod http;
mod logging;
mod socket;
mod stations;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use ugstream_core::capture::CpalCapture;
use ugstream_core::controller::SessionController;
use ugstream_core::core::{DaemonEvent, SessionCore};
use ugstream_core::engine::EngineEvent;
use ugstream_core::mpv_engine::MpvEngine;
use ugstream_core::recording::Recorder;
use ugstream_core::BroadcastMessage;
use ugstream_proto::config::Config;

const ENGINE_STOP_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(3);

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // the broadcast channel exists before logging so WARN/ERROR lines reach clients
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(256);

    let data_dir = ugstream_proto::platform::data_dir();
    let log_path = logging::init(&data_dir, broadcast_tx.clone())?;
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let catalog = stations::load_catalog(&config.stations).await?;

    let (engine_tx, engine_rx) = mpsc::channel::<EngineEvent>(256);
    let volume = config.playback.default_volume;
    let (engine, engine_worker) = MpvEngine::spawn(volume, engine_tx);
    let controller = SessionController::new(catalog, engine, volume);

    let recorder = if config.recording.enabled {
        Recorder::new(Box::new(CpalCapture::new()))
    } else {
        info!("Recording disabled in config");
        Recorder::disabled()
    };

    let core = SessionCore::new(controller, recorder, broadcast_tx.clone())
        .with_recordings_dir(config.recording.recordings_dir.clone());
    let state_manager = core.state_manager();

    // all client input funnels into the core through this channel
    let (event_tx, event_rx) = mpsc::channel::<DaemonEvent>(256);

    let _socket_handle = socket::start_server(
        config.daemon.bind_address.clone(),
        config.daemon.port,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
    });

    info!("Daemon initialised, running event loop");
    core.run(event_rx, engine_rx).await?;

    if tokio::time::timeout(ENGINE_STOP_TIMEOUT, engine_worker)
        .await
        .is_err()
    {
        warn!("mpv engine did not stop in time");
    }
    info!("Daemon stopped");
    Ok(())
}
