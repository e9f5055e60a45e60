use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use ugstream_core::core::DaemonEvent;
use ugstream_core::state::StateManager;
use ugstream_core::BroadcastMessage;
use ugstream_proto::protocol::{frame_len, Broadcast, Message, MAX_FRAME_LEN, PROTOCOL_VERSION};

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };
        info!("TCP server listening at {}", addr);
        serve(listener, state_manager, event_tx, broadcast_tx).await;
    })
}

pub async fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let mut client_id = 0usize;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let sm = state_manager.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();
                tokio::spawn(async move {
                    handle_client(stream, sm, id, evt_tx, bcast_rx).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn write_message(write_half: &mut OwnedWriteHalf, broadcast: Broadcast) -> bool {
    match Message::Broadcast(broadcast).encode() {
        Ok(encoded) => write_half.write_all(&encoded).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode broadcast: {}", e);
            true
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    if !write_message(&mut write_half, hello(&state_manager).await).await {
        return;
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        debug!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        while let Some(total) = frame_len(&read_buf) {
                            if total - 4 > MAX_FRAME_LEN {
                                warn!("Client {} sent a {} byte frame, disconnecting", client_id, total - 4);
                                let message = format!("frame exceeds {} bytes", MAX_FRAME_LEN);
                                write_message(&mut write_half, Broadcast::Error { message }).await;
                                return;
                            }
                            if read_buf.len() < total {
                                break;
                            }
                            let frame: Vec<u8> = read_buf.drain(..total).collect();
                            match Message::decode(&frame) {
                                Ok((Message::Intent(intent), _)) => {
                                    info!("Client {} sent intent: {:?}", client_id, intent);
                                    if event_tx.send(DaemonEvent::Intent(intent)).await.is_err() {
                                        warn!("DaemonEvent channel closed");
                                        return;
                                    }
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    warn!("Client {} sent an invalid message: {}", client_id, e);
                                    let message = format!("invalid message: {}", e);
                                    if !write_message(&mut write_half, Broadcast::Error { message }).await {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let ok = match msg {
                    Ok(BroadcastMessage::StateUpdated) => {
                        let view = state_manager.get_view().await;
                        write_message(&mut write_half, Broadcast::State { view }).await
                    }
                    Ok(BroadcastMessage::Error(message)) => {
                        write_message(&mut write_half, Broadcast::Error { message }).await
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        write_message(&mut write_half, Broadcast::Log { message }).await
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        let view = state_manager.get_view().await;
                        write_message(&mut write_half, Broadcast::State { view }).await
                    }
                    Err(_) => false,
                };
                if !ok {
                    break;
                }
            }
        }
    }
}

async fn hello(state_manager: &StateManager) -> Broadcast {
    let view = state_manager.get_view().await;
    Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        rev: view.rev,
        catalog: state_manager.catalog().to_vec(),
        view,
    }
}
