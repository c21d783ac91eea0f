mod registry;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use geoduel_core::{decode, encode, ClientMsg, MatchId, ServerMsg};

use registry::{FrameSender, JoinOutcome, RoomRegistry};

#[derive(Parser)]
#[command(name = "geoduel-server", version, about = "Relay server for geoduel match rooms")]
struct Args {
    #[arg(long, env = "RELAY_BIND_ADDR", default_value = "127.0.0.1:8787")]
    bind: SocketAddr,
}

type SharedRegistry = Arc<Mutex<RoomRegistry>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(args.bind).await?;
    info!(addr = %args.bind, "relay listening");

    let registry: SharedRegistry = Arc::new(Mutex::new(RoomRegistry::new()));
    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, registry).await {
                debug!(%peer, %err, "connection closed");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: SharedRegistry,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if write.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
    });

    let conn_id = registry.lock().await.alloc_conn_id();

    while let Some(message) = read.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(conn = conn_id, %err, "read failed");
                break;
            }
        };
        let bytes = match message {
            Message::Binary(bytes) => bytes,
            Message::Close(_) => break,
            _ => continue,
        };
        let Some(msg) = decode::<ClientMsg>(&bytes) else {
            continue;
        };
        handle_client_msg(conn_id, msg, &tx, &registry).await;
    }

    // Transport-level disconnect hook: runs exactly once per connection,
    // clean close or abrupt loss alike. The registry's own once-guard
    // keeps a racing duplicate quiet.
    if let Some((room_id, player_id)) = registry.lock().await.leave(conn_id) {
        debug!(room = %room_id, player = %player_id, "disconnect left room");
    }
    writer.abort();
    Ok(())
}

async fn handle_client_msg(
    conn_id: registry::ConnId,
    msg: ClientMsg,
    tx: &FrameSender,
    registry: &SharedRegistry,
) {
    match msg {
        ClientMsg::JoinRoom { room_id, player_id } => {
            if MatchId::parse(&room_id).is_err() {
                warn!(conn = conn_id, room = %room_id, "rejected invalid room id");
                send_frame(
                    tx,
                    &ServerMsg::Error {
                        code: "bad-room".into(),
                        message: format!("invalid room id: {room_id}"),
                    },
                );
                return;
            }
            let outcome = registry
                .lock()
                .await
                .join(conn_id, &room_id, &player_id, tx.clone());
            if outcome == JoinOutcome::Joined {
                send_frame(tx, &ServerMsg::Welcome { room_id });
            }
        }
        ClientMsg::Guess {
            room_id,
            player_id,
            item,
        } => {
            let reg = registry.lock().await;
            if reg.room_of(conn_id) != Some(room_id.as_str()) {
                drop(reg);
                send_frame(
                    tx,
                    &ServerMsg::Error {
                        code: "wrong-room".into(),
                        message: format!("not joined to room {room_id}"),
                    },
                );
                return;
            }
            reg.publish_from(conn_id, &ServerMsg::Guess { player_id, item });
        }
        ClientMsg::StartMatch {
            match_id,
            player1_id,
            player2_id,
        } => {
            registry.lock().await.publish_from(
                conn_id,
                &ServerMsg::MatchStarted {
                    match_id,
                    player1_id,
                    player2_id,
                },
            );
        }
        ClientMsg::Ping { nonce } => {
            send_frame(tx, &ServerMsg::Pong { nonce });
        }
    }
}

fn send_frame(tx: &FrameSender, msg: &ServerMsg) {
    if let Some(bytes) = encode(msg) {
        let _ = tx.send(bytes);
    }
}
