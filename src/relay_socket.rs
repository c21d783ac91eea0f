use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::warn;
use url::Url;

use geoduel_core::{decode, encode, ClientMsg, MatchId, PlayerId, ServerMsg};

use crate::relay::RelayLink;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid relay url: {0}")]
    Url(#[from] url::ParseError),
    #[error("websocket failure: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Native websocket connection to the relay, already joined to one match
/// room. Split into a [`ChannelRelay`] + [`RelayDriver`] pair when the
/// protocol components need a synchronous publish seam.
pub struct RelaySocket {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl RelaySocket {
    pub async fn connect(
        base_url: &str,
        room: &MatchId,
        player: &PlayerId,
    ) -> Result<Self, RelayError> {
        let url = relay_url(base_url)?;
        let (ws, _response) = connect_async(url.as_str()).await?;
        let (write, read) = ws.split();
        let mut socket = Self { write, read };
        socket
            .send(ClientMsg::JoinRoom {
                room_id: room.to_string(),
                player_id: player.to_string(),
            })
            .await?;
        Ok(socket)
    }

    pub async fn send(&mut self, msg: ClientMsg) -> Result<(), RelayError> {
        if let Some(bytes) = encode(&msg) {
            self.write.send(Message::Binary(bytes.into())).await?;
        }
        Ok(())
    }

    /// Next decoded server frame. `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<ServerMsg> {
        while let Some(message) = self.read.next().await {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    warn!(%err, "relay read failed");
                    return None;
                }
            };
            match message {
                Message::Binary(bytes) => {
                    if let Some(msg) = decode::<ServerMsg>(&bytes) {
                        return Some(msg);
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    pub async fn recv_timeout(&mut self, dur: Duration) -> Option<ServerMsg> {
        match timeout(dur, self.recv()).await {
            Ok(msg) => msg,
            Err(_) => None,
        }
    }

    /// Split into a cloneable synchronous publish handle and the driver
    /// that owns the socket. The driver must be polled for anything to
    /// move in either direction.
    pub fn into_channel(self) -> (ChannelRelay, RelayDriver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Rc::new(Cell::new(true));
        (
            ChannelRelay {
                tx,
                connected: connected.clone(),
            },
            RelayDriver {
                socket: self,
                rx,
                outbound_open: true,
                connected,
            },
        )
    }
}

/// Synchronous [`RelayLink`] over an unbounded outbound queue. Publishing
/// never blocks and never fails loudly; once the driver is gone the frames
/// just stop going anywhere, which is exactly the relay's contract.
#[derive(Clone)]
pub struct ChannelRelay {
    tx: mpsc::UnboundedSender<ClientMsg>,
    connected: Rc<Cell<bool>>,
}

impl RelayLink for ChannelRelay {
    fn publish(&self, msg: ClientMsg) {
        if self.tx.send(msg).is_err() {
            self.connected.set(false);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }
}

/// Owns the websocket; drains queued publishes and yields inbound frames.
pub struct RelayDriver {
    socket: RelaySocket,
    rx: mpsc::UnboundedReceiver<ClientMsg>,
    outbound_open: bool,
    connected: Rc<Cell<bool>>,
}

impl RelayDriver {
    /// Pump until an inbound frame arrives. `None` means the connection is
    /// gone and the relay is now just a `NullRelay` with extra steps.
    pub async fn next(&mut self) -> Option<ServerMsg> {
        loop {
            tokio::select! {
                outbound = self.rx.recv(), if self.outbound_open => {
                    match outbound {
                        Some(msg) => {
                            if let Err(err) = self.socket.send(msg).await {
                                warn!(%err, "relay publish failed");
                                self.connected.set(false);
                                return None;
                            }
                        }
                        None => self.outbound_open = false,
                    }
                }
                inbound = self.socket.recv() => {
                    match inbound {
                        Some(msg) => return Some(msg),
                        None => {
                            self.connected.set(false);
                            return None;
                        }
                    }
                }
            }
        }
    }

    pub async fn next_timeout(&mut self, dur: Duration) -> Option<ServerMsg> {
        match timeout(dur, self.next()).await {
            Ok(msg) => msg,
            Err(_) => None,
        }
    }
}

fn relay_url(base_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url.trim())?;
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}
