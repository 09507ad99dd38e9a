//! Line-oriented IRC server connection.
//!
//! # Design
//! - One task owns the socket; inbound lines go out through an mpsc channel and
//!   outbound lines come in through another, so the orchestrator never blocks on I/O.
//! - Registration, `PING` and nickname collisions are answered here; everything
//!   else is forwarded.
//! - A dropped connection is reported once and retried after a fixed delay. The
//!   task ends when the outbound sender is dropped.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xdcc_config::NetworkConfig;
use xdcc_core::{IrcMessage, OutboundLine};

/// Connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcSettings {
    pub host: String,
    pub port: u16,
    pub nick: String,
    pub realname: String,
    pub reconnect_delay: Duration,
}

impl From<&NetworkConfig> for IrcSettings {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            nick: config.nick.clone(),
            realname: config.realname.clone(),
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

/// What the server connection reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Registration finished under `nick`.
    Registered { nick: String },
    /// Any other server line.
    Line(IrcMessage),
    /// The socket closed; a reconnect follows.
    Disconnected,
}

enum Exit {
    Closed,
    Shutdown,
}

/// Start the connection task.
#[must_use]
pub fn spawn_irc(
    settings: IrcSettings,
    events: mpsc::Sender<ServerEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundLine>,
) -> JoinHandle<()> {
    tokio::spawn(run(settings, events, outbound))
}

async fn run(
    settings: IrcSettings,
    events: mpsc::Sender<ServerEvent>,
    mut outbound: mpsc::UnboundedReceiver<OutboundLine>,
) {
    loop {
        match TcpStream::connect((settings.host.as_str(), settings.port)).await {
            Ok(stream) => {
                info!(host = %settings.host, port = settings.port, "connected to irc server");
                match serve(stream, &settings, &events, &mut outbound).await {
                    Ok(Exit::Shutdown) => return,
                    Ok(Exit::Closed) => info!(host = %settings.host, "irc server closed the connection"),
                    Err(err) => warn!(error = %err, host = %settings.host, "irc connection failed"),
                }
                if events.send(ServerEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, host = %settings.host, port = settings.port, "irc connect failed");
            }
        }

        let backoff = tokio::time::sleep(settings.reconnect_delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                () = &mut backoff => break,
                line = outbound.recv() => match line {
                    Some(line) => debug!(line = %line, "dropping line while disconnected"),
                    None => return,
                },
            }
        }
    }
}

async fn serve(
    stream: TcpStream,
    settings: &IrcSettings,
    events: &mpsc::Sender<ServerEvent>,
    outbound: &mut mpsc::UnboundedReceiver<OutboundLine>,
) -> io::Result<Exit> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut nick = settings.nick.clone();
    write_line(&mut write, &OutboundLine::nick(&nick)).await?;
    write_line(&mut write, &OutboundLine::user(&settings.nick, &settings.realname)).await?;

    // Partial reads stay in the buffer when the outbound branch wins the select.
    let mut buffer = Vec::with_capacity(512);
    loop {
        tokio::select! {
            read = reader.read_until(b'\n', &mut buffer) => {
                if read? == 0 {
                    return Ok(Exit::Closed);
                }
                let text = String::from_utf8_lossy(&buffer).into_owned();
                buffer.clear();
                let Some(message) = IrcMessage::parse(&text) else {
                    continue;
                };
                let event = match message.command.as_str() {
                    "PING" => {
                        let token = message.trailing().unwrap_or_default();
                        write_line(&mut write, &OutboundLine::pong(token)).await?;
                        continue;
                    }
                    "001" => {
                        if let Some(registered) = message.params.first() {
                            nick.clone_from(registered);
                        }
                        info!(nick = %nick, "registered with irc server");
                        ServerEvent::Registered { nick: nick.clone() }
                    }
                    "433" => {
                        nick.push('_');
                        warn!(nick = %nick, "nickname in use; retrying");
                        write_line(&mut write, &OutboundLine::nick(&nick)).await?;
                        continue;
                    }
                    _ => ServerEvent::Line(message),
                };
                if events.send(event).await.is_err() {
                    return Ok(Exit::Shutdown);
                }
            }
            line = outbound.recv() => match line {
                Some(line) => write_line(&mut write, &line).await?,
                None => {
                    let _ = write.shutdown().await;
                    return Ok(Exit::Shutdown);
                }
            },
        }
    }
}

async fn write_line(write: &mut OwnedWriteHalf, line: &OutboundLine) -> io::Result<()> {
    debug!(line = %line, "irc send");
    let mut framed = Vec::with_capacity(line.as_str().len() + 2);
    framed.extend_from_slice(line.as_str().as_bytes());
    framed.extend_from_slice(b"\r\n");
    write.write_all(&framed).await
}
