//! Connection Manager (spec.md §4.2): owns the one socket to the IRC
//! server, runs the handshake, reconnects on any failure, and enforces
//! the optional liveness timeout.
//!
//! Shape grounded in `libtiny_client`: a dedicated task
//! reads/writes the socket and is reached from the rest of the crate
//! only through a small cloneable handle (`ConnHandle`), never by
//! sharing the socket itself.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ircbot_wire::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::lookup_host;
use tokio::sync::{mpsc, watch};

use crate::channel_supervisor::ChannelSupervisor;
use crate::config::{Config, ServerIpType};
use crate::conn_handle::{ConnHandle, OutboundItem};
use crate::liveness::LivenessTimer;
use crate::stream::Stream;

const READ_CHUNK_SIZE: usize = 4096;

/// Spawn the Connection Manager and return a handle to it plus the
/// stream of inbound messages it decodes, for the caller (`Bot`) to
/// broadcast through the Module Registry.
///
/// `channels` is threaded in so that a successful reconnect can re-JOIN
/// every channel actor already known, not just the configured startup
/// channels (spec.md §4.2 Reconnect: "re-issue JOIN for every
/// currently-known channel actor").
pub fn spawn(config: Arc<Config>, channels: Arc<ChannelSupervisor>) -> (ConnHandle, mpsc::Receiver<Message>) {
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundItem>(256);
    let (nick_tx, nick_rx) = watch::channel(config.bot_name.clone());
    let (inbound_tx, inbound_rx) = mpsc::channel(256);

    let handle = ConnHandle::new(outbound_tx, nick_rx);
    tokio::spawn(supervise(config, channels, outbound_rx, nick_tx, inbound_tx));

    (handle, inbound_rx)
}

/// Minimal supervisor (spec.md §5 ADDED mapping): the session loop
/// below already contains its own reconnect behavior for expected
/// failures (socket close, liveness timeout); wrapping the whole thing
/// in its own top-level task (rather than, say, running it on the
/// caller's task) means a genuine bug in here (a panic) is reported by
/// the runtime instead of silently taking down an unrelated task.
async fn supervise(
    config: Arc<Config>,
    channels: Arc<ChannelSupervisor>,
    mut outbound_rx: mpsc::Receiver<OutboundItem>,
    nick_tx: watch::Sender<String>,
    inbound_tx: mpsc::Sender<Message>,
) {
    loop {
        run_session(&config, &channels, &mut outbound_rx, &nick_tx, &inbound_tx).await;

        log::debug!(
            "connection manager: disconnected, retrying in {}ms",
            config.reconnect_interval_ms
        );
        tokio::time::sleep(Duration::from_millis(config.reconnect_interval_ms)).await;
    }
}

async fn run_session(
    config: &Config,
    channels: &ChannelSupervisor,
    outbound_rx: &mut mpsc::Receiver<OutboundItem>,
    nick_tx: &watch::Sender<String>,
    inbound_tx: &mpsc::Sender<Message>,
) {
    log::debug!("state transition: disconnected -> connecting");
    let mut stream = match connect(config).await {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("connection manager: connect failed: {e}");
            return;
        }
    };

    log::debug!("state transition: connecting -> registering");
    if let Err(e) = handshake(&mut stream, config).await {
        log::error!("connection manager: handshake failed: {e}");
        return;
    }

    // Re-establish channel membership for every channel actor already
    // known (configured channels not yet joined are handled by the
    // Built-in Protocol Handler on `001`; this covers channels joined
    // dynamically at runtime before a previous disconnect).
    for chan_name in channels.known_channels() {
        if let Err(e) = write_message(&mut stream, &crate::outbound::join(&chan_name)).await {
            log::error!("connection manager: failed to re-join {chan_name}: {e}");
            return;
        }
    }

    log::debug!("state transition: registering -> online");

    let timeout = config.server_timeout_ms.map(Duration::from_millis);
    let mut liveness = LivenessTimer::new(timeout);
    let mut read_buf = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        tokio::select! {
            read_result = stream.read(&mut chunk) => {
                match read_result {
                    Ok(0) => {
                        log::debug!("connection manager: server closed the connection");
                        return;
                    }
                    Ok(n) => {
                        liveness.reset();
                        read_buf.extend_from_slice(&chunk[..n]);
                        while let Some(parsed) = ircbot_wire::decode_stream(&mut read_buf) {
                            match parsed {
                                Ok(msg) => {
                                    track_self_nick(&msg, nick_tx);
                                    if inbound_tx.send(msg).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => log::warn!("connection manager: dropping malformed line: {e}"),
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("connection manager: socket read error: {e}");
                        return;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some((msg, ack_tx)) => {
                        if let Err(e) = write_message(&mut stream, &msg).await {
                            log::error!("connection manager: socket write error: {e}");
                            // Drop ack_tx unsent: the waiting `send` call
                            // observes the write never completed.
                            return;
                        }
                        let _ = ack_tx.send(());
                    }
                    None => {
                        log::debug!("connection manager: outbound channel closed, shutting down");
                        return;
                    }
                }
            }
            () = liveness.fired() => {
                log::warn!("connection manager: liveness timeout, reconnecting");
                return;
            }
        }
    }
}

async fn connect(config: &Config) -> std::io::Result<Stream> {
    let addr = resolve(config).await?;
    if config.use_ssl {
        #[cfg(feature = "tls-rustls")]
        {
            Stream::new_tls(addr, &config.server)
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        }
        #[cfg(not(feature = "tls-rustls"))]
        {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "use_ssl is set but the tls-rustls feature is disabled",
            ))
        }
    } else {
        Stream::new_tcp(addr)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

async fn resolve(config: &Config) -> std::io::Result<SocketAddr> {
    let candidates: Vec<SocketAddr> = lookup_host((config.server.as_str(), config.port)).await?.collect();
    candidates
        .into_iter()
        .find(|addr| match config.server_ip_type {
            ServerIpType::Inet4 => addr.is_ipv4(),
            ServerIpType::Inet6 => addr.is_ipv6(),
        })
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no {:?} address found for {}", config.server_ip_type, config.server),
            )
        })
}

/// `PASS` (if configured), `USER`, `NICK`, in order (spec.md §4.2
/// Handshake). Acceptance is implicit: the server doesn't ack these,
/// so this just writes them and returns.
async fn handshake(stream: &mut Stream, config: &Config) -> std::io::Result<()> {
    if let Some(password) = &config.password {
        write_message(stream, &crate::outbound::pass(password)).await?;
    }
    write_message(stream, &crate::outbound::user(&config.bot_name)).await?;
    write_message(stream, &crate::outbound::nick(&config.bot_name)).await?;
    Ok(())
}

async fn write_message(stream: &mut Stream, msg: &Message) -> std::io::Result<()> {
    let line = ircbot_wire::serialize(msg);
    stream.write_all(line.as_bytes()).await
}

/// Keep the tracked current nick in sync with the server's view of it:
/// a `NICK` message whose source is our own current nick confirms a
/// successful change (spec.md §4.7's 433-retry path goes through here),
/// and `001` carries the server-accepted nick as `args[0]`.
fn track_self_nick(msg: &Message, nick_tx: &watch::Sender<String>) {
    match msg.command.as_str() {
        "NICK" if msg.source_nick() == nick_tx.borrow().as_str() => {
            let _ = nick_tx.send(msg.trailing.clone());
        }
        "001" => {
            if let Some(confirmed) = msg.args.first() {
                let _ = nick_tx.send(confirmed.clone());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_self_nick_updates_on_matching_nick_change() {
        let (nick_tx, _rx) = watch::channel("bot".to_string());
        let mut msg = Message::new("NICK").with_trailing("bot_");
        msg.user = Some(ircbot_wire::Prefix {
            nick: "bot".into(),
            name: "u".into(),
            rdns: "h".into(),
        });
        track_self_nick(&msg, &nick_tx);
        assert_eq!(*nick_tx.borrow(), "bot_");
    }

    #[test]
    fn track_self_nick_ignores_other_nicks_change() {
        let (nick_tx, _rx) = watch::channel("bot".to_string());
        let mut msg = Message::new("NICK").with_trailing("other_");
        msg.user = Some(ircbot_wire::Prefix {
            nick: "someone_else".into(),
            name: "u".into(),
            rdns: "h".into(),
        });
        track_self_nick(&msg, &nick_tx);
        assert_eq!(*nick_tx.borrow(), "bot");
    }

    #[test]
    fn track_self_nick_applies_welcome_confirmed_nick() {
        let (nick_tx, _rx) = watch::channel("bot".to_string());
        let msg = Message::new("001").with_args(["bot_"]).with_trailing("Welcome");
        track_self_nick(&msg, &nick_tx);
        assert_eq!(*nick_tx.borrow(), "bot_");
    }
}
