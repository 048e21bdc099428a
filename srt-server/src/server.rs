use crate::protocol::{ClientCommand, Deframer, ProtocolError, Reply};
use antenna_controller::Feedback;
use srt::{Event, Srt, SrtError};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs, tcp::OwnedWriteHalf},
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

const READ_BUFFER: usize = 4096;
/// Quiet time after which a message without end is taken as complete.
const FRAME_SETTLE: Duration = Duration::from_millis(50);

/// Serves one remote operator at a time.
pub struct Server {
    listener: TcpListener,
    srt: Arc<Srt>,
}

impl Server {
    pub async fn bind(addr: impl ToSocketAddrs, srt: Arc<Srt>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("[SERVER] listening on {}", listener.local_addr()?);

        Ok(Self { listener, srt })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until `shutdown` completes.
    ///
    /// While a session is running, including the parking that follows the
    /// client's departure, new connections are answered `BUSY` and closed.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut session: Option<JoinHandle<()>> = None;

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::error!("[SERVER] accept failed: {}", e);
                        continue;
                    }
                },
            };

            if session.as_ref().is_some_and(|session| !session.is_finished()) {
                log::warn!("[SERVER] {} rejected, a client is already connected", peer);
                tokio::spawn(reject(stream));
                continue;
            }

            log::info!("[SERVER] client {} connected", peer);
            session = Some(tokio::spawn(serve(self.srt.clone(), stream, peer)));
        }

        if let Some(session) = session {
            session.abort();
            let _ = session.await;
        }
    }
}

async fn reject(mut stream: TcpStream) {
    let _ = stream.write_all(Reply::Busy.to_string().as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn serve(srt: Arc<Srt>, stream: TcpStream, peer: SocketAddr) {
    let (mut reader, writer) = stream.into_split();
    let (replies, outgoing) = mpsc::unbounded_channel();

    let writer = tokio::spawn(write_replies(writer, outgoing));
    let forwarder = tokio::spawn(forward_events(srt.subscribe(), replies.clone()));

    let session = Session {
        srt: srt.clone(),
        replies,
    };
    session.reply(Reply::Connected);

    let mut buffer = vec![0u8; READ_BUFFER];
    let mut deframer = Deframer::default();

    loop {
        let read = if deframer.is_pending() {
            match tokio::time::timeout(FRAME_SETTLE, reader.read(&mut buffer)).await {
                Ok(read) => read,
                Err(_) => {
                    session.dispatch(deframer.flush()).await;
                    continue;
                }
            }
        } else {
            reader.read(&mut buffer).await
        };

        let read = match read {
            Ok(0) => break,
            Ok(n) => String::from_utf8_lossy(&buffer[..n]).into_owned(),
            Err(e) => {
                log::warn!("[SERVER] reading from {} failed: {}", peer, e);
                break;
            }
        };

        session.dispatch(deframer.push(&read)).await;
    }

    if deframer.is_pending() {
        log::warn!("[SERVER] {} left in the middle of a message", peer);
    }

    log::info!("[SERVER] client {} disconnected", peer);

    forwarder.abort();
    let _ = forwarder.await;

    // A no-op after a clean disconnect.
    if let Err(e) = srt.disconnect_apm().await {
        log::error!("[SERVER] parking after {} left failed: {}", peer, e);
    }

    drop(session);
    let _ = writer.await;
}

async fn write_replies(mut writer: OwnedWriteHalf, mut replies: mpsc::UnboundedReceiver<Reply>) {
    while let Some(reply) = replies.recv().await {
        log::debug!("[SERVER] -> {}", reply);

        if let Err(e) = writer.write_all(reply.to_string().as_bytes()).await {
            log::warn!("[SERVER] writing to the client failed: {}", e);
            break;
        }
    }
}

async fn forward_events(mut events: broadcast::Receiver<Event>, replies: mpsc::UnboundedSender<Reply>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if replies.send(Reply::from_event(&event)).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log::warn!("[SERVER] {} events not forwarded", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

struct Session {
    srt: Arc<Srt>,
    replies: mpsc::UnboundedSender<Reply>,
}

impl Session {
    fn reply(&self, reply: Reply) {
        let _ = self.replies.send(reply);
    }

    async fn dispatch(&self, messages: Vec<Result<String, ProtocolError>>) {
        for message in messages {
            match message {
                Ok(message) => self.handle(&message).await,
                Err(e) => log::warn!("[SERVER] dropped {}", e),
            }
        }
    }

    async fn handle(&self, message: &str) {
        log::info!("[SERVER] <- {}", message);

        let command = match message.parse::<ClientCommand>() {
            Ok(command) => command,
            Err(e) => {
                log::warn!("[SERVER] {}", e);
                self.reply(Reply::Error(e.to_string()));
                return;
            }
        };

        let srt = &self.srt;

        match command {
            ClientCommand::Connect => {
                let result = srt.connect_apm(srt.config().evacuate_water).await;
                self.settle(result, "connected");
            }
            ClientCommand::Disconnect => {
                let result = srt.disconnect_apm().await;
                self.settle(result, "disconnected");
            }
            ClientCommand::GoHome => self.motion(srt.go_home().await),
            ClientCommand::Untangle => self.motion(srt.untangle().await),
            ClientCommand::Standby => self.motion(srt.standby().await),
            ClientCommand::StopTracking => self.motion(Ok(srt.stop_tracking().await)),
            ClientCommand::PointEquatorial { ra, dec } => {
                self.motion(srt.point_equatorial(ra, dec).await)
            }
            ClientCommand::PointGalactic {
                longitude,
                latitude,
            } => self.motion(srt.point_galactic(longitude, latitude).await),
            ClientCommand::PointAzAlt { azimuth, elevation } => {
                self.motion(srt.point_az_alt(azimuth, elevation).await)
            }
            ClientCommand::TrackEquatorial { ra, dec } => {
                self.motion(srt.track_equatorial(ra, dec).await)
            }
            ClientCommand::TrackGalactic {
                longitude,
                latitude,
            } => self.motion(srt.track_galactic(longitude, latitude).await),
            ClientCommand::Measure(params) => match srt.start_observation(params) {
                Ok(()) => self.reply(Reply::Ok("measurement_started".to_string())),
                Err(e) => self.reply(Reply::Error(e.to_string())),
            },
        }
    }

    /// Connection changes end with `OK|<done>` unless they failed outright.
    fn settle(&self, result: Result<Feedback, SrtError>, done: &str) {
        match result {
            Ok(feedback) => {
                if !feedback.is_success() {
                    self.reply(Reply::from_feedback(&feedback));
                }
                self.reply(Reply::Ok(done.to_string()));
            }
            Err(e) => self.reply(Reply::Error(e.to_string())),
        }
    }

    /// Motions always end with `OK|IDLE` so the client can go on.
    fn motion(&self, result: Result<Feedback, SrtError>) {
        let reply = match result {
            Ok(feedback) => Reply::from_feedback(&feedback),
            Err(e) => Reply::Error(e.to_string()),
        };

        if reply != Reply::idle() {
            self.reply(reply);
        }
        self.reply(Reply::idle());
    }
}
