use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult};
use crate::protocol::ChatMessage;
use crate::state::{ChatState, Session, SessionEvent};

const MAX_LINE_LENGTH: usize = 8 * 1024;
const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
struct Status {
    state: ChatState,
    channel: Option<String>,
}

enum Command {
    /// Rate limited.
    Say(String),
    Join(String),
}

struct Connection {
    lines: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: OwnedWriteHalf,
    verbose: bool,
}

impl Connection {
    fn new(stream: TcpStream, verbose: bool) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            writer,
            verbose,
        }
    }

    async fn send_line(&mut self, line: &str) -> io::Result<()> {
        if line.starts_with("PASS ") {
            log::debug!("> PASS <redacted>");
        } else {
            log::debug!("> {}", line);
        }
        self.writer.write_all(format!("{}\r\n", line).as_bytes()).await
    }

    /// `Ok(None)` on EOF.
    async fn next_line(&mut self) -> ChatResult<Option<String>> {
        match self.lines.next().await {
            Some(Ok(line)) => {
                if self.verbose {
                    log::debug!("< {}", line);
                } else {
                    log::trace!("< {}", line);
                }
                Ok(Some(line))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

/// Connected chat client.
///
/// Dropping it stops the background task and closes the socket.
pub struct ChatClient {
    config: ChatConfig,
    commands: mpsc::UnboundedSender<Command>,
    messages: mpsc::UnboundedReceiver<ChatMessage>,
    status: watch::Receiver<Status>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Connects, logs in and joins the configured channel.
    ///
    /// A refused connection or rejected login is returned as is; only
    /// connections lost later are re-established automatically.
    pub async fn connect(config: ChatConfig) -> ChatResult<Self> {
        let channel = config.channel().to_string();
        let (status_tx, status) = watch::channel(Status {
            state: ChatState::Connecting,
            channel: None,
        });
        let (conn, session, pending) = establish(&config, &channel, &status_tx).await?;
        log::info!("chat: joined #{} as {}", channel, config.username);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (messages_tx, messages) = mpsc::unbounded_channel();
        for message in pending {
            let _ = messages_tx.send(message);
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            conn,
            session,
            config.clone(),
            commands_rx,
            messages_tx,
            status_tx,
            cancel.clone(),
        ));

        Ok(Self {
            config,
            commands,
            messages,
            status,
            cancel,
            task: Some(task),
        })
    }

    /// Everything received since the last call. Never blocks.
    pub fn receive_messages(&mut self) -> Vec<ChatMessage> {
        let mut received = Vec::new();
        while let Ok(message) = self.messages.try_recv() {
            received.push(message);
        }
        received
    }

    /// Waits for the next message; `None` once the client has stopped.
    pub async fn next_message(&mut self) -> Option<ChatMessage> {
        self.messages.recv().await
    }

    /// Queues a message for the current channel. Queued lines go out at most
    /// once per `send_interval`.
    pub fn send_chat_message(&self, message: &str) -> ChatResult<()> {
        let message = message.replace(['\r', '\n'], " ");
        if message.trim().is_empty() {
            return Ok(());
        }
        let channel = self
            .current_channel()
            .unwrap_or_else(|| self.config.channel().to_string());
        self.command(Command::Say(format!("PRIVMSG #{} :{}", channel, message)))
    }

    /// Sends JOIN right away. The switch completes when the server echoes it;
    /// watch [`current_channel`](Self::current_channel).
    pub fn join_channel(&self, channel: &str) -> ChatResult<()> {
        let channel = channel.trim_start_matches('#');
        self.command(Command::Join(channel.to_string()))
    }

    /// Channel (without `#`) the server last confirmed joining.
    pub fn current_channel(&self) -> Option<String> {
        self.status.borrow().channel.clone()
    }

    pub fn state(&self) -> ChatState {
        self.status.borrow().state.clone()
    }

    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("chat: task failed: {}", e);
            }
        }
    }

    fn command(&self, command: Command) -> ChatResult<()> {
        self.commands.send(command).map_err(|_| ChatError::Closed)
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn establish(
    config: &ChatConfig,
    channel: &str,
    status: &watch::Sender<Status>,
) -> ChatResult<(Connection, Session, Vec<ChatMessage>)> {
    let mut session = Session::new(&config.username);
    set_state(status, session.state());

    let addr = config.addr();
    let stream = match timeout(config.connect_timeout(), TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(ChatError::Connect { addr, source }),
        Err(_) => {
            return Err(ChatError::Connect {
                addr,
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            });
        }
    };
    log::info!("chat: connected to {}", addr);

    let mut conn = Connection::new(stream, config.verbose);
    conn.send_line(&format!("PASS {}", config.oauth)).await?;
    conn.send_line(&format!("NICK {}", config.username)).await?;
    session.credentials_sent();
    set_state(status, session.state());

    let deadline = Instant::now() + config.connect_timeout();
    let reply = timeout_at(deadline, "login reply", conn.next_line()).await??;
    let Some(reply) = reply else {
        return Err(ChatError::Closed);
    };
    if session.handle(&reply) == Some(SessionEvent::LoginRejected) {
        log::error!("chat: login rejected for {}", config.username);
        return Err(ChatError::LoginRejected);
    }
    log::info!("chat: logged in as {}", config.username);

    conn.send_line(&format!("JOIN #{}", channel)).await?;
    session.join_sent(channel);
    set_state(status, session.state());

    let mut pending = Vec::new();
    while session.state() != &ChatState::JoinedChannel(channel.to_string()) {
        let Some(line) = timeout_at(deadline, "channel join", conn.next_line()).await?? else {
            return Err(ChatError::Closed);
        };
        match session.handle(&line) {
            Some(SessionEvent::Pong(server)) => conn.send_line(&format!("PONG :{}", server)).await?,
            Some(SessionEvent::Message(message)) => pending.push(message),
            _ => {}
        }
    }
    publish(status, &session);
    Ok((conn, session, pending))
}

async fn timeout_at<F: Future>(
    deadline: Instant,
    waiting_for: &'static str,
    future: F,
) -> ChatResult<F::Output> {
    tokio::time::timeout_at(deadline, future)
        .await
        .map_err(|_| ChatError::Timeout(waiting_for))
}

async fn run(
    mut conn: Connection,
    mut session: Session,
    config: ChatConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    messages: mpsc::UnboundedSender<ChatMessage>,
    status: watch::Sender<Status>,
    cancel: CancellationToken,
) {
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut last_sent: Option<Instant> = None;

    loop {
        let send_at = last_sent.map_or_else(Instant::now, |t| t + config.send_interval());

        let lost: Option<ChatError> = tokio::select! {
            _ = cancel.cancelled() => break,
            line = conn.next_line() => match line {
                Ok(Some(line)) => match session.handle(&line) {
                    Some(SessionEvent::Pong(server)) => {
                        conn.send_line(&format!("PONG :{}", server)).await.err().map(ChatError::from)
                    }
                    Some(SessionEvent::Message(message)) => {
                        let _ = messages.send(message);
                        None
                    }
                    Some(SessionEvent::Joined(channel)) => {
                        log::info!("chat: joined #{}", channel);
                        publish(&status, &session);
                        None
                    }
                    _ => None,
                },
                Ok(None) => Some(ChatError::Closed),
                Err(e) => Some(e),
            },
            command = commands.recv() => match command {
                Some(Command::Say(line)) => {
                    queue.push_back(line);
                    None
                }
                Some(Command::Join(channel)) => {
                    let result = conn.send_line(&format!("JOIN #{}", channel)).await;
                    session.join_sent(&channel);
                    publish(&status, &session);
                    result.err().map(ChatError::from)
                }
                // client dropped
                None => break,
            },
            _ = sleep_until(send_at), if !queue.is_empty() => {
                last_sent = Some(Instant::now());
                match queue.pop_front() {
                    Some(line) => conn.send_line(&line).await.err().map(ChatError::from),
                    None => None,
                }
            }
        };

        if let Some(e) = lost {
            log::warn!("chat: connection lost: {}", e);
            let channel = session
                .current_channel()
                .map(str::to_string)
                .unwrap_or_else(|| config.channel().to_string());
            match reconnect(&config, &channel, &status, &cancel).await {
                Some((new_conn, new_session, pending)) => {
                    conn = new_conn;
                    session = new_session;
                    for message in pending {
                        let _ = messages.send(message);
                    }
                }
                None => break,
            }
        }
    }

    session.close();
    publish(&status, &session);
    log::info!("chat: stopped");
}

async fn reconnect(
    config: &ChatConfig,
    channel: &str,
    status: &watch::Sender<Status>,
    cancel: &CancellationToken,
) -> Option<(Connection, Session, Vec<ChatMessage>)> {
    let mut delay = next_reconnect_delay(None, config);
    loop {
        log::warn!("chat: reconnecting in {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = sleep(delay) => {}
        }

        match establish(config, channel, status).await {
            Ok(established) => {
                log::info!("chat: reconnected, joined #{}", channel);
                return Some(established);
            }
            Err(ChatError::LoginRejected) => {
                log::error!("chat: credentials rejected on reconnect, giving up");
                return None;
            }
            Err(e) => {
                log::warn!("chat: reconnect failed: {}", e);
                delay = next_reconnect_delay(Some(delay), config);
            }
        }
    }
}

/// Exponential backoff between `reconnect_delay` and `max_reconnect_delay`,
/// never shorter than a millisecond.
fn next_reconnect_delay(previous: Option<Duration>, config: &ChatConfig) -> Duration {
    let max = config.max_reconnect_delay().max(MIN_RECONNECT_DELAY);
    let delay = match previous {
        Some(previous) => previous.saturating_mul(2),
        None => config.reconnect_delay(),
    };
    delay.clamp(MIN_RECONNECT_DELAY, max)
}

fn set_state(status: &watch::Sender<Status>, state: &ChatState) {
    status.send_modify(|status| status.state = state.clone());
}

fn publish(status: &watch::Sender<Status>, session: &Session) {
    status.send_modify(|status| {
        status.state = session.state().clone();
        if let Some(channel) = session.current_channel() {
            status.channel = Some(channel.to_string());
        }
    });
}

#[cfg(test)]
#[path = "client_test.rs"]
mod client_test;
