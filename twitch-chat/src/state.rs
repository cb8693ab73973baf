use crate::protocol::{ChatMessage, ServerLine};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatState {
    Connecting,
    AwaitingLoginAck,
    /// JOIN sent, waiting for the server to echo it.
    Joining(String),
    JoinedChannel(String),
    Closed,
}

/// What the connection owner has to do after a line was handled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    LoginAccepted,
    LoginRejected,
    Pong(String),
    Joined(String),
    Message(ChatMessage),
}

/// Line-driven login/join state machine. Performs no I/O.
#[derive(Debug)]
pub struct Session {
    username: String,
    state: ChatState,
    current_channel: Option<String>,
}

impl Session {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            state: ChatState::Connecting,
            current_channel: None,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn current_channel(&self) -> Option<&str> {
        self.current_channel.as_deref()
    }

    /// Credentials were sent.
    pub fn credentials_sent(&mut self) {
        self.state = ChatState::AwaitingLoginAck;
    }

    pub fn join_sent(&mut self, channel: &str) {
        self.state = ChatState::Joining(channel.to_string());
    }

    pub fn close(&mut self) {
        self.state = ChatState::Closed;
    }

    pub fn handle(&mut self, line: &str) -> Option<SessionEvent> {
        let parsed = ServerLine::parse(line);

        // the first reply decides the login
        if self.state == ChatState::AwaitingLoginAck {
            return Some(if parsed == ServerLine::LoginFailed {
                SessionEvent::LoginRejected
            } else {
                SessionEvent::LoginAccepted
            });
        }

        match parsed {
            ServerLine::Ping { server } => Some(SessionEvent::Pong(server)),
            ServerLine::Join { username, channel }
                if username.eq_ignore_ascii_case(&self.username) =>
            {
                if self.state == ChatState::Joining(channel.clone()) {
                    self.state = ChatState::JoinedChannel(channel.clone());
                }
                self.current_channel = Some(channel.clone());
                Some(SessionEvent::Joined(channel))
            }
            ServerLine::Message(message) => Some(SessionEvent::Message(message)),
            _ => None,
        }
    }
}
