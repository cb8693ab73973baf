//! Parsing of the server lines the client cares about. Everything else is
//! [`ServerLine::Other`].

use serde::Serialize;

/// Server names the client accepts in prefixes and notices.
pub const SERVER_NAMES: [&str; 2] = ["tmi.twitch.tv", "testserver.local"];

const LOGIN_FAILURES: [&str; 2] = ["Login unsuccessful", "Error logging in"];

/// A message a user typed in a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Including the leading `#`.
    pub channel: String,
    pub username: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerLine {
    Ping { server: String },
    LoginFailed,
    /// `channel` is without the leading `#`.
    Join { username: String, channel: String },
    Message(ChatMessage),
    Other,
}

impl ServerLine {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();

        if let Some(server) = line.strip_prefix("PING :") {
            return ServerLine::Ping {
                server: server.to_string(),
            };
        }
        if is_login_failure(line) {
            return ServerLine::LoginFailed;
        }

        let Some((nick, command)) = split_user_prefix(line) else {
            return ServerLine::Other;
        };
        if let Some(channel) = command.strip_prefix("JOIN #") {
            if is_ident(channel) {
                return ServerLine::Join {
                    username: nick.to_string(),
                    channel: channel.to_string(),
                };
            }
        }
        if let Some(rest) = command.strip_prefix("PRIVMSG #") {
            if let Some((channel, message)) = rest.split_once(" :") {
                if is_ident(channel) && !message.is_empty() {
                    return ServerLine::Message(ChatMessage {
                        channel: format!("#{}", channel),
                        username: nick.to_string(),
                        message: message.to_string(),
                    });
                }
            }
        }
        ServerLine::Other
    }
}

/// `:<server> NOTICE * :Login unsuccessful` and its variants.
pub fn is_login_failure(line: &str) -> bool {
    let Some(rest) = line.trim().strip_prefix(':') else {
        return false;
    };
    let Some(mut notice) = SERVER_NAMES
        .iter()
        .find_map(|server| rest.strip_prefix(server))
        .and_then(|rest| rest.strip_prefix(" NOTICE * :"))
    else {
        return false;
    };
    while !notice.is_empty() {
        match LOGIN_FAILURES
            .iter()
            .find_map(|failure| notice.strip_prefix(failure))
        {
            Some(rest) => notice = rest,
            None => return false,
        }
    }
    true
}

// ":nick!user@host.tmi.twitch.tv COMMAND ..." -> (nick, "COMMAND ...")
fn split_user_prefix(line: &str) -> Option<(&str, &str)> {
    let (prefix, command) = line.strip_prefix(':')?.split_once(' ')?;
    let (nick, rest) = prefix.split_once('!')?;
    let (user, host) = rest.split_once('@')?;
    let host = SERVER_NAMES
        .iter()
        .find_map(|server| host.strip_suffix(server)?.strip_suffix('.'))?;
    (is_ident(nick) && is_ident(user) && is_ident(host)).then_some((nick, command))
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_failure_notices() {
        assert!(is_login_failure(":tmi.twitch.tv NOTICE * :Error logging in"));
        assert!(is_login_failure(":tmi.twitch.tv NOTICE * :Error logging in\n"));
        assert!(is_login_failure(":tmi.twitch.tv NOTICE * :Error logging in\r\n"));
        assert!(is_login_failure(":testserver.local NOTICE * :Login unsuccessful"));
        assert_eq!(
            ServerLine::parse(":tmi.twitch.tv NOTICE * :Login unsuccessful\r\n"),
            ServerLine::LoginFailed
        );
    }

    #[test]
    fn test_welcome_lines_are_not_failures() {
        for line in [
            ":tmi.twitch.tv 001 sdsd :Welcome, GLHF!",
            ":tmi.twitch.tv 001 sdsd :Your host is tmi.twitch.tv",
            ":tmi.twitch.tv 001 sdsd :This server is rather new",
            ":tmi.twitch.tv 001 sdsd :-!",
            ":tmi.twitch.tv 001 sdsd :You are in a maze of twisty passages, all alike.",
            ":tmi.twitch.tv 001 sdsd :>",
            ":example.org NOTICE * :Login unsuccessful",
        ] {
            assert!(!is_login_failure(line), "{}", line);
        }
    }

    #[test]
    fn test_ping() {
        assert_eq!(
            ServerLine::parse("PING :tmi.twitch.tv\r\n"),
            ServerLine::Ping {
                server: "tmi.twitch.tv".into()
            }
        );
    }

    #[test]
    fn test_join() {
        assert_eq!(
            ServerLine::parse(":bot!bot@bot.tmi.twitch.tv JOIN #some_channel"),
            ServerLine::Join {
                username: "bot".into(),
                channel: "some_channel".into()
            }
        );
        assert_eq!(
            ServerLine::parse(":bot!bot@bot.tmi.twitch.tv JOIN #bad-name"),
            ServerLine::Other
        );
    }

    #[test]
    fn test_privmsg() {
        assert_eq!(
            ServerLine::parse(":viewer_1!viewer_1@viewer_1.tmi.twitch.tv PRIVMSG #bot :red please :)"),
            ServerLine::Message(ChatMessage {
                channel: "#bot".into(),
                username: "viewer_1".into(),
                message: "red please :)".into(),
            })
        );
        assert_eq!(
            ServerLine::parse(":v!v@v.tmi.twitch.tv PRIVMSG #bot :"),
            ServerLine::Other
        );
    }

    #[test]
    fn test_message_serializes_to_json() {
        let ServerLine::Message(message) =
            ServerLine::parse(":v!v@v.tmi.twitch.tv PRIVMSG #bot :440")
        else {
            panic!("expected a message");
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            serde_json::json!({ "channel": "#bot", "username": "v", "message": "440" })
        );
    }

    #[test]
    fn test_foreign_host_is_ignored() {
        assert_eq!(
            ServerLine::parse(":v!v@v.example.org PRIVMSG #bot :hi"),
            ServerLine::Other
        );
        assert_eq!(
            ServerLine::parse(":tmi.twitch.tv 353 bot = #bot :bot"),
            ServerLine::Other
        );
    }
}
