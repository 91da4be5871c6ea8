//! Client-side codec for the broker's STOMP-style text frames.
//!
//! A frame is `COMMAND\nheader:value\n...\n\nbody\0`. The broker also sends
//! bare `\n` heartbeat frames, which parse to `None`. Only the commands this
//! client actually exchanges are modeled.

use pharmalink_common::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // Client -> broker
    Connect,
    Subscribe,
    Send,
    Disconnect,
    // Broker -> client
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Subscribe => "SUBSCRIBE",
            Command::Send => "SEND",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "CONNECT" => Some(Command::Connect),
            "SUBSCRIBE" => Some(Command::Subscribe),
            "SEND" => Some(Command::Send),
            "DISCONNECT" => Some(Command::Disconnect),
            "CONNECTED" => Some(Command::Connected),
            "MESSAGE" => Some(Command::Message),
            "RECEIPT" => Some(Command::Receipt),
            "ERROR" => Some(Command::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to the wire form, NUL terminator included.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse a single inbound frame. `Ok(None)` for heartbeat frames.
    pub fn parse(raw: &str) -> Result<Option<Self>, TransportError> {
        let raw = raw.trim_end_matches('\0');
        if raw.is_empty() || raw == "\n" {
            return Ok(None);
        }

        let (head, body) = raw
            .split_once("\n\n")
            .ok_or_else(|| TransportError::Frame("missing header terminator".into()))?;

        let mut lines = head.lines();
        let command_line = lines
            .next()
            .ok_or_else(|| TransportError::Frame("empty frame".into()))?;
        let command = Command::parse(command_line)
            .ok_or_else(|| TransportError::Frame(format!("unknown command: {command_line}")))?;

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| TransportError::Frame(format!("bad header line: {line}")))?;
            headers.push((name.to_string(), value.to_string()));
        }

        Ok(Some(Self {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_roundtrip() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/app/chat.typing.3")
            .header("content-type", "application/json")
            .body(r#"{"isTyping":true}"#);

        let encoded = frame.encode();
        assert!(encoded.starts_with("SEND\ndestination:/app/chat.typing.3\n"));
        assert!(encoded.ends_with("{\"isTyping\":true}\0"));

        let parsed = Frame::parse(&encoded).unwrap().unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn parses_broker_message() {
        let raw = "MESSAGE\ndestination:/topic/chat/room/3\nsubscription:sub-0\nmessage-id:1-1\n\n{\"text\":\"hi\"}\0";
        let frame = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("destination"), Some("/topic/chat/room/3"));
        assert_eq!(frame.body, "{\"text\":\"hi\"}");
    }

    #[test]
    fn heartbeat_is_none() {
        assert_eq!(Frame::parse("\n").unwrap(), None);
        assert_eq!(Frame::parse("").unwrap(), None);
        assert_eq!(Frame::parse("\0").unwrap(), None);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(Frame::parse("NOT A FRAME").is_err());
        assert!(Frame::parse("WHATEVER\n\nbody\0").is_err());
        assert!(Frame::parse("MESSAGE\nno-colon-header\n\n\0").is_err());
    }

    #[test]
    fn empty_body_frame() {
        let raw = "CONNECTED\nversion:1.2\n\n\0";
        let frame = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get("version"), Some("1.2"));
        assert!(frame.body.is_empty());
    }
}
