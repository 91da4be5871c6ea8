#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("response parse error: {0}")]
    ParseError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = ApiError::Network("connection refused".into());
        assert_eq!(err.to_string(), "network error: connection refused");

        let err = ApiError::Status {
            status: 403,
            body: "forbidden".into(),
        };
        assert_eq!(err.to_string(), "server returned status 403: forbidden");

        let err = ApiError::Rejected("pharmacy not found".into());
        assert_eq!(err.to_string(), "server rejected request: pharmacy not found");
    }

    #[test]
    fn transport_error_display() {
        let err = TransportError::Handshake("bad credentials".into());
        assert_eq!(err.to_string(), "handshake rejected: bad credentials");

        let err = TransportError::RetriesExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "gave up reconnecting after 5 attempts");
    }

    #[test]
    fn chat_error_from_api() {
        let api_err = ApiError::Network("timeout".into());
        let chat_err: ChatError = api_err.into();
        assert!(matches!(chat_err, ChatError::Api(_)));
        assert!(chat_err.to_string().contains("timeout"));
    }

    #[test]
    fn chat_error_from_transport() {
        let transport_err = TransportError::Frame("missing terminator".into());
        let chat_err: ChatError = transport_err.into();
        assert!(matches!(chat_err, ChatError::Transport(_)));
        assert!(chat_err.to_string().contains("missing terminator"));
    }

    #[test]
    fn chat_error_other_variants() {
        let err = ChatError::MalformedPayload("not json".into());
        assert_eq!(err.to_string(), "malformed payload: not json");

        let err = ChatError::Send("rejected".into());
        assert_eq!(err.to_string(), "send failed: rejected");

        let err = ChatError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }
}
