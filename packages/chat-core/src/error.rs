//! Domain error types for the chat server.
//!
//! Every variant's `Display` impl produces the exact text the client sees
//! after the handler prefixes it with `ERROR: ` and a trailing `\n`.

/// Failures from validating or registering a client name.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    #[error("Name validation failed - Name cannot be empty. Please provide a valid name.")]
    Empty,
    #[error("Name validation failed - Name too long. Maximum length is {max} characters (received {actual}).")]
    TooLong { max: usize, actual: usize },
    #[error("Name validation failed - Name contains invalid characters (newline/carriage return). Please use only printable characters.")]
    InvalidChars,
    #[error("Name registration failed - The name '{name}' is already in use by another client. Please choose a different name.")]
    Duplicate { name: String },
}

/// Failures from pair-chat operations (`CONNECT`, `DISCONNECT_CHAT`, forwarding).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("Connection failed - You cannot connect to yourself. Please specify a different client name.")]
    SelfTarget,
    #[error("Connection failed - Client '{name}' not found. The client may not be connected or the name is incorrect. Use available client names.")]
    UnknownTarget { name: String },
    #[error("Connection failed - Client '{name}' is no longer connected. The client may have disconnected.")]
    TargetGone { name: String },
    #[error("Connection failed - You are already connected to '{name}'. No need to reconnect.")]
    AlreadyPaired { name: String },
    #[error("Message delivery failed - Your chat partner has disconnected. The chat session has been closed.")]
    PartnerGone,
    #[error("You are not in any chat. Use CONNECT:name to start a chat.")]
    NotInChat,
}

/// Failures from group operations (`CREATE_GROUP`, `JOIN_GROUP`, `INVITE_TO_GROUP`, `LEAVE_GROUP`, `GROUP:`).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("Group name cannot be empty")]
    EmptyName,
    #[error("Group '{name}' already exists")]
    AlreadyExists { name: String },
    #[error("Group '{name}' does not exist")]
    NotFound { name: String },
    #[error("You are already a member of group '{name}'")]
    AlreadyMember { name: String },
    #[error("You are not a member of group '{name}'")]
    NotMember { name: String },
    #[error("User '{name}' is not connected")]
    InviteeUnknown { name: String },
    #[error("User '{name}' is already a member of group '{group}'")]
    InviteeAlreadyMember { group: String, name: String },
}

/// Failures from the framing/verb-shape layer, independent of any specific verb's domain.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Message size validation failed - Message exceeds maximum size of {max} bytes (received {actual} bytes). Please send a shorter message.")]
    Oversize { max: usize, actual: usize },
    #[error("Invalid GROUP format. Use: GROUP:group_name:message")]
    BadGroupMessageShape,
    #[error("Invalid INVITE_TO_GROUP format. Use: INVITE_TO_GROUP:group_name:user_name")]
    BadInviteShape,
}

/// Rate limiting rejection.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("Rate limit exceeded. Maximum {limit} messages per {window_secs} seconds.")]
pub struct RateLimitError {
    pub limit: usize,
    pub window_secs: f64,
}

/// Any client-facing error the server can produce, unified for the handler's
/// single `ERROR: {0}\n` reply path.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ServerError {
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

impl ServerError {
    /// Renders the wire-format `ERROR: ...` reply (without the trailing newline).
    #[must_use]
    pub fn as_wire_message(&self) -> String {
        format!("ERROR: {self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_error_messages_match_wire_text() {
        assert_eq!(
            NameError::Empty.to_string(),
            "Name validation failed - Name cannot be empty. Please provide a valid name."
        );
        assert_eq!(
            NameError::TooLong { max: 50, actual: 51 }.to_string(),
            "Name validation failed - Name too long. Maximum length is 50 characters (received 51)."
        );
        assert_eq!(
            NameError::Duplicate { name: "Alice".into() }.to_string(),
            "Name registration failed - The name 'Alice' is already in use by another client. Please choose a different name."
        );
    }

    #[test]
    fn server_error_wire_message_has_prefix() {
        let err: ServerError = NameError::Empty.into();
        assert_eq!(
            err.as_wire_message(),
            "ERROR: Name validation failed - Name cannot be empty. Please provide a valid name."
        );
    }

    #[test]
    fn rate_limit_error_message() {
        let err = RateLimitError { limit: 10, window_secs: 1.0 };
        assert_eq!(err.to_string(), "Rate limit exceeded. Maximum 10 messages per 1 seconds.");
    }
}
