//! Command codes.
//!
//! A code is a category letter followed by a two-digit sequence number.
//! Codes without handlers (listen, replay, channel membership, extensions)
//! are reserved vocabulary.

/// Bidirectional. Parameters: `<app_name> <protocol_version>`.
pub const VERSION: &str = "V01";

/// Idle heartbeat; the server answers with the same command.
pub const CONNECTION_KEEPALIVE: &str = "X00";
/// The sender is closing the connection. Parameters: `<reason?>`.
pub const CONNECTION_TERMINATE: &str = "X01";
/// The previous command could not be processed. Parameters: `<command> <reason?>`.
pub const BAD_COMMAND: &str = "X10";

/// Sent from server to client after a successful authentication.
pub const AUTH_APPROVED: &str = "A00";
/// Parameters: `<handle?>`.
pub const AUTH_WITH_ANONYMOUS: &str = "A10";
/// Parameters: `<token>`.
pub const AUTH_WITH_TOKEN: &str = "A11";

pub const CHANNEL_INFO: &str = "C01";
pub const CHANNEL_JOIN: &str = "C10";
pub const CHANNEL_LEAVE: &str = "C11";

/// Client to server. Parameters: `<channel> <message> <flags?>`.
pub const MESSAGE_SEND: &str = "M00";
/// Server to client. Parameters: `<time> <channel> <user> <message> <flags>`.
pub const MESSAGE_RECEIVED: &str = "M01";
pub const MESSAGE_LISTEN_START: &str = "M10";
pub const MESSAGE_LISTEN_STOP: &str = "M11";
pub const MESSAGE_REQUEST_REPLAY: &str = "M50";
pub const MESSAGE_REPLAY_START: &str = "M51";

pub const EXTENSIONS_AVAILABLE: &str = "E00";
pub const EXTENSION_ENABLE: &str = "E01";
pub const EXTENSION_DISABLE: &str = "E02";

/// Stage-table key matched for every command in addition to its own code.
pub const WILDCARD: &str = "*";

/// Codes a client may send before it has authenticated.
pub const PERMITTED_WHILE_UNAUTHENTICATED: [&str; 4] = [
    VERSION,
    CONNECTION_TERMINATE,
    AUTH_WITH_ANONYMOUS,
    AUTH_WITH_TOKEN,
];

/// Returns whether `code` may be sent by an unauthenticated client.
pub fn is_permitted_while_unauthenticated(code: &str) -> bool {
    PERMITTED_WHILE_UNAUTHENTICATED.contains(&code)
}

/// Returns a readable name for a known code, for log output.
pub fn name(code: &str) -> Option<&'static str> {
    let name = match code {
        VERSION => "VERSION",
        CONNECTION_KEEPALIVE => "CONNECTION_KEEPALIVE",
        CONNECTION_TERMINATE => "CONNECTION_TERMINATE",
        BAD_COMMAND => "BAD_COMMAND",
        AUTH_APPROVED => "AUTH_APPROVED",
        AUTH_WITH_ANONYMOUS => "AUTH_WITH_ANONYMOUS",
        AUTH_WITH_TOKEN => "AUTH_WITH_TOKEN",
        CHANNEL_INFO => "CHANNEL_INFO",
        CHANNEL_JOIN => "CHANNEL_JOIN",
        CHANNEL_LEAVE => "CHANNEL_LEAVE",
        MESSAGE_SEND => "MESSAGE_SEND",
        MESSAGE_RECEIVED => "MESSAGE_RECEIVED",
        MESSAGE_LISTEN_START => "MESSAGE_LISTEN_START",
        MESSAGE_LISTEN_STOP => "MESSAGE_LISTEN_STOP",
        MESSAGE_REQUEST_REPLAY => "MESSAGE_REQUEST_REPLAY",
        MESSAGE_REPLAY_START => "MESSAGE_REPLAY_START",
        EXTENSIONS_AVAILABLE => "EXTENSIONS_AVAILABLE",
        EXTENSION_ENABLE => "EXTENSION_ENABLE",
        EXTENSION_DISABLE => "EXTENSION_DISABLE",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::validate_command_code;

    #[test]
    fn test_permitted_while_unauthenticated() {
        assert!(is_permitted_while_unauthenticated(VERSION));
        assert!(is_permitted_while_unauthenticated(CONNECTION_TERMINATE));
        assert!(is_permitted_while_unauthenticated(AUTH_WITH_ANONYMOUS));
        assert!(is_permitted_while_unauthenticated(AUTH_WITH_TOKEN));

        assert!(!is_permitted_while_unauthenticated(MESSAGE_SEND));
        assert!(!is_permitted_while_unauthenticated(CONNECTION_KEEPALIVE));
        assert!(!is_permitted_while_unauthenticated(WILDCARD));
    }

    #[test]
    fn test_vocabulary_codes_are_valid() {
        for code in [
            VERSION,
            CONNECTION_KEEPALIVE,
            CONNECTION_TERMINATE,
            BAD_COMMAND,
            AUTH_APPROVED,
            AUTH_WITH_ANONYMOUS,
            AUTH_WITH_TOKEN,
            CHANNEL_INFO,
            CHANNEL_JOIN,
            CHANNEL_LEAVE,
            MESSAGE_SEND,
            MESSAGE_RECEIVED,
            MESSAGE_LISTEN_START,
            MESSAGE_LISTEN_STOP,
            MESSAGE_REQUEST_REPLAY,
            MESSAGE_REPLAY_START,
            EXTENSIONS_AVAILABLE,
            EXTENSION_ENABLE,
            EXTENSION_DISABLE,
        ] {
            assert!(validate_command_code(code).is_ok(), "{}", code);
            assert!(name(code).is_some(), "{}", code);
        }
        assert!(validate_command_code(WILDCARD).is_err());
    }

    #[test]
    fn test_name() {
        assert_eq!(name("M01"), Some("MESSAGE_RECEIVED"));
        assert_eq!(name("Z99"), None);
    }
}
