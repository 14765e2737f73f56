//! Server side of a single client connection.

use crate::auth::{AuthMethod, User};
use crate::error::ServerError;
use crate::state::ServerState;
use parking_lot::RwLock;
use squabble_core::{base_stages, typed, Endpoint, HandlerError, Outcome, Peer, Stage, StageTable, Transport};
use squabble_protocol::args::schema;
use squabble_protocol::{
    code, ArgValue, Command, TerminateReason, COMMAND_UNAUTHENTICATED_MAX_LENGTH, PROTOCOL_VERSION,
};
use std::sync::Arc;
use uuid::Uuid;

/// Reason sent with BAD_COMMAND when a client authenticates twice.
const ALREADY_AUTHENTICATED: &str = "already-authenticated";
/// Reason sent with BAD_COMMAND when MESSAGE_SEND lacks a channel or text.
const MISSING_ARGUMENT: &str = "missing-argument";
/// Reason sent with BAD_COMMAND when MESSAGE_SEND names an unusable channel.
const NO_CHANNEL: &str = "no-channel";

/// A connected client, as seen by the server.
pub struct ServerConnection {
    id: Uuid,
    endpoint: Endpoint,
    stages: StageTable<ServerConnection>,
    state: Arc<ServerState>,
    user: RwLock<Option<User>>,
    client_name: RwLock<Option<String>>,
}

impl ServerConnection {
    pub fn new(state: Arc<ServerState>, transport: Transport) -> Self {
        let mut stages = StageTable::new();
        base_stages(&mut stages);
        handshake_stages(&mut stages);
        authentication_stages(&mut stages);
        message_stages(&mut stages);

        Self {
            id: Uuid::new_v4(),
            endpoint: Endpoint::new(state.app_name(), transport),
            stages,
            state,
            user: RwLock::new(None),
            client_name: RwLock::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.read().is_some()
    }

    /// The client's application name, once it has sent VERSION.
    pub fn client_name(&self) -> Option<String> {
        self.client_name.read().clone()
    }

    pub fn network_name(&self) -> String {
        self.endpoint.network_name()
    }

    /// Disconnects the client with reason `quitting`.
    pub async fn quit(&self) {
        self.terminate(TerminateReason::Quitting).await;
    }

    pub(crate) async fn terminate(&self, reason: TerminateReason) {
        if let Err(e) = self.endpoint.terminate_connection(reason).await {
            tracing::debug!(
                "{} Could not notify client of termination: {}",
                self.network_name(),
                e
            );
        }
    }

    async fn send_bad_command(&self, command: &str, reason: &str) -> Result<(), HandlerError> {
        self.endpoint
            .send_command(code::BAD_COMMAND, [command, reason])
            .await?;
        Ok(())
    }
}

impl Peer for ServerConnection {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn stages(&self) -> &StageTable<Self> {
        &self.stages
    }

    fn screen(&self, raw: &str) -> Option<TerminateReason> {
        if self.is_authenticated() || raw.chars().count() <= COMMAND_UNAUTHENTICATED_MAX_LENGTH {
            return None;
        }
        Some(TerminateReason::BadLength)
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("network_name", &self.network_name())
            .field("user", &self.user())
            .finish()
    }
}

type Conn = Arc<ServerConnection>;

fn handshake_stages(table: &mut StageTable<ServerConnection>) {
    table
        .stage(Stage::Action, code::WILDCARD, require_authentication)
        .stage(Stage::Action, code::VERSION, reply_version)
        .stage(Stage::Action, code::CONNECTION_KEEPALIVE, reply_keepalive);
}

fn authentication_stages(table: &mut StageTable<ServerConnection>) {
    table
        .stage(
            Stage::Parse,
            code::AUTH_WITH_ANONYMOUS,
            typed(schema::AUTH_WITH_ANONYMOUS),
        )
        .stage(
            Stage::Action,
            code::AUTH_WITH_ANONYMOUS,
            |conn: Conn, command: Command| async move {
                let handle = command.arg_str("handle").map(str::to_string);
                authenticate(conn, AuthMethod::Anonymous, handle, code::AUTH_WITH_ANONYMOUS).await
            },
        )
        .stage(
            Stage::Parse,
            code::AUTH_WITH_TOKEN,
            typed(schema::AUTH_WITH_TOKEN),
        )
        .stage(
            Stage::Action,
            code::AUTH_WITH_TOKEN,
            |conn: Conn, command: Command| async move {
                let token = command.arg_str("token").map(str::to_string);
                authenticate(conn, AuthMethod::Token, token, code::AUTH_WITH_TOKEN).await
            },
        );
}

fn message_stages(table: &mut StageTable<ServerConnection>) {
    table
        .stage(Stage::Parse, code::MESSAGE_SEND, typed(schema::MESSAGE_SEND))
        .stage(Stage::Action, code::MESSAGE_SEND, send_message);
}

/// Refuses everything but the handshake until the client has authenticated.
async fn require_authentication(conn: Conn, command: Command) -> Result<Outcome, HandlerError> {
    if conn.is_authenticated() || code::is_permitted_while_unauthenticated(&command.code) {
        return Ok(Outcome::Unchanged);
    }

    tracing::warn!(
        "{} Refusing {} from unauthenticated client",
        conn.network_name(),
        command.code
    );
    conn.terminate(TerminateReason::BadCommand).await;
    Ok(Outcome::Reject)
}

async fn reply_version(conn: Conn, command: Command) -> Result<Outcome, HandlerError> {
    let version = command.arg("protocol_version").and_then(ArgValue::as_i64);
    if version != Some(i64::from(PROTOCOL_VERSION)) {
        tracing::warn!(
            "{} Client speaks protocol version {:?}, expected {}",
            conn.network_name(),
            command.arg("protocol_version"),
            PROTOCOL_VERSION
        );
        conn.terminate(TerminateReason::BadVersion).await;
        return Ok(Outcome::Reject);
    }

    let client_name = command.arg_str("app_name").map(str::to_string);
    tracing::debug!(
        "{} Client identifies as {:?}",
        conn.network_name(),
        client_name
    );
    *conn.client_name.write() = client_name;

    conn.endpoint.send_version().await?;
    Ok(Outcome::Unchanged)
}

async fn reply_keepalive(conn: Conn, _command: Command) -> Result<Outcome, HandlerError> {
    conn.endpoint
        .send_command(code::CONNECTION_KEEPALIVE, Vec::<&str>::new())
        .await?;
    Ok(Outcome::Unchanged)
}

async fn authenticate(
    conn: Conn,
    method: AuthMethod,
    credential: Option<String>,
    command_code: &'static str,
) -> Result<Outcome, HandlerError> {
    if conn.is_authenticated() {
        conn.send_bad_command(command_code, ALREADY_AUTHENTICATED)
            .await?;
        return Ok(Outcome::Reject);
    }

    let user = conn
        .state
        .authenticate(method, credential.as_deref())
        .await?;

    match user {
        Some(user) => {
            tracing::info!(
                "{} Authenticated ({}) as '{}'",
                conn.network_name(),
                method.as_str(),
                user.handle
            );
            *conn.user.write() = Some(user);
            conn.endpoint
                .send_command(code::AUTH_APPROVED, Vec::<&str>::new())
                .await?;
            Ok(Outcome::Unchanged)
        }
        None => {
            tracing::warn!(
                "{} Rejected {} authentication",
                conn.network_name(),
                method.as_str()
            );
            conn.terminate(TerminateReason::BadAuth).await;
            Ok(Outcome::Reject)
        }
    }
}

async fn send_message(conn: Conn, command: Command) -> Result<Outcome, HandlerError> {
    let (Some(channel), Some(message)) = (command.arg_str("channel"), command.arg_str("message"))
    else {
        conn.send_bad_command(code::MESSAGE_SEND, MISSING_ARGUMENT)
            .await?;
        return Ok(Outcome::Reject);
    };
    let flags = command.arg_str("flags").unwrap_or("");

    let Some(user) = conn.user() else {
        return Ok(Outcome::Reject);
    };

    match conn.state.handle_message(&user, channel, message, flags) {
        Ok(_) => Ok(Outcome::Unchanged),
        Err(ServerError::NoChannel(name)) => {
            tracing::debug!("{} No channel '{}'", conn.network_name(), name);
            conn.send_bad_command(code::MESSAGE_SEND, NO_CHANNEL).await?;
            Ok(Outcome::Reject)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AnonymousAuthenticator, Authenticators};
    use crate::channel::ChannelRegistry;
    use squabble_core::{handle_command, NetStream};
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn connection(authenticators: Authenticators) -> (Arc<ServerConnection>, DuplexStream) {
        let state = Arc::new(ServerState::new(
            "test-server",
            authenticators,
            ChannelRegistry::new(true),
        ));
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (transport, _reader) = Transport::new(NetStream::from(local), None);
        let conn = Arc::new(ServerConnection::new(state.clone(), transport));
        state.add_client(conn.clone());
        (conn, remote)
    }

    fn anonymous() -> Authenticators {
        Authenticators::new().with_anonymous(AnonymousAuthenticator::new("squabble-user"))
    }

    async fn read_frame(remote: &mut DuplexStream) -> String {
        let mut out = Vec::new();
        loop {
            let byte = remote.read_u8().await.unwrap();
            if byte == 0 {
                return String::from_utf8(out).unwrap();
            }
            out.push(byte);
        }
    }

    #[tokio::test]
    async fn test_version_reply() {
        let (conn, mut remote) = connection(anonymous());
        handle_command(&conn, "V01 <squabble-client> <1>").await;

        assert_eq!(read_frame(&mut remote).await, "V01 <test-server> <1>");
        assert_eq!(conn.client_name().as_deref(), Some("squabble-client"));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (conn, mut remote) = connection(anonymous());
        handle_command(&conn, "V01 <squabble-client> <2>").await;

        assert_eq!(read_frame(&mut remote).await, "X01 <bad-version>");
        assert!(!conn.endpoint().transport().is_connected());
    }

    #[tokio::test]
    async fn test_unauthenticated_command_refused() {
        let (conn, mut remote) = connection(anonymous());
        handle_command(&conn, "M00 <#general> <hi>").await;

        assert_eq!(read_frame(&mut remote).await, "X01 <bad-command>");
        assert!(conn.state().channels().is_empty());
    }

    #[tokio::test]
    async fn test_keepalive_requires_authentication() {
        let (conn, mut remote) = connection(anonymous());
        handle_command(&conn, "X00").await;
        assert_eq!(read_frame(&mut remote).await, "X01 <bad-command>");
    }

    #[tokio::test]
    async fn test_anonymous_auth_then_keepalive() {
        let (conn, mut remote) = connection(anonymous());
        handle_command(&conn, "A10 <alice>").await;
        assert_eq!(read_frame(&mut remote).await, "A00");
        assert_eq!(conn.user(), Some(User::new("alice")));

        handle_command(&conn, "X00").await;
        assert_eq!(read_frame(&mut remote).await, "X00");
    }

    #[tokio::test]
    async fn test_repeat_auth_is_bad_command() {
        let (conn, mut remote) = connection(anonymous());
        handle_command(&conn, "A10 <alice>").await;
        assert_eq!(read_frame(&mut remote).await, "A00");

        handle_command(&conn, "A10 <mallory>").await;
        assert_eq!(
            read_frame(&mut remote).await,
            "X10 <A10> <already-authenticated>"
        );
        assert_eq!(conn.user(), Some(User::new("alice")));
        assert!(conn.endpoint().transport().is_connected());
    }

    #[tokio::test]
    async fn test_rejected_auth() {
        let authenticators = Authenticators::new().with_anonymous(|_: Option<&str>| None);
        let (conn, mut remote) = connection(authenticators);
        handle_command(&conn, "A10 <alice>").await;

        assert_eq!(read_frame(&mut remote).await, "X01 <bad-auth>");
        assert!(!conn.is_authenticated());
    }

    #[tokio::test]
    async fn test_missing_authenticator_is_internal_error() {
        let (conn, mut remote) = connection(anonymous());
        handle_command(&conn, "A11 <token>").await;
        assert_eq!(read_frame(&mut remote).await, "X01 <internal-error>");
    }

    #[tokio::test]
    async fn test_unauthenticated_length_guard() {
        let (conn, mut remote) = connection(anonymous());
        let raw = format!("A10 <{}>", "x".repeat(COMMAND_UNAUTHENTICATED_MAX_LENGTH));
        handle_command(&conn, &raw).await;

        assert_eq!(read_frame(&mut remote).await, "X01 <bad-length>");
        assert!(!conn.is_authenticated());
    }

    #[tokio::test]
    async fn test_message_broadcast_includes_sender() {
        let (conn, mut remote) = connection(anonymous());
        handle_command(&conn, "A10 <alice>").await;
        assert_eq!(read_frame(&mut remote).await, "A00");

        handle_command(&conn, "M00 <#general> <hello>").await;
        let frame = read_frame(&mut remote).await;
        let received = Command::parse(&frame).unwrap();
        assert_eq!(received.code, "M01");
        assert_eq!(received.parameters[1..], ["#general", "alice", "hello", ""]);
        assert!(received.parameters[0].parse::<i64>().unwrap() > 0);
        assert_eq!(conn.state().channels().find("#general").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_message_missing_argument() {
        let (conn, mut remote) = connection(anonymous());
        handle_command(&conn, "A10 <alice>").await;
        assert_eq!(read_frame(&mut remote).await, "A00");

        handle_command(&conn, "M00 <#general>").await;
        assert_eq!(
            read_frame(&mut remote).await,
            "X10 <M00> <missing-argument>"
        );
    }

    #[tokio::test]
    async fn test_message_to_rejected_channel() {
        let state = Arc::new(ServerState::new(
            "test-server",
            anonymous(),
            ChannelRegistry::new(true).with_policy(|name: &str| name.starts_with('#')),
        ));
        let (local, mut remote) = tokio::io::duplex(4096);
        let (transport, _reader) = Transport::new(NetStream::from(local), None);
        let conn = Arc::new(ServerConnection::new(state, transport));

        handle_command(&conn, "A10 <alice>").await;
        assert_eq!(read_frame(&mut remote).await, "A00");

        handle_command(&conn, "M00 <general> <hello>").await;
        assert_eq!(read_frame(&mut remote).await, "X10 <M00> <no-channel>");
    }

    #[tokio::test]
    async fn test_quit() {
        let (conn, mut remote) = connection(anonymous());
        conn.quit().await;
        assert_eq!(read_frame(&mut remote).await, "X01 <quitting>");
        conn.quit().await;
    }
}
