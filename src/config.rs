//! Server configuration
//!
//! Defaults suit a local single-process deployment. Every field can be
//! overridden from the command line or through a `CHAT_*` environment
//! variable.

use std::num::ParseIntError;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Channel buffer size for server commands
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Per-connection outbound buffer
pub const DEFAULT_CONNECTION_BUFFER: usize = 32;

/// Debounce window for typing indicators
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_millis(2000);

/// Bound on a single delivery to a single connection
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Minimum length of usernames and room names, after trimming
pub const MIN_NAME_LEN: usize = 3;

pub const DEFAULT_MAX_MESSAGE_LEN: usize = 2000;

/// Where username uniqueness is enforced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum UniquenessScope {
    /// A username may be active once per room
    #[default]
    Room,
    /// A username may be active once across all rooms
    Global,
}

/// What happens to a connection whose join was rejected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum JoinRejection {
    /// Stay connected so the client can retry
    #[default]
    #[value(name = "keepAlive", alias = "keep-alive")]
    KeepAlive,
    /// Close the connection after reporting the error
    Disconnect,
}

/// Runtime configuration for the listener and the session engine
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "chat_rooms")]
#[command(about = "Multi-room WebSocket chat server", long_about = None)]
pub struct ServerConfig {
    /// Address to bind the listener to
    #[arg(env = "CHAT_ADDR", default_value = DEFAULT_ADDR)]
    pub bind_addr: String,

    /// Capacity of the engine's command channel
    #[arg(
        long,
        env = "CHAT_COMMAND_BUFFER",
        default_value_t = DEFAULT_COMMAND_BUFFER,
        value_parser = parse_buffer,
    )]
    pub command_buffer: usize,

    /// Capacity of each connection's outbound queue
    #[arg(
        long,
        env = "CHAT_CONNECTION_BUFFER",
        default_value_t = DEFAULT_CONNECTION_BUFFER,
        value_parser = parse_buffer,
    )]
    pub connection_buffer: usize,

    /// Typing indicator expiry, in milliseconds
    #[arg(
        long = "typing-timeout-ms",
        env = "CHAT_TYPING_TIMEOUT_MS",
        default_value = "2000",
        value_parser = parse_millis,
    )]
    pub typing_timeout: Duration,

    /// Longest wait for a single delivery, in milliseconds
    #[arg(
        long = "send-timeout-ms",
        env = "CHAT_SEND_TIMEOUT_MS",
        default_value = "1000",
        value_parser = parse_millis,
    )]
    pub send_timeout: Duration,

    /// Replay only the most recent N messages on join (all if unset)
    #[arg(long, env = "CHAT_HISTORY_LIMIT")]
    pub history_limit: Option<usize>,

    /// Longest accepted message, in characters
    #[arg(long, env = "CHAT_MAX_MESSAGE_LEN", default_value_t = DEFAULT_MAX_MESSAGE_LEN)]
    pub max_message_len: usize,

    #[arg(long, env = "CHAT_UNIQUENESS", value_enum, default_value = "room")]
    pub uniqueness: UniquenessScope,

    #[arg(long, env = "CHAT_JOIN_REJECTION", value_enum, default_value = "keepAlive")]
    pub join_rejection: JoinRejection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            command_buffer: DEFAULT_COMMAND_BUFFER,
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            history_limit: None,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            uniqueness: UniquenessScope::default(),
            join_rejection: JoinRejection::default(),
        }
    }
}

fn parse_millis(s: &str) -> Result<Duration, ParseIntError> {
    s.trim().parse().map(Duration::from_millis)
}

// tokio channels panic on a zero capacity
fn parse_buffer(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("buffer size must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}
