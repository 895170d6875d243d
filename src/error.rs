//! Error types for TN3270R
//!
//! This module defines the structured error taxonomy for the emulation core.
//! Recoverable protocol conditions (malformed orders, unknown structured
//! fields) are handled locally by the parser and surfaced as trace events;
//! the types here are for failures that reach the caller.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Top-level error type for TN3270R operations
#[derive(Debug)]
pub enum TN3270Error {
    /// Invalid or contradictory configuration
    Config(ConfigError),
    /// Connection establishment errors (DNS, refused, TLS handshake)
    Connect(ConnectError),
    /// Transport errors after connection (broken pipe, EOF, overflow)
    Transport(TransportError),
    /// Telnet / TN3270E negotiation errors
    Negotiation(NegotiationError),
    /// Negotiation exceeded its deadline
    NegotiationTimeout { timeout_ms: u64 },
    /// Malformed 3270 order or structured field
    Parse(ParseError),
    /// Out-of-range buffer address from the user API
    Address { address: u16, buffer_size: usize },
    /// Write into a protected field without the circumvent flag
    ProtectedField { address: u16 },
    /// Symbolic key name not in the key catalog
    UnknownKey { name: String },
    /// User-level read/wait deadline exceeded
    Timeout { operation: &'static str, timeout_ms: u64 },
    /// Operation cancelled
    Cancelled { operation: &'static str },
    /// Operation attempted on a closed session
    SessionClosed,
}

/// Connection establishment errors
#[derive(Debug)]
pub enum ConnectError {
    /// DNS resolution failed
    DnsResolution { host: String },
    /// Connection refused by the remote host
    ConnectionRefused { host: String, port: u16 },
    /// Connect attempt exceeded its deadline
    ConnectTimeout { host: String, port: u16, timeout_ms: u64 },
    /// TLS handshake or certificate error
    Tls { message: String },
    /// Other socket-level error
    Io { message: String },
}

/// Transport errors on an established connection
#[derive(Debug)]
pub enum TransportError {
    /// Peer closed the connection mid-record
    UnexpectedEof,
    /// Write failed because the peer went away
    BrokenPipe { message: String },
    /// Read buffer exceeded its bound before a record completed
    Overflow { buffered: usize, limit: usize },
    /// Other socket-level error
    Io { message: String },
}

/// Telnet option and TN3270E subnegotiation errors
#[derive(Debug)]
pub enum NegotiationError {
    /// A required option was refused by the host
    OptionRefused { option: u8 },
    /// Host rejected our DEVICE-TYPE request and no fallback was possible
    DeviceTypeRejected { reason: Option<u8> },
    /// Subnegotiation payload did not follow RFC 2355
    MalformedSubnegotiation { option: u8, data: Vec<u8> },
    /// Negotiation finished in a state with no usable terminal mode
    NoUsableMode,
}

/// Configuration errors, raised at construction
#[derive(Debug)]
pub enum ConfigError {
    /// Unknown or unsupported terminal model
    InvalidModel { model: String },
    /// Unknown EBCDIC code page
    UnknownCodePage { name: String },
    /// Two options that cannot both be honored
    Contradictory { reason: String },
    /// A parameter outside its accepted range
    InvalidParameter { parameter: &'static str, value: String },
}

/// Malformed 3270 data-stream content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Record ended in the middle of an order's operands
    TruncatedOrder { order: u8, offset: usize },
    /// First byte of a record is not a known command
    UnknownCommand { command: u8 },
    /// Structured field shorter than its own header
    BadStructuredField { length: usize, offset: usize },
    /// TN3270E record shorter than its 5-byte header
    ShortRecord { length: usize },
}

impl fmt::Display for TN3270Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TN3270Error::Config(err) => write!(f, "configuration error: {err}"),
            TN3270Error::Connect(err) => write!(f, "connect error: {err}"),
            TN3270Error::Transport(err) => write!(f, "transport error: {err}"),
            TN3270Error::Negotiation(err) => write!(f, "negotiation error: {err}"),
            TN3270Error::NegotiationTimeout { timeout_ms } => {
                write!(f, "negotiation did not complete within {timeout_ms}ms")
            }
            TN3270Error::Parse(err) => write!(f, "parse error: {err}"),
            TN3270Error::Address { address, buffer_size } => {
                write!(f, "buffer address {address} outside 0..{buffer_size}")
            }
            TN3270Error::ProtectedField { address } => {
                write!(f, "write into protected field at address {address}")
            }
            TN3270Error::UnknownKey { name } => write!(f, "unknown key name: {name}"),
            TN3270Error::Timeout { operation, timeout_ms } => {
                write!(f, "{operation} timed out after {timeout_ms}ms")
            }
            TN3270Error::Cancelled { operation } => write!(f, "{operation} cancelled"),
            TN3270Error::SessionClosed => write!(f, "session is closed"),
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::DnsResolution { host } => {
                write!(f, "DNS resolution failed for {host}")
            }
            ConnectError::ConnectionRefused { host, port } => {
                write!(f, "connection refused by {host}:{port}")
            }
            ConnectError::ConnectTimeout { host, port, timeout_ms } => {
                write!(f, "connect to {host}:{port} timed out after {timeout_ms}ms")
            }
            ConnectError::Tls { message } => write!(f, "TLS error: {message}"),
            ConnectError::Io { message } => write!(f, "socket error: {message}"),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::UnexpectedEof => write!(f, "unexpected end of stream"),
            TransportError::BrokenPipe { message } => write!(f, "broken pipe: {message}"),
            TransportError::Overflow { buffered, limit } => {
                write!(f, "read buffer overflow: {buffered} bytes buffered, limit {limit}")
            }
            TransportError::Io { message } => write!(f, "socket error: {message}"),
        }
    }
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationError::OptionRefused { option } => {
                write!(f, "host refused required telnet option {option}")
            }
            NegotiationError::DeviceTypeRejected { reason } => match reason {
                Some(code) => write!(f, "host rejected device type (reason {code})"),
                None => write!(f, "host rejected device type"),
            },
            NegotiationError::MalformedSubnegotiation { option, data } => {
                write!(f, "malformed subnegotiation for option {option}: {data:02X?}")
            }
            NegotiationError::NoUsableMode => {
                write!(f, "negotiation finished without a usable terminal mode")
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidModel { model } => write!(f, "invalid terminal model: {model}"),
            ConfigError::UnknownCodePage { name } => write!(f, "unknown code page: {name}"),
            ConfigError::Contradictory { reason } => {
                write!(f, "contradictory options: {reason}")
            }
            ConfigError::InvalidParameter { parameter, value } => {
                write!(f, "invalid value '{value}' for {parameter}")
            }
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::TruncatedOrder { order, offset } => {
                write!(f, "order 0x{order:02X} truncated at offset {offset}")
            }
            ParseError::UnknownCommand { command } => {
                write!(f, "unknown command code 0x{command:02X}")
            }
            ParseError::BadStructuredField { length, offset } => {
                write!(f, "structured field with bad length {length} at offset {offset}")
            }
            ParseError::ShortRecord { length } => {
                write!(f, "TN3270E record of {length} bytes is shorter than its header")
            }
        }
    }
}

impl StdError for TN3270Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TN3270Error::Config(err) => Some(err),
            TN3270Error::Connect(err) => Some(err),
            TN3270Error::Transport(err) => Some(err),
            TN3270Error::Negotiation(err) => Some(err),
            TN3270Error::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl StdError for ConnectError {}
impl StdError for TransportError {}
impl StdError for NegotiationError {}
impl StdError for ConfigError {}
impl StdError for ParseError {}

impl From<ConnectError> for TN3270Error {
    fn from(err: ConnectError) -> Self {
        TN3270Error::Connect(err)
    }
}

impl From<TransportError> for TN3270Error {
    fn from(err: TransportError) -> Self {
        TN3270Error::Transport(err)
    }
}

impl From<NegotiationError> for TN3270Error {
    fn from(err: NegotiationError) -> Self {
        TN3270Error::Negotiation(err)
    }
}

impl From<ConfigError> for TN3270Error {
    fn from(err: ConfigError) -> Self {
        TN3270Error::Config(err)
    }
}

impl From<ParseError> for TN3270Error {
    fn from(err: ParseError) -> Self {
        TN3270Error::Parse(err)
    }
}

impl From<io::Error> for TN3270Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => {
                TN3270Error::Transport(TransportError::UnexpectedEof)
            }
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset => {
                TN3270Error::Transport(TransportError::BrokenPipe {
                    message: err.to_string(),
                })
            }
            _ => TN3270Error::Transport(TransportError::Io {
                message: err.to_string(),
            }),
        }
    }
}

/// Result type alias for TN3270R operations
pub type TN3270Result<T> = Result<T, TN3270Error>;
