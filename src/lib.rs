//! TN3270R - an IBM 3270 terminal emulation core
//!
//! Speaks Telnet + TN3270/TN3270E to a mainframe host, maintains the
//! virtual 3270 display, translates EBCDIC, and exposes the scripted
//! operations (connect, key, insert_text, read_screen, wait_for) of the
//! classic terminal utilities. No UI lives here; embedders bring their own
//! front end on top of [`TN3270Session`] or [`blocking::BlockingSession`].

/// EBCDIC code page translation (CP037 default, CP273/CP285 variants)
pub mod ebcdic;

/// Telnet primitives shared by the transport codec and the negotiator
pub mod telnet_base;

/// LIB3270: the 3270 data-stream engine
/// Screen buffer, field model, inbound parser and outbound builders
pub mod lib3270;

/// Telnet option and TN3270E subnegotiation state machine
pub mod telnet_negotiation;

/// Async TCP/TLS transport with IAC-aware framing
pub mod network;

/// ANSI/VT100 fallback processing for NVT mode
pub mod ansi_processor;

/// Symbolic key catalog
pub mod keyboard;

/// Session configuration surface
pub mod config;

/// Error taxonomy
pub mod error;

/// Session coordination: the public scripted operations
pub mod session;

/// Blocking façade driving a private runtime
pub mod blocking;

pub use config::{TerminalConfig, TerminalModel, Timeouts, TlsConfig};
pub use ebcdic::{CodePage, Ebcdic};
pub use error::{TN3270Error, TN3270Result};
pub use lib3270::{AidKey, Display3270};
pub use session::{SessionEvent, SessionState, TN3270Session};
