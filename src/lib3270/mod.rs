//! IBM 3270 data-stream engine
//!
//! The 3270 protocol is block oriented: the host paints a screen with
//! Write-family commands carrying orders and structured fields, and the
//! terminal answers AID-triggered read replies built from the modified
//! fields. This module holds the pieces that understand those bytes:
//!
//! - [`codes`] - command, order, WCC, AID and structured-field constants
//! - [`display`] - the cell grid, cursor state and buffer addressing
//! - [`field`] - field discovery and attribute semantics
//! - [`protocol`] - the inbound parser and the outbound reply builders
//!
//! Everything here is synchronous and free of I/O; the transport and
//! session layers drive it.

pub mod codes;
pub mod display;
pub mod field;
pub mod protocol;

pub use codes::{AidKey, CommandCode, OrderCode};
pub use display::{Cell, Display3270, ScreenSize};
pub use field::{Field, FieldManager};
pub use protocol::{BindImage, ProtocolProcessor3270, StreamAction};
