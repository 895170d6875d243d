//! Symbolic key catalog
//!
//! Maps the closed set of symbolic key names to their effects: an AID send,
//! a local cursor movement, or a local buffer edit. Unknown names are an
//! error; the catalog is fixed.

use crate::error::{TN3270Error, TN3270Result};
use crate::lib3270::codes::AidKey;

/// Local cursor movements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMotion {
    /// Next unprotected field
    Tab,
    /// Previous unprotected field
    BackTab,
    /// First unprotected position on the screen
    Home,
    Up,
    Down,
    Left,
    Right,
    /// First unprotected position after the start of the next row
    Newline,
}

/// Local buffer edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    /// Move left and null that position
    Backspace,
    /// Null the position under the cursor
    Delete,
    /// Null from the cursor to the end of the field
    EraseEof,
    /// Clear all unprotected input and home the cursor
    EraseInput,
    /// Clear all unprotected fields (the EAU local form)
    EraseAllUnprotected,
}

/// The effect a symbolic key resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// Sends the AID and a read reply
    Aid(AidKey),
    /// Moves the cursor locally
    Move(CursorMotion),
    /// Edits the buffer locally
    Edit(EditOp),
    /// Toggles insert mode
    ToggleInsert,
    /// System Request; sent only when the TN3270E SYSREQ function is active
    SysReq,
}

/// Resolve a symbolic key name
///
/// Names are case-insensitive. Anything outside the catalog returns
/// `UnknownKey`.
pub fn resolve_key(name: &str) -> TN3270Result<KeyCommand> {
    let lowered = name.to_ascii_lowercase();
    let cmd = match lowered.as_str() {
        "enter" => KeyCommand::Aid(AidKey::Enter),
        "clear" => KeyCommand::Aid(AidKey::Clear),
        "pa1" => KeyCommand::Aid(AidKey::PA1),
        "pa2" => KeyCommand::Aid(AidKey::PA2),
        "pa3" => KeyCommand::Aid(AidKey::PA3),
        "tab" => KeyCommand::Move(CursorMotion::Tab),
        "backtab" => KeyCommand::Move(CursorMotion::BackTab),
        "home" => KeyCommand::Move(CursorMotion::Home),
        "up" => KeyCommand::Move(CursorMotion::Up),
        "down" => KeyCommand::Move(CursorMotion::Down),
        "left" => KeyCommand::Move(CursorMotion::Left),
        "right" => KeyCommand::Move(CursorMotion::Right),
        "newline" => KeyCommand::Move(CursorMotion::Newline),
        "backspace" => KeyCommand::Edit(EditOp::Backspace),
        "delete" => KeyCommand::Edit(EditOp::Delete),
        "eraseeof" => KeyCommand::Edit(EditOp::EraseEof),
        "eraseinput" => KeyCommand::Edit(EditOp::EraseInput),
        "eraseallunprotected" => KeyCommand::Edit(EditOp::EraseAllUnprotected),
        "insert" => KeyCommand::ToggleInsert,
        "sysreq" => KeyCommand::SysReq,
        _ => {
            if let Some(pf) = lowered.strip_prefix("pf") {
                if let Ok(n) = pf.parse::<u8>() {
                    if let Some(aid) = pf_aid(n) {
                        return Ok(KeyCommand::Aid(aid));
                    }
                }
            }
            return Err(TN3270Error::UnknownKey { name: name.to_string() });
        }
    };
    Ok(cmd)
}

fn pf_aid(n: u8) -> Option<AidKey> {
    let aid = match n {
        1 => AidKey::PF1,
        2 => AidKey::PF2,
        3 => AidKey::PF3,
        4 => AidKey::PF4,
        5 => AidKey::PF5,
        6 => AidKey::PF6,
        7 => AidKey::PF7,
        8 => AidKey::PF8,
        9 => AidKey::PF9,
        10 => AidKey::PF10,
        11 => AidKey::PF11,
        12 => AidKey::PF12,
        13 => AidKey::PF13,
        14 => AidKey::PF14,
        15 => AidKey::PF15,
        16 => AidKey::PF16,
        17 => AidKey::PF17,
        18 => AidKey::PF18,
        19 => AidKey::PF19,
        20 => AidKey::PF20,
        21 => AidKey::PF21,
        22 => AidKey::PF22,
        23 => AidKey::PF23,
        24 => AidKey::PF24,
        _ => return None,
    };
    Some(aid)
}
