//! 3270 screen buffer
//!
//! The display is a rectangular grid of cells with a character plane and
//! attribute planes, a cursor address, and a separate data-stream write
//! cursor (the buffer address). Cells are mutated only by the data-stream
//! parser and by the session's local edit operations.

use crate::ebcdic::Ebcdic;
use crate::error::{TN3270Error, TN3270Result};

use super::codes::*;
use super::field::{Field, FieldManager};

use serde::{Deserialize, Serialize};

/// Marker bit in `attr_field` flagging a field-attribute cell
const FIELD_ATTR_FLAG: u8 = 0x80;

/// Standard 3278/3279 screen sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenSize {
    /// Model 2: 24 rows x 80 columns
    Model2,
    /// Model 3: 32 rows x 80 columns
    Model3,
    /// Model 4: 43 rows x 80 columns
    Model4,
    /// Model 5: 27 rows x 132 columns
    Model5,
}

impl ScreenSize {
    pub fn rows(&self) -> usize {
        match self {
            Self::Model2 => 24,
            Self::Model3 => 32,
            Self::Model4 => 43,
            Self::Model5 => 27,
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            Self::Model2 | Self::Model3 | Self::Model4 => 80,
            Self::Model5 => 132,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.rows() * self.cols()
    }
}

/// One cell of the display buffer
///
/// Six byte-planes per cell: the EBCDIC character, the field attribute
/// (high bit flags the cell as a field attribute), and four extended
/// attribute planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cell {
    /// EBCDIC character data
    pub char_byte: u8,
    /// Field attribute byte; 0 for plain data cells
    pub attr_field: u8,
    /// Extended attribute (validation/outlining) plane
    pub attr_extended: u8,
    /// Foreground color plane
    pub attr_color: u8,
    /// Highlighting plane
    pub attr_highlight: u8,
    /// Character set plane
    pub attr_charset: u8,
}

impl Cell {
    pub fn is_field_attr(&self) -> bool {
        (self.attr_field & FIELD_ATTR_FLAG) != 0
    }
}

/// 3270 display buffer
#[derive(Debug)]
pub struct Display3270 {
    rows: usize,
    cols: usize,
    buffer: Vec<Cell>,
    /// Where the user's cursor is
    cursor_address: u16,
    /// Where the data stream writes next
    buffer_address: u16,
    /// AID waiting to be sent, AID_NO_AID when none
    pending_aid: u8,
    /// WCC of the last Write-family command
    last_wcc: u8,
    /// Modified flag for an unformatted screen
    unformatted_mdt: bool,
    /// Keyboard inhibit state (locked by Write, freed by WCC restore)
    keyboard_locked: bool,
    fields: FieldManager,
}

impl Display3270 {
    /// Create a Model 2 (24x80) display
    pub fn new() -> Self {
        Self::with_size(24, 80)
    }

    pub fn with_size(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            buffer: vec![Cell::default(); rows * cols],
            cursor_address: 0,
            buffer_address: 0,
            pending_aid: AID_NO_AID,
            last_wcc: 0,
            unformatted_mdt: false,
            keyboard_locked: true,
            fields: FieldManager::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Resize the buffer, clearing all content
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.buffer = vec![Cell::default(); rows * cols];
        self.cursor_address = 0;
        self.buffer_address = 0;
        self.unformatted_mdt = false;
        self.fields.clear();
    }

    /// Wrap an arbitrary address into the buffer
    fn wrap(&self, addr: usize) -> u16 {
        (addr % self.buffer.len()) as u16
    }

    fn check(&self, addr: u16) -> TN3270Result<()> {
        if (addr as usize) < self.buffer.len() {
            Ok(())
        } else {
            Err(TN3270Error::Address { address: addr, buffer_size: self.buffer.len() })
        }
    }

    pub fn cursor_address(&self) -> u16 {
        self.cursor_address
    }

    pub fn buffer_address(&self) -> u16 {
        self.buffer_address
    }

    /// Set the cursor; out-of-range addresses are an error
    pub fn set_cursor(&mut self, addr: u16) -> TN3270Result<()> {
        self.check(addr)?;
        self.cursor_address = addr;
        Ok(())
    }

    /// Set the data-stream write cursor; out-of-range addresses are an error
    pub fn set_buffer_address(&mut self, addr: u16) -> TN3270Result<()> {
        self.check(addr)?;
        self.buffer_address = addr;
        Ok(())
    }

    /// Set the data-stream write cursor from a decoded wire address,
    /// wrapping modulo the buffer size
    pub fn set_buffer_address_wrapped(&mut self, addr: u16) {
        self.buffer_address = self.wrap(addr as usize);
    }

    pub fn cursor_position(&self) -> (usize, usize) {
        let addr = self.cursor_address as usize;
        (addr / self.cols, addr % self.cols)
    }

    pub fn pending_aid(&self) -> u8 {
        self.pending_aid
    }

    pub fn set_pending_aid(&mut self, aid: u8) {
        self.pending_aid = aid;
    }

    pub fn last_wcc(&self) -> u8 {
        self.last_wcc
    }

    pub fn set_last_wcc(&mut self, wcc: u8) {
        self.last_wcc = wcc;
    }

    pub fn lock_keyboard(&mut self) {
        self.keyboard_locked = true;
    }

    pub fn unlock_keyboard(&mut self) {
        self.keyboard_locked = false;
    }

    pub fn is_keyboard_locked(&self) -> bool {
        self.keyboard_locked
    }

    pub fn cell(&self, addr: u16) -> Option<&Cell> {
        self.buffer.get(addr as usize)
    }

    /// Clear the whole buffer, cursor and fields
    pub fn clear(&mut self) {
        for cell in &mut self.buffer {
            *cell = Cell::default();
        }
        self.cursor_address = 0;
        self.buffer_address = 0;
        self.unformatted_mdt = false;
        self.fields.clear();
    }

    fn rebuild_fields(&mut self) {
        let attrs: Vec<(u16, u8)> = self
            .buffer
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_field_attr())
            .map(|(i, c)| (i as u16, c.attr_field))
            .collect();
        self.fields.rebuild(&attrs, self.buffer.len());
    }

    /// Write a data byte at the buffer address and advance it
    ///
    /// Host writes never touch MDT. Overwriting a field-attribute cell turns
    /// it back into a data cell and reindexes the fields.
    pub fn write_char(&mut self, byte: u8) {
        let addr = self.buffer_address as usize;
        let was_attr = self.buffer[addr].is_field_attr();
        self.buffer[addr].char_byte = byte;
        self.buffer[addr].attr_field = 0;
        self.buffer_address = self.wrap(addr + 1);
        if was_attr {
            self.rebuild_fields();
        }
    }

    /// Write a data byte with an explicit charset plane (Graphic Escape)
    pub fn write_char_ge(&mut self, byte: u8) {
        let addr = self.buffer_address as usize;
        self.buffer[addr].attr_charset = CHARSET_GE;
        self.write_char(byte);
    }

    /// Install a field-attribute cell at the buffer address and advance it
    ///
    /// Replaces any attribute already there. The MDT state of the new field
    /// comes from the attribute byte itself.
    pub fn write_attribute(&mut self, attr: u8) {
        let addr = self.buffer_address as usize;
        self.buffer[addr].char_byte = 0;
        self.buffer[addr].attr_field = FIELD_ATTR_FLAG | attr;
        self.buffer_address = self.wrap(addr + 1);
        self.rebuild_fields();
    }

    /// Install a field attribute with extended attribute planes (SFE)
    pub fn write_attribute_extended(
        &mut self,
        attr: u8,
        extended: u8,
        color: u8,
        highlight: u8,
        charset: u8,
    ) {
        let addr = self.buffer_address as usize;
        let cell = &mut self.buffer[addr];
        cell.char_byte = 0;
        cell.attr_field = FIELD_ATTR_FLAG | attr;
        cell.attr_extended = extended;
        cell.attr_color = color;
        cell.attr_highlight = highlight;
        cell.attr_charset = charset;
        self.buffer_address = self.wrap(addr + 1);
        self.rebuild_fields();
    }

    /// Update one extended attribute plane of the cell at `addr`
    pub fn set_extended_attribute(&mut self, addr: u16, attr_type: u8, value: u8) {
        let Some(cell) = self.buffer.get_mut(addr as usize) else {
            return;
        };
        match attr_type {
            XA_FOREGROUND => cell.attr_color = value,
            XA_HIGHLIGHTING => cell.attr_highlight = value,
            XA_CHARSET => cell.attr_charset = value,
            XA_ALL => {
                cell.attr_extended = value;
                cell.attr_color = value;
                cell.attr_highlight = value;
                cell.attr_charset = value;
            }
            _ => cell.attr_extended = value,
        }
    }

    /// Fill with `byte` from the buffer address up to `addr` exclusive,
    /// wrapping; equal addresses fill the entire buffer
    pub fn repeat_to(&mut self, addr: u16, byte: u8) {
        let target = self.wrap(addr as usize) as usize;
        let size = self.buffer.len();
        let start = self.buffer_address as usize;
        let count = if target == start {
            size
        } else {
            (target + size - start) % size
        };
        let mut touched_attr = false;
        for i in 0..count {
            let pos = (start + i) % size;
            touched_attr |= self.buffer[pos].is_field_attr();
            self.buffer[pos].char_byte = byte;
            self.buffer[pos].attr_field = 0;
        }
        self.buffer_address = target as u16;
        if touched_attr {
            self.rebuild_fields();
        }
    }

    /// Null unprotected data cells from the buffer address up to `addr`
    /// exclusive, wrapping; field attributes are preserved
    pub fn erase_unprotected_to(&mut self, addr: u16) {
        let target = self.wrap(addr as usize) as usize;
        let size = self.buffer.len();
        let start = self.buffer_address as usize;
        let count = if target == start {
            size
        } else {
            (target + size - start) % size
        };
        for i in 0..count {
            let pos = (start + i) % size;
            if self.buffer[pos].is_field_attr() {
                continue;
            }
            let unprotected = self
                .fields
                .field_at(pos as u16, size)
                .map(|f| !f.is_protected())
                .unwrap_or(true);
            if unprotected {
                self.buffer[pos].char_byte = 0;
            }
        }
        self.buffer_address = target as u16;
    }

    /// Clear all unprotected fields, reset their MDTs, home the cursor
    ///
    /// On an unformatted screen the whole buffer clears and the cursor goes
    /// to 0; otherwise the cursor lands on the first unprotected position.
    pub fn erase_all_unprotected(&mut self) {
        if self.fields.is_unformatted() {
            for cell in &mut self.buffer {
                cell.char_byte = 0;
            }
            self.unformatted_mdt = false;
            self.cursor_address = 0;
        } else {
            let size = self.buffer.len();
            let targets: Vec<(u16, Vec<u16>)> = self
                .fields
                .fields()
                .iter()
                .filter(|f| !f.is_protected())
                .map(|f| (f.address, f.content_addresses(size).collect()))
                .collect();
            for (attr_addr, content) in targets {
                for addr in content {
                    self.buffer[addr as usize].char_byte = 0;
                }
                self.buffer[attr_addr as usize].attr_field &= !ATTR_MDT;
            }
            self.rebuild_fields();
            self.cursor_address = self.fields.first_unprotected_start().unwrap_or(0);
        }
        self.keyboard_locked = false;
    }

    /// Reset every field's MDT bit (WCC reset-MDT)
    pub fn reset_mdt(&mut self) {
        let mut changed = false;
        for cell in &mut self.buffer {
            if cell.is_field_attr() && (cell.attr_field & ATTR_MDT) != 0 {
                cell.attr_field &= !ATTR_MDT;
                changed = true;
            }
        }
        self.unformatted_mdt = false;
        if changed {
            self.rebuild_fields();
        }
    }

    /// Write one byte at `addr` on behalf of the user, honoring protection
    /// and setting the containing field's MDT
    pub fn user_write(&mut self, addr: u16, byte: u8, circumvent_protection: bool) -> TN3270Result<()> {
        self.check(addr)?;
        let size = self.buffer.len();
        if self.buffer[addr as usize].is_field_attr() {
            return Err(TN3270Error::ProtectedField { address: addr });
        }
        match self.fields.field_at(addr, size).copied() {
            Some(field) => {
                if field.is_protected() && !circumvent_protection {
                    return Err(TN3270Error::ProtectedField { address: addr });
                }
                self.buffer[addr as usize].char_byte = byte;
                self.buffer[field.address as usize].attr_field |= ATTR_MDT;
                self.rebuild_fields();
            }
            None => {
                self.buffer[addr as usize].char_byte = byte;
                self.unformatted_mdt = true;
            }
        }
        Ok(())
    }

    /// Null one cell on behalf of the user (Delete / Backspace)
    pub fn user_erase(&mut self, addr: u16, circumvent_protection: bool) -> TN3270Result<()> {
        self.user_write(addr, 0, circumvent_protection)
    }

    pub fn fields(&self) -> &[Field] {
        self.fields.fields()
    }

    pub fn field_at(&self, addr: u16) -> Option<&Field> {
        self.fields.field_at(addr, self.buffer.len())
    }

    pub fn is_unformatted(&self) -> bool {
        self.fields.is_unformatted()
    }

    pub fn unformatted_modified(&self) -> bool {
        self.unformatted_mdt
    }

    /// Content start of the next unprotected field after `addr` (Program Tab)
    pub fn next_unprotected(&self, addr: u16) -> Option<u16> {
        self.fields.next_unprotected_start(addr, self.buffer.len())
    }

    pub fn first_unprotected(&self) -> Option<u16> {
        self.fields.first_unprotected_start()
    }

    /// Modified field contents for a Read Modified reply
    ///
    /// Returns (content start address, bytes) per field with MDT set, in
    /// screen order, with trailing nulls trimmed and interior nulls kept.
    /// With `all_unprotected`, every unprotected field reports regardless of
    /// MDT (Read Modified All).
    pub fn read_modified_fields(&self, all_unprotected: bool) -> Vec<(u16, Vec<u8>)> {
        let size = self.buffer.len();
        self.fields
            .fields()
            .iter()
            .filter(|f| {
                if all_unprotected {
                    !f.is_protected() || f.is_modified()
                } else {
                    f.is_modified()
                }
            })
            .map(|f| {
                let mut bytes: Vec<u8> = f
                    .content_addresses(size)
                    .map(|a| self.buffer[a as usize].char_byte)
                    .collect();
                while bytes.last() == Some(&0) {
                    bytes.pop();
                }
                (f.content_start, bytes)
            })
            .collect()
    }

    /// Unformatted-buffer content for a Read Modified reply: the whole
    /// buffer with trailing nulls trimmed
    pub fn read_unformatted(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = self.buffer.iter().map(|c| c.char_byte).collect();
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        bytes
    }

    /// Render the buffer as text, one line per row
    ///
    /// Field-attribute cells and nulls render as spaces.
    pub fn to_text(&self, codec: &Ebcdic) -> String {
        self.to_text_region(codec, 0, 0, self.rows, self.cols)
    }

    /// Render a rectangular region as text
    pub fn to_text_region(
        &self,
        codec: &Ebcdic,
        row: usize,
        col: usize,
        height: usize,
        width: usize,
    ) -> String {
        let mut out = String::new();
        for r in row..(row + height).min(self.rows) {
            if r > row {
                out.push('\n');
            }
            for c in col..(col + width).min(self.cols) {
                let cell = &self.buffer[r * self.cols + c];
                if cell.is_field_attr() || cell.char_byte == 0 {
                    out.push(' ');
                } else {
                    out.push(codec.translate_byte(cell.char_byte));
                }
            }
        }
        out
    }
}

impl Default for Display3270 {
    fn default() -> Self {
        Self::new()
    }
}

/// 3270 buffer address coding
pub mod addressing {
    /// Graphic code table for 12-bit addresses: each 6-bit value maps to a
    /// byte whose low six bits are the value and whose top bits make it a
    /// printable EBCDIC graphic.
    const CODE_TABLE: [u8; 64] = [
        0x40, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7,
        0xC8, 0xC9, 0x4A, 0x4B, 0x4C, 0x4D, 0x4E, 0x4F,
        0x50, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7,
        0xD8, 0xD9, 0x5A, 0x5B, 0x5C, 0x5D, 0x5E, 0x5F,
        0x60, 0x61, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7,
        0xE8, 0xE9, 0x6A, 0x6B, 0x6C, 0x6D, 0x6E, 0x6F,
        0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7,
        0xF8, 0xF9, 0x7A, 0x7B, 0x7C, 0x7D, 0x7E, 0x7F,
    ];

    /// Decode an address pair, detecting the mode from the first byte:
    /// top bits `00` mean 14-bit, anything else is 12-bit coded.
    pub fn decode(byte1: u8, byte2: u8) -> u16 {
        if byte1 & 0xC0 == 0 {
            (u16::from(byte1 & 0x3F) << 8) | u16::from(byte2)
        } else {
            (u16::from(byte1 & 0x3F) << 6) | u16::from(byte2 & 0x3F)
        }
    }

    /// Encode a 12-bit address through the graphic code table
    pub fn encode_12bit(address: u16) -> (u8, u8) {
        (
            CODE_TABLE[((address >> 6) & 0x3F) as usize],
            CODE_TABLE[(address & 0x3F) as usize],
        )
    }

    /// Encode a 14-bit address (top two bits of the first byte are zero)
    pub fn encode_14bit(address: u16) -> (u8, u8) {
        (((address >> 8) & 0x3F) as u8, (address & 0xFF) as u8)
    }

    /// Encode using the negotiated mode
    pub fn encode(address: u16, extended: bool) -> (u8, u8) {
        if extended {
            encode_14bit(address)
        } else {
            encode_12bit(address)
        }
    }

}
