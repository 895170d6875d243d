//! 3270 data-stream processing
//!
//! Inbound records (already de-framed and IAC-unescaped by the transport)
//! are parsed here and applied to the display buffer. Outbound AID replies
//! (Read Modified, Read Buffer) and Query Replies are built here.
//!
//! Malformed input never unwinds: a truncated order aborts the current
//! record, keeps everything validly applied before it, and reports a
//! `ParseFault` action so the session can trace it.

use crate::error::ParseError;

use super::codes::*;
use super::display::{addressing, Display3270};

/// Side effects of one inbound record, in stream order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAction {
    /// WCC requested the audible alarm
    Alarm,
    /// WCC unlocked the keyboard
    KeyboardRestore,
    /// WCC requested a printer start (no printer is attached; surfaced only)
    StartPrinter,
    /// WCC reset bit was set
    ResetPartition,
    /// Host wants a Read Buffer reply
    ReplyReadBuffer,
    /// Host wants a Read Modified (or Read Modified All) reply
    ReplyReadModified { all: bool },
    /// Host sent a Read Partition query; a Query Reply record is due
    ReplyQuery,
    /// Host delivered a BIND image
    Bind(BindImage),
    /// Recoverable parse fault; the record was aborted at this point
    ParseFault(ParseError),
    /// Structured field with an unrecognized id was skipped
    UnknownStructuredField { sfid: u16 },
    /// Transparent-order payload destined for the NVT stream
    NvtPassthrough(Vec<u8>),
}

/// Screen geometry and addressing facts from a BIND image
///
/// Offsets follow the SNA BIND RU: default rows/cols at 20/21, alternate
/// rows/cols at 22/23, the screen-size selector at 24 (0x7E picks the
/// alternate size) and presentation flags at 25, where bit 0x01 enables
/// extended (14-bit) addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindImage {
    pub default_rows: usize,
    pub default_cols: usize,
    pub alt_rows: usize,
    pub alt_cols: usize,
    pub use_alternate: bool,
    pub extended_addressing: bool,
}

const BIND_OFF_ROWS_DEFAULT: usize = 20;
const BIND_OFF_COLS_DEFAULT: usize = 21;
const BIND_OFF_ROWS_ALT: usize = 22;
const BIND_OFF_COLS_ALT: usize = 23;
const BIND_OFF_SCREEN_SELECT: usize = 24;
const BIND_OFF_PRESENTATION_FLAGS: usize = 25;
const BIND_SCREEN_SELECT_ALT: u8 = 0x7E;
const BIND_FLAG_EXTENDED_ADDRESSING: u8 = 0x01;

impl BindImage {
    /// Parse a BIND RU, tolerating short payloads
    pub fn parse(data: &[u8]) -> Self {
        let byte = |off: usize| data.get(off).copied().unwrap_or(0);
        let dim = |off: usize| byte(off) as usize;
        Self {
            default_rows: dim(BIND_OFF_ROWS_DEFAULT),
            default_cols: dim(BIND_OFF_COLS_DEFAULT),
            alt_rows: dim(BIND_OFF_ROWS_ALT),
            alt_cols: dim(BIND_OFF_COLS_ALT),
            use_alternate: byte(BIND_OFF_SCREEN_SELECT) == BIND_SCREEN_SELECT_ALT,
            extended_addressing: byte(BIND_OFF_PRESENTATION_FLAGS)
                & BIND_FLAG_EXTENDED_ADDRESSING
                != 0,
        }
    }

    fn valid_dims(rows: usize, cols: usize) -> bool {
        (1..=255).contains(&rows) && (1..=255).contains(&cols) && rows * cols <= 0x4000
    }

    /// The screen size this BIND selects, if it carries a usable one
    pub fn selected_size(&self) -> Option<(usize, usize)> {
        let (rows, cols) = if self.use_alternate {
            (self.alt_rows, self.alt_cols)
        } else {
            (self.default_rows, self.default_cols)
        };
        Self::valid_dims(rows, cols).then_some((rows, cols))
    }
}

/// 3270 data-stream processor
///
/// Owns the addressing mode and the default/alternate screen sizes; the
/// display buffer is passed in so the session keeps single ownership of it.
#[derive(Debug)]
pub struct ProtocolProcessor3270 {
    extended_addressing: bool,
    default_size: (usize, usize),
    alternate_size: (usize, usize),
}

impl ProtocolProcessor3270 {
    pub fn new(default_size: (usize, usize), alternate_size: (usize, usize)) -> Self {
        Self {
            extended_addressing: false,
            default_size,
            alternate_size,
        }
    }

    pub fn extended_addressing(&self) -> bool {
        self.extended_addressing
    }

    pub fn set_extended_addressing(&mut self, enabled: bool) {
        self.extended_addressing = enabled;
    }

    pub fn alternate_size(&self) -> (usize, usize) {
        self.alternate_size
    }

    /// Fold a BIND image into the processor and resize the display
    pub fn apply_bind(&mut self, bind: &BindImage, display: &mut Display3270) {
        if BindImage::valid_dims(bind.default_rows, bind.default_cols) {
            self.default_size = (bind.default_rows, bind.default_cols);
        }
        if BindImage::valid_dims(bind.alt_rows, bind.alt_cols) {
            self.alternate_size = (bind.alt_rows, bind.alt_cols);
        }
        self.extended_addressing = bind.extended_addressing;
        if let Some((rows, cols)) = bind.selected_size() {
            if (rows, cols) != (display.rows(), display.cols()) {
                display.resize(rows, cols);
            }
        }
    }

    /// Process one inbound 3270 record
    pub fn process_record(&mut self, data: &[u8], display: &mut Display3270) -> Vec<StreamAction> {
        let mut actions = Vec::new();
        if data.is_empty() {
            return actions;
        }
        let Some(command) = CommandCode::from_u8(data[0]) else {
            log::warn!("discarding record with unknown command 0x{:02X}", data[0]);
            actions.push(StreamAction::ParseFault(ParseError::UnknownCommand {
                command: data[0],
            }));
            return actions;
        };

        match command {
            CommandCode::Write => {
                self.process_write(&data[1..], display, &mut actions, None);
            }
            CommandCode::EraseWrite => {
                self.process_write(&data[1..], display, &mut actions, Some(self.default_size));
            }
            CommandCode::EraseWriteAlternate => {
                self.process_write(&data[1..], display, &mut actions, Some(self.alternate_size));
            }
            CommandCode::EraseAllUnprotected => {
                display.erase_all_unprotected();
                actions.push(StreamAction::KeyboardRestore);
            }
            CommandCode::ReadBuffer => actions.push(StreamAction::ReplyReadBuffer),
            CommandCode::ReadModified => {
                actions.push(StreamAction::ReplyReadModified { all: false })
            }
            CommandCode::ReadModifiedAll => {
                actions.push(StreamAction::ReplyReadModified { all: true })
            }
            CommandCode::WriteStructuredField => {
                self.process_structured_fields(&data[1..], display, &mut actions);
            }
            CommandCode::Nop => {}
        }
        actions
    }

    /// Write / Erase Write / Erase Write Alternate
    fn process_write(
        &mut self,
        data: &[u8],
        display: &mut Display3270,
        actions: &mut Vec<StreamAction>,
        erase_to: Option<(usize, usize)>,
    ) {
        display.lock_keyboard();

        if let Some((rows, cols)) = erase_to {
            if (rows, cols) != (display.rows(), display.cols()) {
                display.resize(rows, cols);
            } else {
                display.clear();
            }
        }

        let Some(&wcc) = data.first() else {
            actions.push(StreamAction::ParseFault(ParseError::TruncatedOrder {
                order: 0,
                offset: 0,
            }));
            return;
        };
        display.set_last_wcc(wcc);

        if wcc & WCC_RESET != 0 {
            actions.push(StreamAction::ResetPartition);
        }
        if wcc & WCC_RESET_MDT != 0 {
            display.reset_mdt();
        }
        if wcc & WCC_SOUND_ALARM != 0 {
            actions.push(StreamAction::Alarm);
        }
        if wcc & WCC_START_PRINTER != 0 {
            actions.push(StreamAction::StartPrinter);
        }
        if wcc & WCC_KEYBOARD_RESTORE != 0 {
            display.unlock_keyboard();
            actions.push(StreamAction::KeyboardRestore);
        }

        if let Err(fault) = self.process_orders(&data[1..], display, actions) {
            log::warn!("aborting record: {fault}");
            actions.push(StreamAction::ParseFault(fault));
        }
    }

    /// The order loop of a Write-family payload
    fn process_orders(
        &mut self,
        data: &[u8],
        display: &mut Display3270,
        actions: &mut Vec<StreamAction>,
    ) -> Result<(), ParseError> {
        let mut pos = 0usize;
        while pos < data.len() {
            let byte = data[pos];
            let Some(order) = OrderCode::from_u8(byte) else {
                // Anything that is not an order is literal character data.
                display.write_char(byte);
                pos += 1;
                continue;
            };
            pos += 1;
            let truncated = |offset: usize| ParseError::TruncatedOrder { order: byte, offset };
            match order {
                OrderCode::SetBufferAddress => {
                    let addr = Self::take_address(data, &mut pos).ok_or(truncated(pos))?;
                    display.set_buffer_address_wrapped(addr);
                }
                OrderCode::StartField => {
                    let attr = *data.get(pos).ok_or(truncated(pos))?;
                    pos += 1;
                    display.write_attribute(attr);
                }
                OrderCode::StartFieldExtended => {
                    let count = *data.get(pos).ok_or(truncated(pos))? as usize;
                    pos += 1;
                    if pos + count * 2 > data.len() {
                        return Err(truncated(pos));
                    }
                    let mut base = 0u8;
                    let (mut extended, mut color, mut highlight, mut charset) = (0u8, 0u8, 0u8, 0u8);
                    for _ in 0..count {
                        let (attr_type, value) = (data[pos], data[pos + 1]);
                        pos += 2;
                        match attr_type {
                            XA_3270 => base = value,
                            XA_FOREGROUND => color = value,
                            XA_HIGHLIGHTING => highlight = value,
                            XA_CHARSET => charset = value,
                            _ => extended = value,
                        }
                    }
                    display.write_attribute_extended(base, extended, color, highlight, charset);
                }
                OrderCode::SetAttribute => {
                    if pos + 2 > data.len() {
                        return Err(truncated(pos));
                    }
                    let (attr_type, value) = (data[pos], data[pos + 1]);
                    pos += 2;
                    display.set_extended_attribute(display.buffer_address(), attr_type, value);
                }
                OrderCode::RepeatToAddress => {
                    let addr = Self::take_address(data, &mut pos).ok_or(truncated(pos))?;
                    let fill = *data.get(pos).ok_or(truncated(pos))?;
                    pos += 1;
                    display.repeat_to(addr, fill);
                }
                OrderCode::EraseUnprotectedToAddress => {
                    let addr = Self::take_address(data, &mut pos).ok_or(truncated(pos))?;
                    display.erase_unprotected_to(addr);
                }
                OrderCode::InsertCursor => {
                    let addr = display.buffer_address();
                    let _ = display.set_cursor(addr);
                }
                OrderCode::ProgramTab => {
                    if let Some(next) = display.next_unprotected(display.buffer_address()) {
                        display.set_buffer_address_wrapped(next);
                    }
                }
                OrderCode::GraphicEscape => {
                    let ch = *data.get(pos).ok_or(truncated(pos))?;
                    pos += 1;
                    display.write_char_ge(ch);
                }
                OrderCode::Transparent => {
                    let count = *data.get(pos).ok_or(truncated(pos))? as usize;
                    pos += 1;
                    if pos + count > data.len() {
                        return Err(truncated(pos));
                    }
                    actions.push(StreamAction::NvtPassthrough(data[pos..pos + count].to_vec()));
                    pos += count;
                }
            }
        }
        Ok(())
    }

    fn take_address(data: &[u8], pos: &mut usize) -> Option<u16> {
        if *pos + 2 > data.len() {
            return None;
        }
        let addr = addressing::decode(data[*pos], data[*pos + 1]);
        *pos += 2;
        Some(addr)
    }

    /// Write Structured Field payload: a sequence of length-prefixed fields
    fn process_structured_fields(
        &mut self,
        data: &[u8],
        display: &mut Display3270,
        actions: &mut Vec<StreamAction>,
    ) {
        let mut pos = 0usize;
        while pos < data.len() {
            if pos + 4 > data.len() {
                actions.push(StreamAction::ParseFault(ParseError::BadStructuredField {
                    length: data.len() - pos,
                    offset: pos,
                }));
                return;
            }
            // A zero length means the field runs to the end of the record.
            let declared = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            let length = if declared == 0 { data.len() - pos } else { declared };
            if length < 4 || pos + length > data.len() {
                actions.push(StreamAction::ParseFault(ParseError::BadStructuredField {
                    length,
                    offset: pos,
                }));
                return;
            }
            let sfid = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);
            let body = &data[pos + 4..pos + length];
            pos += length;

            match sfid {
                SFID_READ_PARTITION => {
                    // partition id, then the operation byte
                    match body.get(1) {
                        Some(&READ_PARTITION_QUERY) | Some(&READ_PARTITION_QUERY_LIST) => {
                            actions.push(StreamAction::ReplyQuery);
                        }
                        Some(&op) => {
                            log::debug!("ignoring read partition op 0x{op:02X}");
                        }
                        None => actions.push(StreamAction::ReplyQuery),
                    }
                }
                SFID_ERASE_RESET => {
                    let alternate = body.first().map(|&b| b & ERASE_RESET_ALTERNATE != 0)
                        .unwrap_or(false);
                    let (rows, cols) = if alternate {
                        self.alternate_size
                    } else {
                        self.default_size
                    };
                    if (rows, cols) != (display.rows(), display.cols()) {
                        display.resize(rows, cols);
                    } else {
                        display.clear();
                    }
                }
                SFID_BIND_IMAGE => {
                    actions.push(StreamAction::Bind(BindImage::parse(body)));
                }
                SFID_OUTBOUND_3270DS => {
                    // partition id, then an embedded command stream
                    if body.len() > 1 {
                        let nested = self.process_record(&body[1..], display);
                        actions.extend(nested);
                    }
                }
                SFID_QUERY_REPLY => {
                    // Hosts do not normally send these; tolerated and skipped.
                    log::debug!("ignoring inbound query reply");
                }
                other => {
                    log::warn!("skipping unknown structured field 0x{other:04X}");
                    actions.push(StreamAction::UnknownStructuredField { sfid: other });
                }
            }
        }
    }

    fn push_address(&self, out: &mut Vec<u8>, address: u16) {
        let (b1, b2) = addressing::encode(address, self.extended_addressing);
        out.push(b1);
        out.push(b2);
    }

    /// Build a Read Modified (or Read Modified All) reply
    ///
    /// Short-read AIDs (Clear, PA1..PA3) carry the AID and cursor only.
    pub fn build_read_modified(
        &self,
        aid: AidKey,
        display: &Display3270,
        all: bool,
    ) -> Vec<u8> {
        let mut out = vec![aid.to_u8()];
        self.push_address(&mut out, display.cursor_address());
        if aid.is_short_read() {
            return out;
        }
        if display.is_unformatted() {
            if display.unformatted_modified() || all {
                let bytes = display.read_unformatted();
                if !bytes.is_empty() {
                    out.push(ORDER_SBA);
                    self.push_address(&mut out, 0);
                    out.extend_from_slice(&bytes);
                }
            }
        } else {
            for (start, bytes) in display.read_modified_fields(all) {
                out.push(ORDER_SBA);
                self.push_address(&mut out, start);
                out.extend_from_slice(&bytes);
            }
        }
        out
    }

    /// Build a Read Buffer reply: the full buffer as SF/SFE orders, SA
    /// orders for per-cell extended attributes, and literal characters
    pub fn build_read_buffer(&self, aid: AidKey, display: &Display3270) -> Vec<u8> {
        let mut out = vec![aid.to_u8()];
        self.push_address(&mut out, display.cursor_address());
        for addr in 0..display.buffer_size() as u16 {
            let cell = display.cell(addr).copied().unwrap_or_default();
            if cell.is_field_attr() {
                let planes = [
                    (XA_HIGHLIGHTING, cell.attr_highlight),
                    (XA_FOREGROUND, cell.attr_color),
                    (XA_CHARSET, cell.attr_charset),
                    (XA_VALIDATION, cell.attr_extended),
                ];
                let extra = planes.iter().filter(|(_, v)| *v != 0).count();
                if extra == 0 {
                    out.push(ORDER_SF);
                    out.push(cell.attr_field);
                } else {
                    out.push(ORDER_SFE);
                    out.push((extra + 1) as u8);
                    out.push(XA_3270);
                    out.push(cell.attr_field);
                    for (attr_type, value) in planes.into_iter().filter(|(_, v)| *v != 0) {
                        out.push(attr_type);
                        out.push(value);
                    }
                }
            } else {
                for (attr_type, value) in [
                    (XA_HIGHLIGHTING, cell.attr_highlight),
                    (XA_FOREGROUND, cell.attr_color),
                    (XA_CHARSET, cell.attr_charset),
                ] {
                    if value != 0 {
                        out.push(ORDER_SA);
                        out.push(attr_type);
                        out.push(value);
                    }
                }
                out.push(cell.char_byte);
            }
        }
        out
    }

    /// Build the Query Reply record answering a Read Partition query
    pub fn build_query_reply(&self, display: &Display3270) -> Vec<u8> {
        let rows = display.rows() as u16;
        let cols = display.cols() as u16;
        let mut out = vec![AID_STRUCTURED_FIELD];

        let mut push_reply = |body: &[u8]| {
            let length = (body.len() + 4) as u16;
            out.extend_from_slice(&length.to_be_bytes());
            out.extend_from_slice(&SFID_QUERY_REPLY.to_be_bytes());
            out.extend_from_slice(body);
        };

        // Summary of everything we answer for
        push_reply(&[
            QR_SUMMARY,
            QR_SUMMARY,
            QR_USABLE_AREA,
            QR_ALPHANUMERIC_PARTITIONS,
            QR_CHARACTER_SETS,
            QR_COLOR,
            QR_HIGHLIGHTING,
            QR_REPLY_MODES,
            QR_IMPLICIT_PARTITION,
        ]);

        // Usable area: 12/14-bit flags plus the cell grid
        let mut usable = vec![QR_USABLE_AREA, 0x01, 0x00];
        usable.extend_from_slice(&cols.to_be_bytes());
        usable.extend_from_slice(&rows.to_be_bytes());
        push_reply(&usable);

        // One implicit partition with the default and alternate sizes
        let (alt_rows, alt_cols) = self.alternate_size;
        let mut implicit = vec![QR_IMPLICIT_PARTITION, 0x00, 0x00];
        implicit.extend_from_slice(&cols.to_be_bytes());
        implicit.extend_from_slice(&rows.to_be_bytes());
        implicit.extend_from_slice(&(alt_cols as u16).to_be_bytes());
        implicit.extend_from_slice(&(alt_rows as u16).to_be_bytes());
        push_reply(&implicit);

        // Alphanumeric partitions: one partition, whole-buffer storage
        let storage = (rows as u32 * cols as u32).to_be_bytes();
        let mut parts = vec![QR_ALPHANUMERIC_PARTITIONS, 0x00];
        parts.extend_from_slice(&storage);
        push_reply(&parts);

        // Character sets: default set only, CGCSGID for CP037
        push_reply(&[QR_CHARACTER_SETS, 0x82, 0x00, 0x00, 0x02, 0xB9, 0x00, 0x25]);

        // Color: default plus the base seven
        let mut color = vec![QR_COLOR, 0x00, 0x08, 0x00, COLOR_GREEN];
        for c in [
            COLOR_BLUE,
            COLOR_RED,
            COLOR_PINK,
            COLOR_GREEN,
            COLOR_TURQUOISE,
            COLOR_YELLOW,
            COLOR_WHITE,
        ] {
            color.push(c);
            color.push(c);
        }
        push_reply(&color);

        // Highlighting: default, blink, reverse, underscore
        push_reply(&[
            QR_HIGHLIGHTING,
            0x04,
            HIGHLIGHT_DEFAULT,
            HIGHLIGHT_NORMAL,
            HIGHLIGHT_BLINK,
            HIGHLIGHT_BLINK,
            HIGHLIGHT_REVERSE,
            HIGHLIGHT_REVERSE,
            HIGHLIGHT_UNDERSCORE,
            HIGHLIGHT_UNDERSCORE,
        ]);

        // Reply modes: field and extended-field
        push_reply(&[QR_REPLY_MODES, 0x00, 0x01]);

        out
    }
}

impl Default for ProtocolProcessor3270 {
    fn default() -> Self {
        Self::new((24, 80), (24, 80))
    }
}
