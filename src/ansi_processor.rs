//! ANSI/VT100 escape sequence processing for NVT fallback
//!
//! When negotiation lands in ASCII/NVT mode the host sends a line-oriented
//! VT100-style stream. This processor applies the common subset (cursor
//! positioning, relative moves, erase display/line, SGR) to the screen
//! buffer so `read_screen` and `wait_for` keep working unchanged.

use crate::ebcdic::Ebcdic;
use crate::lib3270::display::Display3270;

#[derive(Debug, Clone)]
pub struct AnsiProcessor {
    /// Cursor position, 1-based as VT100 counts
    row: usize,
    col: usize,
    /// Bytes of an escape sequence being collected
    escape_buffer: String,
    in_escape: bool,
    /// Last SGR parameters seen; tracked, not rendered
    sgr: Vec<u8>,
    saved_cursor: Option<(usize, usize)>,
}

impl AnsiProcessor {
    pub fn new() -> Self {
        Self {
            row: 1,
            col: 1,
            escape_buffer: String::new(),
            in_escape: false,
            sgr: Vec::new(),
            saved_cursor: None,
        }
    }

    /// Apply a chunk of NVT bytes to the display
    pub fn process_data(&mut self, data: &[u8], display: &mut Display3270, codec: &Ebcdic) {
        for &byte in data {
            if self.in_escape {
                self.escape_buffer.push(byte as char);
                if self.is_complete_sequence() {
                    self.apply_escape_sequence(display);
                    self.in_escape = false;
                    self.escape_buffer.clear();
                }
                continue;
            }
            match byte {
                0x1B => {
                    self.in_escape = true;
                    self.escape_buffer.clear();
                }
                0x0A => {
                    if self.row < display.rows() {
                        self.row += 1;
                    } else {
                        self.scroll_up(display);
                    }
                }
                0x0D => self.col = 1,
                0x08 => {
                    if self.col > 1 {
                        self.col -= 1;
                    }
                }
                0x09 => {
                    self.col = (((self.col - 1) / 8) + 1) * 8 + 1;
                    self.col = self.col.min(display.cols());
                }
                0x07 => {} // BEL
                0x00 => {}
                b if (0x20..0x7F).contains(&b) => {
                    self.put_char(b as char, display, codec);
                }
                _ => {}
            }
        }
        self.sync_cursor(display);
    }

    fn put_char(&mut self, ch: char, display: &mut Display3270, codec: &Ebcdic) {
        if self.col > display.cols() {
            self.col = 1;
            if self.row < display.rows() {
                self.row += 1;
            } else {
                self.scroll_up(display);
            }
        }
        let addr = self.address(display);
        display.set_buffer_address_wrapped(addr);
        display.write_char(codec.reverse(ch));
        self.col += 1;
    }

    fn address(&self, display: &Display3270) -> u16 {
        let row = self.row.clamp(1, display.rows()) - 1;
        let col = self.col.clamp(1, display.cols()) - 1;
        (row * display.cols() + col) as u16
    }

    fn sync_cursor(&self, display: &mut Display3270) {
        let addr = self.address(display);
        let _ = display.set_cursor(addr);
    }

    /// Shift every row up by one, clearing the bottom row
    fn scroll_up(&mut self, display: &mut Display3270) {
        let cols = display.cols();
        let rows = display.rows();
        for row in 1..rows {
            for col in 0..cols {
                let from = (row * cols + col) as u16;
                let byte = display.cell(from).map(|c| c.char_byte).unwrap_or(0);
                display.set_buffer_address_wrapped(((row - 1) * cols + col) as u16);
                display.write_char(byte);
            }
        }
        for col in 0..cols {
            display.set_buffer_address_wrapped(((rows - 1) * cols + col) as u16);
            display.write_char(0);
        }
    }

    fn is_complete_sequence(&self) -> bool {
        let bytes = self.escape_buffer.as_bytes();
        match bytes.first() {
            // CSI: parameters then a final byte in 0x40..0x7E
            Some(b'[') => bytes.len() > 1 && (0x40..0x7F).contains(bytes.last().unwrap()),
            // Two-character escapes
            Some(_) => true,
            None => false,
        }
    }

    fn apply_escape_sequence(&mut self, display: &mut Display3270) {
        let seq = std::mem::take(&mut self.escape_buffer);
        let Some(rest) = seq.strip_prefix('[') else {
            match seq.as_str() {
                // Index / Reverse Index
                "D" => {
                    if self.row < display.rows() {
                        self.row += 1;
                    }
                }
                "M" => {
                    if self.row > 1 {
                        self.row -= 1;
                    }
                }
                "E" => {
                    self.col = 1;
                    if self.row < display.rows() {
                        self.row += 1;
                    }
                }
                _ => {}
            }
            return;
        };

        let (params_str, final_byte) = rest.split_at(rest.len() - 1);
        let params: Vec<usize> = params_str
            .split(';')
            .filter(|p| !p.is_empty())
            .filter_map(|p| p.parse().ok())
            .collect();
        let param = |i: usize, default: usize| params.get(i).copied().unwrap_or(default);

        match final_byte {
            "H" | "f" => {
                self.row = param(0, 1).clamp(1, display.rows());
                self.col = param(1, 1).clamp(1, display.cols());
            }
            "A" => self.row = self.row.saturating_sub(param(0, 1)).max(1),
            "B" => self.row = (self.row + param(0, 1)).min(display.rows()),
            "C" => self.col = (self.col + param(0, 1)).min(display.cols()),
            "D" => self.col = self.col.saturating_sub(param(0, 1)).max(1),
            "J" => self.erase_display(param(0, 0), display),
            "K" => self.erase_line(param(0, 0), display),
            "m" => {
                self.sgr = params.iter().map(|&p| p as u8).collect();
            }
            "s" => self.saved_cursor = Some((self.row, self.col)),
            "u" => {
                if let Some((row, col)) = self.saved_cursor {
                    self.row = row;
                    self.col = col;
                }
            }
            _ => {}
        }
    }

    fn erase_range(&self, display: &mut Display3270, from: u16, to: u16) {
        for addr in from..to {
            display.set_buffer_address_wrapped(addr);
            display.write_char(0);
        }
    }

    fn erase_display(&mut self, mode: usize, display: &mut Display3270) {
        let size = display.buffer_size() as u16;
        let cursor = self.address(display);
        match mode {
            0 => self.erase_range(display, cursor, size),
            1 => self.erase_range(display, 0, cursor + 1),
            2 => {
                display.clear();
                self.row = 1;
                self.col = 1;
            }
            _ => {}
        }
    }

    fn erase_line(&mut self, mode: usize, display: &mut Display3270) {
        let cols = display.cols();
        let line_start = ((self.row.clamp(1, display.rows()) - 1) * cols) as u16;
        let line_end = line_start + cols as u16;
        let cursor = self.address(display);
        match mode {
            0 => self.erase_range(display, cursor, line_end),
            1 => self.erase_range(display, line_start, cursor + 1),
            2 => self.erase_range(display, line_start, line_end),
            _ => {}
        }
    }
}
