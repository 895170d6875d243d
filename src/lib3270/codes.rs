//! 3270 protocol constants
//!
//! Command codes, order codes, WCC bits, AID keys, field attribute bits,
//! structured field ids and the TN3270E wire constants, as specified in
//! RFC 1576, RFC 2355 and the 3270 data stream reference (GA23-0059).

/// 3270 Command Codes (remote / CCW form)
///
/// These are the command bytes as they appear on a TN3270 connection.
pub const CMD_WRITE: u8 = 0xF1;
pub const CMD_ERASE_WRITE: u8 = 0xF5;
pub const CMD_ERASE_WRITE_ALTERNATE: u8 = 0x7E;
pub const CMD_READ_BUFFER: u8 = 0xF6;
pub const CMD_READ_MODIFIED: u8 = 0xF2;
pub const CMD_READ_MODIFIED_ALL: u8 = 0x6E;
pub const CMD_ERASE_ALL_UNPROTECTED: u8 = 0x6F;
pub const CMD_WRITE_STRUCTURED_FIELD: u8 = 0xF3;
pub const CMD_NOP: u8 = 0x03;

/// SNA (local) command aliases
///
/// Hosts attached through SNA gateways use these values for the same
/// commands; both sets are accepted.
pub const SNA_CMD_WRITE: u8 = 0x01;
pub const SNA_CMD_ERASE_WRITE: u8 = 0x05;
pub const SNA_CMD_ERASE_WRITE_ALTERNATE: u8 = 0x0D;
pub const SNA_CMD_READ_BUFFER: u8 = 0x02;
pub const SNA_CMD_READ_MODIFIED: u8 = 0x06;
pub const SNA_CMD_READ_MODIFIED_ALL: u8 = 0x0E;
pub const SNA_CMD_ERASE_ALL_UNPROTECTED: u8 = 0x0F;
pub const SNA_CMD_WRITE_STRUCTURED_FIELD: u8 = 0x11;

/// 3270 Order Codes
///
/// Embedded in Write-family payloads to control formatting.
pub const ORDER_SBA: u8 = 0x11; // Set Buffer Address
pub const ORDER_SF: u8 = 0x1D; // Start Field
pub const ORDER_SFE: u8 = 0x29; // Start Field Extended
pub const ORDER_SA: u8 = 0x28; // Set Attribute
pub const ORDER_RA: u8 = 0x3C; // Repeat to Address
pub const ORDER_EUA: u8 = 0x12; // Erase Unprotected to Address
pub const ORDER_IC: u8 = 0x13; // Insert Cursor
pub const ORDER_PT: u8 = 0x05; // Program Tab
pub const ORDER_GE: u8 = 0x08; // Graphic Escape
pub const ORDER_TRN: u8 = 0x3F; // Transparent (NVT passthrough)

/// Write Control Character (WCC) bits
pub const WCC_RESET: u8 = 0x40; // Reset partition characteristics
pub const WCC_START_PRINTER: u8 = 0x08; // Start printer
pub const WCC_SOUND_ALARM: u8 = 0x04; // Sound alarm
pub const WCC_KEYBOARD_RESTORE: u8 = 0x02; // Restore (unlock) keyboard
pub const WCC_RESET_MDT: u8 = 0x01; // Reset MDT bits

/// AID (Attention Identifier) bytes
pub const AID_NO_AID: u8 = 0x60;
pub const AID_STRUCTURED_FIELD: u8 = 0x88;
pub const AID_ENTER: u8 = 0x7D;
pub const AID_CLEAR: u8 = 0x6D;
pub const AID_SYSREQ: u8 = 0xF0;
pub const AID_PA1: u8 = 0x6C;
pub const AID_PA2: u8 = 0x6E;
pub const AID_PA3: u8 = 0x6B;
pub const AID_PF1: u8 = 0xF1;
pub const AID_PF2: u8 = 0xF2;
pub const AID_PF3: u8 = 0xF3;
pub const AID_PF4: u8 = 0xF4;
pub const AID_PF5: u8 = 0xF5;
pub const AID_PF6: u8 = 0xF6;
pub const AID_PF7: u8 = 0xF7;
pub const AID_PF8: u8 = 0xF8;
pub const AID_PF9: u8 = 0xF9;
pub const AID_PF10: u8 = 0x7A;
pub const AID_PF11: u8 = 0x7B;
pub const AID_PF12: u8 = 0x7C;
pub const AID_PF13: u8 = 0xC1;
pub const AID_PF14: u8 = 0xC2;
pub const AID_PF15: u8 = 0xC3;
pub const AID_PF16: u8 = 0xC4;
pub const AID_PF17: u8 = 0xC5;
pub const AID_PF18: u8 = 0xC6;
pub const AID_PF19: u8 = 0xC7;
pub const AID_PF20: u8 = 0xC8;
pub const AID_PF21: u8 = 0xC9;
pub const AID_PF22: u8 = 0x4A;
pub const AID_PF23: u8 = 0x4B;
pub const AID_PF24: u8 = 0x4C;

/// Field attribute bits (low six bits of the attribute byte)
pub const ATTR_PROTECTED: u8 = 0x20;
pub const ATTR_NUMERIC: u8 = 0x10;
pub const ATTR_DISPLAY: u8 = 0x0C; // two-bit display group
pub const ATTR_MDT: u8 = 0x01;

/// Display attribute values (the two-bit ATTR_DISPLAY group)
pub const DISPLAY_NORMAL: u8 = 0x00;
pub const DISPLAY_INTENSIFIED: u8 = 0x08;
pub const DISPLAY_HIDDEN: u8 = 0x0C;

/// Auto-skip is protected plus numeric
pub const ATTR_AUTOSKIP: u8 = ATTR_PROTECTED | ATTR_NUMERIC;

/// Extended attribute types (SFE and SA orders)
pub const XA_ALL: u8 = 0x00;
pub const XA_3270: u8 = 0xC0; // base 3270 field attribute
pub const XA_VALIDATION: u8 = 0xC1;
pub const XA_OUTLINING: u8 = 0xC2;
pub const XA_HIGHLIGHTING: u8 = 0x41;
pub const XA_FOREGROUND: u8 = 0x42;
pub const XA_CHARSET: u8 = 0x43;
pub const XA_BACKGROUND: u8 = 0x45;
pub const XA_TRANSPARENCY: u8 = 0x46;

/// Highlighting values
pub const HIGHLIGHT_DEFAULT: u8 = 0x00;
pub const HIGHLIGHT_NORMAL: u8 = 0xF0;
pub const HIGHLIGHT_BLINK: u8 = 0xF1;
pub const HIGHLIGHT_REVERSE: u8 = 0xF2;
pub const HIGHLIGHT_UNDERSCORE: u8 = 0xF4;

/// Color values
pub const COLOR_DEFAULT: u8 = 0x00;
pub const COLOR_BLUE: u8 = 0xF1;
pub const COLOR_RED: u8 = 0xF2;
pub const COLOR_PINK: u8 = 0xF3;
pub const COLOR_GREEN: u8 = 0xF4;
pub const COLOR_TURQUOISE: u8 = 0xF5;
pub const COLOR_YELLOW: u8 = 0xF6;
pub const COLOR_WHITE: u8 = 0xF7;

/// Charset plane marker for characters written through Graphic Escape
pub const CHARSET_GE: u8 = 0x01;

/// Structured field ids (two-byte form as carried after the length)
pub const SFID_READ_PARTITION: u16 = 0x0001;
pub const SFID_ERASE_RESET: u16 = 0x0003;
/// BIND RU tunneled as a structured field by some gateways
pub const SFID_BIND_IMAGE: u16 = 0x0004;
pub const SFID_OUTBOUND_3270DS: u16 = 0x0040;
pub const SFID_QUERY_REPLY: u16 = 0x0081;

/// Read Partition operation bytes
pub const READ_PARTITION_QUERY: u8 = 0x02;
pub const READ_PARTITION_QUERY_LIST: u8 = 0x03;

/// Erase/Reset flag selecting the alternate screen size
pub const ERASE_RESET_ALTERNATE: u8 = 0x80;

/// Query Reply codes
pub const QR_SUMMARY: u8 = 0x80;
pub const QR_USABLE_AREA: u8 = 0x81;
pub const QR_ALPHANUMERIC_PARTITIONS: u8 = 0x84;
pub const QR_CHARACTER_SETS: u8 = 0x85;
pub const QR_COLOR: u8 = 0x86;
pub const QR_HIGHLIGHTING: u8 = 0x87;
pub const QR_REPLY_MODES: u8 = 0x88;
pub const QR_IMPLICIT_PARTITION: u8 = 0xA6;

/// TN3270E header data types (RFC 2355 section 8.1)
pub const DT_3270_DATA: u8 = 0x00;
pub const DT_SCS_DATA: u8 = 0x01;
pub const DT_RESPONSE: u8 = 0x02;
pub const DT_BIND_IMAGE: u8 = 0x03;
pub const DT_UNBIND: u8 = 0x04;
pub const DT_NVT_DATA: u8 = 0x05;
pub const DT_REQUEST: u8 = 0x06;
pub const DT_SSCP_LU_DATA: u8 = 0x07;
pub const DT_PRINT_EOJ: u8 = 0x08;

/// TN3270E subnegotiation operations (RFC 2355 section 8.2)
pub const TN3270E_OP_ASSOCIATE: u8 = 0x00;
pub const TN3270E_OP_CONNECT: u8 = 0x01;
pub const TN3270E_OP_DEVICE_TYPE: u8 = 0x02;
pub const TN3270E_OP_FUNCTIONS: u8 = 0x03;
pub const TN3270E_OP_IS: u8 = 0x04;
pub const TN3270E_OP_REASON: u8 = 0x05;
pub const TN3270E_OP_REJECT: u8 = 0x06;
pub const TN3270E_OP_REQUEST: u8 = 0x07;
pub const TN3270E_OP_SEND: u8 = 0x08;

/// TN3270E function codes (bit positions in the function set)
pub const FN_BIND_IMAGE: u8 = 0x00;
pub const FN_DATA_STREAM_CTL: u8 = 0x01;
pub const FN_RESPONSES: u8 = 0x02;
pub const FN_SCS_CTL_CODES: u8 = 0x03;
pub const FN_SYSREQ: u8 = 0x04;

/// Function set as a bitmask
pub const FUNC_BIND_IMAGE: u8 = 1 << FN_BIND_IMAGE;
pub const FUNC_DATA_STREAM_CTL: u8 = 1 << FN_DATA_STREAM_CTL;
pub const FUNC_RESPONSES: u8 = 1 << FN_RESPONSES;
pub const FUNC_SCS_CTL_CODES: u8 = 1 << FN_SCS_CTL_CODES;
pub const FUNC_SYSREQ: u8 = 1 << FN_SYSREQ;

/// Mask of all defined function bits
pub const FUNC_ALL: u8 =
    FUNC_BIND_IMAGE | FUNC_DATA_STREAM_CTL | FUNC_RESPONSES | FUNC_SCS_CTL_CODES | FUNC_SYSREQ;

/// Enum representation of 3270 command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    Write,
    EraseWrite,
    EraseWriteAlternate,
    ReadBuffer,
    ReadModified,
    ReadModifiedAll,
    EraseAllUnprotected,
    WriteStructuredField,
    Nop,
}

impl CommandCode {
    /// Decode a command byte, accepting both the remote and the SNA set
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            CMD_WRITE | SNA_CMD_WRITE => Some(Self::Write),
            CMD_ERASE_WRITE | SNA_CMD_ERASE_WRITE => Some(Self::EraseWrite),
            CMD_ERASE_WRITE_ALTERNATE | SNA_CMD_ERASE_WRITE_ALTERNATE => {
                Some(Self::EraseWriteAlternate)
            }
            CMD_READ_BUFFER | SNA_CMD_READ_BUFFER => Some(Self::ReadBuffer),
            CMD_READ_MODIFIED | SNA_CMD_READ_MODIFIED => Some(Self::ReadModified),
            CMD_READ_MODIFIED_ALL | SNA_CMD_READ_MODIFIED_ALL => Some(Self::ReadModifiedAll),
            CMD_ERASE_ALL_UNPROTECTED | SNA_CMD_ERASE_ALL_UNPROTECTED => {
                Some(Self::EraseAllUnprotected)
            }
            CMD_WRITE_STRUCTURED_FIELD | SNA_CMD_WRITE_STRUCTURED_FIELD => {
                Some(Self::WriteStructuredField)
            }
            CMD_NOP => Some(Self::Nop),
            _ => None,
        }
    }

    /// The remote-form byte for this command
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Write => CMD_WRITE,
            Self::EraseWrite => CMD_ERASE_WRITE,
            Self::EraseWriteAlternate => CMD_ERASE_WRITE_ALTERNATE,
            Self::ReadBuffer => CMD_READ_BUFFER,
            Self::ReadModified => CMD_READ_MODIFIED,
            Self::ReadModifiedAll => CMD_READ_MODIFIED_ALL,
            Self::EraseAllUnprotected => CMD_ERASE_ALL_UNPROTECTED,
            Self::WriteStructuredField => CMD_WRITE_STRUCTURED_FIELD,
            Self::Nop => CMD_NOP,
        }
    }
}

/// Enum representation of order codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCode {
    SetBufferAddress,
    StartField,
    StartFieldExtended,
    SetAttribute,
    RepeatToAddress,
    EraseUnprotectedToAddress,
    InsertCursor,
    ProgramTab,
    GraphicEscape,
    Transparent,
}

impl OrderCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            ORDER_SBA => Some(Self::SetBufferAddress),
            ORDER_SF => Some(Self::StartField),
            ORDER_SFE => Some(Self::StartFieldExtended),
            ORDER_SA => Some(Self::SetAttribute),
            ORDER_RA => Some(Self::RepeatToAddress),
            ORDER_EUA => Some(Self::EraseUnprotectedToAddress),
            ORDER_IC => Some(Self::InsertCursor),
            ORDER_PT => Some(Self::ProgramTab),
            ORDER_GE => Some(Self::GraphicEscape),
            ORDER_TRN => Some(Self::Transparent),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::SetBufferAddress => ORDER_SBA,
            Self::StartField => ORDER_SF,
            Self::StartFieldExtended => ORDER_SFE,
            Self::SetAttribute => ORDER_SA,
            Self::RepeatToAddress => ORDER_RA,
            Self::EraseUnprotectedToAddress => ORDER_EUA,
            Self::InsertCursor => ORDER_IC,
            Self::ProgramTab => ORDER_PT,
            Self::GraphicEscape => ORDER_GE,
            Self::Transparent => ORDER_TRN,
        }
    }
}

/// Enum representation of AID keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AidKey {
    NoAid,
    Enter,
    Clear,
    PA1,
    PA2,
    PA3,
    PF1, PF2, PF3, PF4, PF5, PF6,
    PF7, PF8, PF9, PF10, PF11, PF12,
    PF13, PF14, PF15, PF16, PF17, PF18,
    PF19, PF20, PF21, PF22, PF23, PF24,
    StructuredField,
    SysReq,
}

impl AidKey {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            AID_NO_AID => Some(Self::NoAid),
            AID_ENTER => Some(Self::Enter),
            AID_CLEAR => Some(Self::Clear),
            AID_PA1 => Some(Self::PA1),
            AID_PA2 => Some(Self::PA2),
            AID_PA3 => Some(Self::PA3),
            AID_PF1 => Some(Self::PF1),
            AID_PF2 => Some(Self::PF2),
            AID_PF3 => Some(Self::PF3),
            AID_PF4 => Some(Self::PF4),
            AID_PF5 => Some(Self::PF5),
            AID_PF6 => Some(Self::PF6),
            AID_PF7 => Some(Self::PF7),
            AID_PF8 => Some(Self::PF8),
            AID_PF9 => Some(Self::PF9),
            AID_PF10 => Some(Self::PF10),
            AID_PF11 => Some(Self::PF11),
            AID_PF12 => Some(Self::PF12),
            AID_PF13 => Some(Self::PF13),
            AID_PF14 => Some(Self::PF14),
            AID_PF15 => Some(Self::PF15),
            AID_PF16 => Some(Self::PF16),
            AID_PF17 => Some(Self::PF17),
            AID_PF18 => Some(Self::PF18),
            AID_PF19 => Some(Self::PF19),
            AID_PF20 => Some(Self::PF20),
            AID_PF21 => Some(Self::PF21),
            AID_PF22 => Some(Self::PF22),
            AID_PF23 => Some(Self::PF23),
            AID_PF24 => Some(Self::PF24),
            AID_STRUCTURED_FIELD => Some(Self::StructuredField),
            AID_SYSREQ => Some(Self::SysReq),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::NoAid => AID_NO_AID,
            Self::Enter => AID_ENTER,
            Self::Clear => AID_CLEAR,
            Self::PA1 => AID_PA1,
            Self::PA2 => AID_PA2,
            Self::PA3 => AID_PA3,
            Self::PF1 => AID_PF1,
            Self::PF2 => AID_PF2,
            Self::PF3 => AID_PF3,
            Self::PF4 => AID_PF4,
            Self::PF5 => AID_PF5,
            Self::PF6 => AID_PF6,
            Self::PF7 => AID_PF7,
            Self::PF8 => AID_PF8,
            Self::PF9 => AID_PF9,
            Self::PF10 => AID_PF10,
            Self::PF11 => AID_PF11,
            Self::PF12 => AID_PF12,
            Self::PF13 => AID_PF13,
            Self::PF14 => AID_PF14,
            Self::PF15 => AID_PF15,
            Self::PF16 => AID_PF16,
            Self::PF17 => AID_PF17,
            Self::PF18 => AID_PF18,
            Self::PF19 => AID_PF19,
            Self::PF20 => AID_PF20,
            Self::PF21 => AID_PF21,
            Self::PF22 => AID_PF22,
            Self::PF23 => AID_PF23,
            Self::PF24 => AID_PF24,
            Self::StructuredField => AID_STRUCTURED_FIELD,
            Self::SysReq => AID_SYSREQ,
        }
    }

    /// Short-read AIDs carry no field data in the reply
    pub fn is_short_read(self) -> bool {
        matches!(self, Self::Clear | Self::PA1 | Self::PA2 | Self::PA3)
    }
}
