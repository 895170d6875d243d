//! Data-stream integration tests
//!
//! End-to-end checks of the parser and builders against concrete byte
//! streams, plus property tests over addressing, EBCDIC translation and
//! parser robustness on arbitrary input.

use proptest::prelude::*;

use tn3270r::ebcdic::{CodePage, Ebcdic};
use tn3270r::lib3270::codes::*;
use tn3270r::lib3270::display::{addressing, Display3270};
use tn3270r::lib3270::protocol::{ProtocolProcessor3270, StreamAction};
use tn3270r::lib3270::AidKey;

fn processor() -> ProtocolProcessor3270 {
    ProtocolProcessor3270::new((24, 80), (32, 80))
}

/// Erase/Write with SBA, SF and RA: `F5 C3 11 00 00 1D C0 3C 40 C9 F0`
#[test]
fn test_erase_write_sba_sf_ra_stream() {
    let mut display = Display3270::new();
    let mut proc = processor();
    let stream = [0xF5, 0xC3, 0x11, 0x00, 0x00, 0x1D, 0xC0, 0x3C, 0x40, 0xC9, 0xF0];
    let actions = proc.process_record(&stream, &mut display);

    // Cell 0 holds the field attribute installed by SF
    assert!(display.cell(0).unwrap().is_field_attr());
    assert_eq!(display.fields().len(), 1);
    // RA repeated EBCDIC '0' up to address 9, exclusive
    for addr in 1..9 {
        assert_eq!(display.cell(addr).unwrap().char_byte, 0xF0, "cell {addr}");
    }
    assert_eq!(display.cell(9).unwrap().char_byte, 0x00);
    // The cursor was never moved
    assert_eq!(display.cursor_address(), 0);
    // WCC 0xC3: reset, keyboard restore, reset MDT
    assert!(actions.contains(&StreamAction::KeyboardRestore));
    assert!(actions.contains(&StreamAction::ResetPartition));
    assert!(!display.is_keyboard_locked());
    assert_eq!(display.last_wcc(), 0xC3);
}

/// An alarm WCC is surfaced as an action
#[test]
fn test_wcc_alarm_bit() {
    let mut display = Display3270::new();
    let mut proc = processor();
    let actions = proc.process_record(&[0xF5, 0xC7, 0xC1], &mut display);
    assert!(actions.contains(&StreamAction::Alarm));
}

/// Unformatted Enter reply: AID, cursor, SBA(0), text without trailing nulls
#[test]
fn test_unformatted_enter_reply() {
    let mut display = Display3270::new();
    let proc = processor();
    for (i, b) in [0xC8, 0xC5, 0xD3, 0xD3, 0xD6].iter().enumerate() {
        display.user_write(i as u16, *b, false).unwrap();
    }
    display.set_cursor(5).unwrap();

    let reply = proc.build_read_modified(AidKey::Enter, &display, false);
    assert_eq!(reply[0], 0x7D);
    let (c1, c2) = addressing::encode_12bit(5);
    assert_eq!(&reply[1..3], &[c1, c2]);
    assert_eq!(reply[3], ORDER_SBA);
    let (z1, z2) = addressing::encode_12bit(0);
    assert_eq!(&reply[4..6], &[z1, z2]);
    assert_eq!(&reply[6..], &[0xC8, 0xC5, 0xD3, 0xD3, 0xD6]);
}

/// A truncated SF mid-stream aborts the record but keeps earlier writes
#[test]
fn test_truncated_order_recovery() {
    let mut display = Display3270::new();
    let mut proc = processor();

    let actions = proc.process_record(&[0xF1, 0x00, 0xC1, 0xC2, 0x1D], &mut display);
    assert!(actions
        .iter()
        .any(|a| matches!(a, StreamAction::ParseFault(_))));
    assert_eq!(display.cell(0).unwrap().char_byte, 0xC1);
    assert_eq!(display.cell(1).unwrap().char_byte, 0xC2);

    // The session continues: the next record applies cleanly
    let actions = proc.process_record(&[0xF1, 0x00, 0xC3], &mut display);
    assert!(!actions.iter().any(|a| matches!(a, StreamAction::ParseFault(_))));
    assert_eq!(display.cell(2).unwrap().char_byte, 0xC3);
}

/// RA targeting the current buffer address fills the whole screen
#[test]
fn test_ra_full_wrap() {
    let mut display = Display3270::new();
    let mut proc = processor();
    let (b1, b2) = addressing::encode_12bit(100);
    let stream = [0xF1, 0x00, ORDER_SBA, b1, b2, ORDER_RA, b1, b2, 0x40];
    proc.process_record(&stream, &mut display);
    for addr in 0..display.buffer_size() as u16 {
        assert_eq!(display.cell(addr).unwrap().char_byte, 0x40, "cell {addr}");
    }
}

/// A 14-bit SBA is never misread as 12-bit, and vice versa
#[test]
fn test_sba_address_mode_detection() {
    let mut display = Display3270::new();
    let mut proc = processor();

    // 14-bit form: top bits of the first byte are 00
    proc.process_record(&[0xF1, 0x00, ORDER_SBA, 0x03, 0xE8, 0xC1], &mut display);
    assert_eq!(display.cell(1000).unwrap().char_byte, 0xC1);

    // 12-bit coded form of the same address
    let (b1, b2) = addressing::encode_12bit(1000);
    assert_ne!(b1 & 0xC0, 0);
    proc.process_record(&[0xF1, 0x00, ORDER_SBA, b1, b2, 0xC2], &mut display);
    assert_eq!(display.cell(1000).unwrap().char_byte, 0xC2);
}

/// Applying WCC reset-MDT twice equals applying it once
#[test]
fn test_reset_mdt_idempotent() {
    let build = |resets: usize| {
        let mut display = Display3270::new();
        let mut proc = processor();
        proc.process_record(&[0xF5, 0x00, ORDER_SF, 0x40], &mut display);
        display.user_write(1, 0xC1, false).unwrap();
        for _ in 0..resets {
            proc.process_record(&[0xF1, WCC_RESET_MDT], &mut display);
        }
        display.fields().iter().map(|f| f.is_modified()).collect::<Vec<_>>()
    };
    assert_eq!(build(1), build(2));
    assert_eq!(build(1), vec![false]);
}

/// Read Buffer output replayed into a fresh buffer reproduces every cell
#[test]
fn test_read_buffer_round_trip() {
    let mut display = Display3270::new();
    let mut proc = processor();
    let (b1, b2) = addressing::encode_12bit(400);
    let stream = [
        0xF5, 0x00,
        ORDER_SFE, 0x03, XA_3270, 0xE0, XA_FOREGROUND, COLOR_BLUE, XA_HIGHLIGHTING,
        HIGHLIGHT_UNDERSCORE,
        0xD7, 0xC1, 0xE8, 0xD9, 0xD6, 0xD3, 0xD3, // PAYROLL
        ORDER_SBA, b1, b2,
        ORDER_SF, 0x40,
        ORDER_GE, 0xAD,
    ];
    proc.process_record(&stream, &mut display);

    let dump = proc.build_read_buffer(AidKey::NoAid, &display);
    let mut replay = vec![0xF5, 0x00];
    replay.extend_from_slice(&dump[3..]);
    let mut fresh = Display3270::new();
    proc.process_record(&replay, &mut fresh);

    for addr in 0..display.buffer_size() as u16 {
        assert_eq!(display.cell(addr), fresh.cell(addr), "cell {addr}");
    }
}

/// EAU clears unprotected content only and frees the keyboard
#[test]
fn test_erase_all_unprotected_command() {
    let mut display = Display3270::new();
    let mut proc = processor();
    let (b1, b2) = addressing::encode_12bit(40);
    let stream = [
        0xF5, 0x00,
        ORDER_SF, 0xE0, 0xC8, 0xC9, // protected field with "HI"
        ORDER_SBA, b1, b2,
        ORDER_SF, 0x40,
    ];
    proc.process_record(&stream, &mut display);
    display.user_write(41, 0xC1, false).unwrap();

    let actions = proc.process_record(&[0x6F], &mut display);
    assert!(actions.contains(&StreamAction::KeyboardRestore));
    assert_eq!(display.cell(1).unwrap().char_byte, 0xC8);
    assert_eq!(display.cell(41).unwrap().char_byte, 0x00);
    assert_eq!(display.cursor_address(), 41);
}

proptest! {
    /// encode(decode(b)) == b over every byte of every installed code page
    #[test]
    fn prop_ebcdic_round_trip(byte in any::<u8>()) {
        for page in [CodePage::Cp037, CodePage::Cp273, CodePage::Cp285] {
            let codec = Ebcdic::new(page);
            let ch = codec.translate_byte(byte);
            prop_assert_eq!(codec.reverse(ch), byte);
        }
    }

    /// 12-bit addresses survive the graphic code table
    #[test]
    fn prop_12bit_address_round_trip(addr in 0u16..4096) {
        let (b1, b2) = addressing::encode_12bit(addr);
        prop_assert_eq!(addressing::decode(b1, b2), addr);
    }

    /// 14-bit addresses survive and are detected by their top bits
    #[test]
    fn prop_14bit_address_round_trip(addr in 0u16..16384) {
        let (b1, b2) = addressing::encode_14bit(addr);
        prop_assert_eq!(b1 & 0xC0, 0);
        prop_assert_eq!(addressing::decode(b1, b2), addr);
    }

    /// The parser neither panics nor corrupts its cursors on arbitrary bytes
    #[test]
    fn prop_parser_survives_arbitrary_records(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut display = Display3270::new();
        let mut proc = processor();
        let _ = proc.process_record(&data, &mut display);
        let size = display.buffer_size() as u16;
        prop_assert!(display.cursor_address() < size);
        prop_assert!(display.buffer_address() < size);
    }

    /// Fields derived after arbitrary formatted streams stay consistent
    #[test]
    fn prop_fields_bounded_by_attributes(data in proptest::collection::vec(any::<u8>(), 0..128)) {
        let mut display = Display3270::new();
        let mut proc = processor();
        let mut stream = vec![0xF5, 0x00];
        stream.extend_from_slice(&data);
        let _ = proc.process_record(&stream, &mut display);
        let size = display.buffer_size();
        for field in display.fields() {
            let cell = display.cell(field.address).unwrap();
            prop_assert!(cell.is_field_attr());
            prop_assert!((field.address as usize) < size);
            prop_assert!((field.end as usize) < size);
        }
    }
}
