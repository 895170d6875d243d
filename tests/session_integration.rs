//! Session end-to-end tests against a scripted loopback host
//!
//! A real TCP listener plays the mainframe side byte-for-byte: TN3270E
//! negotiation, BIND-IMAGE resize, a screen paint, and the AID reply coming
//! back. A second scenario exercises the ASCII/NVT fallback.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tn3270r::config::TerminalConfig;
use tn3270r::lib3270::codes::*;
use tn3270r::network::{MaybeTlsStream, Transport};
use tn3270r::session::{SessionEvent, SessionState, TN3270Session};

const IAC: u8 = 0xFF;
const SB: u8 = 0xFA;
const SE: u8 = 0xF0;
const DO: u8 = 0xFD;
const WILL: u8 = 0xFB;
const EOR_MARK: u8 = 0xEF;

/// Read until the terminator pair appears; returns everything read
async fn read_until(sock: &mut TcpStream, last: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        sock.read_exact(&mut byte).await.expect("host read");
        buf.push(byte[0]);
        if buf.len() >= 2 && buf[buf.len() - 2] == IAC && buf[buf.len() - 1] == last {
            return buf;
        }
    }
}

async fn client_session(addr: std::net::SocketAddr, config: TerminalConfig) -> TN3270Session {
    let _ = env_logger::builder().is_test(true).try_init();
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut session = TN3270Session::new(config).unwrap();
    let transport = Transport::from_stream(
        MaybeTlsStream::Plain(stream),
        addr.ip().to_string(),
        addr.port(),
    );
    session.connect_with_transport(transport).await.unwrap();
    session
}

#[tokio::test]
async fn test_tn3270e_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let host = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        // Telnet volley: TN3270E, BINARY, EOR in both directions
        sock.write_all(&[
            IAC, DO, 40,
            IAC, DO, 0,
            IAC, WILL, 0,
            IAC, DO, 25,
            IAC, WILL, 25,
        ])
        .await
        .unwrap();

        // Client answers the options and sends its DEVICE-TYPE REQUEST
        read_until(&mut sock, SE).await;

        // DEVICE-TYPE IS IBM-3278-2-E CONNECT LU1
        let mut reply = vec![IAC, SB, 40, TN3270E_OP_DEVICE_TYPE, TN3270E_OP_IS];
        reply.extend_from_slice(b"IBM-3278-2-E");
        reply.push(TN3270E_OP_CONNECT);
        reply.extend_from_slice(b"LU1");
        reply.extend_from_slice(&[IAC, SE]);
        sock.write_all(&reply).await.unwrap();

        // FUNCTIONS REQUEST arrives; grant BIND-IMAGE and RESPONSES
        read_until(&mut sock, SE).await;
        sock.write_all(&[
            IAC, SB, 40, TN3270E_OP_FUNCTIONS, TN3270E_OP_IS, FN_BIND_IMAGE, FN_RESPONSES,
            IAC, SE,
        ])
        .await
        .unwrap();

        // Client confirms the subset
        read_until(&mut sock, SE).await;

        // BIND-IMAGE: alternate size 32x80, extended addressing
        let mut bind = vec![0u8; 26];
        bind[20] = 24;
        bind[21] = 80;
        bind[22] = 32;
        bind[23] = 80;
        bind[24] = 0x7E;
        bind[25] = 0x01;
        let mut record = vec![DT_BIND_IMAGE, 0, 0, 0, 0];
        record.extend_from_slice(&bind);
        record.extend_from_slice(&[IAC, EOR_MARK]);
        sock.write_all(&record).await.unwrap();

        // Screen paint: EWA, protected title "WELCOME", one input field
        let mut screen = vec![DT_3270_DATA, 0, 0, 0, 1];
        screen.extend_from_slice(&[
            CMD_ERASE_WRITE_ALTERNATE,
            WCC_KEYBOARD_RESTORE,
            ORDER_SF, 0xE0,
            0xE6, 0xC5, 0xD3, 0xC3, 0xD6, 0xD4, 0xC5, // WELCOME
            ORDER_SF, 0x40,
        ]);
        screen.extend_from_slice(&[IAC, EOR_MARK]);
        sock.write_all(&screen).await.unwrap();

        // The Enter reply
        let reply = read_until(&mut sock, EOR_MARK).await;
        sock.shutdown().await.unwrap();
        reply
    });

    let mut config = TerminalConfig::new("127.0.0.1");
    config.trace = true;
    let mut session = client_session(addr, config).await;

    let negotiation = session.negotiation();
    assert!(negotiation.tn3270e_enabled);
    assert_eq!(negotiation.device_type.as_deref(), Some("IBM-3278-2-E"));
    assert_eq!(negotiation.lu_name.as_deref(), Some("LU1"));
    assert_eq!(negotiation.functions, FUNC_BIND_IMAGE | FUNC_RESPONSES);
    assert_eq!(session.state(), SessionState::Ready);

    // BIND resizes the screen and turns on 14-bit addressing
    session
        .wait_for(|screen| screen.contains("WELCOME"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(session.display().rows(), 32);
    assert_eq!(session.display().cols(), 80);
    assert!(session.negotiation().bound);
    assert!(session
        .trace_events()
        .contains(&SessionEvent::BindAccepted {
            rows: 32,
            cols: 80,
            extended_addressing: true,
        }));

    // Fill the input field and press Enter
    session.key("Tab").await.unwrap();
    assert_eq!(session.display().cursor_address(), 9);
    session.insert_text("USER1").unwrap();
    session.key("Enter").await.unwrap();

    let reply = host.await.unwrap();
    // TN3270E header: 3270-DATA, first outbound record (sequence 0)
    assert_eq!(&reply[..5], &[DT_3270_DATA, 0, 0, 0, 0]);
    // AID and the 14-bit cursor address (14)
    assert_eq!(reply[5], AID_ENTER);
    assert_eq!(&reply[6..8], &[0x00, 14]);
    // SBA to the field content at 9, then the text
    assert_eq!(reply[8], ORDER_SBA);
    assert_eq!(&reply[9..11], &[0x00, 9]);
    assert_eq!(&reply[11..16], &[0xE4, 0xE2, 0xC5, 0xD9, 0xF1]); // USER1
    assert_eq!(&reply[16..], &[IAC, EOR_MARK]);
}

#[tokio::test]
async fn test_ascii_nvt_fallback_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let host = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        // A line-mode host: ECHO and SGA only, then a login banner
        sock.write_all(&[IAC, WILL, 1, IAC, WILL, 3]).await.unwrap();
        sock.write_all(b"login: ").await.unwrap();
        // Collect whatever the client types until it hangs up
        let mut typed = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match sock.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => typed.extend_from_slice(&buf[..n]),
            }
        }
        typed
    });

    let mut config = TerminalConfig::new("127.0.0.1");
    config.trace = true;
    config.timeouts.initial_wait_ms = 200;
    let mut session = client_session(addr, config).await;

    let negotiation = session.negotiation();
    assert!(negotiation.ascii_mode);
    assert!(!negotiation.tn3270e_enabled);

    // The banner that arrived before the decision is on screen
    assert!(session.read_screen().contains("login:"));
    assert!(session.trace_events().iter().any(|e| matches!(
        e,
        SessionEvent::Decision { chosen, fallback_used: true } if chosen == "ASCII"
    )));

    // Typed input goes to the wire, not the local buffer
    session.send_text("user1").await.unwrap();
    session.key("Enter").await.unwrap();
    session.close().await;

    let typed = host.await.unwrap();
    // The client refused ECHO/SGA first; the typed line follows
    let text_start = typed.iter().position(|&b| b == b'u').unwrap();
    assert_eq!(&typed[text_start..], b"user1\r\n");
}

#[tokio::test]
async fn test_cancelled_read_leaves_session_usable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let host = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        // Silent NVT host; stay connected
        sock.write_all(&[IAC, WILL, 1]).await.unwrap();
        let mut buf = [0u8; 16];
        let _ = sock.read(&mut buf).await;
    });

    let mut config = TerminalConfig::new("127.0.0.1");
    config.timeouts.initial_wait_ms = 100;
    let mut session = client_session(addr, config).await;
    assert_eq!(session.state(), SessionState::Ready);

    // Cancel an in-flight read
    let token = session.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let err = session.pump_once(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, tn3270r::TN3270Error::Cancelled { .. }));

    // No state corruption: still READY, and a later read works (it times
    // out quietly because the host is silent, which is not a failure mode)
    assert_eq!(session.state(), SessionState::Ready);
    let err = session.pump_once(Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, tn3270r::TN3270Error::Timeout { .. }));
    assert_eq!(session.state(), SessionState::Ready);

    session.close().await;
    host.await.unwrap();
}

#[tokio::test]
async fn test_host_read_modified_is_answered() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let host = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        // Basic TN3270: BINARY + EOR only
        sock.write_all(&[IAC, DO, 0, IAC, WILL, 0, IAC, DO, 25, IAC, WILL, 25])
            .await
            .unwrap();
        // Give the client's option replies time to drain
        let mut sink = [0u8; 64];
        let _ = sock.read(&mut sink).await.unwrap();

        // Paint a field, then ask for Read Modified All
        let mut screen = vec![
            CMD_ERASE_WRITE,
            WCC_KEYBOARD_RESTORE,
            ORDER_SF, 0x40,
            0xC8, 0xC9, // host-seeded "HI"
        ];
        screen.extend_from_slice(&[IAC, EOR_MARK]);
        sock.write_all(&screen).await.unwrap();
        sock.write_all(&[CMD_READ_MODIFIED_ALL, IAC, EOR_MARK])
            .await
            .unwrap();

        let reply = read_until(&mut sock, EOR_MARK).await;
        sock.shutdown().await.unwrap();
        reply
    });

    let mut config = TerminalConfig::new("127.0.0.1");
    config.timeouts.initial_wait_ms = 300;
    let mut session = client_session(addr, config).await;
    assert!(!session.negotiation().tn3270e_enabled);
    assert!(session.negotiation().bound);

    // Pump the screen paint and the read request; the reply goes out
    // automatically
    session
        .wait_for(|screen| screen.contains("HI"), Duration::from_secs(5))
        .await
        .unwrap();
    let _ = session.pump_once(Duration::from_millis(500)).await;

    let reply = host.await.unwrap();
    // No TN3270E header in basic mode; RMA reports the unprotected field.
    // Skip any client option replies still in the stream.
    let start = reply.iter().position(|&b| b == AID_NO_AID).unwrap();
    let reply = &reply[start..];
    assert_eq!(reply[3], ORDER_SBA);
    assert_eq!(&reply[6..8], &[0xC8, 0xC9]);
    session.close().await;
}
