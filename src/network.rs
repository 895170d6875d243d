//! Async transport for TN3270 connections
//!
//! Opens the TCP (optionally TLS) connection, decodes the telnet layer into
//! typed events (commands, subnegotiations, EOR-framed records, NVT chunks)
//! and writes the inverse: IAC-escaped, EOR-terminated records with the
//! optional TN3270E header.
//!
//! The codec is a `tokio_util::codec` pair so framing logic stays
//! synchronous and testable; all awaiting happens in [`Transport`].

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::config::{TlsConfig, TlsVersion};
use crate::error::{ConnectError, TN3270Error, TN3270Result, TransportError};
use crate::telnet_base::TelnetCommand;

/// Read-side buffer bound; exceeding it without completing a record is fatal
pub const READ_BUFFER_LIMIT: usize = 64 * 1024;

/// TN3270E record header length
pub const TN3270E_HEADER_LEN: usize = 5;

/// One decoded transport event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A DO/DONT/WILL/WONT (with option) or bare command (option 0)
    TelnetCommand { command: TelnetCommand, option: u8 },
    /// A subnegotiation payload, option byte stripped, IAC unescaped
    Subnegotiation { option: u8, data: Vec<u8> },
    /// A record delimited by IAC EOR, IAC unescaped
    Record(Vec<u8>),
    /// Raw data in ASCII/NVT mode (no EOR framing active)
    AsciiChunk(Vec<u8>),
    /// Peer closed the connection
    Eof,
}

/// A frame to put on the wire
#[derive(Debug, Clone)]
pub enum OutgoingFrame {
    Telnet { command: TelnetCommand, option: u8 },
    Subnegotiation { option: u8, data: Vec<u8> },
    /// IAC-escaped, EOR-terminated; `header` is the TN3270E header if active
    Record { header: Option<[u8; TN3270E_HEADER_LEN]>, payload: Vec<u8> },
    /// IAC-escaped only (NVT mode)
    Nvt(Vec<u8>),
}

/// Telnet codec: IAC-aware decoding and escaping
#[derive(Debug)]
pub struct TelnetCodec {
    /// When true, data accumulates until IAC EOR; when false it flushes as
    /// ASCII chunks as it arrives
    record_framing: bool,
    data: BytesMut,
    pending: VecDeque<TransportEvent>,
    limit: usize,
}

impl TelnetCodec {
    pub fn new() -> Self {
        Self {
            record_framing: false,
            data: BytesMut::new(),
            pending: VecDeque::new(),
            limit: READ_BUFFER_LIMIT,
        }
    }

    pub fn set_record_framing(&mut self, on: bool) {
        self.record_framing = on;
    }

    fn flush_ascii(&mut self) {
        if !self.record_framing && !self.data.is_empty() {
            let chunk = self.data.split().to_vec();
            self.pending.push_back(TransportEvent::AsciiChunk(chunk));
        }
    }

    /// Consume as much of `src` as possible, queueing events
    fn scan(&mut self, src: &mut BytesMut) -> Result<(), TN3270Error> {
        const IAC: u8 = 0xFF;
        while !src.is_empty() {
            let byte = src[0];
            if byte != IAC {
                self.data.extend_from_slice(&[byte]);
                src.advance(1);
                continue;
            }
            if src.len() < 2 {
                // Lone IAC; wait for the rest
                break;
            }
            match src[1] {
                IAC => {
                    // Escaped data byte
                    self.data.extend_from_slice(&[IAC]);
                    src.advance(2);
                }
                0xEF => {
                    // IAC EOR terminates a record
                    src.advance(2);
                    let record = self.data.split().to_vec();
                    self.pending.push_back(TransportEvent::Record(record));
                }
                cmd @ (0xFB..=0xFE) => {
                    // WILL/WONT/DO/DONT carry an option byte
                    if src.len() < 3 {
                        break;
                    }
                    let option = src[2];
                    src.advance(3);
                    self.flush_ascii();
                    let command = match cmd {
                        0xFB => TelnetCommand::WILL,
                        0xFC => TelnetCommand::WONT,
                        0xFD => TelnetCommand::DO,
                        _ => TelnetCommand::DONT,
                    };
                    self.pending
                        .push_back(TransportEvent::TelnetCommand { command, option });
                }
                0xFA => {
                    // Subnegotiation: scan for IAC SE, unescaping IAC IAC
                    if src.len() < 3 {
                        break;
                    }
                    let option = src[2];
                    let mut body = Vec::new();
                    let mut i = 3;
                    let mut complete = false;
                    while i < src.len() {
                        if src[i] == IAC {
                            if i + 1 >= src.len() {
                                break;
                            }
                            match src[i + 1] {
                                0xF0 => {
                                    complete = true;
                                    i += 2;
                                    break;
                                }
                                IAC => {
                                    body.push(IAC);
                                    i += 2;
                                }
                                other => {
                                    // Stray command inside SB; keep the byte
                                    body.push(other);
                                    i += 2;
                                }
                            }
                        } else {
                            body.push(src[i]);
                            i += 1;
                        }
                    }
                    if !complete {
                        if src.len() > self.limit {
                            return Err(TransportError::Overflow {
                                buffered: src.len(),
                                limit: self.limit,
                            }
                            .into());
                        }
                        break;
                    }
                    src.advance(i);
                    self.flush_ascii();
                    self.pending
                        .push_back(TransportEvent::Subnegotiation { option, data: body });
                }
                other => {
                    // Bare two-byte command (NOP, GA, DM, EOR handled above...)
                    src.advance(2);
                    if let Some(command) = TelnetCommand::from_u8(other) {
                        self.flush_ascii();
                        self.pending
                            .push_back(TransportEvent::TelnetCommand { command, option: 0 });
                    } else {
                        log::debug!("discarding unknown IAC sequence 0x{other:02X}");
                    }
                }
            }
        }
        if self.data.len() > self.limit {
            return Err(TransportError::Overflow {
                buffered: self.data.len(),
                limit: self.limit,
            }
            .into());
        }
        Ok(())
    }
}

impl Default for TelnetCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TelnetCodec {
    type Item = TransportEvent;
    type Error = TN3270Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        self.scan(src)?;
        self.flush_ascii();
        Ok(self.pending.pop_front())
    }
}

impl Encoder<OutgoingFrame> for TelnetCodec {
    type Error = TN3270Error;

    fn encode(&mut self, frame: OutgoingFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        const IAC: u8 = 0xFF;
        let push_escaped = |dst: &mut BytesMut, bytes: &[u8]| {
            for &b in bytes {
                dst.extend_from_slice(&[b]);
                if b == IAC {
                    dst.extend_from_slice(&[IAC]);
                }
            }
        };
        match frame {
            OutgoingFrame::Telnet { command, option } => {
                dst.extend_from_slice(&[IAC, command as u8, option]);
            }
            OutgoingFrame::Subnegotiation { option, data } => {
                dst.extend_from_slice(&[IAC, 0xFA, option]);
                push_escaped(dst, &data);
                dst.extend_from_slice(&[IAC, 0xF0]);
            }
            OutgoingFrame::Record { header, payload } => {
                if let Some(header) = header {
                    push_escaped(dst, &header);
                }
                push_escaped(dst, &payload);
                dst.extend_from_slice(&[IAC, 0xEF]);
            }
            OutgoingFrame::Nvt(data) => {
                push_escaped(dst, &data);
            }
        }
        Ok(())
    }
}

/// A TCP stream, possibly wrapped in TLS
#[derive(Debug)]
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Certificate verifier that accepts anything; only for `verify: false`
#[derive(Debug)]
struct NoVerification(tokio_rustls::rustls::crypto::CryptoProvider);

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn build_tls_config(tls: &TlsConfig) -> TN3270Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            for cert in certs {
                let _ = roots.add(cert);
            }
        }
        Err(err) => {
            log::warn!("platform trust store unavailable ({err}); using bundled roots");
        }
    }
    if roots.is_empty() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    if let Some(bundle) = &tls.ca_bundle {
        let pem = std::fs::read(bundle).map_err(|err| ConnectError::Tls {
            message: format!("cannot read ca_bundle {}: {err}", bundle.display()),
        })?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|err| ConnectError::Tls {
                message: format!("bad certificate in ca_bundle: {err}"),
            })?;
            roots.add(cert).map_err(|err| ConnectError::Tls {
                message: format!("rejected certificate in ca_bundle: {err}"),
            })?;
        }
    }

    let provider = ring::default_provider();
    let versions: &[&tokio_rustls::rustls::SupportedProtocolVersion] = match tls.min_version {
        TlsVersion::Tls12 => &[
            &tokio_rustls::rustls::version::TLS12,
            &tokio_rustls::rustls::version::TLS13,
        ],
        TlsVersion::Tls13 => &[&tokio_rustls::rustls::version::TLS13],
    };
    let builder = ClientConfig::builder_with_provider(Arc::new(provider.clone()))
        .with_protocol_versions(versions)
        .map_err(|err| ConnectError::Tls {
            message: format!("unsupported protocol versions: {err}"),
        })?;
    let mut config = builder
        .with_root_certificates(roots)
        .with_no_client_auth();
    if !tls.verify {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerification(provider)));
    }
    Ok(config)
}

/// The connection to the host
#[derive(Debug)]
pub struct Transport {
    framed: Framed<MaybeTlsStream, TelnetCodec>,
    host: String,
    port: u16,
    tn3270e: bool,
    /// Outbound TN3270E sequence counter, one per direction
    send_seq: u16,
    closed: bool,
}

impl Transport {
    /// Resolve, connect and optionally wrap in TLS, all within `timeout`
    pub async fn connect(
        host: &str,
        port: u16,
        tls: &TlsConfig,
        timeout: Duration,
    ) -> TN3270Result<Self> {
        let connect = Self::connect_inner(host, port, tls);
        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::ConnectTimeout {
                host: host.to_string(),
                port,
                timeout_ms: timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    async fn connect_inner(host: &str, port: u16, tls: &TlsConfig) -> TN3270Result<Self> {
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| ConnectError::DnsResolution { host: host.to_string() })?;
        let addr = addrs.next().ok_or_else(|| ConnectError::DnsResolution {
            host: host.to_string(),
        })?;

        let stream = TcpStream::connect(addr).await.map_err(|err| match err.kind() {
            ErrorKind::ConnectionRefused => ConnectError::ConnectionRefused {
                host: host.to_string(),
                port,
            },
            _ => ConnectError::Io { message: err.to_string() },
        })?;
        stream
            .set_nodelay(true)
            .map_err(|err| ConnectError::Io { message: err.to_string() })?;

        let stream = if tls.enabled {
            let config = build_tls_config(tls)?;
            let connector = TlsConnector::from(Arc::new(config));
            let server_name = ServerName::try_from(host.to_string()).map_err(|_| {
                ConnectError::Tls { message: format!("invalid server name {host}") }
            })?;
            let tls_stream = connector.connect(server_name, stream).await.map_err(|err| {
                ConnectError::Tls { message: err.to_string() }
            })?;
            MaybeTlsStream::Tls(Box::new(tls_stream))
        } else {
            MaybeTlsStream::Plain(stream)
        };

        log::info!("connected to {host}:{port} (tls={})", tls.enabled);
        Ok(Self::from_stream(stream, host.to_string(), port))
    }

    /// Wrap an already-established stream (loopback tests, pre-dialed sockets)
    pub fn from_stream(stream: MaybeTlsStream, host: String, port: u16) -> Self {
        Self {
            framed: Framed::new(stream, TelnetCodec::new()),
            host,
            port,
            tn3270e: false,
            send_seq: 0,
            closed: false,
        }
    }

    pub fn peer(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// Switch data accumulation to IAC EOR record framing
    pub fn set_record_framing(&mut self, on: bool) {
        self.framed.codec_mut().set_record_framing(on);
    }

    pub fn set_tn3270e(&mut self, on: bool) {
        self.tn3270e = on;
    }

    pub fn tn3270e(&self) -> bool {
        self.tn3270e
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read the next event, waiting at most `deadline`
    pub async fn read_event(&mut self, deadline: Duration) -> TN3270Result<TransportEvent> {
        if self.closed {
            return Err(TN3270Error::SessionClosed);
        }
        match tokio::time::timeout(deadline, self.framed.next()).await {
            Err(_) => Err(TN3270Error::Timeout {
                operation: "read",
                timeout_ms: deadline.as_millis() as u64,
            }),
            Ok(None) => Ok(TransportEvent::Eof),
            Ok(Some(event)) => event,
        }
    }

    async fn send(&mut self, frame: OutgoingFrame) -> TN3270Result<()> {
        if self.closed {
            return Err(TN3270Error::SessionClosed);
        }
        self.framed.send(frame).await
    }

    pub async fn write_telnet(&mut self, command: TelnetCommand, option: u8) -> TN3270Result<()> {
        self.send(OutgoingFrame::Telnet { command, option }).await
    }

    pub async fn write_subnegotiation(&mut self, option: u8, data: &[u8]) -> TN3270Result<()> {
        self.send(OutgoingFrame::Subnegotiation { option, data: data.to_vec() })
            .await
    }

    /// Write a 3270 record; prepends the TN3270E header when active
    pub async fn write_record(&mut self, data_type: u8, payload: &[u8]) -> TN3270Result<()> {
        let header = if self.tn3270e {
            let seq = self.send_seq;
            self.send_seq = self.send_seq.wrapping_add(1);
            Some([data_type, 0, 0, (seq >> 8) as u8, (seq & 0xFF) as u8])
        } else {
            None
        };
        self.send(OutgoingFrame::Record { header, payload: payload.to_vec() })
            .await
    }

    /// Write raw NVT data (ASCII mode)
    pub async fn write_nvt(&mut self, data: &[u8]) -> TN3270Result<()> {
        self.send(OutgoingFrame::Nvt(data.to_vec())).await
    }

    /// Close the connection; safe to call more than once
    pub async fn close(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        log::info!("closing connection to {}:{} ({reason})", self.host, self.port);
        let _ = self.framed.flush().await;
        let _ = self.framed.get_mut().shutdown().await;
    }
}
