//! Session coordination
//!
//! One `TN3270Session` owns the transport, the negotiator, the data-stream
//! processor and the display buffer, and drives them from a single task.
//! All mutable state lives here; nothing is shared across sessions.
//!
//! The public operations mirror the classic scripted interface: connect,
//! key, insert_text, read_screen, wait_for, close.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ansi_processor::AnsiProcessor;
use crate::config::TerminalConfig;
use crate::ebcdic::Ebcdic;
use crate::error::{TN3270Error, TN3270Result};
use crate::keyboard::{resolve_key, CursorMotion, EditOp, KeyCommand};
use crate::lib3270::codes::*;
use crate::lib3270::display::Display3270;
use crate::lib3270::protocol::{BindImage, ProtocolProcessor3270, StreamAction};
use crate::network::{Transport, TransportEvent};
use crate::telnet_negotiation::{NegotiationSummary, NegotiatorReply, TelnetNegotiator};

/// Upper bound on retained trace events
const TRACE_EVENT_LIMIT: usize = 1024;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Negotiating,
    Ready,
    Sending,
    Closing,
    Closed,
}

/// Structured trace events, recorded when tracing is enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Outcome of negotiation
    Decision { chosen: String, fallback_used: bool },
    /// WCC sound-alarm
    Alarm,
    /// WCC keyboard-restore (or EAU)
    KeyboardUnlocked,
    /// WCC start-printer with no printer attached
    PrinterStart,
    /// WCC reset bit
    PartitionReset,
    /// Recoverable data-stream fault; the offending record was abandoned
    ParseFault { detail: String },
    UnknownStructuredField { sfid: u16 },
    /// BIND image accepted
    BindAccepted { rows: usize, cols: usize, extended_addressing: bool },
    Unbound,
    /// 3270 data arrived before BIND while BIND-IMAGE was negotiated
    DataBeforeBind,
    /// TN3270E RESPONSE record
    ResponseRecord { response_flag: u8, sequence: u16 },
    /// SCS, printer or SSCP-LU traffic we only sink
    UnsupportedDataType { data_type: u8 },
    /// SysReq pressed without the negotiated function
    SysReqUnavailable,
    /// Events discarded past the trace bound
    TraceTruncated { dropped: u64 },
}

/// A scripted 3270 session
#[derive(Debug)]
pub struct TN3270Session {
    config: TerminalConfig,
    ebcdic: Ebcdic,
    display: Display3270,
    processor: ProtocolProcessor3270,
    negotiator: TelnetNegotiator,
    ansi: AnsiProcessor,
    transport: Option<Transport>,
    state: SessionState,
    insert_mode: bool,
    /// NVT bytes seen before the mode decision landed
    early_nvt: Vec<u8>,
    events: VecDeque<SessionEvent>,
    events_dropped: u64,
    cancel: CancellationToken,
}

impl TN3270Session {
    pub fn new(config: TerminalConfig) -> TN3270Result<Self> {
        config.validate()?;
        let (default_rows, default_cols) = config.terminal_model.default_dimensions();
        let alternate = config.terminal_model.dimensions();
        let negotiator = TelnetNegotiator::new(
            config.terminal_model,
            config.lu_name.clone(),
            config.functions_policy,
            config.ascii_fallback_allowed,
        );
        Ok(Self {
            ebcdic: Ebcdic::new(config.code_page),
            display: Display3270::with_size(default_rows, default_cols),
            processor: ProtocolProcessor3270::new((default_rows, default_cols), alternate),
            negotiator,
            ansi: AnsiProcessor::new(),
            transport: None,
            state: SessionState::Disconnected,
            insert_mode: false,
            early_nvt: Vec::new(),
            events: VecDeque::new(),
            events_dropped: 0,
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn display(&self) -> &Display3270 {
        &self.display
    }

    pub fn negotiation(&self) -> NegotiationSummary {
        self.negotiator.summary()
    }

    /// Token for cancelling in-flight suspending operations
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn record_event(&mut self, event: SessionEvent) {
        if !self.config.trace {
            return;
        }
        if self.events.len() >= TRACE_EVENT_LIMIT {
            self.events.pop_front();
            self.events_dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Structured negotiation and parse events (tracing must be enabled)
    pub fn trace_events(&self) -> Vec<SessionEvent> {
        let mut out: Vec<SessionEvent> = self.events.iter().cloned().collect();
        if self.events_dropped > 0 {
            out.push(SessionEvent::TraceTruncated { dropped: self.events_dropped });
        }
        out
    }

    /// The trace as JSON, for embedders that persist it
    pub fn trace_json(&self) -> String {
        serde_json::to_string(&self.trace_events()).unwrap_or_else(|_| "[]".to_string())
    }

    /// Render the current screen as text
    pub fn read_screen(&self) -> String {
        self.display.to_text(&self.ebcdic)
    }

    fn transport_mut(&mut self) -> TN3270Result<&mut Transport> {
        self.transport.as_mut().ok_or(TN3270Error::SessionClosed)
    }

    fn ensure_open(&self) -> TN3270Result<()> {
        match self.state {
            SessionState::Closed | SessionState::Closing => Err(TN3270Error::SessionClosed),
            _ => Ok(()),
        }
    }

    /// Connect and negotiate to an operational mode
    pub async fn connect(&mut self) -> TN3270Result<()> {
        self.ensure_open()?;
        if self.transport.is_some() {
            return Ok(());
        }
        let timeout = Duration::from_millis(self.config.timeouts.connect_ms);
        let cancel = self.cancel.clone();
        let transport = tokio::select! {
            _ = cancel.cancelled() => {
                self.state = SessionState::Closed;
                return Err(TN3270Error::Cancelled { operation: "connect" });
            }
            result = Transport::connect(
                &self.config.host,
                self.config.port,
                &self.config.tls,
                timeout,
            ) => result?,
        };
        self.connect_with_transport(transport).await
    }

    /// Drive negotiation over an already-established transport
    ///
    /// Exposed for embedders that dial their own sockets (and for loopback
    /// tests).
    pub async fn connect_with_transport(&mut self, transport: Transport) -> TN3270Result<()> {
        self.ensure_open()?;
        self.transport = Some(transport);
        self.state = SessionState::Negotiating;

        let negotiate_deadline =
            Instant::now() + Duration::from_millis(self.config.timeouts.negotiate_ms);
        let initial_deadline =
            Instant::now() + Duration::from_millis(self.config.timeouts.initial_wait_ms);
        let mut initial_window_open = true;

        let result = loop {
            if self.negotiator.is_failed() {
                break Err(crate::error::NegotiationError::NoUsableMode.into());
            }
            if self.negotiator.is_operational() {
                break Ok(());
            }
            let now = Instant::now();
            if now >= negotiate_deadline {
                self.negotiator.fail();
                break Err(TN3270Error::NegotiationTimeout {
                    timeout_ms: self.config.timeouts.negotiate_ms,
                });
            }
            let wait_until = if initial_window_open && initial_deadline < negotiate_deadline {
                initial_deadline
            } else {
                negotiate_deadline
            };
            let read_timeout = wait_until.saturating_duration_since(now).max(Duration::from_millis(10));

            let cancel = self.cancel.clone();
            let event = {
                let transport = self.transport.as_mut().ok_or(TN3270Error::SessionClosed)?;
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break Err(TN3270Error::Cancelled { operation: "connect" });
                    }
                    event = transport.read_event(read_timeout) => event,
                }
            };

            match event {
                Ok(TransportEvent::Eof) => {
                    break Err(crate::error::TransportError::UnexpectedEof.into());
                }
                Ok(event) => {
                    if let Err(err) = self.dispatch_event(event).await {
                        break Err(err);
                    }
                    if let Err(err) = self.flush_negotiator().await {
                        break Err(err);
                    }
                    // EOR framing starts the moment both options are agreed;
                    // hosts paint screens before the mode decision lands.
                    if self.negotiator.record_framing_agreed() {
                        if let Some(transport) = self.transport.as_mut() {
                            transport.set_record_framing(true);
                        }
                    }
                    if initial_window_open && Instant::now() >= initial_deadline {
                        initial_window_open = false;
                        if self.negotiator.decide_fallback() {
                            log::info!("no 3270 negotiation from host; entering ASCII/NVT mode");
                        }
                    }
                }
                Err(TN3270Error::Timeout { .. }) => {
                    if initial_window_open && Instant::now() >= initial_deadline {
                        initial_window_open = false;
                        if self.negotiator.decide_fallback() {
                            log::info!("no 3270 negotiation from host; entering ASCII/NVT mode");
                        }
                    }
                }
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(()) => {
                self.finish_negotiation().await?;
                Ok(())
            }
            Err(err) => {
                if let Some(transport) = self.transport.as_mut() {
                    transport.close("negotiation failed").await;
                }
                self.transport = None;
                self.state = SessionState::Closed;
                Err(err)
            }
        }
    }

    async fn finish_negotiation(&mut self) -> TN3270Result<()> {
        let summary = self.negotiator.summary();
        let framing = self.negotiator.record_framing_agreed() && !summary.ascii_mode;
        let tn3270e = summary.tn3270e_enabled;
        {
            let transport = self.transport_mut()?;
            transport.set_record_framing(framing);
            transport.set_tn3270e(tn3270e);
        }
        let chosen = if summary.ascii_mode {
            "ASCII"
        } else if tn3270e {
            "TN3270E"
        } else {
            "TN3270"
        };
        let fallback_used = summary.ascii_mode;
        self.record_event(SessionEvent::Decision {
            chosen: chosen.to_string(),
            fallback_used,
        });
        // NVT bytes that arrived while the decision was pending
        if summary.ascii_mode && !self.early_nvt.is_empty() {
            let data = std::mem::take(&mut self.early_nvt);
            self.ansi.process_data(&data, &mut self.display, &self.ebcdic);
        }
        self.early_nvt.clear();
        self.state = SessionState::Ready;
        log::info!(
            "session ready: mode={chosen}, device={:?}, functions=0x{:02X}",
            summary.device_type,
            summary.functions
        );
        Ok(())
    }

    /// Send pending replies the negotiator owes the host
    async fn flush_negotiator(&mut self) -> TN3270Result<()> {
        let replies = self.negotiator.take_replies();
        if replies.is_empty() {
            return Ok(());
        }
        let transport = self.transport_mut()?;
        for reply in replies {
            match reply {
                NegotiatorReply::Telnet { command, option } => {
                    transport.write_telnet(command, option).await?;
                }
                NegotiatorReply::Subnegotiation { option, data } => {
                    transport.write_subnegotiation(option, &data).await?;
                }
            }
        }
        Ok(())
    }

    /// Apply one transport event to the session
    async fn dispatch_event(&mut self, event: TransportEvent) -> TN3270Result<()> {
        match event {
            TransportEvent::TelnetCommand { command, option } => {
                self.negotiator.handle_command(command, option);
                self.flush_negotiator().await?;
            }
            TransportEvent::Subnegotiation { option, data } => {
                self.negotiator.handle_subnegotiation(option, &data);
                self.flush_negotiator().await?;
            }
            TransportEvent::Record(record) => {
                self.handle_record(&record).await?;
            }
            TransportEvent::AsciiChunk(data) => {
                if self.negotiator.ascii_mode() {
                    self.ansi.process_data(&data, &mut self.display, &self.ebcdic);
                } else {
                    // Mode not decided yet; keep for the fallback
                    self.early_nvt.extend_from_slice(&data);
                }
            }
            TransportEvent::Eof => {
                self.close_internal("peer closed the connection").await;
                return Err(crate::error::TransportError::UnexpectedEof.into());
            }
        }
        Ok(())
    }

    /// Route one EOR-delimited record
    async fn handle_record(&mut self, record: &[u8]) -> TN3270Result<()> {
        if !self.negotiator.tn3270e_active() {
            return self.process_3270_data(record).await;
        }
        if record.len() < crate::network::TN3270E_HEADER_LEN {
            self.record_event(SessionEvent::ParseFault {
                detail: format!("short TN3270E record of {} bytes", record.len()),
            });
            return Ok(());
        }
        let data_type = record[0];
        let response_flag = record[2];
        let sequence = u16::from_be_bytes([record[3], record[4]]);
        let payload = &record[crate::network::TN3270E_HEADER_LEN..];

        match data_type {
            DT_3270_DATA => {
                if !self.negotiator.bound() {
                    log::warn!("dropping 3270 data before BIND");
                    self.record_event(SessionEvent::DataBeforeBind);
                    return Ok(());
                }
                self.process_3270_data(payload).await?;
            }
            DT_BIND_IMAGE => {
                let bind = BindImage::parse(payload);
                self.apply_bind(bind);
            }
            DT_UNBIND => {
                self.negotiator.set_bound(false);
                self.record_event(SessionEvent::Unbound);
            }
            DT_NVT_DATA => {
                let data = payload.to_vec();
                self.ansi.process_data(&data, &mut self.display, &self.ebcdic);
            }
            DT_RESPONSE => {
                self.record_event(SessionEvent::ResponseRecord { response_flag, sequence });
            }
            DT_SCS_DATA | DT_PRINT_EOJ | DT_SSCP_LU_DATA | DT_REQUEST => {
                self.record_event(SessionEvent::UnsupportedDataType { data_type });
            }
            other => {
                self.record_event(SessionEvent::UnsupportedDataType { data_type: other });
            }
        }
        Ok(())
    }

    fn apply_bind(&mut self, bind: BindImage) {
        self.processor.apply_bind(&bind, &mut self.display);
        self.negotiator.set_bound(true);
        self.record_event(SessionEvent::BindAccepted {
            rows: self.display.rows(),
            cols: self.display.cols(),
            extended_addressing: self.processor.extended_addressing(),
        });
    }

    /// Run a 3270 payload through the parser and perform its actions
    async fn process_3270_data(&mut self, payload: &[u8]) -> TN3270Result<()> {
        let actions = self.processor.process_record(payload, &mut self.display);
        for action in actions {
            match action {
                StreamAction::Alarm => self.record_event(SessionEvent::Alarm),
                StreamAction::KeyboardRestore => {
                    self.record_event(SessionEvent::KeyboardUnlocked)
                }
                StreamAction::StartPrinter => self.record_event(SessionEvent::PrinterStart),
                StreamAction::ResetPartition => self.record_event(SessionEvent::PartitionReset),
                StreamAction::ParseFault(err) => {
                    self.record_event(SessionEvent::ParseFault { detail: err.to_string() })
                }
                StreamAction::UnknownStructuredField { sfid } => {
                    self.record_event(SessionEvent::UnknownStructuredField { sfid })
                }
                StreamAction::Bind(bind) => self.apply_bind(bind),
                StreamAction::NvtPassthrough(data) => {
                    self.ansi.process_data(&data, &mut self.display, &self.ebcdic);
                }
                StreamAction::ReplyReadBuffer => {
                    let aid = AidKey::from_u8(self.display.pending_aid()).unwrap_or(AidKey::NoAid);
                    let reply = self.processor.build_read_buffer(aid, &self.display);
                    self.write_data_record(&reply).await?;
                }
                StreamAction::ReplyReadModified { all } => {
                    let aid = AidKey::from_u8(self.display.pending_aid()).unwrap_or(AidKey::NoAid);
                    let reply = self.processor.build_read_modified(aid, &self.display, all);
                    self.write_data_record(&reply).await?;
                }
                StreamAction::ReplyQuery => {
                    let reply = self.processor.build_query_reply(&self.display);
                    self.write_data_record(&reply).await?;
                }
            }
        }
        Ok(())
    }

    async fn write_data_record(&mut self, payload: &[u8]) -> TN3270Result<()> {
        let cancel = self.cancel.clone();
        let result = {
            let transport = self.transport.as_mut().ok_or(TN3270Error::SessionClosed)?;
            tokio::select! {
                _ = cancel.cancelled() => Err(TN3270Error::Cancelled { operation: "send" }),
                result = transport.write_record(DT_3270_DATA, payload) => result,
            }
        };
        if matches!(result, Err(TN3270Error::Cancelled { .. })) {
            // No partial write reached the wire; the frame is atomic.
            self.close_internal("cancelled mid-send").await;
        }
        result
    }

    /// Wait for host data and apply it; one event per call
    ///
    /// A timeout is not fatal unless `fatal_timeouts` is configured.
    pub async fn pump_once(&mut self, timeout: Duration) -> TN3270Result<()> {
        self.ensure_open()?;
        let cancel = self.cancel.clone();
        let event = {
            let transport = self.transport.as_mut().ok_or(TN3270Error::SessionClosed)?;
            tokio::select! {
                _ = cancel.cancelled() => Err(TN3270Error::Cancelled { operation: "read" }),
                event = transport.read_event(timeout) => event,
            }
        };
        match event {
            Ok(event) => self.dispatch_event(event).await,
            Err(err @ TN3270Error::Timeout { .. }) => {
                if self.config.fatal_timeouts {
                    self.close_internal("read timeout").await;
                }
                Err(err)
            }
            Err(TN3270Error::Cancelled { operation }) => {
                // A cancelled read drops the in-flight read only; the
                // session stays READY and later reads must succeed.
                self.cancel = CancellationToken::new();
                Err(TN3270Error::Cancelled { operation })
            }
            Err(err) => {
                self.close_internal("transport error").await;
                Err(err)
            }
        }
    }

    /// Send text to the host
    ///
    /// In the 3270 modes this is a local screen-buffer edit at the cursor;
    /// in ASCII/NVT mode the bytes go straight to the wire.
    pub async fn send_text(&mut self, text: &str) -> TN3270Result<()> {
        self.ensure_open()?;
        if !self.negotiator.ascii_mode() {
            return self.insert_text(text);
        }
        let bytes: Vec<u8> = text.bytes().collect();
        self.write_nvt_bytes(&bytes).await
    }

    async fn write_nvt_bytes(&mut self, bytes: &[u8]) -> TN3270Result<()> {
        let cancel = self.cancel.clone();
        let result = {
            let transport = self.transport.as_mut().ok_or(TN3270Error::SessionClosed)?;
            tokio::select! {
                _ = cancel.cancelled() => Err(TN3270Error::Cancelled { operation: "send" }),
                result = transport.write_nvt(bytes) => result,
            }
        };
        if matches!(result, Err(TN3270Error::Cancelled { .. })) {
            self.close_internal("cancelled mid-send").await;
        }
        result
    }

    /// Send an AID with the matching Read Modified reply
    ///
    /// In ASCII/NVT mode only Enter has a wire meaning (CR LF); other AIDs
    /// are ignored there.
    pub async fn send_aid(&mut self, aid_byte: u8) -> TN3270Result<()> {
        self.ensure_open()?;
        let aid = AidKey::from_u8(aid_byte).ok_or_else(|| TN3270Error::UnknownKey {
            name: format!("AID 0x{aid_byte:02X}"),
        })?;
        if self.negotiator.ascii_mode() {
            if aid == AidKey::Enter {
                return self.write_nvt_bytes(b"\r\n").await;
            }
            log::debug!("AID 0x{aid_byte:02X} has no NVT equivalent; ignored");
            return Ok(());
        }
        self.state = SessionState::Sending;
        self.display.set_pending_aid(aid_byte);
        let reply = self.processor.build_read_modified(aid, &self.display, false);
        let result = self.write_data_record(&reply).await;
        match &result {
            Ok(()) => {
                self.display.set_pending_aid(AID_NO_AID);
                self.display.lock_keyboard();
                self.state = SessionState::Ready;
            }
            Err(_) if self.state == SessionState::Sending => {
                self.state = if self.transport.is_some() {
                    SessionState::Ready
                } else {
                    SessionState::Closed
                };
            }
            Err(_) => {}
        }
        result
    }

    /// Press a symbolic key
    pub async fn key(&mut self, name: &str) -> TN3270Result<()> {
        self.ensure_open()?;
        match resolve_key(name)? {
            KeyCommand::Aid(aid) => self.send_aid(aid.to_u8()).await,
            KeyCommand::Move(motion) => {
                self.move_cursor(motion);
                Ok(())
            }
            KeyCommand::Edit(op) => self.edit(op),
            KeyCommand::ToggleInsert => {
                self.insert_mode = !self.insert_mode;
                Ok(())
            }
            KeyCommand::SysReq => self.send_sysreq().await,
        }
    }

    async fn send_sysreq(&mut self) -> TN3270Result<()> {
        let summary = self.negotiator.summary();
        if !summary.tn3270e_enabled || summary.functions & FUNC_SYSREQ == 0 {
            self.record_event(SessionEvent::SysReqUnavailable);
            return Ok(());
        }
        let cancel = self.cancel.clone();
        let result = {
            let transport = self.transport.as_mut().ok_or(TN3270Error::SessionClosed)?;
            tokio::select! {
                _ = cancel.cancelled() => Err(TN3270Error::Cancelled { operation: "sysreq" }),
                result = transport.write_record(DT_REQUEST, &[]) => result,
            }
        };
        if matches!(result, Err(TN3270Error::Cancelled { .. })) {
            self.close_internal("cancelled mid-send").await;
        }
        result
    }

    fn move_cursor(&mut self, motion: CursorMotion) {
        let size = self.display.buffer_size() as u32;
        let cols = self.display.cols() as u32;
        let cursor = u32::from(self.display.cursor_address());
        let target = match motion {
            CursorMotion::Right => (cursor + 1) % size,
            CursorMotion::Left => (cursor + size - 1) % size,
            CursorMotion::Down => (cursor + cols) % size,
            CursorMotion::Up => (cursor + size - cols) % size,
            CursorMotion::Tab => u32::from(
                self.display
                    .next_unprotected(self.display.cursor_address())
                    .unwrap_or(0),
            ),
            CursorMotion::BackTab => u32::from(self.back_tab_target()),
            CursorMotion::Home => u32::from(self.display.first_unprotected().unwrap_or(0)),
            CursorMotion::Newline => {
                let next_row_start = ((cursor / cols + 1) % (size / cols)) * cols;
                let addr = next_row_start as u16;
                if self.display.is_unformatted() {
                    next_row_start
                } else {
                    match self.display.field_at(addr) {
                        Some(field)
                            if !field.is_protected()
                                && !self.display.cell(addr).map(|c| c.is_field_attr()).unwrap_or(false) =>
                        {
                            next_row_start
                        }
                        _ => u32::from(self.display.next_unprotected(addr).unwrap_or(addr)),
                    }
                }
            }
        };
        let _ = self.display.set_cursor(target as u16);
    }

    /// The unprotected field start preceding the cursor, wrapping backwards
    fn back_tab_target(&self) -> u16 {
        let size = self.display.buffer_size() as u32;
        let cursor = u32::from(self.display.cursor_address());
        self.display
            .fields()
            .iter()
            .filter(|f| !f.is_protected())
            .min_by_key(|f| (cursor + size - u32::from(f.content_start) - 1) % size)
            .map(|f| f.content_start)
            .unwrap_or(0)
    }

    fn edit(&mut self, op: EditOp) -> TN3270Result<()> {
        let circumvent = self.config.insert_circumvent_protected;
        match op {
            EditOp::Backspace => {
                let size = self.display.buffer_size() as u32;
                let cursor = u32::from(self.display.cursor_address());
                let target = ((cursor + size - 1) % size) as u16;
                self.display.user_erase(target, circumvent)?;
                self.display.set_cursor(target)?;
                Ok(())
            }
            EditOp::Delete => {
                self.display.user_erase(self.display.cursor_address(), circumvent)
            }
            EditOp::EraseEof => {
                let cursor = self.display.cursor_address();
                if self.display.is_unformatted() {
                    for addr in cursor..self.display.buffer_size() as u16 {
                        self.display.user_erase(addr, circumvent)?;
                    }
                    return Ok(());
                }
                let field = self
                    .display
                    .field_at(cursor)
                    .copied()
                    .ok_or(TN3270Error::ProtectedField { address: cursor })?;
                if field.is_protected() && !circumvent {
                    return Err(TN3270Error::ProtectedField { address: cursor });
                }
                let size = self.display.buffer_size();
                let addrs: Vec<u16> = field
                    .content_addresses(size)
                    .skip_while(|&a| a != cursor)
                    .collect();
                for addr in addrs {
                    self.display.user_erase(addr, circumvent)?;
                }
                Ok(())
            }
            EditOp::EraseInput | EditOp::EraseAllUnprotected => {
                self.display.erase_all_unprotected();
                Ok(())
            }
        }
    }

    /// Type text at the cursor, honoring field protection
    ///
    /// Raises `ProtectedFieldError` unless `insert_circumvent_protected` is
    /// set. In insert mode the field tail shifts right.
    pub fn insert_text(&mut self, text: &str) -> TN3270Result<()> {
        self.ensure_open()?;
        let circumvent = self.config.insert_circumvent_protected;
        for ch in text.chars() {
            let cursor = self.display.cursor_address();
            let byte = self.ebcdic.reverse(ch);
            if self.insert_mode {
                self.shift_right_from(cursor, circumvent)?;
            }
            self.display.user_write(cursor, byte, circumvent)?;
            self.advance_cursor();
        }
        Ok(())
    }

    /// Shift the remainder of the field one cell right, dropping overflow
    fn shift_right_from(&mut self, cursor: u16, circumvent: bool) -> TN3270Result<()> {
        let size = self.display.buffer_size();
        let addrs: Vec<u16> = match self.display.field_at(cursor).copied() {
            Some(field) => field
                .content_addresses(size)
                .skip_while(|&a| a != cursor)
                .collect(),
            None => (cursor..size as u16).collect(),
        };
        for pair in addrs.windows(2).rev() {
            let byte = self
                .display
                .cell(pair[0])
                .map(|c| c.char_byte)
                .unwrap_or(0);
            self.display.user_write(pair[1], byte, circumvent)?;
        }
        Ok(())
    }

    /// Advance past the cell just written, skipping field attributes
    fn advance_cursor(&mut self) {
        let cursor = self.display.cursor_address();
        let size = self.display.buffer_size() as u32;
        let next = ((u32::from(cursor) + 1) % size) as u16;
        let lands_on_attr = self
            .display
            .cell(next)
            .map(|c| c.is_field_attr())
            .unwrap_or(false);
        let target = if lands_on_attr {
            // Flow into the next unprotected field past the attribute
            self.display.next_unprotected(cursor).unwrap_or(next)
        } else {
            next
        };
        let _ = self.display.set_cursor(target);
    }

    /// Wait until `predicate` holds over the rendered screen
    pub async fn wait_for<F>(&mut self, predicate: F, timeout: Duration) -> TN3270Result<()>
    where
        F: Fn(&str) -> bool,
    {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.read_screen()) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TN3270Error::Timeout {
                    operation: "wait_for",
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            let read_timeout = deadline
                .saturating_duration_since(now)
                .min(Duration::from_millis(self.config.timeouts.read_ms));
            match self.pump_once(read_timeout).await {
                Ok(()) => {}
                Err(TN3270Error::Timeout { .. }) => {}
                Err(err) => return Err(err),
            }
        }
    }

    async fn close_internal(&mut self, reason: &str) {
        self.state = SessionState::Closing;
        if let Some(transport) = self.transport.as_mut() {
            transport.close(reason).await;
        }
        self.transport = None;
        self.state = SessionState::Closed;
    }

    /// Quiesce and close; idempotent
    pub async fn close(&mut self) {
        self.close_internal("closed by caller").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerminalModel;

    fn session() -> TN3270Session {
        let mut config = TerminalConfig::new("test.host");
        config.trace = true;
        TN3270Session::new(config).unwrap()
    }

    /// Paint a formatted test screen directly through the processor
    fn paint(session: &mut TN3270Session, stream: &[u8]) {
        let actions = session
            .processor
            .process_record(stream, &mut session.display);
        assert!(actions.iter().all(|a| !matches!(a, StreamAction::ParseFault(_))));
    }

    #[test]
    fn test_new_session_state() {
        let s = session();
        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(s.display().rows(), 24);
        assert_eq!(s.display().cols(), 80);
    }

    #[test]
    fn test_insert_text_unformatted() {
        let mut s = session();
        s.insert_text("HELLO").unwrap();
        assert!(s.read_screen().lines().next().unwrap().starts_with("HELLO"));
        assert_eq!(s.display().cursor_address(), 5);
        assert!(s.display().unformatted_modified());
    }

    #[test]
    fn test_insert_text_protected_field_rejected() {
        let mut s = session();
        paint(&mut s, &[CMD_ERASE_WRITE, 0x00, ORDER_SF, 0xE0, 0xC1, 0xC2]);
        s.display.set_cursor(1).unwrap();
        let err = s.insert_text("X").unwrap_err();
        assert!(matches!(err, TN3270Error::ProtectedField { .. }));
    }

    #[test]
    fn test_insert_circumvent_flag() {
        let mut config = TerminalConfig::new("test.host");
        config.insert_circumvent_protected = true;
        let mut s = TN3270Session::new(config).unwrap();
        paint(&mut s, &[CMD_ERASE_WRITE, 0x00, ORDER_SF, 0xE0, 0xC1]);
        s.display.set_cursor(1).unwrap();
        s.insert_text("X").unwrap();
        assert_eq!(s.display().cell(1).unwrap().char_byte, 0xE7);
    }

    #[test]
    fn test_insert_mode_shifts_field_tail() {
        let mut s = session();
        // Unprotected field at 0 with "AB" then free space
        paint(&mut s, &[CMD_ERASE_WRITE, 0x00, ORDER_SF, 0x40, 0xC1, 0xC2]);
        s.display.set_cursor(1).unwrap();
        s.insert_mode = true;
        s.insert_text("X").unwrap();
        assert_eq!(s.display().cell(1).unwrap().char_byte, 0xE7); // X
        assert_eq!(s.display().cell(2).unwrap().char_byte, 0xC1); // A shifted
        assert_eq!(s.display().cell(3).unwrap().char_byte, 0xC2); // B shifted
    }

    #[test]
    fn test_cursor_advances_past_attribute_cells() {
        let mut s = session();
        // Unprotected field 1..4, then another unprotected at 4
        paint(
            &mut s,
            &[
                CMD_ERASE_WRITE, 0x00,
                ORDER_SF, 0x40,
                0x00, 0x00, 0x00,
                ORDER_SF, 0x40,
            ],
        );
        s.display.set_cursor(3).unwrap();
        s.insert_text("A").unwrap();
        // Cursor skipped the attribute at 4 into the next field
        assert_eq!(s.display().cursor_address(), 5);
    }

    #[tokio::test]
    async fn test_key_local_motions() {
        let mut s = session();
        s.display.set_cursor(0).unwrap();
        s.key("Right").await.unwrap();
        assert_eq!(s.display().cursor_address(), 1);
        s.key("Down").await.unwrap();
        assert_eq!(s.display().cursor_address(), 81);
        s.key("Left").await.unwrap();
        assert_eq!(s.display().cursor_address(), 80);
        s.key("Up").await.unwrap();
        assert_eq!(s.display().cursor_address(), 0);
        // Wrap backwards off the origin
        s.key("Left").await.unwrap();
        assert_eq!(s.display().cursor_address(), 1919);
    }

    #[tokio::test]
    async fn test_key_tab_and_home() {
        let mut s = session();
        paint(
            &mut s,
            &[
                CMD_ERASE_WRITE, 0x00,
                ORDER_SF, 0xE0,
                0x00, 0x00,
                ORDER_SF, 0x40,
            ],
        );
        s.display.set_cursor(0).unwrap();
        s.key("Tab").await.unwrap();
        assert_eq!(s.display().cursor_address(), 4);
        s.key("Home").await.unwrap();
        assert_eq!(s.display().cursor_address(), 4);
    }

    #[tokio::test]
    async fn test_key_erase_eof() {
        let mut s = session();
        paint(&mut s, &[CMD_ERASE_WRITE, 0x00, ORDER_SF, 0x40]);
        s.display.set_cursor(1).unwrap();
        s.insert_text("ABCDEF").unwrap();
        s.display.set_cursor(3).unwrap();
        s.key("EraseEOF").await.unwrap();
        assert_eq!(s.display().cell(1).unwrap().char_byte, 0xC1);
        assert_eq!(s.display().cell(2).unwrap().char_byte, 0xC2);
        assert_eq!(s.display().cell(3).unwrap().char_byte, 0);
        assert_eq!(s.display().cell(6).unwrap().char_byte, 0);
    }

    #[tokio::test]
    async fn test_key_backspace() {
        let mut s = session();
        s.insert_text("AB").unwrap();
        s.key("Backspace").await.unwrap();
        assert_eq!(s.display().cursor_address(), 1);
        assert_eq!(s.display().cell(1).unwrap().char_byte, 0);
        assert_eq!(s.display().cell(0).unwrap().char_byte, 0xC1);
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let mut s = session();
        let err = s.key("NoSuchKey").await.unwrap_err();
        assert!(matches!(err, TN3270Error::UnknownKey { .. }));
        // The session stays usable
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_aid_without_transport_fails() {
        let mut s = session();
        let err = s.send_aid(AID_ENTER).await.unwrap_err();
        assert!(matches!(err, TN3270Error::SessionClosed));
    }

    #[test]
    fn test_alarm_wcc_produces_action() {
        let mut s = session();
        let actions = s
            .processor
            .process_record(&[CMD_ERASE_WRITE, WCC_SOUND_ALARM, 0xC1], &mut s.display);
        assert!(actions.contains(&StreamAction::Alarm));
    }

    #[test]
    fn test_trace_json_serializes() {
        let mut s = session();
        s.record_event(SessionEvent::Alarm);
        s.record_event(SessionEvent::Decision {
            chosen: "TN3270E".to_string(),
            fallback_used: false,
        });
        let json = s.trace_json();
        assert!(json.contains("\"alarm\""));
        assert!(json.contains("\"TN3270E\""));
    }

    #[test]
    fn test_trace_bound_truncates() {
        let mut s = session();
        for _ in 0..(TRACE_EVENT_LIMIT + 10) {
            s.record_event(SessionEvent::Alarm);
        }
        let events = s.trace_events();
        assert_eq!(events.len(), TRACE_EVENT_LIMIT + 1);
        assert!(matches!(
            events.last().unwrap(),
            SessionEvent::TraceTruncated { dropped: 10 }
        ));
    }

    #[test]
    fn test_model_sizes_flow_into_processor() {
        let mut config = TerminalConfig::new("h");
        config.terminal_model = TerminalModel::Model4;
        let mut s = TN3270Session::new(config).unwrap();
        // Display starts at the 24x80 default; EWA switches to the model size
        assert_eq!(s.display().rows(), 24);
        paint(&mut s, &[CMD_ERASE_WRITE_ALTERNATE, 0x00]);
        assert_eq!((s.display().rows(), s.display().cols()), (43, 80));
    }
}
