//! Telnet and TN3270E negotiation
//!
//! A deterministic state machine covering RFC 855 option negotiation and the
//! RFC 2355 DEVICE-TYPE/FUNCTIONS subnegotiation, with the ASCII/NVT
//! fallback decision. The negotiator is pure: the session feeds it decoded
//! transport events and drains typed replies, so every path is testable
//! without sockets.
//!
//! Phases:
//!
//! ```text
//! Init ──(host options)──► TelnetOpts
//! TelnetOpts ──(TN3270E agreed)──► Tn3270eDevice
//! TelnetOpts ──(BINARY+EOR, initial window over)──► BasicTn3270
//! TelnetOpts ──(initial window over, fallback allowed)──► AsciiNvt
//! Tn3270eDevice ──(DEVICE-TYPE IS)──► Tn3270eFunctions
//! Tn3270eFunctions ──(FUNCTIONS IS subset)──► Tn3270eReady ──(BIND)──► Bound
//! Tn3270eDevice/Functions ──(REJECT)──► BasicTn3270 or AsciiNvt or Failed
//! ```

use std::collections::HashMap;

use crate::config::TerminalModel;
use crate::lib3270::codes::*;
use crate::telnet_base::{OptionFlag, OptionState, TelnetCommand, TelnetOption};

/// Negotiation phase; `Bound`, `BasicTn3270`, `AsciiNvt` and `Failed` are
/// terminal, `Tn3270eReady` is operational and waiting for a BIND
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Init,
    TelnetOpts,
    Tn3270eDevice,
    Tn3270eFunctions,
    Tn3270eReady,
    Bound,
    BasicTn3270,
    AsciiNvt,
    Failed,
}

/// A reply owed to the host, drained by the session after every event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiatorReply {
    Telnet { command: TelnetCommand, option: u8 },
    Subnegotiation { option: u8, data: Vec<u8> },
}

/// Read-only snapshot of the negotiation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationSummary {
    pub tn3270e_enabled: bool,
    pub ascii_mode: bool,
    pub device_type: Option<String>,
    pub lu_name: Option<String>,
    pub functions: u8,
    pub bound: bool,
}

#[derive(Debug)]
pub struct TelnetNegotiator {
    options: HashMap<u8, OptionState>,
    phase: NegotiationPhase,
    model: TerminalModel,
    requested_lu: Option<String>,
    functions_policy: u8,
    ascii_fallback_allowed: bool,
    /// Device name the host assigned in DEVICE-TYPE IS
    assigned_device: Option<String>,
    /// LU the host bound us to (CONNECT)
    assigned_lu: Option<String>,
    functions: u8,
    bound: bool,
    /// Host refused or rejected TN3270E outright
    tn3270e_refused: bool,
    device_request_sent: bool,
    replies: Vec<NegotiatorReply>,
}

impl TelnetNegotiator {
    pub fn new(
        model: TerminalModel,
        requested_lu: Option<String>,
        functions_policy: u8,
        ascii_fallback_allowed: bool,
    ) -> Self {
        Self {
            options: HashMap::new(),
            phase: NegotiationPhase::Init,
            model,
            requested_lu,
            functions_policy,
            ascii_fallback_allowed,
            assigned_device: None,
            assigned_lu: None,
            functions: 0,
            bound: false,
            tn3270e_refused: false,
            device_request_sent: false,
            replies: Vec::new(),
        }
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    /// Operational means application data may flow
    pub fn is_operational(&self) -> bool {
        matches!(
            self.phase,
            NegotiationPhase::Tn3270eReady
                | NegotiationPhase::Bound
                | NegotiationPhase::BasicTn3270
                | NegotiationPhase::AsciiNvt
        )
    }

    pub fn is_failed(&self) -> bool {
        self.phase == NegotiationPhase::Failed
    }

    pub fn tn3270e_active(&self) -> bool {
        matches!(
            self.phase,
            NegotiationPhase::Tn3270eDevice
                | NegotiationPhase::Tn3270eFunctions
                | NegotiationPhase::Tn3270eReady
                | NegotiationPhase::Bound
        )
    }

    pub fn ascii_mode(&self) -> bool {
        self.phase == NegotiationPhase::AsciiNvt
    }

    pub fn functions(&self) -> u8 {
        self.functions
    }

    pub fn bound(&self) -> bool {
        self.bound
    }

    /// Session marks the BIND / UNBIND transitions from TN3270E records
    pub fn set_bound(&mut self, bound: bool) {
        self.bound = bound;
        if bound && self.phase == NegotiationPhase::Tn3270eReady {
            self.phase = NegotiationPhase::Bound;
        } else if !bound && self.phase == NegotiationPhase::Bound {
            self.phase = NegotiationPhase::Tn3270eReady;
        }
    }

    pub fn assigned_device(&self) -> Option<&str> {
        self.assigned_device.as_deref()
    }

    pub fn assigned_lu(&self) -> Option<&str> {
        self.assigned_lu.as_deref()
    }

    /// Both BINARY and EOR agreed in both directions
    pub fn record_framing_agreed(&self) -> bool {
        self.option(TelnetOption::Binary as u8).is_enabled()
            && self.option(TelnetOption::EndOfRecord as u8).is_enabled()
    }

    pub fn summary(&self) -> NegotiationSummary {
        NegotiationSummary {
            tn3270e_enabled: self.tn3270e_active(),
            ascii_mode: self.ascii_mode(),
            device_type: self.assigned_device.clone(),
            lu_name: self.assigned_lu.clone(),
            functions: self.functions,
            bound: self.bound,
        }
    }

    /// Take the replies owed to the host
    pub fn take_replies(&mut self) -> Vec<NegotiatorReply> {
        std::mem::take(&mut self.replies)
    }

    fn option(&self, opt: u8) -> OptionState {
        self.options.get(&opt).copied().unwrap_or_default()
    }

    fn option_mut(&mut self, opt: u8) -> &mut OptionState {
        self.options.entry(opt).or_default()
    }

    fn send_telnet(&mut self, command: TelnetCommand, option: u8) {
        self.replies.push(NegotiatorReply::Telnet { command, option });
    }

    fn send_subnegotiation(&mut self, option: u8, data: Vec<u8>) {
        self.replies.push(NegotiatorReply::Subnegotiation { option, data });
    }

    /// Options we are willing to enable on our side when the host asks
    fn acceptable_local(option: u8) -> bool {
        matches!(
            TelnetOption::from_u8(option),
            Some(TelnetOption::Binary)
                | Some(TelnetOption::EndOfRecord)
                | Some(TelnetOption::TerminalType)
                | Some(TelnetOption::NewEnvironment)
                | Some(TelnetOption::TN3270E)
        )
    }

    /// Options we accept the host enabling on its side
    fn acceptable_remote(option: u8) -> bool {
        matches!(
            TelnetOption::from_u8(option),
            Some(TelnetOption::Binary)
                | Some(TelnetOption::EndOfRecord)
                | Some(TelnetOption::TerminalType)
                | Some(TelnetOption::TN3270E)
        )
    }

    /// Handle an incoming DO/DONT/WILL/WONT
    pub fn handle_command(&mut self, command: TelnetCommand, option: u8) {
        if self.phase == NegotiationPhase::Init {
            self.phase = NegotiationPhase::TelnetOpts;
        }
        match command {
            TelnetCommand::DO => {
                let acceptable = Self::acceptable_local(option)
                    && !(option == TelnetOption::TN3270E as u8 && self.tn3270e_refused);
                let state = self.option_mut(option);
                if acceptable {
                    if state.local != OptionFlag::Yes {
                        state.local = OptionFlag::Yes;
                        self.send_telnet(TelnetCommand::WILL, option);
                    }
                } else {
                    state.local = OptionFlag::No;
                    self.send_telnet(TelnetCommand::WONT, option);
                }
                self.after_option_change(option);
            }
            TelnetCommand::DONT => {
                let state = self.option_mut(option);
                if state.local != OptionFlag::No {
                    state.local = OptionFlag::No;
                    self.send_telnet(TelnetCommand::WONT, option);
                }
                if option == TelnetOption::TN3270E as u8 {
                    self.tn3270e_refused = true;
                    self.downgrade_from_tn3270e();
                }
            }
            TelnetCommand::WILL => {
                let acceptable = Self::acceptable_remote(option);
                let state = self.option_mut(option);
                if acceptable {
                    if state.remote != OptionFlag::Yes {
                        state.remote = OptionFlag::Yes;
                        self.send_telnet(TelnetCommand::DO, option);
                    }
                } else {
                    state.remote = OptionFlag::No;
                    self.send_telnet(TelnetCommand::DONT, option);
                }
                self.after_option_change(option);
            }
            TelnetCommand::WONT => {
                let state = self.option_mut(option);
                if state.remote != OptionFlag::No {
                    state.remote = OptionFlag::No;
                    self.send_telnet(TelnetCommand::DONT, option);
                }
                if option == TelnetOption::TN3270E as u8 {
                    self.tn3270e_refused = true;
                    self.downgrade_from_tn3270e();
                }
            }
            _ => {}
        }
    }

    /// Phase transitions driven by option agreement
    fn after_option_change(&mut self, option: u8) {
        if option == TelnetOption::TN3270E as u8
            && self.option(option).local == OptionFlag::Yes
            && matches!(
                self.phase,
                NegotiationPhase::Init | NegotiationPhase::TelnetOpts
            )
        {
            // Both DO and WILL for TN3270E have now been exchanged; only
            // after that may subnegotiation start.
            self.phase = NegotiationPhase::Tn3270eDevice;
            self.send_device_type_request();
        }
    }

    fn send_device_type_request(&mut self) {
        let mut data = vec![TN3270E_OP_DEVICE_TYPE, TN3270E_OP_REQUEST];
        data.extend_from_slice(self.model.device_type(true).as_bytes());
        if let Some(lu) = &self.requested_lu {
            data.push(TN3270E_OP_CONNECT);
            data.extend_from_slice(lu.as_bytes());
        }
        self.send_subnegotiation(TelnetOption::TN3270E as u8, data);
        self.device_request_sent = true;
    }

    fn functions_to_bytes(functions: u8) -> Vec<u8> {
        (0u8..8).filter(|&bit| functions & (1u8 << bit) != 0).collect()
    }

    fn functions_from_bytes(bytes: &[u8]) -> u8 {
        bytes
            .iter()
            .filter(|&&b| b < 8)
            .fold(0u8, |acc, &b| acc | (1u8 << b))
    }

    fn send_functions(&mut self, op: u8, functions: u8) {
        let mut data = vec![TN3270E_OP_FUNCTIONS, op];
        data.extend_from_slice(&Self::functions_to_bytes(functions));
        self.send_subnegotiation(TelnetOption::TN3270E as u8, data);
    }

    /// Handle a subnegotiation payload (option byte stripped, IAC unescaped)
    pub fn handle_subnegotiation(&mut self, option: u8, data: &[u8]) {
        match TelnetOption::from_u8(option) {
            Some(TelnetOption::TerminalType) => {
                // SEND -> IS <type>
                if data.first() == Some(&1) {
                    let mut reply = vec![0u8];
                    reply.extend_from_slice(self.model.terminal_type().as_bytes());
                    self.send_subnegotiation(option, reply);
                }
            }
            Some(TelnetOption::NewEnvironment) => {
                // SEND -> IS with no variables; the LU rides DEVICE-TYPE
                if data.first() == Some(&1) {
                    self.send_subnegotiation(option, vec![0u8]);
                }
            }
            Some(TelnetOption::TN3270E) => self.handle_tn3270e_subnegotiation(data),
            _ => {
                log::debug!("ignoring subnegotiation for option {option}");
            }
        }
    }

    fn handle_tn3270e_subnegotiation(&mut self, data: &[u8]) {
        match (data.first(), data.get(1)) {
            (Some(&TN3270E_OP_SEND), Some(&TN3270E_OP_DEVICE_TYPE)) => {
                if !self.device_request_sent {
                    self.send_device_type_request();
                }
            }
            (Some(&TN3270E_OP_DEVICE_TYPE), Some(&TN3270E_OP_IS)) => {
                let body = &data[2..];
                let (device, lu) = match body.iter().position(|&b| b == TN3270E_OP_CONNECT) {
                    Some(sep) => (
                        String::from_utf8_lossy(&body[..sep]).into_owned(),
                        Some(String::from_utf8_lossy(&body[sep + 1..]).into_owned()),
                    ),
                    None => (String::from_utf8_lossy(body).into_owned(), None),
                };
                log::info!("host assigned device type {device}, lu {lu:?}");
                self.assigned_device = Some(device);
                self.assigned_lu = lu;
                self.phase = NegotiationPhase::Tn3270eFunctions;
                self.send_functions(TN3270E_OP_REQUEST, self.functions_policy);
            }
            (Some(&TN3270E_OP_DEVICE_TYPE), Some(&TN3270E_OP_REJECT)) => {
                log::warn!("host rejected device type; downgrading to basic TN3270");
                self.tn3270e_refused = true;
                self.downgrade_from_tn3270e();
            }
            (Some(&TN3270E_OP_FUNCTIONS), Some(&TN3270E_OP_IS)) => {
                let offered = Self::functions_from_bytes(&data[2..]);
                if offered & !self.functions_policy == 0 {
                    // A subset of what we asked for: agree by echoing it.
                    self.functions = offered;
                    self.send_functions(TN3270E_OP_IS, offered);
                    self.finish_functions();
                } else {
                    // Superset: counter with the intersection.
                    let intersection = offered & self.functions_policy;
                    self.send_functions(TN3270E_OP_REQUEST, intersection);
                }
            }
            (Some(&TN3270E_OP_FUNCTIONS), Some(&TN3270E_OP_REQUEST)) => {
                let offered = Self::functions_from_bytes(&data[2..]);
                let intersection = offered & self.functions_policy;
                self.functions = intersection;
                self.send_functions(TN3270E_OP_IS, intersection);
                self.finish_functions();
            }
            _ => {
                log::warn!("malformed TN3270E subnegotiation: {data:02X?}");
            }
        }
    }

    fn finish_functions(&mut self) {
        self.phase = NegotiationPhase::Tn3270eReady;
        // Without the BIND-IMAGE function there is no BIND to wait for; the
        // session is implicitly bound.
        if self.functions & FUNC_BIND_IMAGE == 0 {
            self.bound = true;
        }
    }

    /// Leave TN3270E for whatever the telnet options still allow
    fn downgrade_from_tn3270e(&mut self) {
        if !matches!(
            self.phase,
            NegotiationPhase::Tn3270eDevice
                | NegotiationPhase::Tn3270eFunctions
                | NegotiationPhase::Init
                | NegotiationPhase::TelnetOpts
        ) {
            return;
        }
        if self.record_framing_agreed() {
            self.phase = NegotiationPhase::BasicTn3270;
            self.bound = true;
        } else {
            // Let the initial-window timer pick basic or ASCII.
            self.phase = NegotiationPhase::TelnetOpts;
        }
    }

    /// Decide the session mode once the passive initial window expires
    ///
    /// Returns true when the decision used a fallback (ASCII/NVT).
    pub fn decide_fallback(&mut self) -> bool {
        match self.phase {
            NegotiationPhase::Init | NegotiationPhase::TelnetOpts => {
                if self.record_framing_agreed() {
                    // TN3270E never came up; basic TN3270 it is.
                    self.phase = NegotiationPhase::BasicTn3270;
                    self.bound = true;
                    false
                } else if self.ascii_fallback_allowed {
                    self.phase = NegotiationPhase::AsciiNvt;
                    true
                } else {
                    self.phase = NegotiationPhase::Failed;
                    false
                }
            }
            _ => false,
        }
    }

    /// Abort negotiation (deadline or cancellation)
    pub fn fail(&mut self) {
        self.phase = NegotiationPhase::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiator() -> TelnetNegotiator {
        TelnetNegotiator::new(
            TerminalModel::Model2,
            None,
            FUNC_BIND_IMAGE | FUNC_RESPONSES | FUNC_SYSREQ,
            true,
        )
    }

    fn sub_reply(replies: &[NegotiatorReply]) -> Option<&Vec<u8>> {
        replies.iter().find_map(|r| match r {
            NegotiatorReply::Subnegotiation { option: 40, data } => Some(data),
            _ => None,
        })
    }

    #[test]
    fn test_accepts_core_options() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, TelnetOption::Binary as u8);
        neg.handle_command(TelnetCommand::WILL, TelnetOption::Binary as u8);
        neg.handle_command(TelnetCommand::DO, TelnetOption::EndOfRecord as u8);
        neg.handle_command(TelnetCommand::WILL, TelnetOption::EndOfRecord as u8);
        let replies = neg.take_replies();
        assert!(replies.contains(&NegotiatorReply::Telnet {
            command: TelnetCommand::WILL,
            option: 0
        }));
        assert!(replies.contains(&NegotiatorReply::Telnet {
            command: TelnetCommand::DO,
            option: 25
        }));
        assert!(neg.record_framing_agreed());
    }

    #[test]
    fn test_refuses_echo_and_sga() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::WILL, TelnetOption::Echo as u8);
        neg.handle_command(TelnetCommand::DO, TelnetOption::SuppressGoAhead as u8);
        let replies = neg.take_replies();
        assert!(replies.contains(&NegotiatorReply::Telnet {
            command: TelnetCommand::DONT,
            option: 1
        }));
        assert!(replies.contains(&NegotiatorReply::Telnet {
            command: TelnetCommand::WONT,
            option: 3
        }));
    }

    #[test]
    fn test_tn3270e_device_request_after_do() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, TelnetOption::TN3270E as u8);
        assert_eq!(neg.phase(), NegotiationPhase::Tn3270eDevice);
        let replies = neg.take_replies();
        assert!(replies.contains(&NegotiatorReply::Telnet {
            command: TelnetCommand::WILL,
            option: 40
        }));
        let sub = sub_reply(&replies).expect("device-type request sent");
        assert_eq!(sub[0], TN3270E_OP_DEVICE_TYPE);
        assert_eq!(sub[1], TN3270E_OP_REQUEST);
        assert_eq!(&sub[2..], b"IBM-3278-2-E");
    }

    #[test]
    fn test_device_request_carries_lu() {
        let mut neg = TelnetNegotiator::new(
            TerminalModel::Model2,
            Some("LU1".to_string()),
            FUNC_BIND_IMAGE,
            true,
        );
        neg.handle_command(TelnetCommand::DO, TelnetOption::TN3270E as u8);
        let replies = neg.take_replies();
        let sub = sub_reply(&replies).unwrap();
        let connect_pos = sub.iter().position(|&b| b == TN3270E_OP_CONNECT).unwrap();
        assert_eq!(&sub[connect_pos + 1..], b"LU1");
    }

    #[test]
    fn test_happy_path_to_ready() {
        // The S4 flow: DO TN3270E, DEVICE-TYPE IS ... CONNECT LU1,
        // FUNCTIONS IS (BIND-IMAGE | RESPONSES)
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, TelnetOption::TN3270E as u8);
        neg.take_replies();

        let mut is_reply = vec![TN3270E_OP_DEVICE_TYPE, TN3270E_OP_IS];
        is_reply.extend_from_slice(b"IBM-3278-2-E");
        is_reply.push(TN3270E_OP_CONNECT);
        is_reply.extend_from_slice(b"LU1");
        neg.handle_subnegotiation(40, &is_reply);
        assert_eq!(neg.phase(), NegotiationPhase::Tn3270eFunctions);
        assert_eq!(neg.assigned_device(), Some("IBM-3278-2-E"));
        assert_eq!(neg.assigned_lu(), Some("LU1"));

        let replies = neg.take_replies();
        let sub = sub_reply(&replies).unwrap();
        assert_eq!(sub[0], TN3270E_OP_FUNCTIONS);
        assert_eq!(sub[1], TN3270E_OP_REQUEST);
        assert_eq!(&sub[2..], &[FN_BIND_IMAGE, FN_RESPONSES, FN_SYSREQ]);

        neg.handle_subnegotiation(
            40,
            &[TN3270E_OP_FUNCTIONS, TN3270E_OP_IS, FN_BIND_IMAGE, FN_RESPONSES],
        );
        assert_eq!(neg.phase(), NegotiationPhase::Tn3270eReady);
        assert_eq!(neg.functions(), FUNC_BIND_IMAGE | FUNC_RESPONSES);
        assert!(!neg.bound(), "BIND-IMAGE negotiated, waiting for BIND");

        // Confirmation echoed the host's subset
        let replies = neg.take_replies();
        let sub = sub_reply(&replies).unwrap();
        assert_eq!(sub[1], TN3270E_OP_IS);
        assert_eq!(&sub[2..], &[FN_BIND_IMAGE, FN_RESPONSES]);
    }

    #[test]
    fn test_functions_superset_countered_with_intersection() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, TelnetOption::TN3270E as u8);
        neg.handle_subnegotiation(
            40,
            &[TN3270E_OP_DEVICE_TYPE, TN3270E_OP_IS, b'I', b'B', b'M'],
        );
        neg.take_replies();

        // Host offers everything, including functions we did not request
        neg.handle_subnegotiation(
            40,
            &[
                TN3270E_OP_FUNCTIONS,
                TN3270E_OP_IS,
                FN_BIND_IMAGE,
                FN_DATA_STREAM_CTL,
                FN_RESPONSES,
                FN_SCS_CTL_CODES,
                FN_SYSREQ,
            ],
        );
        assert_eq!(neg.phase(), NegotiationPhase::Tn3270eFunctions, "not final yet");
        let replies = neg.take_replies();
        let sub = sub_reply(&replies).unwrap();
        assert_eq!(sub[1], TN3270E_OP_REQUEST);
        assert_eq!(&sub[2..], &[FN_BIND_IMAGE, FN_RESPONSES, FN_SYSREQ]);
    }

    #[test]
    fn test_host_initiated_functions_request() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, TelnetOption::TN3270E as u8);
        neg.handle_subnegotiation(
            40,
            &[TN3270E_OP_DEVICE_TYPE, TN3270E_OP_IS, b'X'],
        );
        neg.take_replies();

        neg.handle_subnegotiation(
            40,
            &[TN3270E_OP_FUNCTIONS, TN3270E_OP_REQUEST, FN_RESPONSES, FN_SCS_CTL_CODES],
        );
        assert_eq!(neg.phase(), NegotiationPhase::Tn3270eReady);
        assert_eq!(neg.functions(), FUNC_RESPONSES);
        assert!(neg.bound(), "no BIND-IMAGE function, implicitly bound");
    }

    #[test]
    fn test_device_reject_downgrades() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, TelnetOption::Binary as u8);
        neg.handle_command(TelnetCommand::WILL, TelnetOption::Binary as u8);
        neg.handle_command(TelnetCommand::DO, TelnetOption::EndOfRecord as u8);
        neg.handle_command(TelnetCommand::WILL, TelnetOption::EndOfRecord as u8);
        neg.handle_command(TelnetCommand::DO, TelnetOption::TN3270E as u8);
        neg.take_replies();

        neg.handle_subnegotiation(
            40,
            &[TN3270E_OP_DEVICE_TYPE, TN3270E_OP_REJECT, TN3270E_OP_REASON, 0x00],
        );
        assert_eq!(neg.phase(), NegotiationPhase::BasicTn3270);
        assert!(neg.bound());
        assert!(!neg.tn3270e_active());
    }

    #[test]
    fn test_ascii_fallback_decision() {
        // S3: host only offers ECHO and SGA; the initial window then expires
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::WILL, TelnetOption::Echo as u8);
        neg.handle_command(TelnetCommand::WILL, TelnetOption::SuppressGoAhead as u8);
        neg.take_replies();

        let fallback = neg.decide_fallback();
        assert!(fallback);
        assert_eq!(neg.phase(), NegotiationPhase::AsciiNvt);
        assert!(neg.ascii_mode());
        assert!(neg.is_operational());
    }

    #[test]
    fn test_fallback_disallowed_fails() {
        let mut neg = TelnetNegotiator::new(TerminalModel::Model2, None, FUNC_BIND_IMAGE, false);
        neg.handle_command(TelnetCommand::WILL, TelnetOption::Echo as u8);
        assert!(!neg.decide_fallback());
        assert!(neg.is_failed());
    }

    #[test]
    fn test_basic_tn3270_when_no_tn3270e() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, TelnetOption::Binary as u8);
        neg.handle_command(TelnetCommand::WILL, TelnetOption::Binary as u8);
        neg.handle_command(TelnetCommand::DO, TelnetOption::EndOfRecord as u8);
        neg.handle_command(TelnetCommand::WILL, TelnetOption::EndOfRecord as u8);
        assert!(!neg.decide_fallback());
        assert_eq!(neg.phase(), NegotiationPhase::BasicTn3270);
        assert!(neg.bound());
    }

    #[test]
    fn test_terminal_type_subnegotiation() {
        let mut neg = negotiator();
        neg.handle_subnegotiation(24, &[1]); // SEND
        let replies = neg.take_replies();
        match &replies[0] {
            NegotiatorReply::Subnegotiation { option: 24, data } => {
                assert_eq!(data[0], 0); // IS
                assert_eq!(&data[1..], b"IBM-3278-2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_send_device_type_retransmits() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, TelnetOption::TN3270E as u8);
        neg.take_replies();
        // A host asking again gets nothing extra; the request is out already
        neg.handle_subnegotiation(40, &[TN3270E_OP_SEND, TN3270E_OP_DEVICE_TYPE]);
        assert!(sub_reply(&neg.take_replies()).is_none());
    }

    #[test]
    fn test_bound_transitions() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, TelnetOption::TN3270E as u8);
        neg.handle_subnegotiation(40, &[TN3270E_OP_DEVICE_TYPE, TN3270E_OP_IS, b'X']);
        neg.handle_subnegotiation(40, &[TN3270E_OP_FUNCTIONS, TN3270E_OP_IS, FN_BIND_IMAGE]);
        assert_eq!(neg.phase(), NegotiationPhase::Tn3270eReady);

        neg.set_bound(true);
        assert_eq!(neg.phase(), NegotiationPhase::Bound);
        neg.set_bound(false);
        assert_eq!(neg.phase(), NegotiationPhase::Tn3270eReady);
    }

    #[test]
    fn test_unknown_option_refused() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, 99);
        neg.handle_command(TelnetCommand::WILL, 99);
        let replies = neg.take_replies();
        assert!(replies.contains(&NegotiatorReply::Telnet {
            command: TelnetCommand::WONT,
            option: 99
        }));
        assert!(replies.contains(&NegotiatorReply::Telnet {
            command: TelnetCommand::DONT,
            option: 99
        }));
    }

    #[test]
    fn test_summary_snapshot() {
        let mut neg = negotiator();
        neg.handle_command(TelnetCommand::DO, TelnetOption::TN3270E as u8);
        neg.handle_subnegotiation(40, &[TN3270E_OP_DEVICE_TYPE, TN3270E_OP_IS, b'X']);
        neg.handle_subnegotiation(
            40,
            &[TN3270E_OP_FUNCTIONS, TN3270E_OP_IS, FN_RESPONSES],
        );
        let summary = neg.summary();
        assert!(summary.tn3270e_enabled);
        assert!(!summary.ascii_mode);
        assert_eq!(summary.functions, FUNC_RESPONSES);
        assert!(summary.bound, "no BIND-IMAGE in the accepted set");
    }
}
