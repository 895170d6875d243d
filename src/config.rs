//! Session configuration
//!
//! A fixed configuration struct with the enumerated options; anything the
//! struct cannot represent is rejected at validation time rather than
//! carried as loose key/value pairs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ebcdic::CodePage;
use crate::error::{ConfigError, TN3270Result};
use crate::lib3270::codes::{FUNC_ALL, FUNC_BIND_IMAGE, FUNC_RESPONSES, FUNC_SYSREQ};

/// Terminal models, with the 3279 (color) variants alongside the 3278 set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TerminalModel {
    /// 3278 model 2: 24x80
    #[default]
    #[serde(rename = "3278-2")]
    Model2,
    /// 3278 model 3: 32x80
    #[serde(rename = "3278-3")]
    Model3,
    /// 3278 model 4: 43x80
    #[serde(rename = "3278-4")]
    Model4,
    /// 3278 model 5: 27x132
    #[serde(rename = "3278-5")]
    Model5,
    /// 3279 model 2: 24x80 color
    #[serde(rename = "3279-2")]
    Model2Color,
    /// 3279 model 3: 32x80 color
    #[serde(rename = "3279-3")]
    Model3Color,
    /// 3279 model 4: 43x80 color
    #[serde(rename = "3279-4")]
    Model4Color,
    /// 3279 model 5: 27x132 color
    #[serde(rename = "3279-5")]
    Model5Color,
    /// Host-negotiated screen size
    #[serde(rename = "DYNAMIC")]
    Dynamic,
}

impl TerminalModel {
    /// Parse a configuration name such as "3278-2" or "3279-4"
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "3278-2" => Some(Self::Model2),
            "3278-3" => Some(Self::Model3),
            "3278-4" => Some(Self::Model4),
            "3278-5" => Some(Self::Model5),
            "3279-2" => Some(Self::Model2Color),
            "3279-3" => Some(Self::Model3Color),
            "3279-4" => Some(Self::Model4Color),
            "3279-5" => Some(Self::Model5Color),
            "DYNAMIC" | "dynamic" => Some(Self::Dynamic),
            _ => None,
        }
    }

    /// The model's native (alternate) screen size
    pub fn dimensions(&self) -> (usize, usize) {
        match self {
            Self::Model2 | Self::Model2Color | Self::Dynamic => (24, 80),
            Self::Model3 | Self::Model3Color => (32, 80),
            Self::Model4 | Self::Model4Color => (43, 80),
            Self::Model5 | Self::Model5Color => (27, 132),
        }
    }

    /// The default size every model starts in (Erase/Write target)
    pub fn default_dimensions(&self) -> (usize, usize) {
        (24, 80)
    }

    pub fn supports_color(&self) -> bool {
        matches!(
            self,
            Self::Model2Color | Self::Model3Color | Self::Model4Color | Self::Model5Color
        )
    }

    /// The TN3270E device-type string, e.g. "IBM-3278-2-E"
    pub fn device_type(&self, extended: bool) -> String {
        let base = match self {
            Self::Model2 => "IBM-3278-2",
            Self::Model3 => "IBM-3278-3",
            Self::Model4 => "IBM-3278-4",
            Self::Model5 => "IBM-3278-5",
            Self::Model2Color => "IBM-3279-2",
            Self::Model3Color => "IBM-3279-3",
            Self::Model4Color => "IBM-3279-4",
            Self::Model5Color => "IBM-3279-5",
            Self::Dynamic => return "IBM-DYNAMIC".to_string(),
        };
        if extended {
            format!("{base}-E")
        } else {
            base.to_string()
        }
    }

    /// The terminal type offered in basic TN3270 TTYPE negotiation
    pub fn terminal_type(&self) -> String {
        self.device_type(false)
    }
}

/// Minimum accepted TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "tls1.2")]
    Tls12,
    #[serde(rename = "tls1.3")]
    Tls13,
}

/// TLS settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    pub enabled: bool,
    /// Verify the host certificate chain; disabling is for closed test rigs
    pub verify: bool,
    /// Extra PEM bundle trusted in addition to the platform roots
    pub ca_bundle: Option<PathBuf>,
    pub min_version: TlsVersion,
}

/// Operation deadlines, in milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timeouts {
    /// TCP connect plus TLS handshake
    pub connect_ms: u64,
    /// Whole telnet/TN3270E handshake
    pub negotiate_ms: u64,
    /// Passive window for the host's opening options
    pub initial_wait_ms: u64,
    /// Single read while waiting for host data
    pub read_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: 30_000,
            negotiate_ms: 10_000,
            initial_wait_ms: 2_000,
            read_ms: 5_000,
        }
    }
}

/// Full session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    pub host: String,
    pub port: u16,
    pub tls: TlsConfig,
    pub terminal_model: TerminalModel,
    /// Logical unit requested in DEVICE-TYPE CONNECT, if any
    pub lu_name: Option<String>,
    pub code_page: CodePage,
    /// Record structured trace events
    pub trace: bool,
    /// Permit the ASCII/NVT fallback when the host won't speak 3270
    pub ascii_fallback_allowed: bool,
    pub timeouts: Timeouts,
    /// TN3270E functions to request (bitmask of FUNC_* values)
    pub functions_policy: u8,
    /// Let insert_text write into protected fields
    pub insert_circumvent_protected: bool,
    /// Close the session when a user-level operation times out
    pub fatal_timeouts: bool,
}

impl TerminalConfig {
    /// A configuration with the conservative defaults
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 23,
            tls: TlsConfig::default(),
            terminal_model: TerminalModel::default(),
            lu_name: None,
            code_page: CodePage::default(),
            trace: false,
            ascii_fallback_allowed: true,
            timeouts: Timeouts::default(),
            functions_policy: FUNC_BIND_IMAGE | FUNC_RESPONSES | FUNC_SYSREQ,
            insert_circumvent_protected: false,
            fatal_timeouts: false,
        }
    }

    /// Check the configuration for holes and contradictions
    pub fn validate(&self) -> TN3270Result<()> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidParameter {
                parameter: "host",
                value: String::new(),
            }
            .into());
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "port",
                value: "0".to_string(),
            }
            .into());
        }
        if self.functions_policy & !FUNC_ALL != 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "functions_policy",
                value: format!("0x{:02X}", self.functions_policy),
            }
            .into());
        }
        for (name, value) in [
            ("timeouts.connect_ms", self.timeouts.connect_ms),
            ("timeouts.negotiate_ms", self.timeouts.negotiate_ms),
            ("timeouts.initial_wait_ms", self.timeouts.initial_wait_ms),
            ("timeouts.read_ms", self.timeouts.read_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidParameter {
                    parameter: name,
                    value: "0".to_string(),
                }
                .into());
            }
        }
        if self.tls.ca_bundle.is_some() && !self.tls.enabled {
            return Err(ConfigError::Contradictory {
                reason: "ca_bundle given but tls is disabled".to_string(),
            }
            .into());
        }
        if self.tls.ca_bundle.is_some() && !self.tls.verify {
            return Err(ConfigError::Contradictory {
                reason: "ca_bundle given but verification is disabled".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
