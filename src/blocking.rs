//! Blocking façade over the async session
//!
//! Scripts that have no async runtime of their own drive a private
//! current-thread runtime here. The core stays async-only; this wrapper
//! just blocks on it, so there is exactly one implementation of the
//! session logic.

use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

use crate::config::TerminalConfig;
use crate::error::{TN3270Error, TN3270Result};
use crate::session::{SessionEvent, SessionState, TN3270Session};

/// A synchronous 3270 session
#[derive(Debug)]
pub struct BlockingSession {
    runtime: Runtime,
    inner: TN3270Session,
}

impl BlockingSession {
    pub fn new(config: TerminalConfig) -> TN3270Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| TN3270Error::Transport(crate::error::TransportError::Io {
                message: err.to_string(),
            }))?;
        Ok(Self {
            runtime,
            inner: TN3270Session::new(config)?,
        })
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn connect(&mut self) -> TN3270Result<()> {
        self.runtime.block_on(self.inner.connect())
    }

    pub fn key(&mut self, name: &str) -> TN3270Result<()> {
        self.runtime.block_on(self.inner.key(name))
    }

    pub fn send_aid(&mut self, aid: u8) -> TN3270Result<()> {
        self.runtime.block_on(self.inner.send_aid(aid))
    }

    /// Local operation; no suspension involved
    pub fn insert_text(&mut self, text: &str) -> TN3270Result<()> {
        self.inner.insert_text(text)
    }

    pub fn send_text(&mut self, text: &str) -> TN3270Result<()> {
        self.runtime.block_on(self.inner.send_text(text))
    }

    pub fn read_screen(&self) -> String {
        self.inner.read_screen()
    }

    pub fn wait_for<F>(&mut self, predicate: F, timeout: Duration) -> TN3270Result<()>
    where
        F: Fn(&str) -> bool,
    {
        self.runtime.block_on(self.inner.wait_for(predicate, timeout))
    }

    pub fn pump_once(&mut self, timeout: Duration) -> TN3270Result<()> {
        self.runtime.block_on(self.inner.pump_once(timeout))
    }

    pub fn trace_events(&self) -> Vec<SessionEvent> {
        self.inner.trace_events()
    }

    pub fn close(&mut self) {
        self.runtime.block_on(self.inner.close());
    }
}
