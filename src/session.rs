mod codec;
mod controls;
mod loader;
mod state;
mod transport;

pub use controls::ConstructList;
pub use loader::{USERCODE_TERMINATOR, sanitize_source};
pub use state::{StateMap, decode_state, encode_state};
pub use transport::{Launch, ProcessLauncher, ProcessTransport, Transport};

use crate::error::{ERROR_PREFIX, SessionError};

/// Reply that must terminate the answer to a ping
pub const HANDSHAKE_RESPONSE: &str = "Pong.";

/// Longest reply line accepted from the simulator, newline included
pub const MAXIMUM_RESPONSE_LENGTH: usize = 10 * 1024;

/// Lifecycle of a simulator session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Spawning,
    Handshaking,
    Ready,
    Closed,
    Failed,
}

/// One live connection to a simulator subprocess
///
/// The session exclusively owns its transport. Commands and replies strictly
/// alternate; every command-issuing method reads exactly one reply line,
/// except `quit` which awaits nothing. Dropping an open session tears the
/// subprocess down.
pub struct Session {
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    max_reply_len: usize,
}

impl Session {
    /// Starts a simulator through `launcher` and verifies it answers a ping
    pub fn open(launcher: &dyn Launch) -> Result<Self, SessionError> {
        let mut session = Self {
            transport: None,
            state: SessionState::Unstarted,
            max_reply_len: launcher.max_reply_len(),
        };

        session.state = SessionState::Spawning;
        let transport = launcher.launch().inspect_err(|e| {
            log::error!("Simulator launch failed: {e}");
        })?;
        session.transport = Some(transport);

        session.state = SessionState::Handshaking;
        if let Err(e) = session.handshake() {
            session.state = SessionState::Failed;
            if let Err(close_err) = session.close() {
                log::debug!("Teardown after failed handshake also failed: {close_err}");
            }
            return Err(e);
        }

        session.state = SessionState::Ready;
        log::info!("Simulator session ready");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sends a ping and checks the reply ends with the acknowledgement
    fn handshake(&mut self) -> Result<(), SessionError> {
        self.send_command("pn")?;
        let response = self.read_response().map_err(|e| match e {
            SessionError::Reported(message) => {
                SessionError::Protocol(format!("handshake rejected: {message}"))
            }
            other => other,
        })?;

        if !response.trim_end().ends_with(HANDSHAKE_RESPONSE) {
            return Err(SessionError::Protocol(format!(
                "unexpected handshake reply {:?}",
                response.trim_end()
            )));
        }
        Ok(())
    }

    /// Asks the simulator to quit, closes both pipes and reaps the process
    ///
    /// Closing an already closed session does nothing. A session that failed
    /// is torn down without sending anything further.
    pub fn close(&mut self) -> Result<(), SessionError> {
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };

        if self.state == SessionState::Ready {
            if let Err(e) = transport.send_line(b"q") {
                log::debug!("Simulator did not accept quit command: {e}");
            }
        }

        let result = transport.shutdown();
        self.state = SessionState::Closed;
        log::info!("Simulator session closed");
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.transport.is_some() {
            log::warn!("Simulator session dropped without close, tearing down");
            if let Err(e) = self.close() {
                log::error!("Failed to tear down simulator session: {e}");
            }
        }
    }
}
