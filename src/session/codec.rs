use super::*;

impl Session {
    /// Writes one command line to the simulator
    ///
    /// The payload is sent as-is, so a multi-line block of code goes out in
    /// a single write.
    pub(super) fn send_command(&mut self, command: impl AsRef<[u8]>) -> Result<(), SessionError> {
        let command = command.as_ref();
        log::trace!("-> {}", String::from_utf8_lossy(command));

        let transport = self.live_transport()?;
        let result = transport.send_line(command);
        self.fail_on_fatal(result)
    }

    /// Reads the single reply line that answers the last command
    ///
    /// A line starting with `ERROR:` becomes `SessionError::Reported` with
    /// the marker stripped. Otherwise the raw line, newline included, is
    /// handed back for the caller to parse.
    pub(super) fn read_response(&mut self) -> Result<String, SessionError> {
        let limit = self.max_reply_len;
        let transport = self.live_transport()?;
        let result = transport.read_line(limit);
        let line = self.fail_on_fatal(result)?;
        let response = self.fail_on_fatal(decode_reply(line, limit))?;

        log::trace!("<- {}", response.trim_end());
        match response.strip_prefix(ERROR_PREFIX) {
            Some(message) => {
                let message = message.trim_end().to_string();
                log::debug!("Simulator reported error: {message}");
                Err(SessionError::Reported(message))
            }
            None => Ok(response),
        }
    }

    /// Sends a command whose reply carries nothing beyond success or failure
    pub(super) fn command(&mut self, command: impl AsRef<[u8]>) -> Result<(), SessionError> {
        self.send_command(command)?;
        self.read_response()?;
        Ok(())
    }

    fn live_transport(&mut self) -> Result<&mut Box<dyn Transport>, SessionError> {
        match self.state {
            SessionState::Handshaking | SessionState::Ready => {}
            state => {
                return Err(SessionError::Protocol(format!(
                    "session is not usable in state {state:?}"
                )));
            }
        }
        self.transport
            .as_mut()
            .ok_or_else(|| SessionError::Protocol("session has no simulator".into()))
    }

    /// Anything other than a reported error leaves the simulator in an
    /// unknown position in the conversation, so no further commands go out.
    fn fail_on_fatal<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(e) = &result {
            if !matches!(e, SessionError::Reported(_)) {
                log::debug!("Session failed: {e}");
                self.state = SessionState::Failed;
            }
        }
        result
    }
}

/// Checks a raw reply line against the length bound and decodes it
fn decode_reply(line: Vec<u8>, limit: usize) -> Result<String, SessionError> {
    if line.is_empty() {
        return Err(SessionError::Protocol(
            "simulator closed its output".to_string(),
        ));
    }
    if line.len() > limit {
        return Err(SessionError::Protocol(format!(
            "reply exceeds {limit} bytes"
        )));
    }
    String::from_utf8(line)
        .map_err(|_| SessionError::Protocol("reply is not valid UTF-8".to_string()))
}
