use super::*;

/// Line that ends a block of user code in the upload protocol
pub const USERCODE_TERMINATOR: &str = "___END_USER_CODE___";

impl Session {
    /// Uploads a block of user code to be assembled by the simulator
    ///
    /// The source is sanitized, sent between a `c` command and the
    /// terminator line, and the single reply is the verdict on it: an
    /// `ERROR:` reply means the simulator rejected the code. Blank source
    /// goes through the same exchange.
    pub fn load_code(&mut self, source: &str) -> Result<(), SessionError> {
        let code = sanitize_source(source);
        log::debug!("Loading {} bytes of user code", code.len());

        self.send_command(format!("c {USERCODE_TERMINATOR}"))?;
        self.send_command(&code)?;
        self.send_command(USERCODE_TERMINATOR)?;

        self.read_response()?;
        Ok(())
    }
}

/// Strips everything that could desynchronize the line protocol
///
/// Only printable ASCII and newlines survive, and every occurrence of the
/// terminator is removed, repeatedly, so that removing one cannot splice
/// another into existence.
pub fn sanitize_source(source: &str) -> String {
    let mut code: String = source
        .chars()
        .filter(|c| *c == '\n' || (' '..='~').contains(c))
        .collect();

    while code.contains(USERCODE_TERMINATOR) {
        code = code.replace(USERCODE_TERMINATOR, "");
    }
    code
}
