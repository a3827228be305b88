use serde::Deserialize;

use super::*;

/// A set of construct names, such as instruction mnemonics
///
/// Accepted either as one space-separated string or as a collection of
/// names. It goes over the wire as a single space-joined string, verbatim.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(from = "ConstructListRepr")]
pub struct ConstructList(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum ConstructListRepr {
    Joined(String),
    Names(Vec<String>),
}

impl From<ConstructListRepr> for ConstructList {
    fn from(repr: ConstructListRepr) -> Self {
        match repr {
            ConstructListRepr::Joined(joined) => Self(joined),
            ConstructListRepr::Names(names) => Self::from(names),
        }
    }
}

impl ConstructList {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the list names nothing and is not worth sending
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for ConstructList {
    fn from(joined: String) -> Self {
        Self(joined)
    }
}

impl From<&str> for ConstructList {
    fn from(joined: &str) -> Self {
        Self(joined.to_string())
    }
}

impl From<Vec<String>> for ConstructList {
    fn from(names: Vec<String>) -> Self {
        Self(names.join(" "))
    }
}

impl From<&[&str]> for ConstructList {
    fn from(names: &[&str]) -> Self {
        Self(names.join(" "))
    }
}

impl<const N: usize> From<[&str; N]> for ConstructList {
    fn from(names: [&str; N]) -> Self {
        Self(names.join(" "))
    }
}

impl Session {
    /// Forbids the listed constructs in the code loaded afterwards
    pub fn blacklist(&mut self, names: impl Into<ConstructList>) -> Result<(), SessionError> {
        self.send_list("bl", names.into())
    }

    /// Permits only the listed constructs in the code loaded afterwards
    pub fn whitelist(&mut self, names: impl Into<ConstructList>) -> Result<(), SessionError> {
        self.send_list("wl", names.into())
    }

    /// Requires every listed construct to appear in the code
    pub fn set_required(&mut self, names: impl Into<ConstructList>) -> Result<(), SessionError> {
        self.send_list("rl", names.into())
    }

    /// Caps how long the code may run, in simulator-defined units
    /// (usually machine cycles). Passed through verbatim, even if not positive.
    pub fn limit_runtime(&mut self, cycles: i64) -> Result<(), SessionError> {
        self.command(format!("rtl {cycles}"))
    }

    /// Advances the machine by one instruction
    pub fn step(&mut self) -> Result<(), SessionError> {
        self.command("s")
    }

    /// Runs until the simulator stops on its own
    ///
    /// The reply does not say why it stopped (program end, runtime limit);
    /// only an `ERROR:` reply is distinguishable.
    pub fn run(&mut self) -> Result<(), SessionError> {
        self.command("cc")
    }

    fn send_list(&mut self, command: &str, list: ConstructList) -> Result<(), SessionError> {
        self.command(format!("{command} {}", list.as_str()))
    }
}
