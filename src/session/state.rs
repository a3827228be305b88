use super::*;

/// Ordered name to value mapping of simulated machine state
///
/// Keys are unique; inserting an existing key replaces its value in place.
/// Values stay strings as they travel on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMap(Vec<(String, String)>);

impl StateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StateMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut state = Self::new();
        for (k, v) in iter {
            state.insert(k, v);
        }
        state
    }
}

impl IntoIterator for StateMap {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Session {
    /// Fetches machine state: the visible subset (`g`) or all of it (`f`)
    pub fn get_state(&mut self, full: bool) -> Result<StateMap, SessionError> {
        self.send_command(if full { "f" } else { "g" })?;
        let response = self.read_response()?;
        decode_state(&response)
    }

    /// Loads the given values into the simulated machine
    pub fn set_state(&mut self, state: &StateMap) -> Result<(), SessionError> {
        let query = encode_state(state)?;
        self.command(format!("l {query}"))
    }
}

/// Parses a query-string encoded state line
///
/// A name repeated on the line keeps its last value. Names without `=`
/// decode to an empty value rather than being dropped.
pub fn decode_state(line: &str) -> Result<StateMap, SessionError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(line)
        .map_err(|e| SessionError::Protocol(format!("malformed state reply: {e}")))?;
    Ok(pairs.into_iter().collect())
}

/// Encodes state as `name=value&name=value`, percent-escaped
pub fn encode_state(state: &StateMap) -> Result<String, SessionError> {
    serde_urlencoded::to_string(&state.0)
        .map_err(|e| SessionError::Protocol(format!("cannot encode state: {e}")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::testing::ScriptedLauncher;
    use super::*;

    #[test]
    fn test_decode_state_line() {
        let state = decode_state("A=5&X=0x1f&128=255&CCR=--H-I&note=a+b%26c\n").unwrap();
        assert_eq!(state.len(), 5);
        assert_eq!(state.get("A"), Some("5"));
        assert_eq!(state.get("128"), Some("255"));
        assert_eq!(state.get("note"), Some("a b&c"));
    }

    #[test]
    fn test_empty_values_survive() {
        let state = decode_state("A=&B\n").unwrap();
        assert_eq!(state.get("A"), Some(""));
        assert_eq!(state.get("B"), Some(""));

        let encoded = encode_state(&state).unwrap();
        assert_eq!(decode_state(&encoded).unwrap(), state);
    }

    #[test]
    fn test_repeated_name_keeps_last() {
        let state = decode_state("A=1&B=2&A=3").unwrap();
        let pairs: Vec<_> = state.iter().collect();
        assert_eq!(pairs, vec![("A", "3"), ("B", "2")]);
    }

    #[test]
    fn test_empty_line_is_empty_state() {
        assert!(decode_state("\n").unwrap().is_empty());
    }

    #[test]
    fn test_get_state_full_and_visible() {
        let launcher = ScriptedLauncher::new(&["Pong.\n", "A=1\n", "A=1&128=7\n"]);
        let mut session = Session::open(&launcher).unwrap();

        let visible = session.get_state(false).unwrap();
        let full = session.get_state(true).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(full.get("128"), Some("7"));

        let sent = launcher.recorded.lock().sent.clone();
        assert_eq!(sent[1..], ["g".to_string(), "f".to_string()]);
    }

    #[test]
    fn test_set_state_sends_query() {
        let launcher = ScriptedLauncher::new(&["Pong.\n", "OK\n"]);
        let mut session = Session::open(&launcher).unwrap();

        let state: StateMap = [("A", "5"), ("128", "two words")].into_iter().collect();
        session.set_state(&state).unwrap();

        let sent = launcher.recorded.lock().sent.clone();
        assert_eq!(sent[1], "l A=5&128=two+words");
    }
}
