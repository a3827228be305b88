#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use usercode::error::SessionError;
use usercode::session::{Launch, StateMap, Transport, decode_state, encode_state};

const INSTRUCTIONS: [&str; 4] = ["SET", "ADD", "NOP", "BAD_OPCODE"];

/// Everything the fake simulators were asked to do, across sessions
#[derive(Default)]
pub struct Journal {
    pub launches: usize,
    pub shutdowns: usize,
    pub commands: Vec<String>,
}

/// In-memory simulator speaking the line protocol
///
/// Understands a toy instruction set: `SET <name> <value>`,
/// `ADD <name> <amount>`, `NOP`, and `BAD_OPCODE` which fails at run time.
pub struct FakeSimulator {
    journal: Arc<Mutex<Journal>>,
    replies: VecDeque<String>,
    upload: Option<(String, Vec<String>)>,
    program: Vec<String>,
    machine: StateMap,
    whitelist: Option<Vec<String>>,
    blacklist: Vec<String>,
    required: Vec<String>,
    greeting: String,
    quit: bool,
}

impl FakeSimulator {
    fn new(journal: Arc<Mutex<Journal>>, greeting: &str) -> Self {
        Self {
            journal,
            replies: VecDeque::new(),
            upload: None,
            program: Vec::new(),
            machine: StateMap::new(),
            whitelist: None,
            blacklist: Vec::new(),
            required: Vec::new(),
            greeting: greeting.to_string(),
            quit: false,
        }
    }

    fn reply(&mut self, line: impl Into<String>) {
        self.replies.push_back(line.into());
    }

    fn handle_command(&mut self, line: &str) {
        self.journal.lock().commands.push(line.to_string());

        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "pn" => {
                let greeting = self.greeting.clone();
                self.reply(greeting);
            }
            "c" => self.upload = Some((arg.to_string(), Vec::new())),
            "l" => match decode_state(arg) {
                Ok(state) => {
                    for (name, value) in state {
                        self.machine.insert(name, value);
                    }
                    self.reply("State loaded.");
                }
                Err(e) => self.reply(format!("ERROR:{e}")),
            },
            "f" => {
                let encoded = encode_state(&self.machine).unwrap();
                self.reply(encoded);
            }
            "g" => {
                let visible: StateMap = self
                    .machine
                    .iter()
                    .filter(|(name, _)| !name.starts_with(|c: char| c.is_ascii_digit()))
                    .collect();
                self.reply(encode_state(&visible).unwrap());
            }
            "wl" => {
                self.whitelist = Some(arg.split_whitespace().map(String::from).collect());
                self.reply("OK");
            }
            "bl" => {
                self.blacklist = arg.split_whitespace().map(String::from).collect();
                self.reply("OK");
            }
            "rl" => {
                self.required = arg.split_whitespace().map(String::from).collect();
                self.reply("OK");
            }
            "rtl" => match arg.parse::<i64>() {
                Ok(_) => self.reply("OK"),
                Err(_) => self.reply("ERROR:Invalid runtime limit"),
            },
            "s" | "cc" => {
                let result = self.execute();
                match result {
                    Ok(()) => self.reply("Done."),
                    Err(e) => self.reply(format!("ERROR:{e}")),
                }
            }
            "q" => self.quit = true,
            _ => self.reply(format!("ERROR:Unknown command {command}")),
        }
    }

    fn finish_upload(&mut self, lines: Vec<String>) {
        let program: Vec<String> = lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        if program.is_empty() {
            return self.reply("ERROR:No code provided.");
        }
        for (n, line) in program.iter().enumerate() {
            let mnemonic = line.split_whitespace().next().unwrap_or_default();
            if !INSTRUCTIONS.contains(&mnemonic) {
                return self.reply(format!(
                    "ERROR:Line {}: unknown instruction '{mnemonic}'",
                    n + 1
                ));
            }
            let allowed = match &self.whitelist {
                Some(names) => names.iter().any(|w| w == mnemonic),
                None => !self.blacklist.iter().any(|b| b == mnemonic),
            };
            if !allowed {
                return self.reply(format!("ERROR:Instruction {mnemonic} is not allowed."));
            }
        }
        for required in &self.required {
            if !program.iter().any(|l| l.starts_with(required.as_str())) {
                let message = format!("ERROR:Program must use {required}.");
                return self.reply(message);
            }
        }

        self.program = program;
        self.reply("Code loaded.");
    }

    fn execute(&mut self) -> Result<(), String> {
        for line in self.program.clone() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                ["SET", name, value] => self.machine.insert(*name, *value),
                ["ADD", name, amount] => {
                    let current: i64 = self.machine.get(name).unwrap_or("0").parse().unwrap_or(0);
                    let amount: i64 = amount.parse().map_err(|_| "Bad operand".to_string())?;
                    self.machine.insert(*name, (current + amount).to_string());
                }
                ["NOP"] => {}
                ["BAD_OPCODE"] => return Err("Illegal opcode encountered.".to_string()),
                _ => return Err(format!("Cannot execute '{line}'")),
            }
        }
        Ok(())
    }
}

impl Transport for FakeSimulator {
    fn send_line(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.quit {
            return Err(SessionError::Io(std::io::ErrorKind::BrokenPipe.into()));
        }
        let text = String::from_utf8_lossy(data).into_owned();
        for line in text.split('\n') {
            match self.upload.take() {
                Some((terminator, lines)) if line == terminator => self.finish_upload(lines),
                Some((terminator, mut lines)) => {
                    lines.push(line.to_string());
                    self.upload = Some((terminator, lines));
                }
                None => self.handle_command(line),
            }
        }
        Ok(())
    }

    fn read_line(&mut self, limit: usize) -> Result<Vec<u8>, SessionError> {
        Ok(self
            .replies
            .pop_front()
            .map(|r| format!("{r}\n").into_bytes().into_iter().take(limit + 1).collect())
            .unwrap_or_default())
    }

    fn shutdown(&mut self) -> Result<(), SessionError> {
        self.journal.lock().shutdowns += 1;
        Ok(())
    }
}

/// Starts a fresh `FakeSimulator` per session and counts launches
pub struct FakeLauncher {
    pub journal: Arc<Mutex<Journal>>,
    greeting: String,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::with_greeting("UserCode Simulator v0.3. Pong.")
    }

    pub fn with_greeting(greeting: &str) -> Self {
        Self {
            journal: Arc::new(Mutex::new(Journal::default())),
            greeting: greeting.to_string(),
        }
    }

    pub fn launches(&self) -> usize {
        self.journal.lock().launches
    }
}

impl Launch for FakeLauncher {
    fn launch(&self) -> Result<Box<dyn Transport>, SessionError> {
        self.journal.lock().launches += 1;
        Ok(Box::new(FakeSimulator::new(
            self.journal.clone(),
            &self.greeting,
        )))
    }
}
