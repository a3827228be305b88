use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::session::{ConstructList, MAXIMUM_RESPONSE_LENGTH};

#[derive(Parser)]
#[command(name = "usercode", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Number of simulator sessions allowed to run at the same time
    #[arg(long = "threads", short = 't', default_value_t = 1)]
    pub threads: usize,

    /// Submission files to grade; `-` reads one submission from stdin
    #[arg(required = true)]
    pub submissions: Vec<String>,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub simulator: SimulatorConfig,
    pub question: QuestionConfig,
    pub evaluator: EvaluatorConfig,
}

/// How to start and talk to the simulator executable
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimulatorConfig {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub reply_timeout: MilliSecond,
    pub max_reply_len: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/srv/usercode/usercode.py"),
            args: vec!["--noprompt".to_string()],
            work_dir: std::env::temp_dir(),
            reply_timeout: MilliSecond(10_000),
            max_reply_len: MAXIMUM_RESPONSE_LENGTH,
        }
    }
}

/// Per-question grading setup supplied by the question author
#[derive(Deserialize, Debug, Clone)]
pub struct QuestionConfig {
    #[serde(default)]
    pub init_code: String,
    #[serde(default)]
    pub grading_code: String,
    #[serde(default)]
    pub blacklist: ConstructList,
    #[serde(default)]
    pub whitelist: ConstructList,
    #[serde(default)]
    pub requirelist: ConstructList,
    #[serde(default = "default_runlimit")]
    pub runlimit: i64,
    #[serde(default)]
    pub system: TargetSystem,
}

fn default_runlimit() -> i64 {
    1000
}

impl Default for QuestionConfig {
    fn default() -> Self {
        Self {
            init_code: String::new(),
            grading_code: String::new(),
            blacklist: ConstructList::default(),
            whitelist: ConstructList::default(),
            requirelist: ConstructList::default(),
            runlimit: default_runlimit(),
            system: TargetSystem::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetSystem {
    #[default]
    Mc9s08qg8,
}

/// External interpreter used for initialization and grading scripts
#[derive(Deserialize, Debug, Clone)]
pub struct EvaluatorConfig {
    pub command: Vec<String>,
    #[serde(default = "default_evaluator_timeout")]
    pub timeout: MilliSecond,
    pub scratch_dir: Option<PathBuf>,
}

fn default_evaluator_timeout() -> MilliSecond {
    MilliSecond(5_000)
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl From<MilliSecond> for std::time::Duration {
    fn from(value: MilliSecond) -> Self {
        std::time::Duration::from_millis(value.0)
    }
}
