use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::config::EvaluatorConfig;

/// Script variables by name, as exchanged with the evaluator
pub type Variables = Map<String, Value>;

/// Runs initialization and grading scripts
///
/// Takes script source and the variables in scope, and returns the variables
/// as they stand once the script has finished.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(&self, script: &str, vars: Variables) -> Result<Variables>;
}

impl<F> ScriptEvaluator for F
where
    F: Fn(&str, Variables) -> Result<Variables> + Send + Sync,
{
    fn evaluate(&self, script: &str, vars: Variables) -> Result<Variables> {
        self(script, vars)
    }
}

static SCRIPT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Evaluates scripts with an external interpreter
///
/// The script is written to a file in the scratch directory and the command
/// template is run with `%SCRIPT%` replaced by that file's path. Variables go
/// in as a JSON object on stdin; the interpreter prints the resulting JSON
/// object on stdout.
pub struct CommandEvaluator {
    command: Vec<String>,
    timeout: Duration,
    scratch_dir: PathBuf,
}

impl CommandEvaluator {
    pub fn build(config: &EvaluatorConfig) -> Result<Self> {
        if config.command.is_empty() {
            bail!("Empty evaluator command");
        }

        let scratch_dir = match &config.scratch_dir {
            Some(dir) => dir.clone(),
            None => Self::default_scratch_dir()?,
        };
        fs::create_dir_all(&scratch_dir)?;

        Ok(Self {
            command: config.command.clone(),
            timeout: config.timeout.into(),
            scratch_dir,
        })
    }

    fn default_scratch_dir() -> Result<PathBuf> {
        use directories::ProjectDirs;

        let proj_dirs = ProjectDirs::from("", "", "usercode")
            .ok_or_else(|| anyhow!("Unable to find user directory"))?;
        Ok(proj_dirs.cache_dir().join("scripts"))
    }

    fn script_path(&self) -> PathBuf {
        let n = SCRIPT_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.scratch_dir
            .join(format!("{}-{n}.script", std::process::id()))
    }

    /// Runs the interpreter, killing it if it outlives the timeout
    fn run_interpreter(&self, script_path: &Path, input: &[u8]) -> Result<Vec<u8>> {
        let script_path = script_path.to_string_lossy();
        let mut mapping = HashMap::<&str, &str>::new();
        mapping.insert("%SCRIPT%", &script_path);
        let command = apply_template(&self.command, &mapping);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let output = runtime.block_on(async {
            timeout(self.timeout, self.execute_interpreter_async(&command, input)).await
        });

        match output {
            Ok(output) => output,
            Err(_) => bail!("Script evaluation timed out after {:?}", self.timeout),
        }
    }

    /// Feeds the variables to the interpreter and collects what it prints
    async fn execute_interpreter_async(&self, command: &[String], input: &[u8]) -> Result<Vec<u8>> {
        let mut cmd = tokio::process::Command::new(&command[0]);
        cmd.args(&command[1..])
            .current_dir(&self.scratch_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn script evaluator: {}", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(input).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "Script evaluator exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

impl ScriptEvaluator for CommandEvaluator {
    fn evaluate(&self, script: &str, vars: Variables) -> Result<Variables> {
        let script_path = self.script_path();
        fs::write(&script_path, script)?;

        let input = serde_json::to_vec(&Value::Object(vars))?;
        let output = self.run_interpreter(&script_path, &input);

        if let Err(e) = fs::remove_file(&script_path) {
            log::debug!("Failed to remove script file {}: {e}", script_path.display());
        }

        match serde_json::from_slice(&output?)? {
            Value::Object(vars) => Ok(vars),
            other => bail!("Script evaluator returned {other} instead of an object"),
        }
    }
}

/// Applies template substitutions to command arguments
fn apply_template(cmd_template: &[String], mapping: &HashMap<&str, &str>) -> Vec<String> {
    cmd_template
        .iter()
        .map(|s| {
            let mut t = s.clone();
            for (k, v) in mapping.iter() {
                t = t.replace(k, v);
            }
            t
        })
        .collect()
}
