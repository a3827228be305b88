use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::config::QuestionConfig;
use crate::error::GradeError;
use crate::script::{ScriptEvaluator, Variables};
use crate::session::{Launch, Session, StateMap};

/// Verdict on one submission
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// The simulator accepted the code, so it can be graded
    pub validated: bool,
    /// Feedback for the respondent: a load or run error, or what the
    /// grading script had to say
    pub message: String,
    /// Grade in `[0, 1]`
    pub fraction: f64,
}

/// Steps of one grading run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Configuring,
    Loading,
    Seeding,
    Running,
    Collecting,
    Graded,
}

struct CachedRun {
    digest: [u8; 32],
    result: ExecutionResult,
}

/// Runs submissions through the simulator and grading script
///
/// Remembers the verdict for the last submission it saw, so asking about the
/// same code repeatedly within one grading request starts the simulator only
/// once. Create one per request.
pub struct Grader {
    launcher: Arc<dyn Launch>,
    evaluator: Arc<dyn ScriptEvaluator>,
    question: QuestionConfig,
    cache: Mutex<Option<CachedRun>>,
}

impl Grader {
    pub fn new(
        launcher: Arc<dyn Launch>,
        evaluator: Arc<dyn ScriptEvaluator>,
        question: QuestionConfig,
    ) -> Self {
        Self {
            launcher,
            evaluator,
            question,
            cache: Mutex::new(None),
        }
    }

    /// Returns the verdict for `submission`, executing it at most once
    ///
    /// Errors the simulator reports, and replies that never arrive, become a
    /// zero-graded verdict carrying the error text. Failure to start or talk
    /// to the simulator, and script failures, are returned as errors and are
    /// not cached.
    pub fn run_usercode(&self, submission: &str) -> Result<ExecutionResult, GradeError> {
        let digest: [u8; 32] = Sha256::digest(submission.as_bytes()).into();

        // held for the whole run so concurrent callers wait for the verdict
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.digest == digest {
                log::debug!("Reusing cached verdict for submission");
                return Ok(cached.result.clone());
            }
        }

        let result = self.execute(submission)?;
        *cache = Some(CachedRun {
            digest,
            result: result.clone(),
        });
        Ok(result)
    }

    fn execute(&self, submission: &str) -> Result<ExecutionResult, GradeError> {
        let vars = self
            .evaluator
            .evaluate(&self.question.init_code, Variables::new())
            .map_err(GradeError::Script)?;

        let mut run = Run {
            stage: Stage::Idle,
            validated: false,
            message: String::new(),
            fraction: 0.0,
        };

        let mut session = Session::open(self.launcher.as_ref())?;
        let outcome = run.drive(
            &mut session,
            &self.question,
            self.evaluator.as_ref(),
            submission,
            vars,
        );
        if let Err(e) = session.close() {
            log::warn!("Failed to close simulator session: {e}");
        }

        match outcome {
            Ok(()) => {}
            Err(GradeError::Session(e)) if e.is_submission_fault() => {
                log::info!("Submission failed during {:?}: {e}", run.stage);
                run.message = e.to_string();
                run.fraction = 0.0;
            }
            Err(e) => return Err(e),
        }

        Ok(ExecutionResult {
            validated: run.validated,
            message: run.message,
            fraction: run.fraction,
        })
    }
}

/// Progress of a single grading run
struct Run {
    stage: Stage,
    validated: bool,
    message: String,
    fraction: f64,
}

impl Run {
    fn advance(&mut self, stage: Stage) {
        log::debug!("Grading stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    fn drive(
        &mut self,
        session: &mut Session,
        question: &QuestionConfig,
        evaluator: &dyn ScriptEvaluator,
        submission: &str,
        vars: Variables,
    ) -> Result<(), GradeError> {
        self.advance(Stage::Configuring);
        if !question.whitelist.is_empty() {
            session.whitelist(question.whitelist.clone())?;
        } else if !question.blacklist.is_empty() {
            session.blacklist(question.blacklist.clone())?;
        }
        if !question.requirelist.is_empty() {
            session.set_required(question.requirelist.clone())?;
        }

        self.advance(Stage::Loading);
        session.load_code(submission)?;
        self.validated = true;

        self.advance(Stage::Seeding);
        session.limit_runtime(question.runlimit)?;
        session.set_state(&script_vars_to_system_state(&vars))?;

        self.advance(Stage::Running);
        session.run()?;

        self.advance(Stage::Collecting);
        let state = session.get_state(true)?;
        if let Err(e) = session.close() {
            log::warn!("Simulator teardown failed after collecting state: {e}");
        }

        let mut vars = vars;
        vars.extend(system_state_to_script_vars(&state));
        vars.insert("grade".to_string(), Value::from(0));

        let vars = evaluator
            .evaluate(&question.grading_code, vars)
            .map_err(GradeError::Script)?;

        if let Some(message) = vars.get("message") {
            self.message = value_to_text(message);
        }
        self.fraction = clamp_fraction(vars.get("grade"));
        self.advance(Stage::Graded);
        Ok(())
    }
}

/// Renames script variables into simulator state names
///
/// `R<digits>` names a numbered location and becomes the bare address, with
/// leading zeros dropped. Every other name passes through unchanged.
pub fn script_vars_to_system_state(vars: &Variables) -> StateMap {
    vars.iter()
        .map(|(name, value)| {
            let name = match name.strip_prefix('R') {
                Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                    let address = digits.trim_start_matches('0');
                    let address = if address.is_empty() { "0" } else { address };
                    address.to_string()
                }
                _ => name.clone(),
            };
            (name, value_to_text(value))
        })
        .collect()
}

/// Renames simulator state into names a script can use
///
/// Names starting with a digit or underscore get an `R` prefix, anything
/// outside `[A-Za-z0-9_]` is removed, and names left empty are dropped.
pub fn system_state_to_script_vars(state: &StateMap) -> Variables {
    let mut vars = Variables::new();
    for (name, value) in state.iter() {
        let prefixed = match name.chars().next() {
            Some(c) if c.is_ascii_digit() || c == '_' => format!("R{name}"),
            _ => name.to_string(),
        };
        let name: String = prefixed
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() {
            vars.insert(name, text_to_value(value));
        }
    }
    vars
}

/// Clamps whatever the grading script left in `grade` into `[0, 1]`
///
/// Anything that is not a number, or a string holding one, grades as zero.
pub fn clamp_fraction(grade: Option<&Value>) -> f64 {
    let grade = match grade {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if grade.is_nan() { 0.0 } else { grade.clamp(0.0, 1.0) }
}

/// Wire text for a script value
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) | Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Script value for wire text; numeric strings become numbers
fn text_to_value(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}
