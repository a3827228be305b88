use crate::error::GradeError;
use crate::grader::{ExecutionResult, Grader};

/// Outcome class for a graded attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradedState {
    GradedRight,
    GradedPartial,
    GradedWrong,
}

impl GradedState {
    pub fn for_fraction(fraction: f64) -> Self {
        if fraction < 0.000001 {
            Self::GradedWrong
        } else if fraction > 0.999999 {
            Self::GradedRight
        } else {
            Self::GradedPartial
        }
    }
}

/// A user-code question answered with a program
///
/// Every query about a response goes through the grader, whose cache means
/// the program is simulated once however many of these are asked about it.
pub struct UserCodeQuestion {
    grader: Grader,
}

impl UserCodeQuestion {
    pub fn new(grader: Grader) -> Self {
        Self { grader }
    }

    /// A guess at machine code essentially never earns credit
    pub fn random_guess_score(&self) -> f64 {
        0.0
    }

    fn run(&self, answer: Option<&str>) -> Result<ExecutionResult, GradeError> {
        self.grader.run_usercode(answer.unwrap_or_default())
    }

    /// A response is complete once it has code the simulator accepts
    ///
    /// Code that fails to load does not count as an attempt.
    pub fn is_complete_response(&self, answer: Option<&str>) -> Result<bool, GradeError> {
        if is_blank(answer) {
            return Ok(false);
        }
        Ok(self.run(answer)?.validated)
    }

    pub fn is_gradable_response(&self, answer: Option<&str>) -> Result<bool, GradeError> {
        self.is_complete_response(answer)
    }

    /// The load error for a response the simulator rejected
    pub fn get_validation_error(&self, answer: Option<&str>) -> Result<Option<String>, GradeError> {
        let result = self.run(answer)?;
        Ok((!result.validated).then_some(result.message))
    }

    /// Feedback from grading, or the error that stopped it
    pub fn get_grading_message(&self, answer: Option<&str>) -> Result<Option<String>, GradeError> {
        if is_blank(answer) {
            return Ok(None);
        }
        Ok(Some(self.run(answer)?.message))
    }

    pub fn grade_response(&self, answer: Option<&str>) -> Result<(f64, GradedState), GradeError> {
        let fraction = self.run(answer)?.fraction;
        Ok((fraction, GradedState::for_fraction(fraction)))
    }

    /// Two responses are the same when their code is; a missing answer
    /// counts as blank
    pub fn is_same_response(&self, a: Option<&str>, b: Option<&str>) -> bool {
        a.unwrap_or_default() == b.unwrap_or_default()
    }

    pub fn summarise_response(&self, answer: Option<&str>) -> String {
        answer.unwrap_or_default().to_string()
    }
}

fn is_blank(answer: Option<&str>) -> bool {
    answer.is_none_or(|a| a.trim().is_empty())
}
