use rand::Rng;
use rand::seq::SliceRandom;

use course_core::model::Question;

use crate::error::AssessmentError;

/// Lifecycle of one assessment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssessmentPhase {
    #[default]
    NotStarted,
    InProgress,
    Submitted,
}

/// A question as shown to the learner: source text plus this run's choice
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedQuestion {
    pub question: Question,
    pub choices: Vec<String>,
}

/// Result of a graded submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub score: usize,
    pub total: usize,
}

impl SubmitOutcome {
    /// Pass threshold is 80 percent, in integer arithmetic.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.score * 5 >= self.total * 4
    }
}

/// State machine for one quiz lesson.
///
/// Built from the lesson's question list, which is kept verbatim as the
/// source; every run (start or retake) presents a fresh shuffle of both the
/// question order and each question's choices. Grading compares the chosen
/// text against the source answer, so shuffling can never change which
/// choice is correct.
#[derive(Debug, Clone)]
pub struct AssessmentEngine {
    source: Vec<Question>,
    phase: AssessmentPhase,
    presented: Vec<PresentedQuestion>,
    answers: Vec<Option<usize>>,
    score: Option<usize>,
}

impl AssessmentEngine {
    /// # Errors
    ///
    /// Returns `AssessmentError::Empty` for an empty question list; such a
    /// lesson is rejected at load time and must never reach the engine.
    pub fn new(source: Vec<Question>) -> Result<Self, AssessmentError> {
        if source.is_empty() {
            return Err(AssessmentError::Empty);
        }
        Ok(Self {
            source,
            phase: AssessmentPhase::NotStarted,
            presented: Vec::new(),
            answers: Vec::new(),
            score: None,
        })
    }

    #[must_use]
    pub fn phase(&self) -> AssessmentPhase {
        self.phase
    }

    /// Questions in this run's presentation order; empty before the first
    /// start.
    #[must_use]
    pub fn questions(&self) -> &[PresentedQuestion] {
        &self.presented
    }

    /// The learner's current choice index per question.
    #[must_use]
    pub fn answers(&self) -> &[Option<usize>] {
        &self.answers
    }

    /// Score of the graded run, absent until submitted.
    #[must_use]
    pub fn score(&self) -> Option<SubmitOutcome> {
        self.score.map(|score| SubmitOutcome {
            score,
            total: self.presented.len(),
        })
    }

    /// Begin the run with a fresh shuffle.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError::AlreadyStarted` unless the engine is
    /// untouched.
    pub fn start(&mut self) -> Result<(), AssessmentError> {
        self.start_with_rng(&mut rand::rng())
    }

    /// [`AssessmentEngine::start`] with a caller-provided randomness source.
    ///
    /// # Errors
    ///
    /// Same as `start`.
    pub fn start_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), AssessmentError> {
        if self.phase != AssessmentPhase::NotStarted {
            return Err(AssessmentError::AlreadyStarted);
        }
        self.deal(rng);
        Ok(())
    }

    /// Record (or change) an answer.
    ///
    /// # Errors
    ///
    /// Returns `NotInProgress` outside a run and `IndexOutOfRange` for a bad
    /// question or choice index; the recorded answers are unchanged.
    pub fn answer(&mut self, question: usize, choice: usize) -> Result<(), AssessmentError> {
        if self.phase != AssessmentPhase::InProgress {
            return Err(AssessmentError::NotInProgress);
        }
        let presented = self
            .presented
            .get(question)
            .ok_or(AssessmentError::IndexOutOfRange(question))?;
        if choice >= presented.choices.len() {
            return Err(AssessmentError::IndexOutOfRange(choice));
        }
        self.answers[question] = Some(choice);
        Ok(())
    }

    /// Grade the run.
    ///
    /// # Errors
    ///
    /// Returns `NotInProgress` outside a run and `Unanswered` with the count
    /// of open questions when the run is incomplete; an incomplete run stays
    /// in progress.
    pub fn submit(&mut self) -> Result<SubmitOutcome, AssessmentError> {
        if self.phase != AssessmentPhase::InProgress {
            return Err(AssessmentError::NotInProgress);
        }
        let unanswered = self.answers.iter().filter(|a| a.is_none()).count();
        if unanswered > 0 {
            return Err(AssessmentError::Unanswered(unanswered));
        }

        let score = self
            .presented
            .iter()
            .zip(&self.answers)
            .filter(|(presented, answer)| {
                answer.is_some_and(|choice| presented.question.is_correct(&presented.choices[choice]))
            })
            .count();
        self.phase = AssessmentPhase::Submitted;
        self.score = Some(score);
        Ok(SubmitOutcome {
            score,
            total: self.presented.len(),
        })
    }

    /// Discard the graded run and start over with a fresh shuffle.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError::NotSubmitted` unless the current run has
    /// been graded.
    pub fn retake(&mut self) -> Result<(), AssessmentError> {
        self.retake_with_rng(&mut rand::rng())
    }

    /// [`AssessmentEngine::retake`] with a caller-provided randomness source.
    ///
    /// # Errors
    ///
    /// Same as `retake`.
    pub fn retake_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), AssessmentError> {
        if self.phase != AssessmentPhase::Submitted {
            return Err(AssessmentError::NotSubmitted);
        }
        self.deal(rng);
        Ok(())
    }

    fn deal<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut presented: Vec<PresentedQuestion> = self
            .source
            .iter()
            .map(|question| {
                let mut choices = question.choices.clone();
                choices.shuffle(rng);
                PresentedQuestion {
                    question: question.clone(),
                    choices,
                }
            })
            .collect();
        presented.shuffle(rng);

        self.answers = vec![None; presented.len()];
        self.presented = presented;
        self.score = None;
        self.phase = AssessmentPhase::InProgress;
    }
}
