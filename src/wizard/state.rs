//! Wizard state machine — named screens, events, and guarded transitions.
//!
//! Screens are a tagged union (one variant per step) and every button in
//! the UI maps to an [`Event`]. `apply` is the single transition function;
//! forward moves are gated by the local validation guards, so an
//! incomplete screen can never advance. The two terminal network calls are
//! two-phase: the caller validates and builds the payload here, performs
//! the request, and only then feeds back `Submitted` / `OfferAccepted`.

use serde::{Deserialize, Serialize};

use super::validation::{MIN_DETAIL_CHARS, detail_long_enough, is_money_amount};
use crate::session::model::DownsellVariant;

/// Reason key submitted when the downsell offer is accepted.
pub const DOWNSELL_REASON_KEY: &str = "accepted_downsell";

/// Why the user is cancelling, chosen on the reason screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKey {
    TooExpensive,
    PlatformNotHelpful,
    NotEnoughRelevantJobs,
    DecidedNotToMove,
    Other,
}

impl ReasonKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooExpensive => "too_expensive",
            Self::PlatformNotHelpful => "platform_not_helpful",
            Self::NotEnoughRelevantJobs => "not_enough_relevant_jobs",
            Self::DecidedNotToMove => "decided_not_to_move",
            Self::Other => "other",
        }
    }

    /// All reasons, in the order the chooser lists them.
    pub fn all() -> [ReasonKey; 5] {
        [
            Self::TooExpensive,
            Self::PlatformNotHelpful,
            Self::NotEnoughRelevantJobs,
            Self::DecidedNotToMove,
            Self::Other,
        ]
    }
}

impl std::fmt::Display for ReasonKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Application/outreach count buckets on the survey screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountRange {
    #[serde(rename = "0")]
    Zero,
    #[serde(rename = "1-5")]
    OneToFive,
    #[serde(rename = "6-20")]
    SixToTwenty,
    #[serde(rename = "20+")]
    TwentyPlus,
}

/// Interview count buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterviewRange {
    #[serde(rename = "0")]
    Zero,
    #[serde(rename = "1-2")]
    OneToTwo,
    #[serde(rename = "3-5")]
    ThreeToFive,
    #[serde(rename = "5+")]
    FivePlus,
}

/// Everything the user has answered so far. Client-only; nothing here is
/// persisted until a terminal action fires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Answers {
    pub found_via_platform: Option<bool>,
    pub applied: Option<CountRange>,
    pub emailed: Option<CountRange>,
    pub interviewed: Option<InterviewRange>,
    pub feedback: String,
    pub company_handles_visa: Option<bool>,
    pub visa_type: String,
    pub reason: Option<ReasonKey>,
    pub reason_detail: String,
}

impl Answers {
    fn job_survey_complete(&self) -> bool {
        self.found_via_platform.is_some()
            && self.applied.is_some()
            && self.emailed.is_some()
            && self.interviewed.is_some()
    }

    fn usage_survey_complete(&self) -> bool {
        self.applied.is_some() && self.emailed.is_some() && self.interviewed.is_some()
    }
}

/// The named screens of the wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// "Have you found a job yet?" — the branch chooser.
    Entry,

    // Found-a-job branch.
    JobSurvey,
    JobFeedback,
    VisaGate,
    VisaDetail { company_handles_visa: bool },
    JobDone { needs_visa_help: bool },

    // Still-looking branch.
    Offer,
    UsageSurvey,
    ReasonSelect,
    ReasonDetail(ReasonKey),
    AcceptedConfirm,
    AcceptedJobs,
    CancelDone,
}

impl Step {
    /// Absorbing screens: no further state transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::JobDone { .. } | Self::CancelDone)
    }
}

/// One user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    FoundJob,
    StillLooking,
    Continue,
    Back,
    SelectReason(ReasonKey),
    DeclineOffer,
    /// The downsell call succeeded.
    OfferAccepted,
    /// The finalize call succeeded.
    Submitted,
}

/// Where the wizard went after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Moved(Step),
    /// The event was absorbed without changing screens.
    Stayed,
    /// Discard all state and re-mount (Back on a branch's first screen).
    Reload,
    /// Leave the modal and return to the host application.
    Exit(ExitDisposition),
}

/// How the session ended, for the host application's banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    Kept,
    Canceled,
}

/// A guard blocked the event, or it does not apply here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("survey answers incomplete")]
    SurveyIncomplete,

    #[error("feedback must be at least {min} characters")]
    FeedbackTooShort { min: usize },

    #[error("visa question not answered")]
    VisaChoiceMissing,

    #[error("visa type is required")]
    VisaTypeMissing,

    #[error("no cancellation reason selected")]
    ReasonMissing,

    #[error("follow-up answer must be at least {min} characters")]
    DetailTooShort { min: usize },

    #[error("amount must be a decimal money value")]
    InvalidAmount,

    #[error("event does not apply in step {step:?}")]
    NotApplicable { step: Step },

    #[error("wizard already finished")]
    Terminal,
}

/// Payload for a finalize call, built once the current screen validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPayload {
    pub reason_key: String,
    pub reason_text: String,
}

/// The wizard: current screen plus accumulated answers.
#[derive(Debug, Clone)]
pub struct WizardState {
    variant: DownsellVariant,
    step: Step,
    pub answers: Answers,
}

impl WizardState {
    /// Fresh wizard on the entry screen.
    pub fn new(variant: DownsellVariant) -> Self {
        Self {
            variant,
            step: Step::Entry,
            answers: Answers::default(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn variant(&self) -> DownsellVariant {
        self.variant
    }

    /// The "accept offer" action is pinned to every still-looking screen
    /// that has not already ended the session.
    pub fn can_accept_offer(&self) -> bool {
        matches!(
            self.step,
            Step::Offer | Step::UsageSurvey | Step::ReasonSelect | Step::ReasonDetail(_)
        )
    }

    /// Check the terminal guard for the current screen without moving.
    pub fn validate_submit(&self) -> Result<(), TransitionError> {
        match self.step {
            Step::VisaDetail { .. } => {
                if self.answers.visa_type.trim().is_empty() {
                    Err(TransitionError::VisaTypeMissing)
                } else {
                    Ok(())
                }
            }
            Step::ReasonDetail(ReasonKey::TooExpensive) => {
                if is_money_amount(&self.answers.reason_detail) {
                    Ok(())
                } else {
                    Err(TransitionError::InvalidAmount)
                }
            }
            Step::ReasonDetail(_) => {
                if detail_long_enough(&self.answers.reason_detail) {
                    Ok(())
                } else {
                    Err(TransitionError::DetailTooShort {
                        min: MIN_DETAIL_CHARS,
                    })
                }
            }
            step => Err(TransitionError::NotApplicable { step }),
        }
    }

    /// Build the finalize payload for the current screen.
    pub fn submit_payload(&self) -> Result<SubmitPayload, TransitionError> {
        self.validate_submit()?;
        match self.step {
            Step::VisaDetail {
                company_handles_visa,
            } => {
                let source = if self.answers.found_via_platform == Some(true) {
                    "via_platform"
                } else {
                    "outside_platform"
                };
                let visa = if company_handles_visa {
                    "company_visa"
                } else {
                    "needs_visa_help"
                };
                let reason_text = serde_json::json!({
                    "foundViaPlatform": self.answers.found_via_platform,
                    "appliedRange": self.answers.applied,
                    "emailedRange": self.answers.emailed,
                    "interviewedRange": self.answers.interviewed,
                    "feedback": self.answers.feedback.trim(),
                    "companyHandlesVisa": company_handles_visa,
                    "visaType": self.answers.visa_type.trim(),
                });
                Ok(SubmitPayload {
                    reason_key: format!("job_found_{source}_{visa}"),
                    reason_text: reason_text.to_string(),
                })
            }
            Step::ReasonDetail(reason) => {
                let reason_text = serde_json::json!({
                    "usage": {
                        "appliedRange": self.answers.applied,
                        "emailedRange": self.answers.emailed,
                        "interviewedRange": self.answers.interviewed,
                    },
                    "detail": self.answers.reason_detail.trim(),
                });
                Ok(SubmitPayload {
                    reason_key: reason.as_str().to_string(),
                    reason_text: reason_text.to_string(),
                })
            }
            step => Err(TransitionError::NotApplicable { step }),
        }
    }

    /// The transition function: `(state, event) -> state`.
    pub fn apply(&mut self, event: Event) -> Result<Outcome, TransitionError> {
        use Step::*;

        if self.step.is_terminal() && event != Event::Continue {
            return Err(TransitionError::Terminal);
        }

        let outcome = match (self.step, event) {
            (Entry, Event::FoundJob) => Outcome::Moved(JobSurvey),
            (Entry, Event::StillLooking) => match self.variant {
                DownsellVariant::B => Outcome::Moved(Offer),
                DownsellVariant::A => Outcome::Moved(UsageSurvey),
            },

            // ── Found-a-job branch ──────────────────────────────────
            (JobSurvey, Event::Continue) => {
                if !self.answers.job_survey_complete() {
                    return Err(TransitionError::SurveyIncomplete);
                }
                Outcome::Moved(JobFeedback)
            }
            (JobSurvey, Event::Back) => Outcome::Reload,

            (JobFeedback, Event::Continue) => {
                if !detail_long_enough(&self.answers.feedback) {
                    return Err(TransitionError::FeedbackTooShort {
                        min: MIN_DETAIL_CHARS,
                    });
                }
                Outcome::Moved(VisaGate)
            }
            (JobFeedback, Event::Back) => Outcome::Moved(JobSurvey),

            (VisaGate, Event::Continue) => match self.answers.company_handles_visa {
                Some(company_handles_visa) => Outcome::Moved(VisaDetail {
                    company_handles_visa,
                }),
                None => return Err(TransitionError::VisaChoiceMissing),
            },
            (VisaGate, Event::Back) => Outcome::Moved(JobFeedback),

            (VisaDetail { .. }, Event::Back) => Outcome::Moved(VisaGate),
            (
                VisaDetail {
                    company_handles_visa,
                },
                Event::Submitted,
            ) => {
                self.validate_submit()?;
                Outcome::Moved(JobDone {
                    needs_visa_help: !company_handles_visa,
                })
            }

            (JobDone { .. }, Event::Continue) => Outcome::Exit(ExitDisposition::Canceled),

            // ── Still-looking branch ────────────────────────────────
            (Offer, Event::DeclineOffer) => Outcome::Moved(UsageSurvey),
            (Offer, Event::Back) => Outcome::Reload,

            (UsageSurvey, Event::Continue) => {
                if !self.answers.usage_survey_complete() {
                    return Err(TransitionError::SurveyIncomplete);
                }
                Outcome::Moved(ReasonSelect)
            }
            // Variant A enters the branch here, so there is nothing behind it.
            (UsageSurvey, Event::Back) => match self.variant {
                DownsellVariant::B => Outcome::Moved(Offer),
                DownsellVariant::A => Outcome::Stayed,
            },

            (ReasonSelect, Event::SelectReason(reason)) => {
                self.answers.reason = Some(reason);
                Outcome::Stayed
            }
            (ReasonSelect, Event::Continue) => match self.answers.reason {
                Some(reason) => Outcome::Moved(ReasonDetail(reason)),
                None => return Err(TransitionError::ReasonMissing),
            },
            (ReasonSelect, Event::Back) => Outcome::Moved(UsageSurvey),

            (ReasonDetail(_), Event::Back) => Outcome::Moved(ReasonSelect),
            (ReasonDetail(_), Event::Submitted) => {
                self.validate_submit()?;
                Outcome::Moved(CancelDone)
            }

            (Offer | UsageSurvey | ReasonSelect | ReasonDetail(_), Event::OfferAccepted) => {
                Outcome::Moved(AcceptedConfirm)
            }

            (AcceptedConfirm, Event::Continue) => Outcome::Moved(AcceptedJobs),
            (AcceptedConfirm, Event::Back) => Outcome::Exit(ExitDisposition::Kept),
            (AcceptedJobs, Event::Continue | Event::Back) => {
                Outcome::Exit(ExitDisposition::Kept)
            }

            (CancelDone, Event::Continue) => Outcome::Exit(ExitDisposition::Canceled),

            (step, _) => return Err(TransitionError::NotApplicable { step }),
        };

        if let Outcome::Moved(next) = outcome {
            self.step = next;
        }
        Ok(outcome)
    }
}
