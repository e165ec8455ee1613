//! Which candidates are worth a notification.
//!
//! Thresholds are configuration, not policy: the age cut-off and the accepted
//! genders come from the CLI. The filter fails closed on missing data.

use crate::models::{CandidateRecord, Gender};

/// Outcome of [`EligibilityFilter::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    MissingAge,
    TooOld { age: u32, max: u32 },
    MissingGender,
    GenderNotAccepted(Gender),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Eligibility::Eligible => "eligible",
            Eligibility::MissingAge => "age unknown",
            Eligibility::TooOld { .. } => "too old",
            Eligibility::MissingGender => "gender unknown",
            Eligibility::GenderNotAccepted(_) => "gender not accepted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityFilter {
    /// Inclusive upper bound, in months.
    pub max_age_months: u32,
    /// `None` accepts any gender, including an unknown one.
    pub accepted_genders: Option<Vec<Gender>>,
}

impl EligibilityFilter {
    pub fn new(max_age_months: u32, accepted_genders: Option<Vec<Gender>>) -> Self {
        Self {
            max_age_months,
            accepted_genders: accepted_genders.filter(|g| !g.is_empty()),
        }
    }

    /// Check a candidate against the thresholds.
    ///
    /// Age is checked first, then gender. A missing fact that a threshold
    /// needs rejects the candidate.
    ///
    /// # Returns
    ///
    /// [`Eligibility::Eligible`], or the first reason the candidate fails.
    pub fn evaluate(&self, candidate: &CandidateRecord) -> Eligibility {
        let Some(age) = candidate.age else {
            return Eligibility::MissingAge;
        };
        if age > self.max_age_months {
            return Eligibility::TooOld {
                age,
                max: self.max_age_months,
            };
        }
        if let Some(accepted) = &self.accepted_genders {
            match candidate.gender {
                None => return Eligibility::MissingGender,
                Some(g) if !accepted.contains(&g) => return Eligibility::GenderNotAccepted(g),
                Some(_) => {}
            }
        }
        Eligibility::Eligible
    }
}
