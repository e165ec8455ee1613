//! Fact extraction from a detail page's facts text.
//!
//! The facts block of a detail page renders as loose text, for example:
//!
//! ```text
//! Age: 3 months
//! Gender: Male
//! Color: Brown Tabby
//! ```
//!
//! Extraction is all-or-nothing: if any target field fails to match, the whole
//! page counts as unparseable. Ambiguous input is dropped, never guessed.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ExtractError;
use crate::models::{ExtractedFacts, Gender};

/// Age in whole months: `Age: 3 months`, `Age: 11 mos`, `Age:2 m`.
pub const DEFAULT_AGE_PATTERN: &str = r"(?i)Age:\s*(\d+)\s*m(?:o|os|onth|onths)?\b";

pub const DEFAULT_GENDER_PATTERN: &str = r"(?i)Gender:\s*(Male|Female)\b";

static AGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_AGE_PATTERN).expect("static age pattern"));

static GENDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_GENDER_PATTERN).expect("static gender pattern"));

/// Turns facts text into [`ExtractedFacts`]. Pure and deterministic.
pub trait Extractor: Send + Sync {
    /// `None` means "unparseable".
    fn extract(&self, facts: &str) -> Option<ExtractedFacts>;
}

/// Regex-driven [`Extractor`].
///
/// Each pattern must have exactly one capture group: the age group must
/// capture an integer number of months, the gender group a value accepted by
/// `Gender::from_str`.
#[derive(Debug, Clone)]
pub struct RegexExtractor {
    age: Regex,
    gender: Regex,
}

impl Default for RegexExtractor {
    fn default() -> Self {
        Self {
            age: AGE_RE.clone(),
            gender: GENDER_RE.clone(),
        }
    }
}

impl RegexExtractor {
    /// Build an extractor from custom patterns.
    ///
    /// # Arguments
    ///
    /// * `age` - Pattern whose first capture group is the age in months
    /// * `gender` - Pattern whose first capture group is `Male` or `Female`
    ///
    /// # Errors
    ///
    /// [`ExtractError::Pattern`] naming the field whose pattern does not compile.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let ex = RegexExtractor::with_patterns(DEFAULT_AGE_PATTERN, r"Sex:\s*(Male|Female)")?;
    /// ```
    pub fn with_patterns(age: &str, gender: &str) -> Result<Self, ExtractError> {
        let age = Regex::new(age).map_err(|source| ExtractError::Pattern {
            field: "age",
            source,
        })?;
        let gender = Regex::new(gender).map_err(|source| ExtractError::Pattern {
            field: "gender",
            source,
        })?;
        Ok(Self { age, gender })
    }

    fn age_months(&self, facts: &str) -> Option<u32> {
        let caps = self.age.captures(facts)?;
        caps.get(1)?.as_str().trim().parse::<u32>().ok()
    }

    fn gender(&self, facts: &str) -> Option<Gender> {
        let caps = self.gender.captures(facts)?;
        caps.get(1)?.as_str().parse::<Gender>().ok()
    }
}

impl Extractor for RegexExtractor {
    fn extract(&self, facts: &str) -> Option<ExtractedFacts> {
        let age_months = self.age_months(facts)?;
        let gender = self.gender(facts)?;
        Some(ExtractedFacts { age_months, gender })
    }
}
