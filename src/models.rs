//! Data models shared by the watcher's components.
//!
//! - [`ListingEntry`]: one raw entry scraped from the listing page
//! - [`ExtractedFacts`]: the fully matched facts of a detail page
//! - [`CandidateRecord`]: an item under evaluation during a single run
//! - [`PersistedRecord`]: an item that was stored (and therefore notified)
//!
//! An item's identity is its detail-page link. The store enforces uniqueness
//! on it; nothing else in the crate assumes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Gender as published on the detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownGender(pub String);

impl fmt::Display for UnknownGender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown gender '{}' (expected male or female)", self.0)
    }
}

impl std::error::Error for UnknownGender {}

impl FromStr for Gender {
    type Err = UnknownGender;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(UnknownGender(other.to_string())),
        }
    }
}

/// An entry as read from the listing page.
///
/// Either field may be absent when the page markup is incomplete; the engine
/// skips such entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: Option<String>,
    pub link: Option<String>,
}

impl ListingEntry {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            link: Some(link.into()),
        }
    }

    /// Name and link, both trimmed and non-empty.
    pub fn identity(&self) -> Option<(&str, &str)> {
        let name = self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let link = self.link.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some((name, link))
    }
}

/// Facts pulled out of a detail page. Only built when every field matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedFacts {
    pub age_months: u32,
    pub gender: Gender,
}

/// An item under evaluation in the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateRecord {
    pub name: String,
    pub link: String,
    /// Age in months.
    pub age: Option<u32>,
    pub gender: Option<Gender>,
}

impl CandidateRecord {
    pub fn from_facts(name: &str, link: &str, facts: ExtractedFacts) -> Self {
        Self {
            name: name.to_string(),
            link: link.to_string(),
            age: Some(facts.age_months),
            gender: Some(facts.gender),
        }
    }
}

/// A row of the `items` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedRecord {
    pub id: i64,
    pub name: String,
    pub age: Option<i64>,
    pub gender: Option<Gender>,
    pub link: String,
    pub discovered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_parse_is_case_insensitive() {
        assert_eq!("Male".parse::<Gender>().unwrap(), Gender::Male);
        assert_eq!(" FEMALE ".parse::<Gender>().unwrap(), Gender::Female);
        assert_eq!("f".parse::<Gender>().unwrap(), Gender::Female);
        assert!("unknown".parse::<Gender>().is_err());
    }

    #[test]
    fn test_gender_display_round_trips_storage_text() {
        assert_eq!(Gender::Male.to_string(), "Male");
        assert_eq!(Gender::Female.as_str().parse::<Gender>().unwrap(), Gender::Female);
    }

    #[test]
    fn test_listing_entry_identity_requires_both_fields() {
        let full = ListingEntry::new("Miso", "https://example.org/cats/1");
        assert_eq!(full.identity(), Some(("Miso", "https://example.org/cats/1")));

        let no_link = ListingEntry {
            name: Some("Miso".into()),
            link: None,
        };
        assert_eq!(no_link.identity(), None);

        let blank_name = ListingEntry {
            name: Some("   ".into()),
            link: Some("https://example.org/cats/1".into()),
        };
        assert_eq!(blank_name.identity(), None);
    }

    #[test]
    fn test_candidate_from_facts_fills_every_field() {
        let facts = ExtractedFacts {
            age_months: 3,
            gender: Gender::Female,
        };
        let c = CandidateRecord::from_facts("Pepper", "https://example.org/cats/2", facts);
        assert_eq!(c.age, Some(3));
        assert_eq!(c.gender, Some(Gender::Female));
        assert_eq!(c.link, "https://example.org/cats/2");
    }
}
