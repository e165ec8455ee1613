//! Plain-text digest of one run's new items.

use itertools::Itertools;
use serde::Serialize;

use crate::models::CandidateRecord;

const RULE: &str = "------------------------";

/// One outbound message covering a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Digest {
    pub subject: String,
    pub body: String,
}

impl Digest {
    /// Build the digest for `items`, keeping their order.
    pub fn build(items: &[CandidateRecord]) -> Self {
        let noun = if items.len() == 1 { "kitten" } else { "kittens" };
        let subject = format!("New Kittens Alert: Found {} new {}!", items.len(), noun);

        let blocks = items.iter().map(item_block).join("\n");
        let body = format!(
            "New kittens found at SF SPCA!\n\n{}\nGo check them out!\n",
            blocks
        );
        Self { subject, body }
    }
}

fn item_block(item: &CandidateRecord) -> String {
    let age = item
        .age
        .map(|a| format!("{} months", a))
        .unwrap_or_else(|| "unknown".to_string());
    let gender = item
        .gender
        .map(|g| g.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Name: {}\nAge: {}\nGender: {}\nLink: {}\n{}\n",
        item.name, age, gender, item.link, RULE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Gender;

    fn cat(name: &str, age: Option<u32>) -> CandidateRecord {
        CandidateRecord {
            name: name.to_string(),
            link: format!("https://example.org/cats/{}", name.to_lowercase()),
            age,
            gender: Some(Gender::Male),
        }
    }

    #[test]
    fn test_subject_counts_items() {
        assert_eq!(
            Digest::build(&[cat("A", Some(1))]).subject,
            "New Kittens Alert: Found 1 new kitten!"
        );
        assert_eq!(
            Digest::build(&[cat("A", Some(1)), cat("B", Some(2))]).subject,
            "New Kittens Alert: Found 2 new kittens!"
        );
    }

    #[test]
    fn test_body_lists_items_in_run_order() {
        let digest = Digest::build(&[cat("Zed", Some(2)), cat("Amy", Some(3))]);
        let zed = digest.body.find("Name: Zed").unwrap();
        let amy = digest.body.find("Name: Amy").unwrap();
        assert!(zed < amy);
        assert!(digest.body.contains("Age: 2 months"));
        assert!(digest.body.contains("Gender: Male"));
        assert!(digest.body.contains("Link: https://example.org/cats/amy"));
        assert!(digest.body.ends_with("Go check them out!\n"));
    }

    #[test]
    fn test_unknown_age_is_spelled_out() {
        let digest = Digest::build(&[cat("Ghost", None)]);
        assert!(digest.body.contains("Age: unknown"));
    }
}
