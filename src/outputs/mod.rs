//! Outbound notification for one run's new items.
//!
//! # Submodules
//!
//! - [`digest`]: renders the subject and plain-text body
//! - [`mail`]: delivers a digest through an HTTP mail API
//!
//! Notification happens after the store inserts and is not coupled to them:
//! a failed delivery is logged and the inserted items stay inserted, so an
//! item is recorded at most once and notified at most once.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::models::CandidateRecord;

pub mod digest;
pub mod mail;

use digest::Digest;
use mail::MailTransport;

/// What happened to a run's digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotifyOutcome {
    /// Nothing new; no transport call
    Empty,
    /// No credentials; no transport call
    Unconfigured,
    Sent { count: usize },
    Failed { error: String },
}

/// Reports a run's new items.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called once per completed run, with every item that run inserted.
    ///
    /// Never fails: delivery problems are logged and returned as
    /// [`NotifyOutcome::Failed`].
    async fn notify(&self, new_items: &[CandidateRecord]) -> NotifyOutcome;
}

/// [`Notifier`] sending one [`Digest`] per run.
pub struct DigestNotifier {
    transport: Option<Arc<dyn MailTransport>>,
}

impl DigestNotifier {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    /// A notifier that logs and skips every send.
    pub fn unconfigured() -> Self {
        Self { transport: None }
    }
}

#[async_trait]
impl Notifier for DigestNotifier {
    #[instrument(level = "info", skip_all, fields(count = new_items.len()))]
    async fn notify(&self, new_items: &[CandidateRecord]) -> NotifyOutcome {
        if new_items.is_empty() {
            info!("No new items to report");
            return NotifyOutcome::Empty;
        }

        let Some(transport) = &self.transport else {
            error!(
                "Missing mail configuration; set KITTY_SENDER_EMAIL, KITTY_APP_PASSWORD and KITTY_RECEIVER_EMAIL"
            );
            return NotifyOutcome::Unconfigured;
        };

        let digest = Digest::build(new_items);
        match transport.send(&digest).await {
            Ok(()) => {
                info!(count = new_items.len(), "Summary sent for new items");
                NotifyOutcome::Sent {
                    count: new_items.len(),
                }
            }
            Err(e) => {
                error!(error = %e, "Error sending summary");
                NotifyOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailError;
    use crate::models::Gender;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Digest>>,
        fail: bool,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, digest: &Digest) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(digest.clone());
            if self.fail {
                return Err(MailError::Rejected {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(())
        }
    }

    fn cat(name: &str) -> CandidateRecord {
        CandidateRecord {
            name: name.into(),
            link: format!("https://example.org/cats/{}", name),
            age: Some(2),
            gender: Some(Gender::Female),
        }
    }

    #[tokio::test]
    async fn test_empty_run_makes_no_transport_call() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = DigestNotifier::new(transport.clone());
        assert_eq!(notifier.notify(&[]).await, NotifyOutcome::Empty);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_digest_for_whole_run() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = DigestNotifier::new(transport.clone());
        let outcome = notifier.notify(&[cat("a"), cat("b")]).await;
        assert_eq!(outcome, NotifyOutcome::Sent { count: 2 });

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("Name: a"));
        assert!(sent[0].body.contains("Name: b"));
    }

    #[tokio::test]
    async fn test_unconfigured_notifier_skips_send() {
        let notifier = DigestNotifier::unconfigured();
        assert_eq!(notifier.notify(&[cat("a")]).await, NotifyOutcome::Unconfigured);
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported_not_raised() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let notifier = DigestNotifier::new(transport.clone());
        match notifier.notify(&[cat("a")]).await {
            NotifyOutcome::Failed { error } => assert!(error.contains("500")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }
}
