//! Listing sources the watcher can poll.
//!
//! A source works in two phases, like a news index/fetch pass:
//!
//! 1. **Listing**: read the listing page into [`ListingEntry`] values
//!    (display name + detail link), in page order
//! 2. **Details**: fetch one entry's detail page and return its facts text
//!
//! Absence of the expected markup is a fetch failure, not a parse failure:
//! a page that never rendered its content cannot be judged.
//!
//! # Supported Sources
//!
//! | Source | Module | Method |
//! |--------|--------|--------|
//! | SF SPCA adoptions | [`sfspca`] | HTML scraping |

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::ListingEntry;

pub mod sfspca;

/// A listing page plus the detail pages it links to.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Entries on the listing page, in page order.
    async fn fetch_listing(&self) -> Result<Vec<ListingEntry>, FetchError>;

    /// Facts text of the detail page behind `link`.
    async fn fetch_details(&self, link: &str) -> Result<String, FetchError>;
}
