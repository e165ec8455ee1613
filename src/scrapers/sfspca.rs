//! SF SPCA adoption listing scraper.
//!
//! The listing page renders one `.adoption__item` card per animal. The card's
//! `.adoption__item--name` element holds the display name and an anchor to the
//! detail page. Detail pages carry their facts (age, gender, …) inside
//! `.adoptionFacts__div`.
//!
//! # URL Pattern
//!
//! Detail links may be relative; they are resolved against the listing URL to
//! absolute URLs like `https://www.sfspca.org/adoptions/pet-details/12345`.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

use super::ListingSource;
use crate::error::FetchError;
use crate::models::ListingEntry;

pub const DEFAULT_LISTING_URL: &str = "https://www.sfspca.org/adoptions/cats/";

const ITEM_SELECTOR: &str = ".adoption__item";
const NAME_SELECTOR: &str = ".adoption__item--name";
const FACTS_SELECTOR: &str = ".adoptionFacts__div";

/// HTTP-backed [`ListingSource`] for the SF SPCA adoption pages.
#[derive(Debug, Clone)]
pub struct SfSpcaSource {
    client: Client,
    listing_url: Url,
}

impl SfSpcaSource {
    /// Every request made by the source is bounded by `timeout`.
    pub fn new(listing_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let listing_url = Url::parse(listing_url).map_err(|source| FetchError::InvalidUrl {
            url: listing_url.to_string(),
            source,
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("adoption_watch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| FetchError::Http {
                url: listing_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            listing_url,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let http = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(http)
    }
}

#[async_trait]
impl ListingSource for SfSpcaSource {
    #[instrument(level = "info", skip_all, fields(url = %self.listing_url))]
    async fn fetch_listing(&self) -> Result<Vec<ListingEntry>, FetchError> {
        let html = self.get_text(self.listing_url.as_str()).await?;
        let entries = parse_listing(&html, &self.listing_url)?;
        info!(count = entries.len(), "Indexed listing entries");
        Ok(entries)
    }

    #[instrument(level = "debug", skip_all, fields(%link))]
    async fn fetch_details(&self, link: &str) -> Result<String, FetchError> {
        let html = self.get_text(link).await?;
        let facts = parse_facts(&html, link)?;
        debug!(bytes = facts.len(), "Parsed detail facts");
        Ok(facts)
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read every listing card. A page without any card is treated as not
/// rendered and reported as missing content.
pub fn parse_listing(html: &str, base: &Url) -> Result<Vec<ListingEntry>, FetchError> {
    let document = Html::parse_document(html);
    let item_selector = selector(ITEM_SELECTOR);
    let name_selector = selector(NAME_SELECTOR);
    let anchor_selector = selector("a[href]");

    let items: Vec<ElementRef<'_>> = document.select(&item_selector).collect();
    if items.is_empty() {
        return Err(FetchError::MissingContent {
            url: base.to_string(),
            selector: ITEM_SELECTOR.to_string(),
        });
    }

    let entries = items
        .into_iter()
        .map(|item| {
            let Some(name_el) = item.select(&name_selector).next() else {
                return ListingEntry::default();
            };
            let name = Some(element_text(name_el)).filter(|n| !n.is_empty());
            let link = name_el
                .select(&anchor_selector)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| base.join(href).ok())
                .map(|u| u.to_string());
            ListingEntry { name, link }
        })
        .collect();
    Ok(entries)
}

/// Facts text of a detail page.
pub fn parse_facts(html: &str, url: &str) -> Result<String, FetchError> {
    let document = Html::parse_document(html);
    let facts_selector = selector(FACTS_SELECTOR);
    document
        .select(&facts_selector)
        .next()
        .map(|el| {
            el.text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .ok_or_else(|| FetchError::MissingContent {
            url: url.to_string(),
            selector: FACTS_SELECTOR.to_string(),
        })
}
