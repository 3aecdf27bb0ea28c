//! Workshop URL parsing and the metadata scraper contract
//!
//! The HTML scraper proper is an external collaborator; this module owns
//! its contract ([`MetadataFetcher`]) plus the thin reqwest-backed default
//! implementation, and the URL validation used at submission time.

use crate::error::{Error, Result};
use crate::types::{ItemId, WorkshopItem};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

/// Extract the numeric item id from a workshop URL.
///
/// Accepts any URL carrying an `id=<digits>` query parameter, e.g.
/// `https://steamcommunity.com/sharedfiles/filedetails/?id=123456789`.
pub fn parse_workshop_url(url: &str) -> Result<ItemId> {
    static ID_RE: OnceLock<Regex> = OnceLock::new();
    let re = ID_RE.get_or_init(|| {
        Regex::new(r"[?&]id=(\d+)").unwrap_or_else(|_| unreachable!("static pattern"))
    });

    let captures = re
        .captures(url)
        .ok_or_else(|| Error::InvalidUrl(format!("no id parameter in '{url}'")))?;

    let digits = &captures[1];
    let id: u64 = digits
        .parse()
        .map_err(|_| Error::InvalidUrl(format!("item id '{digits}' out of range")))?;

    if id == 0 {
        return Err(Error::InvalidUrl("item id must be non-zero".into()));
    }
    Ok(ItemId(id))
}

/// Contract for fetching workshop item metadata.
///
/// The production implementation scrapes the item's public page; tests
/// inject stubs. Implementations must set `valid = false` (or error)
/// when the page does not describe a real item.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetch the metadata snapshot for an item.
    async fn fetch(&self, item_id: ItemId) -> Result<WorkshopItem>;
}

/// Default [`MetadataFetcher`] scraping the public workshop item page.
pub struct HttpMetadataFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetadataFetcher {
    /// Create a fetcher against the public workshop.
    pub fn new() -> Self {
        Self::with_base_url("https://steamcommunity.com")
    }

    /// Create a fetcher against an alternate base URL (test servers).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for HttpMetadataFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, item_id: ItemId) -> Result<WorkshopItem> {
        let url = format!(
            "{}/sharedfiles/filedetails/?id={}",
            self.base_url, item_id
        );
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(parse_item_page(item_id, &body))
    }
}

/// Parse the interesting fields out of a workshop item page.
///
/// Pure function so the extraction rules are unit-testable without HTTP.
/// Missing title or app id marks the snapshot invalid; the submit path
/// turns that into `invalid_item`.
pub fn parse_item_page(item_id: ItemId, html: &str) -> WorkshopItem {
    static TITLE_RE: OnceLock<Regex> = OnceLock::new();
    static AUTHOR_RE: OnceLock<Regex> = OnceLock::new();
    static APP_RE: OnceLock<Regex> = OnceLock::new();
    static PREVIEW_RE: OnceLock<Regex> = OnceLock::new();
    static SIZE_RE: OnceLock<Regex> = OnceLock::new();

    let title_re = TITLE_RE.get_or_init(|| {
        Regex::new(r#"<div class="workshopItemTitle">([^<]+)</div>"#)
            .unwrap_or_else(|_| unreachable!("static pattern"))
    });
    let author_re = AUTHOR_RE.get_or_init(|| {
        Regex::new(r#"<div class="friendBlockContent">\s*([^<\r\n]+?)\s*<br"#)
            .unwrap_or_else(|_| unreachable!("static pattern"))
    });
    let app_re = APP_RE.get_or_init(|| {
        Regex::new(r#"data-appid="(\d+)"|steamcommunity\.com/app/(\d+)"#)
            .unwrap_or_else(|_| unreachable!("static pattern"))
    });
    let preview_re = PREVIEW_RE.get_or_init(|| {
        Regex::new(r#"<img[^>]+id="previewImageMain"[^>]+src="([^"]+)""#)
            .unwrap_or_else(|_| unreachable!("static pattern"))
    });
    let size_re = SIZE_RE.get_or_init(|| {
        Regex::new(r#"<div class="detailsStatRight">([\d.,]+)\s*(KB|MB|GB)</div>"#)
            .unwrap_or_else(|_| unreachable!("static pattern"))
    });

    let title = title_re
        .captures(html)
        .map(|c| c[1].trim().to_string());
    let author = author_re.captures(html).map(|c| c[1].trim().to_string());
    let app_id = app_re.captures(html).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .and_then(|m| m.as_str().parse::<u32>().ok())
    });
    let preview_url = preview_re.captures(html).map(|c| c[1].to_string());
    let declared_size = size_re.captures(html).and_then(|c| {
        let number: f64 = c[1].replace(',', "").parse().ok()?;
        let multiplier = match &c[2] {
            "KB" => 1024.0,
            "MB" => 1024.0 * 1024.0,
            _ => 1024.0 * 1024.0 * 1024.0,
        };
        Some((number * multiplier) as u64)
    });

    let valid = title.is_some() && app_id.is_some();

    WorkshopItem {
        item_id,
        app_id: app_id.unwrap_or(0),
        title: title.unwrap_or_default(),
        author,
        preview_url,
        declared_size,
        valid,
    }
}
