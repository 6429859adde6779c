//! Delta feed pagination and coalescing.
//!
//! The change feed is cursor-based: each page carries `value[]` plus
//! either `@odata.nextLink` (more pages available now) or
//! `@odata.deltaLink` (end of this cycle; the cursor for the next one).
//! The first cycle of a fresh mount starts at `token=latest`, meaning
//! "only changes from now on" - existing items are discovered lazily by
//! the metadata cache instead of through an expensive full enumeration.
//!
//! Per the API contract, when an item appears multiple times in one cycle
//! the *last* record is authoritative; [`coalesce`] folds a cycle's pages
//! down to that record per id.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use nimbus_core::types::ItemId;

use crate::client::GraphClient;
use crate::error::GraphError;
use crate::item::DriveItem;

/// Path starting a delta cycle with no saved cursor.
pub const DELTA_LATEST_PATH: &str = "/me/drive/root/delta?token=latest";

/// One page of the change feed.
#[derive(Debug, Deserialize)]
pub struct DeltaPage {
    #[serde(default)]
    pub value: Vec<DriveItem>,
    /// Present when more pages are available in this cycle.
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
    /// Present on the final page; the cursor for the next cycle.
    #[serde(rename = "@odata.deltaLink")]
    pub delta_link: Option<String>,
}

impl GraphClient {
    /// Fetches one page of the change feed.
    ///
    /// `link` is either [`DELTA_LATEST_PATH`] (first cycle), an absolute
    /// `deltaLink` cursor, or an absolute `nextLink` continuation.
    pub async fn delta_page(&self, link: &str) -> Result<DeltaPage, GraphError> {
        let resp = self.get_raw(link).await?;
        let page: DeltaPage = Self::decode_json(resp)?;
        debug!(
            items = page.value.len(),
            has_next = page.next_link.is_some(),
            has_cursor = page.delta_link.is_some(),
            "fetched delta page"
        );
        Ok(page)
    }
}

/// Folds the items of one delta cycle into the authoritative record per id.
pub fn coalesce(items: impl IntoIterator<Item = DriveItem>) -> HashMap<ItemId, DriveItem> {
    let mut latest: HashMap<ItemId, DriveItem> = HashMap::new();
    for item in items {
        latest.insert(ItemId::new(item.id.clone()), item);
    }
    latest
}

/// Extracts the `token` parameter from a `deltaLink` cursor URL.
///
/// The cursor is treated as opaque for resumption; the token is only
/// pulled out for logging and diagnostics.
pub fn cursor_token(delta_link: &str) -> Option<String> {
    url::Url::parse(delta_link).ok().and_then(|parsed| {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    })
}
