use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

use crate::link_graph::PageLinks;

/// One entry of a project's page list.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSummary {
    pub title: String,
    /// Seconds since the Unix epoch.
    pub updated: i64,
    /// The raw list entry, written out as `json.json`.
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageDetail {
    pub title: String,
    pub lines: Vec<String>,
    pub related: Option<RelatedPages>,
}

impl PageDetail {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Related-page data the detail endpoint returns alongside a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RelatedPages {
    #[serde(default, rename = "links1hop")]
    pub links_1hop: Vec<RelatedPage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelatedPage {
    pub title: String,
    #[serde(default, rename = "linksLc")]
    pub links_lc: Vec<String>,
}

/// Outgoing links for every page in a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub pages: Vec<PageLinks>,
    /// Whether the source is complete enough to derive 2-hop groups.
    pub two_hop: bool,
}

/// Where pages come from: the remote API or an export file.
///
/// Implementations are shared across page tasks, so they must be `Sync`.
pub trait PageProvider: Sync {
    fn project_name(&self) -> &str;

    /// The whole page list in source order. Failure aborts the run.
    fn list_pages(&self) -> Result<Vec<PageSummary>>;

    /// Project-wide link data, when the source can supply it.
    fn link_snapshot(&self) -> Result<Option<LinkSnapshot>>;

    fn fetch_page(&self, summary: &PageSummary) -> Result<PageDetail>;
}
