//! Pages from a Cosense project export (`{name, pages: [...]}` JSON).
//!
//! Exports carry no related-pages data, so link graphs built from them are
//! 1-hop only.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::link_graph::PageLinks;
use crate::markup::{outgoing_links, parse_lines};
use crate::provider::{LinkSnapshot, PageDetail, PageProvider, PageSummary};

#[derive(Debug)]
pub struct ExportSource {
    name: String,
    pages: Vec<ExportPage>,
    by_title: HashMap<String, usize>,
}

#[derive(Debug)]
struct ExportPage {
    summary: PageSummary,
    lines: Vec<String>,
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExportFile {
    name: Option<String>,
    #[serde(default)]
    pages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ExportPageEntry {
    title: String,
    #[serde(default)]
    updated: i64,
    #[serde(default)]
    lines: Vec<ExportLine>,
    #[serde(default, rename = "linksLc")]
    links_lc: Option<Vec<String>>,
}

/// Plain exports list lines as strings; exports with metadata use objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportLine {
    Text(String),
    Object {
        #[serde(default)]
        text: String,
    },
}

impl ExportLine {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) | Self::Object { text } => text,
        }
    }
}

impl ExportSource {
    /// Reads an export file; the project name falls back to the file stem.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let fallback = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("export");
        Self::from_json(&content, fallback)
            .with_context(|| format!("failed to parse export {}", path.display()))
    }

    pub fn from_json(content: &str, fallback_name: &str) -> Result<Self> {
        let file: ExportFile = serde_json::from_str(content).context("invalid export JSON")?;
        let name = file
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| fallback_name.to_string());

        let mut pages = Vec::with_capacity(file.pages.len());
        let mut by_title = HashMap::new();
        for (position, raw) in file.pages.into_iter().enumerate() {
            let entry: ExportPageEntry = serde_json::from_value(raw.clone())
                .map_err(|error| anyhow!("export page #{position}: {error}"))?;
            if by_title.contains_key(&entry.title) {
                warn!(title = %entry.title, "duplicate title in export; keeping the first");
                continue;
            }
            let lines = entry
                .lines
                .into_iter()
                .map(ExportLine::into_text)
                .collect::<Vec<_>>();
            let links = match entry.links_lc {
                Some(links) => links,
                None => parse_lines(&lines)
                    .map(|blocks| outgoing_links(&blocks))
                    .unwrap_or_default(),
            };
            by_title.insert(entry.title.clone(), pages.len());
            pages.push(ExportPage {
                summary: PageSummary {
                    title: entry.title,
                    updated: entry.updated,
                    metadata: raw,
                },
                lines,
                links,
            });
        }

        debug!(project = %name, pages = pages.len(), "loaded export");
        Ok(Self {
            name,
            pages,
            by_title,
        })
    }
}

impl PageProvider for ExportSource {
    fn project_name(&self) -> &str {
        &self.name
    }

    fn list_pages(&self) -> Result<Vec<PageSummary>> {
        Ok(self.pages.iter().map(|page| page.summary.clone()).collect())
    }

    fn link_snapshot(&self) -> Result<Option<LinkSnapshot>> {
        let pages = self
            .pages
            .iter()
            .map(|page| PageLinks {
                title: page.summary.title.clone(),
                links: page.links.clone(),
            })
            .collect();
        Ok(Some(LinkSnapshot {
            pages,
            two_hop: false,
        }))
    }

    fn fetch_page(&self, summary: &PageSummary) -> Result<PageDetail> {
        let page = self
            .by_title
            .get(&summary.title)
            .and_then(|position| self.pages.get(*position))
            .ok_or_else(|| anyhow!("page {:?} is not in the export", summary.title))?;
        Ok(PageDetail {
            title: page.summary.title.clone(),
            lines: page.lines.clone(),
            related: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const EXPORT: &str = r#"{
        "name": "demo",
        "displayName": "Demo",
        "pages": [
            {"title": "Home", "updated": 10, "lines": ["Home", "see [Notes] #todo"]},
            {"title": "Notes", "updated": 20, "lines": [
                {"text": "Notes", "created": 1},
                {"text": "code:foo.py"},
                {"text": " print(1)"}
            ], "linksLc": ["home"]},
            {"title": "Home", "updated": 30, "lines": ["Home", "duplicate"]}
        ]
    }"#;

    #[test]
    fn reads_both_line_shapes_and_keeps_first_duplicate() {
        let source = ExportSource::from_json(EXPORT, "fallback").expect("export");
        assert_eq!(source.project_name(), "demo");

        let summaries = source.list_pages().expect("list");
        let titles = summaries
            .iter()
            .map(|summary| summary.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Home", "Notes"]);
        assert_eq!(summaries[0].updated, 10);
        assert_eq!(summaries[1].metadata["lines"][0]["created"], 1);

        let notes = source.fetch_page(&summaries[1]).expect("fetch");
        assert_eq!(notes.text(), "Notes\ncode:foo.py\n print(1)");
        assert!(notes.related.is_none());
    }

    #[test]
    fn link_snapshot_is_one_hop_and_falls_back_to_parsed_links() {
        let source = ExportSource::from_json(EXPORT, "fallback").expect("export");
        let snapshot = source.link_snapshot().expect("snapshot").expect("some");
        assert!(!snapshot.two_hop);
        assert_eq!(
            snapshot.pages,
            vec![
                PageLinks {
                    title: "Home".to_string(),
                    links: vec!["Notes".to_string(), "todo".to_string()],
                },
                PageLinks {
                    title: "Notes".to_string(),
                    links: vec!["home".to_string()],
                },
            ]
        );
    }

    #[test]
    fn name_falls_back_to_file_stem() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("my-project.json");
        fs::write(&path, r#"{"pages": []}"#).expect("write export");
        let source = ExportSource::from_path(&path).expect("export");
        assert_eq!(source.project_name(), "my-project");
        assert!(source.list_pages().expect("list").is_empty());
    }

    #[test]
    fn malformed_exports_are_fatal() {
        assert!(ExportSource::from_json("not json", "x").is_err());
        assert!(ExportSource::from_json(r#"{"pages": [{"updated": 1}]}"#, "x").is_err());
        let missing = tempdir().expect("tempdir").path().join("absent.json");
        assert!(ExportSource::from_path(&missing).is_err());
    }

    #[test]
    fn unknown_titles_fail_to_fetch() {
        let source = ExportSource::from_json(EXPORT, "fallback").expect("export");
        let summary = PageSummary {
            title: "Missing".to_string(),
            updated: 0,
            metadata: Value::Null,
        };
        assert!(source.fetch_page(&summary).is_err());
    }
}
