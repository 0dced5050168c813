use std::collections::{HashMap, HashSet};

use crate::provider::RelatedPages;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLinks {
    pub title: String,
    pub links: Vec<String>,
}

/// Backlinks of a single page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkGraph {
    /// Pages linking to this one.
    pub one_hop: Vec<String>,
    /// Pages the 1-hop pages link to, grouped by 1-hop page. `None` when the
    /// source cannot supply it.
    pub two_hop: Option<Vec<TwoHopGroup>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoHopGroup {
    pub via: String,
    pub titles: Vec<String>,
}

impl LinkGraph {
    /// 1-hop graph from the related-pages data of a single page fetch.
    pub fn from_related(title: &str, related: &RelatedPages) -> Self {
        let key = title_key(title);
        let mut seen = HashSet::new();
        let one_hop = related
            .links_1hop
            .iter()
            .filter(|page| title_key(&page.title) != key)
            .filter(|page| page.links_lc.iter().any(|link| title_key(link) == key))
            .filter(|page| seen.insert(title_key(&page.title)))
            .map(|page| page.title.clone())
            .collect();
        Self {
            one_hop,
            two_hop: None,
        }
    }
}

/// Cosense's `titleLc`: case-insensitive, spaces and underscores equivalent.
pub fn title_key(title: &str) -> String {
    title.trim().to_lowercase().replace(' ', "_")
}

/// Project-wide link index built once from every page's outgoing links.
#[derive(Debug, Clone, Default)]
pub struct LinkIndex {
    display: HashMap<String, String>,
    outgoing: HashMap<String, Vec<String>>,
    backlinks: HashMap<String, Vec<String>>,
    two_hop: bool,
}

impl LinkIndex {
    pub fn build(pages: &[PageLinks]) -> Self {
        Self::build_with(pages, true)
    }

    /// Same index, but graphs carry no 2-hop section.
    pub fn build_one_hop(pages: &[PageLinks]) -> Self {
        Self::build_with(pages, false)
    }

    fn build_with(pages: &[PageLinks], two_hop: bool) -> Self {
        let mut index = Self {
            two_hop,
            ..Self::default()
        };

        for page in pages {
            index
                .display
                .insert(title_key(&page.title), page.title.clone());
        }

        for page in pages {
            let source = title_key(&page.title);
            let mut targets = Vec::new();
            for link in &page.links {
                let target = title_key(link);
                if target.is_empty() || targets.contains(&target) {
                    continue;
                }
                index
                    .display
                    .entry(target.clone())
                    .or_insert_with(|| link.clone());
                targets.push(target);
            }

            for target in &targets {
                if *target == source {
                    continue;
                }
                let sources = index.backlinks.entry(target.clone()).or_default();
                if !sources.contains(&source) {
                    sources.push(source.clone());
                }
            }

            let outgoing = index.outgoing.entry(source).or_default();
            for target in targets {
                if !outgoing.contains(&target) {
                    outgoing.push(target);
                }
            }
        }

        index
    }

    pub fn graph_for(&self, title: &str) -> LinkGraph {
        let key = title_key(title);
        let sources = self.backlinks.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        let one_hop = sources.iter().map(|source| self.display_title(source)).collect();

        let two_hop = self.two_hop.then(|| {
            sources
                .iter()
                .filter_map(|source| {
                    let titles = self
                        .outgoing
                        .get(source)
                        .into_iter()
                        .flatten()
                        .filter(|target| **target != key && *target != source)
                        .map(|target| self.display_title(target))
                        .collect::<Vec<_>>();
                    (!titles.is_empty()).then(|| TwoHopGroup {
                        via: self.display_title(source),
                        titles,
                    })
                })
                .collect()
        });

        LinkGraph { one_hop, two_hop }
    }

    fn display_title(&self, key: &str) -> String {
        self.display
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}
