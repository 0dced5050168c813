//! The mirror pipeline: list, gate on freshness, fetch, render, write.
//!
//! Within a page task everything that can fail without touching disk (fetch,
//! parse, render, code-block names) happens first. Only then are the page's
//! old files removed and the new ones written, `text.txt` last, so a page
//! whose `text.txt` is present and fresh always has complete siblings.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::error::PageError;
use crate::freshness::{Freshness, LocalArtifact, SyncMode, decide};
use crate::index::{INDEX_HTML, render_index};
use crate::link_graph::{LinkGraph, LinkIndex};
use crate::markup::{Block, parse_lines};
use crate::provider::{PageProvider, PageSummary};
use crate::render::{PAGE_HTML, RenderContext, render_page};
use crate::sanitize::{
    check_title, code_file_name, nesting_depth, sanitize_dir_name, shadows_page_artifact,
};
use crate::scheduler::Scheduler;

pub const TEXT_FILE: &str = "text.txt";
pub const JSON_FILE: &str = "json.json";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub destination: PathBuf,
    pub concurrency: usize,
    /// Used for root-relative and `online` links in rendered pages.
    pub origin: String,
}

#[derive(Debug)]
pub struct SyncReport {
    pub success: bool,
    pub project: String,
    pub mode: SyncMode,
    pub destination: PathBuf,
    pub listed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failures: Vec<PageFailure>,
    pub pages: Vec<SyncPageResult>,
    pub peak_in_flight: usize,
}

#[derive(Debug)]
pub struct PageFailure {
    pub title: String,
    pub error: PageError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPageResult {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug)]
pub enum PageOutcome {
    Updated,
    Skipped,
    Failed(PageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    Pending,
    Skipped,
    Fetching,
    Rendering,
    Writing,
    Done,
    Failed,
}

impl PageState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Skipped => "skipped",
            Self::Fetching => "fetching",
            Self::Rendering => "rendering",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

fn transition(title: &str, state: PageState) {
    debug!(title, state = state.as_str(), "page state");
}

struct RunContext<'a> {
    options: &'a SyncOptions,
    project: &'a str,
    links: Option<LinkIndex>,
    now: SystemTime,
}

/// Mirrors every page of `provider` into `options.destination`.
///
/// Only run-level problems are errors: an unobtainable page list, an
/// unusable destination root or an unwritable index. Page failures are
/// collected in the report.
pub fn sync_project<P: PageProvider>(provider: &P, options: &SyncOptions) -> Result<SyncReport> {
    let project = provider.project_name();
    info!(
        project,
        mode = options.mode.as_str(),
        destination = %options.destination.display(),
        "starting sync"
    );

    let summaries = distinct_titles(
        provider
            .list_pages()
            .with_context(|| format!("failed to obtain the page list of {project}"))?,
    );
    prepare_root(&options.destination, options.mode)?;

    let run = RunContext {
        options,
        project,
        links: load_link_index(provider),
        now: SystemTime::now(),
    };

    let scheduler = Scheduler::new(options.concurrency);
    let outcomes = scheduler.run(&summaries, |summary| {
        transition(&summary.title, PageState::Pending);
        let outcome = match sync_page(provider, summary, &run) {
            Ok(outcome) => outcome,
            Err(error) => {
                transition(&summary.title, PageState::Failed);
                warn!(title = %summary.title, error = %error, "page failed");
                PageOutcome::Failed(error)
            }
        };
        (summary.title.clone(), outcome)
    });

    let listed_titles = summaries
        .iter()
        .filter(|summary| check_title(&summary.title).is_ok())
        .map(|summary| summary.title.clone())
        .collect::<Vec<_>>();
    let index_path = options.destination.join(INDEX_HTML);
    fs::write(&index_path, render_index(project, &listed_titles))
        .with_context(|| format!("failed to write {}", index_path.display()))?;

    let mut report = SyncReport {
        success: true,
        project: project.to_string(),
        mode: options.mode,
        destination: options.destination.clone(),
        listed: summaries.len(),
        updated: 0,
        skipped: 0,
        failures: Vec::new(),
        pages: Vec::with_capacity(outcomes.len()),
        peak_in_flight: scheduler.peak_in_flight(),
    };
    for (title, outcome) in outcomes {
        let (action, detail) = match outcome {
            PageOutcome::Updated => {
                report.updated += 1;
                ("updated", None)
            }
            PageOutcome::Skipped => {
                report.skipped += 1;
                ("skipped", Some("local copy is up to date".to_string()))
            }
            PageOutcome::Failed(error) => {
                let detail = error.to_string();
                report.failures.push(PageFailure {
                    title: title.clone(),
                    error,
                });
                ("failed", Some(detail))
            }
        };
        report.pages.push(SyncPageResult {
            title,
            action: action.to_string(),
            detail,
        });
    }
    report.success = report.failures.is_empty();

    info!(
        project,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failures.len(),
        "sync finished"
    );
    Ok(report)
}

/// Drops repeated list entries so each page directory has a single writer.
/// Offset pagination can return a page twice when it is edited mid-listing;
/// the first entry wins.
fn distinct_titles(summaries: Vec<PageSummary>) -> Vec<PageSummary> {
    let mut seen = HashSet::with_capacity(summaries.len());
    summaries
        .into_iter()
        .filter(|summary| {
            let first = seen.insert(summary.title.clone());
            if !first {
                warn!(title = %summary.title, "page listed twice; keeping the first entry");
            }
            first
        })
        .collect()
}

/// Clone wipes the destination; both modes then make sure it exists.
fn prepare_root(destination: &Path, mode: SyncMode) -> Result<()> {
    if mode == SyncMode::Clone && destination.exists() {
        let canonical = destination
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", destination.display()))?;
        if canonical.parent().is_none() {
            bail!("refusing to wipe filesystem root {}", canonical.display());
        }
        if !canonical.is_dir() {
            bail!("destination {} is not a directory", destination.display());
        }
        fs::remove_dir_all(destination)
            .with_context(|| format!("failed to clear {}", destination.display()))?;
    }
    fs::create_dir_all(destination)
        .with_context(|| format!("failed to create {}", destination.display()))
}

fn load_link_index<P: PageProvider>(provider: &P) -> Option<LinkIndex> {
    match provider.link_snapshot() {
        Ok(Some(snapshot)) if snapshot.two_hop => Some(LinkIndex::build(&snapshot.pages)),
        Ok(Some(snapshot)) => Some(LinkIndex::build_one_hop(&snapshot.pages)),
        Ok(None) => None,
        Err(error) => {
            warn!(
                error = %format!("{error:#}"),
                "link snapshot unavailable; using per-page related pages"
            );
            None
        }
    }
}

fn sync_page<P: PageProvider>(
    provider: &P,
    summary: &PageSummary,
    run: &RunContext<'_>,
) -> Result<PageOutcome, PageError> {
    let title = summary.title.as_str();
    check_title(title)?;
    let page_dir = run.options.destination.join(sanitize_dir_name(title));

    let local = LocalArtifact::probe(&page_dir.join(TEXT_FILE));
    if decide(local, summary.updated, run.options.mode, run.now) == Freshness::Skip {
        transition(title, PageState::Skipped);
        return Ok(PageOutcome::Skipped);
    }

    transition(title, PageState::Fetching);
    let detail = provider
        .fetch_page(summary)
        .map_err(|error| PageError::transport(&error))?;

    transition(title, PageState::Rendering);
    let blocks = parse_lines(&detail.lines)?;
    let graph = match (&run.links, &detail.related) {
        (Some(index), _) => index.graph_for(title),
        (None, Some(related)) => LinkGraph::from_related(title, related),
        (None, None) => LinkGraph::default(),
    };
    let html = render_page(
        &blocks,
        &RenderContext {
            project: run.project,
            origin: &run.options.origin,
            title,
            depth: nesting_depth(title),
            links: &graph,
        },
    );
    let code_files = code_files(title, &blocks)?;

    transition(title, PageState::Writing);
    clear_page_files(&page_dir)?;
    fs::create_dir_all(&page_dir).map_err(|source| PageError::filesystem(&page_dir, source))?;
    write_artifact(&page_dir.join(PAGE_HTML), html.as_bytes())?;
    write_artifact(&page_dir.join(JSON_FILE), summary.metadata.to_string().as_bytes())?;
    for (name, content) in code_files {
        write_artifact(&page_dir.join(name), content.as_bytes())?;
    }
    write_artifact(&page_dir.join(TEXT_FILE), detail.text().as_bytes())?;

    transition(title, PageState::Done);
    info!(title, "updated");
    Ok(PageOutcome::Updated)
}

/// Sanitized name and content of every code block, in page order; a repeated name keeps the last.
fn code_files<'a>(title: &str, blocks: &'a [Block]) -> Result<Vec<(String, &'a str)>, PageError> {
    let mut files = Vec::new();
    for block in blocks {
        let Block::CodeBlock {
            file_name, content, ..
        } = block
        else {
            continue;
        };
        let name = code_file_name(file_name)?;
        if shadows_page_artifact(&name) {
            warn!(title, file = %name, "code block shadows a page artifact; not extracted");
            continue;
        }
        files.push((name, content.as_str()));
    }
    Ok(files)
}

/// Removes the files a previous run left in a page directory. Subdirectories
/// belong to nested pages and are kept.
fn clear_page_files(page_dir: &Path) -> Result<(), PageError> {
    let entries = match fs::read_dir(page_dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(PageError::filesystem(page_dir, error)),
    };
    for entry in entries {
        let entry = entry.map_err(|source| PageError::filesystem(page_dir, source))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|source| PageError::filesystem(&path, source))?;
        if file_type.is_dir() {
            continue;
        }
        fs::remove_file(&path).map_err(|source| PageError::filesystem(&path, source))?;
    }
    Ok(())
}

fn write_artifact(path: &Path, contents: &[u8]) -> Result<(), PageError> {
    fs::write(path, contents).map_err(|source| PageError::filesystem(path, source))
}
