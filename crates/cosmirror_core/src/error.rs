//! Page-scoped failures.
//!
//! None of these abort a run: the page is reported as failed and sibling
//! pages carry on. Run-level failures use `anyhow` instead.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    /// Network or API error while fetching the page.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Page text could not be parsed.
    #[error("parse failure: {0}")]
    Parse(#[from] crate::markup::MarkupError),

    /// Writing, removing, or creating something under the page directory failed.
    #[error("filesystem failure at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Title contains an empty, `.` or `..` path segment, or starts with the index file name.
    #[error("unsafe title: refusing to write outside the page directories")]
    UnsafeTitle,

    #[error("unsafe code block file name: {0:?}")]
    UnsafeFileName(String),
}

impl PageError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transport(error: &anyhow::Error) -> Self {
        Self::Transport(format!("{error:#}"))
    }
}
