use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Wipe the destination and materialize every page.
    Clone,
    /// Refetch only pages whose remote update is newer than the local text artifact.
    Pull,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Pull => "pull",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Skip,
    Refetch,
}

/// What is known about a page's `text.txt` on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalArtifact {
    Missing,
    Present { modified: Option<SystemTime> },
}

impl LocalArtifact {
    pub fn probe(path: &std::path::Path) -> Self {
        match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => Self::Present {
                modified: metadata.modified().ok(),
            },
            _ => Self::Missing,
        }
    }
}

/// Decides whether a page must be fetched again. Anything uncertain resolves to `Refetch`.
pub fn decide(
    local: LocalArtifact,
    remote_updated_secs: i64,
    mode: SyncMode,
    now: SystemTime,
) -> Freshness {
    if mode == SyncMode::Clone {
        return Freshness::Refetch;
    }
    let modified = match local {
        LocalArtifact::Missing => return Freshness::Refetch,
        LocalArtifact::Present { modified: None } => return Freshness::Refetch,
        LocalArtifact::Present {
            modified: Some(modified),
        } => modified,
    };
    if modified > now {
        return Freshness::Refetch;
    }
    let Some(local_ms) = unix_millis(modified) else {
        return Freshness::Refetch;
    };
    if i128::from(remote_updated_secs) * 1000 <= local_ms {
        Freshness::Skip
    } else {
        Freshness::Refetch
    }
}

fn unix_millis(time: SystemTime) -> Option<i128> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| i128::try_from(duration.as_millis()).unwrap_or(i128::MAX))
}
