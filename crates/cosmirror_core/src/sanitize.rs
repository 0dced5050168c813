use crate::error::PageError;
use crate::index::INDEX_HTML;
use crate::render::PAGE_HTML;
use crate::sync::{JSON_FILE, TEXT_FILE};

/// Characters Windows refuses in file and directory names, with their escapes.
/// `%` comes first so escaped output never collides with a literal title.
const RESTRICTED_ESCAPES: &[(char, &str)] = &[
    ('%', "%25"),
    (':', "%3A"),
    ('*', "%2A"),
    ('?', "%3F"),
    ('"', "%22"),
    ('<', "%3C"),
    ('>', "%3E"),
    ('|', "%7C"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Windows-style naming rules.
    Restricted,
    Unrestricted,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Restricted
        } else {
            Self::Unrestricted
        }
    }
}

pub fn sanitize_dir_name(title: &str) -> String {
    sanitize_dir_name_for(Platform::current(), title)
}

pub fn sanitize_file_name(name: &str) -> String {
    sanitize_file_name_for(Platform::current(), name)
}

/// Directory names keep `/`, so a title like `a/b` nests as `a/b/`.
pub fn sanitize_dir_name_for(platform: Platform, title: &str) -> String {
    match platform {
        Platform::Restricted => escape_restricted(title),
        Platform::Unrestricted => title.to_string(),
    }
}

pub fn sanitize_file_name_for(platform: Platform, name: &str) -> String {
    let escaped = match platform {
        Platform::Restricted => escape_restricted(name),
        Platform::Unrestricted => name.to_string(),
    };
    escaped.replace('/', "%2F")
}

fn escape_restricted(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for ch in value.chars() {
        match RESTRICTED_ESCAPES.iter().find(|(from, _)| *from == ch) {
            Some((_, escape)) => output.push_str(escape),
            None => output.push(ch),
        }
    }
    output
}

/// Number of path segments a page directory occupies below the destination root.
pub fn nesting_depth(title: &str) -> usize {
    title.split('/').count()
}

/// Rejects titles that would escape the destination root, alias another page
/// directory or take the place of the project index.
pub fn check_title(title: &str) -> Result<(), PageError> {
    check_title_for(Platform::current(), title)
}

pub fn check_title_for(platform: Platform, title: &str) -> Result<(), PageError> {
    let unsafe_segment = |segment: &str| matches!(segment, "" | "." | "..");
    let separators: &[char] = match platform {
        Platform::Restricted => &['/', '\\'],
        Platform::Unrestricted => &['/'],
    };
    let risky = title.split(separators).any(unsafe_segment);
    let first = title.split(separators).next().unwrap_or_default();
    let shadows_index = sanitize_dir_name_for(platform, first).eq_ignore_ascii_case(INDEX_HTML);
    if risky || shadows_index {
        return Err(PageError::UnsafeTitle);
    }
    Ok(())
}

/// Sanitizes a code-block file name, refusing names that resolve to the page directory itself.
pub fn code_file_name(name: &str) -> Result<String, PageError> {
    let sanitized = sanitize_file_name(name.trim());
    if matches!(sanitized.as_str(), "" | "." | "..") {
        return Err(PageError::UnsafeFileName(name.to_string()));
    }
    Ok(sanitized)
}

/// Code files that would overwrite the page's own text, HTML or metadata.
pub fn shadows_page_artifact(file_name: &str) -> bool {
    [TEXT_FILE, PAGE_HTML, JSON_FILE].contains(&file_name)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    const TITLES: &[&str] = &[
        "Home",
        "a/b/c",
        "a:b",
        "a%3Ab",
        "what?",
        "what%3F",
        "quote \"me\"",
        "<script>",
        "pipe|line",
        "日本語のページ",
        "star*",
        "100%",
    ];

    #[test]
    fn unrestricted_dir_names_pass_through() {
        for title in TITLES {
            assert_eq!(sanitize_dir_name_for(Platform::Unrestricted, title), *title);
        }
    }

    #[test]
    fn file_names_escape_slash_on_every_platform() {
        assert_eq!(
            sanitize_file_name_for(Platform::Unrestricted, "src/main.rs"),
            "src%2Fmain.rs"
        );
        assert_eq!(
            sanitize_file_name_for(Platform::Restricted, "src/main.rs"),
            "src%2Fmain.rs"
        );
    }

    #[test]
    fn restricted_platform_escapes_reserved_characters() {
        assert_eq!(
            sanitize_dir_name_for(Platform::Restricted, "a:b*c?d\"e<f>g|h"),
            "a%3Ab%2Ac%3Fd%22e%3Cf%3Eg%7Ch"
        );
        assert_eq!(sanitize_dir_name_for(Platform::Restricted, "a/b"), "a/b");
        assert_eq!(
            sanitize_file_name_for(Platform::Restricted, "c:/x.py"),
            "c%3A%2Fx.py"
        );
    }

    #[test]
    fn unrestricted_sanitizing_is_idempotent() {
        for title in TITLES {
            let once = sanitize_dir_name_for(Platform::Unrestricted, title);
            assert_eq!(sanitize_dir_name_for(Platform::Unrestricted, &once), once);
            let file_once = sanitize_file_name_for(Platform::Unrestricted, title);
            assert_eq!(
                sanitize_file_name_for(Platform::Unrestricted, &file_once),
                file_once
            );
        }
    }

    #[test]
    fn distinct_titles_do_not_collide() {
        for platform in [Platform::Restricted, Platform::Unrestricted] {
            let names = TITLES
                .iter()
                .map(|title| sanitize_dir_name_for(platform, title))
                .collect::<BTreeSet<_>>();
            assert_eq!(names.len(), TITLES.len(), "collision on {platform:?}");
        }
    }

    #[test]
    fn traversal_titles_are_flagged() {
        for title in ["../etc", "a/../b", "..", ".", "/abs", "a//b", "trailing/"] {
            assert!(
                matches!(
                    check_title_for(Platform::Unrestricted, title),
                    Err(PageError::UnsafeTitle)
                ),
                "expected {title} to be flagged"
            );
        }
        assert!(check_title_for(Platform::Restricted, "a\\..\\b").is_err());
        assert!(check_title_for(Platform::Unrestricted, "a\\..\\b").is_ok());
        assert!(check_title_for(Platform::Unrestricted, "a..b/c.d").is_ok());
    }

    #[test]
    fn titles_cannot_replace_the_index() {
        for title in ["index.html", "Index.HTML", "index.html/child"] {
            assert!(
                check_title_for(Platform::Unrestricted, title).is_err(),
                "expected {title} to be flagged"
            );
        }
        assert!(check_title_for(Platform::Restricted, "index.html\\child").is_err());
        assert!(check_title_for(Platform::Unrestricted, "docs/index.html").is_ok());
        assert!(check_title_for(Platform::Unrestricted, "index").is_ok());
    }

    #[test]
    fn artifact_names_are_reserved_for_code_files() {
        for name in ["text.txt", "text.html", "json.json"] {
            assert!(shadows_page_artifact(name));
        }
        assert!(!shadows_page_artifact("main.rs"));
        assert!(!shadows_page_artifact("index.html"));
    }

    #[test]
    fn depth_counts_slash_segments() {
        assert_eq!(nesting_depth("a"), 1);
        assert_eq!(nesting_depth("a/b/c"), 3);
    }

    #[test]
    fn code_file_names_cannot_target_page_directory() {
        assert!(code_file_name("..").is_err());
        assert!(code_file_name("  ").is_err());
        assert_eq!(code_file_name("../x.py").expect("sanitized"), "..%2Fx.py");
    }
}
