//! Built-in approval categories and command/path matching helpers.
//!
//! A category groups commands (or paths) a user may approve in one go, e.g.
//! "read-only git commands". Ids are stable: they are what the approval
//! store persists.

use std::sync::LazyLock;

use glob::{MatchOptions, Pattern};
use regex::Regex;

/// A built-in category definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

struct BashCategory {
    info: CategoryInfo,
    regex: Regex,
}

struct PathCategory {
    info: CategoryInfo,
    globs: Vec<Pattern>,
}

const BASH_CATEGORY_DEFS: &[(&str, &str, &str, &str)] = &[
    (
        "git-read",
        "Read-only git",
        "git status, log, diff, show, branch and similar",
        r"^git\s+(status|log|diff|show|branch|remote|blame|rev-parse|ls-files|describe)\b",
    ),
    (
        "file-listing",
        "List files",
        "ls, tree, pwd, du",
        r"^(ls|tree|pwd|du)\b",
    ),
    (
        "file-reading",
        "Read files",
        "cat, head, tail, wc, stat, file",
        r"^(cat|head|tail|wc|stat|file|less)\b",
    ),
    (
        "search",
        "Search",
        "grep, rg, ag, ack",
        r"^(grep|egrep|rg|ag|ack)\b",
    ),
    (
        "build",
        "Build",
        "cargo build/check/clippy/fmt, make, npm run build, go build, tsc",
        r"^(cargo\s+(build|check|clippy|fmt|doc)|make|npm\s+run\s+build|go\s+(build|vet)|tsc)\b",
    ),
    (
        "test",
        "Run tests",
        "cargo test, npm test, pytest, go test, jest, vitest",
        r"^(cargo\s+(test|nextest)|npm\s+(test|run\s+test)|pytest|python\s+-m\s+pytest|go\s+test|jest|vitest)\b",
    ),
];

const PATH_CATEGORY_DEFS: &[(&str, &str, &str, &[&str])] = &[
    (
        "source-files",
        "Source files",
        "Rust, Python, TypeScript, JavaScript, Go, Java and C/C++ sources",
        &[
            "**/*.rs", "**/*.py", "**/*.ts", "**/*.tsx", "**/*.js", "**/*.jsx", "**/*.go",
            "**/*.java", "**/*.c", "**/*.h", "**/*.cpp", "**/*.hpp",
        ],
    ),
    (
        "test-files",
        "Test files",
        "files under tests/ or named like tests",
        &["**/tests/**", "**/test/**", "**/*_test.*", "**/*.test.*", "**/*.spec.*", "**/test_*"],
    ),
    (
        "docs",
        "Documentation",
        "Markdown, reStructuredText, text and files under docs/",
        &["**/*.md", "**/*.rst", "**/*.txt", "**/docs/**"],
    ),
    (
        "config-files",
        "Config files",
        "TOML, JSON and YAML files",
        &["**/*.toml", "**/*.json", "**/*.yaml", "**/*.yml"],
    ),
];

static BASH_CATEGORIES: LazyLock<Vec<BashCategory>> = LazyLock::new(|| {
    BASH_CATEGORY_DEFS
        .iter()
        .map(|(id, name, description, pattern)| BashCategory {
            info: CategoryInfo {
                id,
                name,
                description,
            },
            regex: Regex::new(pattern).expect("builtin bash category regex is valid"),
        })
        .collect()
});

static PATH_CATEGORIES: LazyLock<Vec<PathCategory>> = LazyLock::new(|| {
    PATH_CATEGORY_DEFS
        .iter()
        .map(|(id, name, description, globs)| PathCategory {
            info: CategoryInfo {
                id,
                name,
                description,
            },
            globs: globs
                .iter()
                .map(|g| Pattern::new(g).expect("builtin path category glob is valid"))
                .collect(),
        })
        .collect()
});

const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub fn bash_categories() -> impl Iterator<Item = &'static CategoryInfo> {
    BASH_CATEGORIES.iter().map(|c| &c.info)
}

pub fn path_categories() -> impl Iterator<Item = &'static CategoryInfo> {
    PATH_CATEGORIES.iter().map(|c| &c.info)
}

pub fn bash_category(id: &str) -> Option<&'static CategoryInfo> {
    bash_categories().find(|c| c.id == id)
}

pub fn path_category(id: &str) -> Option<&'static CategoryInfo> {
    path_categories().find(|c| c.id == id)
}

/// Ids of the bash categories a single command segment belongs to.
pub fn bash_categories_for(segment: &str) -> Vec<&'static str> {
    let segment = segment.trim();
    BASH_CATEGORIES
        .iter()
        .filter(|c| c.regex.is_match(segment))
        .map(|c| c.info.id)
        .collect()
}

/// Ids of the path categories `path` belongs to.
pub fn path_categories_for(path: &str) -> Vec<&'static str> {
    let path = normalize_path(path);
    PATH_CATEGORIES
        .iter()
        .filter(|c| c.globs.iter().any(|g| g.matches_with(path, PATH_MATCH)))
        .map(|c| c.info.id)
        .collect()
}

/// Whether `command` is matched by `category_id`.
pub fn command_in_category(command: &str, category_id: &str) -> bool {
    BASH_CATEGORIES
        .iter()
        .any(|c| c.info.id == category_id && c.regex.is_match(command.trim()))
}

/// Whether `path` is matched by `category_id`.
pub fn path_in_category(path: &str, category_id: &str) -> bool {
    let path = normalize_path(path);
    PATH_CATEGORIES
        .iter()
        .any(|c| c.info.id == category_id && c.globs.iter().any(|g| g.matches_with(path, PATH_MATCH)))
}

// ── Pattern matching ──────────────────────────────────────────────

/// Whether a persisted bash pattern matches `command`.
///
/// Patterns are globs over the whole command. A trailing ` *` also matches
/// the bare prefix, so `git status *` covers `git status`.
pub fn command_matches_pattern(pattern: &str, command: &str) -> bool {
    let command = command.trim();
    if let Some(prefix) = pattern.strip_suffix(" *")
        && command == prefix
    {
        return true;
    }
    Pattern::new(pattern).is_ok_and(|p| p.matches(command))
}

/// Whether a persisted path pattern matches `path`.
pub fn path_matches_pattern(pattern: &str, path: &str) -> bool {
    Pattern::new(pattern).is_ok_and(|p| p.matches_with(normalize_path(path), PATH_MATCH))
}

fn normalize_path(path: &str) -> &str {
    path.trim().trim_start_matches("./")
}

/// Split a shell command on `&&`, `||`, `;`, `|`, newlines and a lone `&`,
/// outside of quotes. `&` inside a redirection (`2>&1`, `&>`) does not split.
/// Empty segments are dropped.
pub fn command_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), _) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), '\\') => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), _) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '\\') => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (None, ';' | '\n' | '\r') => segments.push(std::mem::take(&mut current)),
            (None, '&') if chars.peek() == Some(&'&') => {
                chars.next();
                segments.push(std::mem::take(&mut current));
            }
            (None, '&') if current.ends_with('>') || chars.peek() == Some(&'>') => current.push(c),
            (None, '&') => segments.push(std::mem::take(&mut current)),
            (None, '|') => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            }
            (None, _) => current.push(c),
        }
    }
    segments.push(current);
    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Whether `segment` runs a nested command: `$(...)` or backticks outside
/// single quotes, or `<(...)` / `>(...)` outside any quotes. Such a segment
/// hides a command from pattern and category matching.
pub fn has_substitution(segment: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => {}
            (_, '\\') => {
                chars.next();
            }
            (Some('"'), '"') => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (_, '`') => return true,
            (_, '$') if chars.peek() == Some(&'(') => return true,
            (None, '<' | '>') if chars.peek() == Some(&'(') => return true,
            _ => {}
        }
    }
    false
}
