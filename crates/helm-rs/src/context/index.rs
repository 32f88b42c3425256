//! Project content index: file contents keyed by project-relative path.
//!
//! The controller refreshes the index at session start and on reindex, and
//! folds its [`summary`](ProjectIndex::summary) into the system message.
//! [`FileIndex`] walks the project the way `git` sees it; [`NoIndex`] turns
//! the feature off.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ignore::WalkBuilder;
use tracing::debug;

use super::budget::TokenBudget;

/// Files indexed at most.
pub const DEFAULT_MAX_FILES: usize = 500;

/// Larger files are left out.
pub const MAX_FILE_BYTES: u64 = 100_000;

/// Paths listed in the summary at most.
const LISTED_PATHS: usize = 200;

const EXTENSIONS: &[&str] = &[
    "rs", "toml", "md", "txt", "json", "yaml", "yml", "py", "js", "jsx", "ts", "tsx", "go",
    "java", "kt", "swift", "c", "h", "cpp", "hpp", "cs", "rb", "php", "sh", "sql", "html",
    "css", "scss", "vue", "svelte",
];

/// Directories never descended into, ignore files or not.
const SKIP_DIRS: &[&str] = &[
    "target", "node_modules", "dist", "build", "vendor", "__pycache__", "venv", "coverage",
];

/// Keyed lookup over project content.
pub trait ProjectIndex: Send {
    /// Rebuild from the project. Returns the number of entries.
    fn refresh(&mut self) -> usize;

    /// Overview for the system message, or `None` when there is nothing
    /// worth showing.
    fn summary(&self) -> Option<String>;

    /// Content stored under `key`, a project-relative path.
    fn lookup(&self, key: &str) -> Option<&str>;
}

/// An index that holds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndex;

impl ProjectIndex for NoIndex {
    fn refresh(&mut self) -> usize {
        0
    }

    fn summary(&self) -> Option<String> {
        None
    }

    fn lookup(&self, _key: &str) -> Option<&str> {
        None
    }
}

/// Text files under the project root, honouring `.gitignore` and skipping
/// hidden entries, build output and oversized files.
#[derive(Debug, Clone)]
pub struct FileIndex {
    root: PathBuf,
    max_files: usize,
    files: BTreeMap<String, String>,
    truncated: bool,
}

impl FileIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_files: DEFAULT_MAX_FILES,
            files: BTreeMap::new(),
            truncated: false,
        }
    }

    pub fn max_files(mut self, max: usize) -> Self {
        self.max_files = max;
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

impl ProjectIndex for FileIndex {
    fn refresh(&mut self) -> usize {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .git_global(false)
            .require_git(false)
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| SKIP_DIRS.contains(&name)))
            });

        let mut files = BTreeMap::new();
        let mut truncated = false;
        for entry in builder.build().flatten() {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            let indexable = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if !indexable || !entry.metadata().is_ok_and(|m| m.len() <= MAX_FILE_BYTES) {
                continue;
            }
            if files.len() >= self.max_files {
                truncated = true;
                break;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            // Not UTF-8: not worth indexing.
            let Ok(content) = std::fs::read_to_string(path) else {
                continue;
            };
            files.insert(relative.to_string_lossy().replace('\\', "/"), content);
        }

        debug!(
            "Indexed {} file(s) under {}{}",
            files.len(),
            self.root.display(),
            if truncated { " (limit reached)" } else { "" }
        );
        self.files = files;
        self.truncated = truncated;
        self.files.len()
    }

    fn summary(&self) -> Option<String> {
        if self.files.is_empty() {
            return None;
        }
        let budget = TokenBudget::default();
        let tokens: usize = self.files.values().map(|c| budget.estimate_text(c)).sum();

        let mut by_ext: BTreeMap<&str, usize> = BTreeMap::new();
        for path in self.files.keys() {
            let ext = path.rsplit_once('.').map_or("", |(_, ext)| ext);
            *by_ext.entry(ext).or_default() += 1;
        }
        let mut by_ext: Vec<_> = by_ext.into_iter().collect();
        by_ext.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        let types: Vec<String> = by_ext
            .iter()
            .take(10)
            .map(|(ext, n)| format!(".{ext} {n}"))
            .collect();

        let mut text = format!(
            "# Project index\n\n{} file(s), ~{tokens} tokens{}. By type: {}.\nRead files with read_file before relying on their content.\n",
            self.files.len(),
            if self.truncated { ", limit reached" } else { "" },
            types.join(", ")
        );
        for path in self.files.keys().take(LISTED_PATHS) {
            text.push('\n');
            text.push_str(path);
        }
        if self.files.len() > LISTED_PATHS {
            text.push_str(&format!("\n... and {} more", self.files.len() - LISTED_PATHS));
        }
        Some(text)
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        let key = key.trim_start_matches("./");
        self.files.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::create_dir_all(root.join(".helm")).unwrap();
        std::fs::write(root.join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        std::fs::write(root.join("src/lib.rs"), "pub fn demo() {}\n").unwrap();
        std::fs::write(root.join("src/secret.rs"), "const KEY: &str = \"x\";\n").unwrap();
        std::fs::write(root.join(".gitignore"), "secret.rs\n").unwrap();
        std::fs::write(root.join("target/debug/out.rs"), "// generated\n").unwrap();
        std::fs::write(root.join(".helm/memory.md"), "notes\n").unwrap();
        std::fs::write(root.join("logo.png"), [0x89, b'P', b'N', b'G']).unwrap();
        dir
    }

    #[test]
    fn indexes_tracked_text_files_only() {
        let dir = project();
        let mut index = FileIndex::new(dir.path());
        assert_eq!(index.refresh(), 2);
        assert_eq!(index.paths().collect::<Vec<_>>(), vec!["Cargo.toml", "src/lib.rs"]);
        assert_eq!(index.lookup("src/lib.rs"), Some("pub fn demo() {}\n"));
        assert_eq!(index.lookup("./src/lib.rs"), Some("pub fn demo() {}\n"));
        assert_eq!(index.lookup("src/secret.rs"), None);
    }

    #[test]
    fn summary_lists_paths_and_types() {
        let dir = project();
        let mut index = FileIndex::new(dir.path());
        assert_eq!(index.summary(), None);
        index.refresh();

        let summary = index.summary().unwrap();
        assert!(summary.starts_with("# Project index\n\n2 file(s)"), "{summary}");
        assert!(summary.contains(".rs 1"));
        assert!(summary.contains("\nsrc/lib.rs"));
        assert!(!summary.contains("secret"));
    }

    #[test]
    fn refresh_picks_up_changes_and_respects_limit() {
        let dir = project();
        let mut index = FileIndex::new(dir.path()).max_files(2);
        index.refresh();
        std::fs::write(dir.path().join("src/new.rs"), "fn new() {}\n").unwrap();
        assert_eq!(index.refresh(), 2);
        assert!(index.summary().unwrap().contains("limit reached"));

        let mut index = FileIndex::new(dir.path());
        assert_eq!(index.refresh(), 3);
        assert!(index.lookup("src/new.rs").is_some());
    }

    #[test]
    fn no_index_is_empty() {
        let mut index = NoIndex;
        assert_eq!(index.refresh(), 0);
        assert_eq!(index.summary(), None);
        assert_eq!(index.lookup("src/lib.rs"), None);
    }
}
