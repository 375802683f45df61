//! File discovery: selection roots to ordered upload tasks
//!
//! Filtering happens on single path component names. Ignored directories are
//! pruned before the walk descends into them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::events::{EventSink, LogLevel};

/// One unit of upload work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub local_path: PathBuf,
    pub remote_path: String,
    /// Size at collection time.
    pub size: u64,
}

/// How directory roots map onto remote paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureMode {
    /// `root/sub/file` uploads as `root/sub/file`.
    #[default]
    Preserve,
    /// `root/sub/file` uploads as `sub/file`.
    ContentsOnly,
}

#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    pub ignore_patterns: Vec<String>,
    pub include_hidden: bool,
    pub structure: StructureMode,
    /// Remote base directory every task lands under. Empty means the backend root.
    pub remote_dir: String,
}

/// Result of a collection pass.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub tasks: Vec<Task>,
    /// Number of directory roots that were walked.
    pub directories: usize,
}

impl Collection {
    pub fn total_bytes(&self) -> u64 {
        self.tasks.iter().map(|t| t.size).sum()
    }

    pub fn preview(&self) -> Preview {
        Preview {
            files: self.tasks.len(),
            directories: self.directories,
            total_bytes: self.total_bytes(),
        }
    }
}

/// Dry-run summary of what an upload would send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub files: usize,
    pub directories: usize,
    pub total_bytes: u64,
}

pub struct FileCollector {
    patterns: Vec<Regex>,
    include_hidden: bool,
    structure: StructureMode,
    remote_dir: String,
}

impl FileCollector {
    /// Compiles the ignore patterns. Blank patterns are dropped and invalid
    /// ones are reported to `sink` and skipped.
    pub fn new(options: &CollectOptions, sink: &dyn EventSink) -> Self {
        let mut patterns = Vec::new();
        for raw in &options.ignore_patterns {
            let pattern = raw.trim();
            if pattern.is_empty() {
                continue;
            }
            match Regex::new(pattern) {
                Ok(re) => patterns.push(re),
                Err(e) => sink.log(
                    LogLevel::Warning,
                    &format!("Invalid ignore pattern {pattern:?}: {e}"),
                ),
            }
        }
        Self {
            patterns,
            include_hidden: options.include_hidden,
            structure: options.structure,
            remote_dir: options.remote_dir.clone(),
        }
    }

    /// Check if a single path component should be skipped
    pub fn should_ignore(&self, name: &str) -> bool {
        if !self.include_hidden && name.starts_with('.') {
            return true;
        }
        self.patterns.iter().any(|re| re.is_match(name))
    }

    /// Walks every root in order. Inaccessible roots are logged and skipped.
    pub fn collect(&self, roots: &[PathBuf], sink: &dyn EventSink) -> Collection {
        let mut collection = Collection::default();
        for root in roots {
            let meta = match std::fs::metadata(root) {
                Ok(m) => m,
                Err(e) => {
                    sink.log(
                        LogLevel::Warning,
                        &format!("Error accessing {}: {}", root.display(), e),
                    );
                    continue;
                }
            };

            let root_name = root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());

            if meta.is_file() {
                let Some(name) = root_name else { continue };
                if self.should_ignore(&name) {
                    continue;
                }
                collection.tasks.push(Task {
                    local_path: root.clone(),
                    remote_path: join_remote(&self.remote_dir, &name),
                    size: meta.len(),
                });
            } else if meta.is_dir() {
                if root_name.as_deref().is_some_and(|n| self.should_ignore(n)) {
                    continue;
                }
                collection.directories += 1;
                self.walk_directory(root, root_name.as_deref(), &mut collection.tasks, sink);
            }
        }
        collection
    }

    fn walk_directory(
        &self,
        root: &Path,
        root_name: Option<&str>,
        tasks: &mut Vec<Task>,
        sink: &dyn EventSink,
    ) {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                // Never filter the root itself; it was checked by the caller
                if e.depth() == 0 {
                    return true;
                }
                if e.file_type().is_dir() {
                    !self.should_ignore(&e.file_name().to_string_lossy())
                } else {
                    true // Files are filtered below
                }
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    sink.log(LogLevel::Warning, &format!("Skipping unreadable entry: {e}"));
                    continue;
                }
            };
            let path = entry.path();
            let ft = entry.file_type();
            let is_file = ft.is_file() || (ft.is_symlink() && path.is_file());
            if !is_file {
                continue;
            }
            if self.should_ignore(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let size = match std::fs::metadata(path) {
                Ok(m) => m.len(),
                Err(e) => {
                    sink.log(
                        LogLevel::Warning,
                        &format!("Could not read {}: {}", path.display(), e),
                    );
                    continue;
                }
            };
            let Ok(rel) = path.strip_prefix(root) else { continue };
            let rel = to_remote_path(rel);
            let rel = match (self.structure, root_name) {
                (StructureMode::Preserve, Some(name)) => format!("{name}/{rel}"),
                _ => rel,
            };
            tasks.push(Task {
                local_path: path.to_path_buf(),
                remote_path: join_remote(&self.remote_dir, &rel),
                size,
            });
        }
    }
}

/// Joins normal path components with forward slashes.
fn to_remote_path(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins a relative remote path under a base directory using `/`.
pub fn join_remote(base: &str, rel: &str) -> String {
    let base = base.replace('\\', "/");
    let rel = rel.trim_start_matches('/');
    if base.is_empty() {
        return rel.to_string();
    }
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        // base was "/" (or only slashes)
        return format!("/{rel}");
    }
    format!("{base}/{rel}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use std::fs;

    fn write(path: &Path, bytes: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    fn remotes(c: &Collection) -> Vec<&str> {
        c.tasks.iter().map(|t| t.remote_path.as_str()).collect()
    }

    #[test]
    fn join_remote_variants() {
        assert_eq!(join_remote("", "a/b.txt"), "a/b.txt");
        assert_eq!(join_remote("/", "a.txt"), "/a.txt");
        assert_eq!(join_remote("/srv/up/", "a.txt"), "/srv/up/a.txt");
        assert_eq!(join_remote("up", "/a.txt"), "up/a.txt");
        assert_eq!(join_remote("win\\dir", "a.txt"), "win/dir/a.txt");
    }

    #[test]
    fn structure_modes_map_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        write(&root.join("sub/file.txt"), 3);

        let mut opts = CollectOptions::default();
        opts.structure = StructureMode::ContentsOnly;
        let c = FileCollector::new(&opts, &NullSink).collect(&[root.clone()], &NullSink);
        assert_eq!(remotes(&c), vec!["sub/file.txt"]);

        opts.structure = StructureMode::Preserve;
        let c = FileCollector::new(&opts, &NullSink).collect(&[root.clone()], &NullSink);
        assert_eq!(remotes(&c), vec!["root/sub/file.txt"]);

        opts.remote_dir = "/uploads".into();
        let c = FileCollector::new(&opts, &NullSink).collect(&[root], &NullSink);
        assert_eq!(remotes(&c), vec!["/uploads/root/sub/file.txt"]);
    }

    #[test]
    fn ignore_patterns_prune_dirs_and_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("proj");
        write(&root.join("keep.rs"), 10);
        write(&root.join("junk.tmp"), 10);
        write(&root.join("node_modules/dep/index.js"), 10);
        write(&root.join("src/lib.rs"), 10);

        let opts = CollectOptions {
            ignore_patterns: vec![r"\.tmp$".into(), "^node_modules$".into(), "  ".into()],
            structure: StructureMode::ContentsOnly,
            ..Default::default()
        };
        let c = FileCollector::new(&opts, &NullSink).collect(&[root], &NullSink);
        assert_eq!(remotes(&c), vec!["keep.rs", "src/lib.rs"]);
        assert_eq!(c.total_bytes(), 20);
    }

    #[test]
    fn hidden_files_excluded_unless_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("d");
        write(&root.join(".env"), 1);
        write(&root.join(".git/config"), 1);
        write(&root.join("visible"), 1);

        let mut opts = CollectOptions {
            structure: StructureMode::ContentsOnly,
            ..Default::default()
        };
        let c = FileCollector::new(&opts, &NullSink).collect(&[root.clone()], &NullSink);
        assert_eq!(remotes(&c), vec!["visible"]);

        opts.include_hidden = true;
        let c = FileCollector::new(&opts, &NullSink).collect(&[root], &NullSink);
        assert_eq!(remotes(&c), vec![".env", ".git/config", "visible"]);
    }

    #[test]
    fn file_roots_use_base_name_and_keep_selection_order() {
        let tmp = tempfile::tempdir().unwrap();
        let b = tmp.path().join("b.txt");
        let a = tmp.path().join("nested/a.txt");
        write(&b, 2);
        write(&a, 5);
        let opts = CollectOptions::default();
        let c = FileCollector::new(&opts, &NullSink).collect(&[b.clone(), a.clone()], &NullSink);
        assert_eq!(remotes(&c), vec!["b.txt", "a.txt"]);
        assert_eq!(c.tasks[0].local_path, b);
        assert_eq!(c.tasks[1].size, 5);
    }

    #[test]
    fn ignored_file_root_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let f = tmp.path().join("backup.bak");
        write(&f, 1);
        let opts = CollectOptions {
            ignore_patterns: vec![r"\.bak$".into()],
            ..Default::default()
        };
        let c = FileCollector::new(&opts, &NullSink).collect(&[f], &NullSink);
        assert!(c.tasks.is_empty());
    }

    #[test]
    fn missing_root_is_logged_and_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("good.txt");
        write(&good, 4);
        let (tx, rx) = std::sync::mpsc::channel();
        let opts = CollectOptions::default();
        let collector = FileCollector::new(&opts, &tx);
        let c = collector.collect(&[tmp.path().join("gone"), good], &tx);
        assert_eq!(remotes(&c), vec!["good.txt"]);
        let logs: Vec<_> = rx.try_iter().collect();
        assert_eq!(logs.len(), 1);
        assert!(matches!(
            &logs[0],
            crate::events::TransferEvent::Log { level: LogLevel::Warning, message } if message.contains("gone")
        ));
    }

    #[test]
    fn invalid_pattern_warns_and_is_skipped() {
        let (tx, rx) = std::sync::mpsc::channel();
        let opts = CollectOptions {
            ignore_patterns: vec!["(unclosed".into(), "ok".into()],
            ..Default::default()
        };
        let collector = FileCollector::new(&opts, &tx);
        assert!(collector.should_ignore("ok.txt"));
        assert!(!collector.should_ignore("fine.txt"));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn preview_counts_directories() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("x/1"), 100);
        write(&tmp.path().join("x/2"), 200);
        write(&tmp.path().join("y.bin"), 300);
        let roots = vec![tmp.path().join("x"), tmp.path().join("y.bin")];
        let c = FileCollector::new(&CollectOptions::default(), &NullSink).collect(&roots, &NullSink);
        assert_eq!(
            c.preview(),
            Preview {
                files: 3,
                directories: 1,
                total_bytes: 600
            }
        );
    }
}
