//! Source tree inventory of a checked-out repository.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Directories never scanned.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    ".pytest_cache",
    ".mypy_cache",
    "dist",
    "build",
];

/// Dependency manifests handed to diagnosis alongside an anchored file.
pub const CONFIG_FILES: &[&str] = &["requirements.txt", "package.json", "pyproject.toml", "setup.cfg"];

const SOURCE_EXTENSIONS: &[&str] = &["py", "js", "ts", "mjs", "cjs"];

/// True for files the engine must never patch.
pub fn is_test_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name == "conftest.py"
        || (name.starts_with("test_") && name.ends_with(".py"))
        || name.ends_with("_test.py")
        || [".test.", ".spec."].iter().any(|marker| name.contains(marker))
}

/// True for files with a recognised source extension.
pub fn is_source_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Render `content` with 1-based line numbers, one `N: line` per line.
pub fn numbered(content: &str) -> String {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{}: {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 1-based line of the first `def symbol`, `class symbol` or
/// `function symbol` in `content`.
pub fn definition_line(content: &str, symbol: &str) -> Option<u32> {
    if symbol.is_empty() {
        return None;
    }
    content.lines().enumerate().find_map(|(i, line)| {
        let t = line.trim_start();
        let t = t.strip_prefix("async ").unwrap_or(t);
        let t = t.strip_prefix("export ").unwrap_or(t);
        let rest = t
            .strip_prefix("def ")
            .or_else(|| t.strip_prefix("class "))
            .or_else(|| t.strip_prefix("function "))?;
        let ident: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        (ident == symbol).then(|| u32::try_from(i + 1).unwrap_or(u32::MAX))
    })
}

/// Sorted inventory of the files in a checkout, relative to its root.
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
    files: Vec<String>,
}

impl SourceTree {
    /// Walk `root`, skipping [`SKIP_DIRS`].
    pub fn scan(root: &Path) -> io::Result<Self> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|e| {
            e.depth() == 0
                || !e
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIP_DIRS.contains(&name))
        });

        for entry in walker {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(root) {
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        files.sort();

        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Non-test source files.
    pub fn source_files(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .map(String::as_str)
            .filter(|f| is_source_file(f) && !is_test_file(f))
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.files.iter().any(|f| f == rel)
    }

    /// Config files present in the tree, shallowest first.
    pub fn config_files(&self) -> Vec<&str> {
        let mut found: Vec<&str> = self
            .files
            .iter()
            .map(String::as_str)
            .filter(|f| {
                let name = f.rsplit('/').next().unwrap_or(f);
                CONFIG_FILES.contains(&name)
            })
            .collect();
        found.sort_by_key(|f| f.matches('/').count());
        found
    }

    /// File whose path equals `target` or ends with `/target`.
    pub fn find_by_suffix(&self, target: &str) -> Option<&str> {
        let target = target.trim_start_matches("./").trim_start_matches('/');
        if target.is_empty() {
            return None;
        }
        self.files
            .iter()
            .map(String::as_str)
            .filter(|f| *f == target || f.ends_with(&format!("/{target}")))
            .min_by_key(|f| f.len())
    }

    /// First file with the same basename as `target`.
    pub fn find_by_basename(&self, target: &str) -> Option<&str> {
        let name = target.rsplit('/').next().unwrap_or(target);
        if name.is_empty() {
            return None;
        }
        self.files
            .iter()
            .map(String::as_str)
            .filter(|f| f.rsplit('/').next() == Some(name))
            .min_by_key(|f| f.len())
    }

    /// Source file implementing a dotted (`pkg.mod`) or relative (`./mod`)
    /// module reference.
    pub fn module_file(&self, module: &str) -> Option<&str> {
        let path = module
            .trim_start_matches("./")
            .trim_start_matches("../")
            .trim_start_matches('.')
            .replace('.', "/");
        if path.is_empty() {
            return None;
        }

        let candidates = [
            format!("{path}.py"),
            format!("{path}/__init__.py"),
            format!("{path}.js"),
            format!("{path}.ts"),
            format!("{path}/index.js"),
        ];
        candidates.iter().find_map(|candidate| {
            self.source_files()
                .filter(|f| *f == candidate.as_str() || f.ends_with(&format!("/{candidate}")))
                .min_by_key(|f| f.len())
        })
    }

    /// Non-test source file defining `symbol`, with its line.
    pub fn find_definition(&self, symbol: &str) -> Option<(&str, u32)> {
        self.source_files().find_map(|f| {
            let content = self.read(f).ok()?;
            definition_line(&content, symbol).map(|line| (f, line))
        })
    }

    pub fn read(&self, rel: &str) -> io::Result<String> {
        let bytes = std::fs::read(self.root.join(rel))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
