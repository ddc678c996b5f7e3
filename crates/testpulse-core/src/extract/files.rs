//! Path classification shared by the extractors.

const TEST_DIRS: &[&str] = &["test", "tests", "spec", "__tests__"];

/// Source languages the static extractors understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Rust,
    JavaScript,
    TypeScript,
    Go,
    Java,
}

impl Language {
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = file_name(path).rsplit_once('.')?.1;
        match ext {
            "py" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "tsx" => Some(Self::TypeScript),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            _ => None,
        }
    }

    /// Block structure delimited by braces rather than indentation.
    pub fn uses_braces(self) -> bool {
        !matches!(self, Self::Python)
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether `path` belongs to test code.
///
/// A path is a test file when one of its directories is `test`, `tests`,
/// `spec` or `__tests__`, or when the file name looks like `test_*`,
/// `*_test.*`, `*.test.*`, `*.spec.*` or `*_spec.*`.
pub fn is_test_file(path: &str) -> bool {
    let mut components: Vec<&str> = path.split('/').collect();
    let Some(name) = components.pop() else {
        return false;
    };
    if components.iter().any(|c| TEST_DIRS.contains(c)) {
        return true;
    }
    let stem = name.split_once('.').map(|(s, _)| s).unwrap_or(name);
    name.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with("_spec")
        || name.contains(".test.")
        || name.contains(".spec.")
}

/// Source file in a language we can analyze.
pub fn is_source_file(path: &str) -> bool {
    Language::from_path(path).is_some()
}
