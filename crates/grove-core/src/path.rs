//! Path parsing for the project file namespace.
//!
//! Paths are absolute within a branch (`/src/main.rs`). A full path splits
//! into its directory (`/src`) and name (`main.rs`); nothing else about
//! directories is stored.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GroveError, GroveResult};

const MAX_PATH_LEN: usize = 1024;

/// A validated file path split into directory and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FilePath {
    /// Parent directory, `/` for the root.
    pub dir: String,
    pub name: String,
}

impl FilePath {
    /// Parse a full file path. Leading and repeated slashes are tolerated.
    pub fn parse(raw: &str) -> GroveResult<Self> {
        let parts = components(raw)?;
        let Some((name, dirs)) = parts.split_last() else {
            return Err(GroveError::InvalidInput(format!(
                "file path has no name: '{raw}'"
            )));
        };
        Ok(FilePath {
            dir: join_dir(dirs),
            name: name.to_string(),
        })
    }

    pub fn full(&self) -> String {
        if self.dir == "/" {
            format!("/{}", self.name)
        } else {
            format!("{}/{}", self.dir, self.name)
        }
    }

    pub fn extension(&self) -> Option<&str> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() {
            None
        } else {
            Some(ext)
        }
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full())
    }
}

/// Normalize a directory path for tree listings. Empty input is the root.
pub fn parse_dir(raw: &str) -> GroveResult<String> {
    Ok(join_dir(&components(raw)?))
}

/// True if `dir` is `ancestor` or lies beneath it.
pub fn is_within(dir: &str, ancestor: &str) -> bool {
    ancestor == "/"
        || dir == ancestor
        || (dir.starts_with(ancestor) && dir.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// The first path component of `dir` below `ancestor`, if `dir` is strictly beneath it.
pub fn child_component<'a>(dir: &'a str, ancestor: &str) -> Option<&'a str> {
    if dir == ancestor || !is_within(dir, ancestor) {
        return None;
    }
    let rest = if ancestor == "/" {
        &dir[1..]
    } else {
        &dir[ancestor.len() + 1..]
    };
    rest.split('/').next().filter(|c| !c.is_empty())
}

fn components(raw: &str) -> GroveResult<Vec<&str>> {
    if raw.len() > MAX_PATH_LEN {
        return Err(GroveError::InvalidInput(format!(
            "path longer than {MAX_PATH_LEN} bytes"
        )));
    }
    if raw.contains('\\') || raw.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(GroveError::InvalidInput(format!(
            "path contains forbidden characters: '{raw}'"
        )));
    }
    let parts: Vec<&str> = raw.split('/').filter(|p| !p.is_empty()).collect();
    if parts.iter().any(|p| *p == "." || *p == "..") {
        return Err(GroveError::InvalidInput(format!(
            "path may not contain '.' or '..': '{raw}'"
        )));
    }
    Ok(parts)
}

fn join_dir(parts: &[&str]) -> String {
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Language name derived from a file's extension, for display and stats.
pub fn detect_language(path: &FilePath) -> Option<&'static str> {
    let lang = match path.name.as_str() {
        "Dockerfile" => return Some("Dockerfile"),
        "Makefile" | "makefile" => return Some("Makefile"),
        _ => match path.extension()?.to_ascii_lowercase().as_str() {
            "rs" => "Rust",
            "py" => "Python",
            "js" | "mjs" | "cjs" => "JavaScript",
            "ts" => "TypeScript",
            "jsx" => "JSX",
            "tsx" => "TSX",
            "go" => "Go",
            "java" => "Java",
            "kt" => "Kotlin",
            "c" | "h" => "C",
            "cc" | "cpp" | "cxx" | "hpp" => "C++",
            "cs" => "C#",
            "rb" => "Ruby",
            "php" => "PHP",
            "swift" => "Swift",
            "sh" | "bash" => "Shell",
            "html" | "htm" => "HTML",
            "css" => "CSS",
            "scss" => "SCSS",
            "json" => "JSON",
            "yml" | "yaml" => "YAML",
            "toml" => "TOML",
            "xml" => "XML",
            "md" | "markdown" => "Markdown",
            "sql" => "SQL",
            "txt" => "Text",
            _ => return None,
        },
    };
    Some(lang)
}
