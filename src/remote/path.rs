//! Remote (POSIX) path handling and shell quoting
//!
//! Local paths use the host OS separator; remote paths always use `/`. Every
//! local path sent to the host goes through [`RemotePath::join_local`].

use std::borrow::Cow;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A path on the remote host, always `/`-separated and lexically clean
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(clean(path.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    /// Join a `/`-separated relative path onto this one
    pub fn join(&self, relative: &str) -> Self {
        if relative.is_empty() {
            return self.clone();
        }
        Self(clean(&format!("{}/{}", self.0, relative)))
    }

    /// Join a local relative path, translating its separators to `/`
    ///
    /// Root, prefix and `..` components never escape into the result: only
    /// normal components are carried over.
    pub fn join_local(&self, relative: &Path) -> Self {
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        self.join(&parts.join("/"))
    }

    /// Parent directory; `None` for `/` and for single-component relative paths
    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.0.as_str();
        match trimmed.rfind('/') {
            Some(0) if trimmed.len() > 1 => Some(Self("/".to_string())),
            Some(0) => None,
            Some(idx) => Some(Self(trimmed[..idx].to_string())),
            None => None,
        }
    }

    /// Last component, if any
    pub fn file_name(&self) -> Option<&str> {
        self.0
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
    }

    /// As a `Path` for APIs (SFTP) that take one
    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Shell-safe rendering for use inside remote command lines
    pub fn quoted(&self) -> Cow<'_, str> {
        shell_quote(&self.0)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemotePath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Lexical clean in the style of POSIX path joining: collapse `//`, drop `.`,
/// resolve `..` against preceding components.
fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Quote a single word for a POSIX shell
///
/// Words made only of safe characters are returned untouched so templated
/// commands stay readable; anything else is single-quoted with embedded
/// quotes escaped as `'\''`.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    if word.is_empty() {
        return Cow::Borrowed("''");
    }

    let safe = word
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c));

    if safe {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', "'\\''")))
    }
}
