//! Common types used throughout driveup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use zeroize::Zeroize;

/// Identifier of a folder in the remote namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteFolderId(String);

impl RemoteFolderId {
    /// Alias the remote API accepts for the user's top-level folder.
    pub const ROOT: &'static str = "root";

    /// Create a new RemoteFolderId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "Remote folder id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// The user's top-level folder.
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Use `id` when given and non-blank, the root alias otherwise.
    pub fn or_root(id: Option<&str>) -> Self {
        match id.map(str::trim) {
            Some(id) if !id.is_empty() => Self(id.to_string()),
            _ => Self::root(),
        }
    }

    /// Whether this is the root alias.
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteFolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directory path relative to the upload root.
///
/// Used as the local half of the folder resolver's cache key, so it is
/// independent of the platform separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RelativeDir {
    components: Vec<String>,
}

impl RelativeDir {
    /// The upload root itself.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty, contains a separator,
    ///   or is a `.`/`..` reference
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            if comp.is_empty() {
                return Err(crate::Error::InvalidInput(
                    "Path component cannot be empty".to_string(),
                ));
            }
            if comp.contains('/') || comp.contains('\\') {
                return Err(crate::Error::InvalidInput(
                    "Path component cannot contain separators".to_string(),
                ));
            }
            if comp == "." || comp == ".." {
                return Err(crate::Error::InvalidInput(format!(
                    "Path component cannot be '{}'",
                    comp
                )));
            }
        }
        Ok(Self { components })
    }

    /// Parse a `/`-separated relative path. Empty and `.` mean the root.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_matches('/');
        if path.is_empty() || path == "." {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    /// Compute the directory of `dir` relative to `root`.
    ///
    /// # Errors
    /// - `dir` is not inside `root`
    pub fn from_paths(root: &Path, dir: &Path) -> crate::Result<Self> {
        let relative = dir.strip_prefix(root).map_err(|_| {
            crate::Error::InvalidInput(format!(
                "{} is not inside {}",
                dir.display(),
                root.display()
            ))
        })?;

        let mut components = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => components.push(name.to_string_lossy().into_owned()),
                Component::CurDir => {}
                other => {
                    return Err(crate::Error::InvalidInput(format!(
                        "Unexpected path component {:?} in {}",
                        other,
                        relative.display()
                    )))
                }
            }
        }
        Self::from_components(components)
    }

    /// Check if this is the upload root.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the directory name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        let mut components = self.components.clone();
        components.push(child.to_string());
        Self::from_components(components)
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Convert to a `/`-separated string; the root is `.`.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            ".".to_string()
        } else {
            self.components.join("/")
        }
    }
}

impl fmt::Display for RelativeDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

/// One successfully transferred item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Name of the remote item.
    pub name: String,
    /// Remote identifier.
    pub id: String,
    /// Share link; empty when the remote returned none.
    pub url: String,
}

impl UploadResult {
    /// Whether this result carries a link worth surfacing.
    pub fn has_url(&self) -> bool {
        !self.url.is_empty()
    }
}

/// String secret that zeroizes on drop and never prints its value.
#[derive(Clone, PartialEq, Eq, Zeroize, Serialize, Deserialize)]
#[serde(transparent)]
#[zeroize(drop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED; {} bytes])", self.0.len())
    }
}
