use crate::{DepShiftError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// `group:artifact`: an artifact independent of any release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnversionedCoordinate {
    pub group: String,
    pub artifact: String,
}

impl UnversionedCoordinate {
    pub fn new(group: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
        }
    }

    pub fn with_version(&self, version: impl Into<String>) -> Coordinate {
        Coordinate::new(self.group.clone(), self.artifact.clone(), version)
    }
}

impl fmt::Display for UnversionedCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.artifact)
    }
}

impl FromStr for UnversionedCoordinate {
    type Err = DepShiftError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        match parts.as_slice() {
            [group, artifact] if !group.is_empty() && !artifact.is_empty() => {
                Ok(Self::new(*group, *artifact))
            }
            _ => Err(DepShiftError::MalformedInput(format!(
                "expected <group>:<artifact>, got '{}'",
                s
            ))),
        }
    }
}

impl TryFrom<String> for UnversionedCoordinate {
    type Error = DepShiftError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<UnversionedCoordinate> for String {
    fn from(value: UnversionedCoordinate) -> Self {
        value.to_string()
    }
}

/// `group:artifact:version`: one published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coordinate {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl Coordinate {
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
        }
    }

    pub fn unversioned(&self) -> UnversionedCoordinate {
        UnversionedCoordinate::new(self.group.clone(), self.artifact.clone())
    }

    /// Filesystem-friendly rendering used for output file names.
    pub fn file_stem(&self) -> String {
        self.to_string().replace(':', "_")
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

impl FromStr for Coordinate {
    type Err = DepShiftError;

    /// Accepts `g:a:v`, `g:a:ext:v` and `g:a:ext:classifier:v`; extension and
    /// classifier are dropped.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let (group, artifact, version) = match parts.as_slice() {
            [g, a, v] | [g, a, _, v] | [g, a, _, _, v] => (*g, *a, *v),
            _ => {
                return Err(DepShiftError::MalformedInput(format!(
                    "expected <group>:<artifact>[:<extension>[:<classifier>]]:<version>, got '{}'",
                    s
                )))
            }
        };
        if group.is_empty() || artifact.is_empty() || version.is_empty() {
            return Err(DepShiftError::MalformedInput(format!(
                "empty coordinate field in '{}'",
                s
            )));
        }
        Ok(Self::new(group, artifact, version))
    }
}

impl TryFrom<String> for Coordinate {
    type Error = DepShiftError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Coordinate> for String {
    fn from(value: Coordinate) -> Self {
        value.to_string()
    }
}

/// `client` depends directly, with compile scope, on `library`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientLink {
    pub library: Coordinate,
    pub client: Coordinate,
}

impl ClientLink {
    pub fn new(library: Coordinate, client: Coordinate) -> Self {
        Self { library, client }
    }
}

/// How a dependency moved between two versions of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Added,
    Removed,
    Updated,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Added => "ADDED",
            ChangeType::Removed => "REMOVED",
            ChangeType::Updated => "UPDATED",
        };
        write!(f, "{}", s)
    }
}

/// Caller → ordered invocations of one artifact snapshot.
///
/// Invocation lists keep the extractor's order and repetitions; they are
/// compared as lists, never as sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraph {
    invocations: BTreeMap<String, Vec<String>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_facts<I, S, T>(facts: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let mut graph = Self::new();
        for (caller, callee) in facts {
            graph.push(caller, callee);
        }
        graph
    }

    pub fn push(&mut self, caller: impl Into<String>, callee: impl Into<String>) {
        self.invocations
            .entry(caller.into())
            .or_default()
            .push(callee.into());
    }

    /// Invocations made by `caller`, empty when the caller is unknown.
    pub fn invocations(&self, caller: &str) -> &[String] {
        self.invocations
            .get(caller)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_caller(&self, caller: &str) -> bool {
        self.invocations.contains_key(caller)
    }

    pub fn callers(&self) -> impl Iterator<Item = &str> {
        self.invocations.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.invocations
            .iter()
            .map(|(caller, callees)| (caller.as_str(), callees.as_slice()))
    }

    pub fn caller_count(&self) -> usize {
        self.invocations.len()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }
}

/// One archive of a specific artifact version available on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactSnapshot {
    pub coordinate: Coordinate,
    pub path: PathBuf,
}

impl ArtifactSnapshot {
    pub fn new(coordinate: Coordinate, path: impl Into<PathBuf>) -> Self {
        Self {
            coordinate,
            path: path.into(),
        }
    }
}
