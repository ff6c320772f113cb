//! Regex-level reading of `maven-metadata.xml` and POM files.
//!
//! Only the handful of elements the sources need are read: the version list of
//! a metadata document, and the project coordinates, properties and direct
//! dependencies of a POM.

use depshift_core::Coordinate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static VERSIONS_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<versions>(.*?)</versions>").unwrap());
static VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<version>\s*([^<]+?)\s*</version>").unwrap());
static PARENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<parent>(.*?)</parent>").unwrap());
static PROPERTIES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<properties>(.*?)</properties>").unwrap());
static PROPERTY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([A-Za-z0-9_.\-]+)>\s*([^<]*?)\s*</[A-Za-z0-9_.\-]+>").unwrap());
static DEPENDENCIES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<dependencies>(.*?)</dependencies>").unwrap());
static DEPENDENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<dependency>(.*?)</dependency>").unwrap());
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Sections whose `<dependency>` entries are not direct dependencies of the
/// project itself.
static NON_DIRECT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "dependencyManagement",
        "build",
        "profiles",
        "reporting",
        "exclusions",
    ]
    .iter()
    .map(|tag| Regex::new(&format!(r"(?s)<{tag}>.*?</{tag}>")).unwrap())
    .collect()
});

fn element_pattern(tag: &str) -> Regex {
    Regex::new(&format!(r"<{tag}>\s*([^<]*?)\s*</{tag}>")).unwrap()
}

static GROUP_ID: Lazy<Regex> = Lazy::new(|| element_pattern("groupId"));
static ARTIFACT_ID: Lazy<Regex> = Lazy::new(|| element_pattern("artifactId"));
static ELEMENT_VERSION: Lazy<Regex> = Lazy::new(|| element_pattern("version"));
static SCOPE: Lazy<Regex> = Lazy::new(|| element_pattern("scope"));
static OPTIONAL: Lazy<Regex> = Lazy::new(|| element_pattern("optional"));

/// Trimmed text of the first element `pattern` matches, if not empty.
fn element(pattern: &Regex, xml: &str) -> Option<String> {
    pattern
        .captures(xml)
        .map(|c| c[1].to_string())
        .filter(|s| !s.is_empty())
}

/// Versions listed by a `maven-metadata.xml`, in document order.
pub fn parse_metadata_versions(xml: &str) -> Vec<String> {
    let xml = COMMENT.replace_all(xml, "");
    let Some(block) = VERSIONS_BLOCK.captures(&xml) else {
        return Vec::new();
    };
    VERSION
        .captures_iter(&block[1])
        .map(|c| c[1].to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PomDependency {
    pub coordinate: Coordinate,
    /// `compile` when the POM leaves it out.
    pub scope: String,
    pub optional: bool,
}

impl PomDependency {
    pub fn is_compile(&self) -> bool {
        self.scope == "compile"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pom {
    pub coordinate: Option<Coordinate>,
    pub dependencies: Vec<PomDependency>,
    /// Dependencies dropped because their version was missing or referenced
    /// an unknown property.
    pub unresolved: usize,
}

impl Pom {
    pub fn compile_dependencies(&self) -> impl Iterator<Item = &Coordinate> {
        self.dependencies
            .iter()
            .filter(|d| d.is_compile())
            .map(|d| &d.coordinate)
    }
}

/// Reads the project coordinates and direct dependencies of a POM.
///
/// `${...}` placeholders are resolved against the project's own coordinates
/// and `<properties>`. Versions inherited from a parent's dependency
/// management cannot be resolved here and are counted in `unresolved`.
pub fn parse_pom(xml: &str) -> Pom {
    let xml = COMMENT.replace_all(xml, "").into_owned();

    let parent = PARENT.captures(&xml).map(|c| c[1].to_string());
    let mut body = PARENT.replace(&xml, "").into_owned();
    for section in NON_DIRECT.iter() {
        body = section.replace_all(&body, "").into_owned();
    }

    let dependency_block = DEPENDENCIES
        .captures(&body)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let properties_block = PROPERTIES
        .captures(&body)
        .map(|c| c[1].to_string())
        .unwrap_or_default();

    let mut header = DEPENDENCIES.replace_all(&body, "").into_owned();
    header = PROPERTIES.replace_all(&header, "").into_owned();

    let parent_group = parent.as_deref().and_then(|p| element(&GROUP_ID, p));
    let parent_version = parent.as_deref().and_then(|p| element(&ELEMENT_VERSION, p));
    let group = element(&GROUP_ID, &header).or_else(|| parent_group.clone());
    let artifact = element(&ARTIFACT_ID, &header);
    let version = element(&ELEMENT_VERSION, &header).or_else(|| parent_version.clone());

    let mut properties: HashMap<String, String> = PROPERTY
        .captures_iter(&properties_block)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect();
    if let Some(group) = &group {
        properties.insert("project.groupId".into(), group.clone());
        properties.insert("pom.groupId".into(), group.clone());
        properties.insert("groupId".into(), group.clone());
    }
    if let Some(version) = &version {
        properties.insert("project.version".into(), version.clone());
        properties.insert("pom.version".into(), version.clone());
        properties.insert("version".into(), version.clone());
    }
    if let Some(version) = &parent_version {
        properties.insert("project.parent.version".into(), version.clone());
    }
    if let Some(group) = &parent_group {
        properties.insert("project.parent.groupId".into(), group.clone());
    }

    let coordinate = match (&group, &artifact, &version) {
        (Some(g), Some(a), Some(v)) => Some(Coordinate::new(
            resolve(g, &properties).unwrap_or_else(|| g.clone()),
            a.clone(),
            resolve(v, &properties).unwrap_or_else(|| v.clone()),
        )),
        _ => None,
    };

    let mut pom = Pom {
        coordinate,
        ..Pom::default()
    };
    for entry in DEPENDENCY.captures_iter(&dependency_block) {
        let entry = &entry[1];
        let fields = (
            element(&GROUP_ID, entry).and_then(|g| resolve(&g, &properties)),
            element(&ARTIFACT_ID, entry).and_then(|a| resolve(&a, &properties)),
            element(&ELEMENT_VERSION, entry).and_then(|v| resolve(&v, &properties)),
        );
        let (Some(group), Some(artifact), Some(version)) = fields else {
            pom.unresolved += 1;
            continue;
        };
        pom.dependencies.push(PomDependency {
            coordinate: Coordinate::new(group, artifact, version),
            scope: element(&SCOPE, entry).unwrap_or_else(|| "compile".to_string()),
            optional: element(&OPTIONAL, entry).as_deref() == Some("true"),
        });
    }

    if pom.unresolved > 0 {
        debug!(
            project = ?pom.coordinate.as_ref().map(|c| c.to_string()),
            unresolved = pom.unresolved,
            "Skipped dependencies with unresolved coordinates"
        );
    }
    pom
}

/// Substitutes `${...}` placeholders; `None` if any of them is unknown.
fn resolve(value: &str, properties: &HashMap<String, String>) -> Option<String> {
    let mut current = value.to_string();
    // Properties may reference other properties.
    for _ in 0..8 {
        if !current.contains("${") {
            return Some(current);
        }
        let mut missing = false;
        let next = PLACEHOLDER
            .replace_all(&current, |c: &regex::Captures| match properties.get(&c[1]) {
                Some(value) => value.clone(),
                None => {
                    missing = true;
                    String::new()
                }
            })
            .into_owned();
        if missing {
            return None;
        }
        current = next;
    }
    None
}
