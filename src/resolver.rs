// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: resolver  —  pick the desired artifact version
//
//  Candidate sources are read in priority order; the first file that
//  exists and matches its pattern wins. Anything short of a usable known
//  version falls back to the highest known one with a warning.
// ─────────────────────────────────────────────────────────────────────────────

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Result, ToolsError};

/// A file that may pin the version, plus how to pull the version out of it.
#[derive(Debug, Clone)]
pub struct CandidateSource {
    pub path: PathBuf,
    pattern:  Regex,
}

impl CandidateSource {
    /// `pattern` is compiled in multi-line mode; capture group 1 (or the whole
    /// match when there is no group) is the version.
    pub fn new(path: impl Into<PathBuf>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(&format!("(?m){}", pattern))
            .map_err(|e| ToolsError::Config(format!("bad version pattern '{}': {}", pattern, e)))?;
        Ok(Self { path: path.into(), pattern })
    }

    /// `None` when the file is missing, unreadable, or does not match.
    pub fn read_version(&self) -> Option<String> {
        let content = fs::read_to_string(&self.path).ok()?;
        let caps = self.pattern.captures(&content)?;
        let m = caps.get(1).or_else(|| caps.get(0))?;
        let version = m.as_str().trim();
        if version.is_empty() { None } else { Some(version.to_owned()) }
    }
}

/// Host-specific veto on a detected version.
pub struct PlatformConstraint {
    pub description: String,
    accepts:         Box<dyn Fn(&str) -> bool>,
}

impl PlatformConstraint {
    pub fn new(description: impl Into<String>, accepts: impl Fn(&str) -> bool + 'static) -> Self {
        Self { description: description.into(), accepts: Box::new(accepts) }
    }

    /// Rejects anything older than `min`.
    pub fn min_version(description: impl Into<String>, min: &str) -> Self {
        let min = min.to_owned();
        Self::new(description, move |v| cmp_ver(v, &min) != Ordering::Less)
    }

    pub fn accepts(&self, version: &str) -> bool {
        (self.accepts)(version)
    }
}

impl fmt::Debug for PlatformConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConstraint").field("description", &self.description).finish()
    }
}

/// Why detection fell back. Recovered locally, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionFailure {
    NoSourceMatched,
    UnknownVersion(String),
    Rejected { version: String, constraint: String },
}

impl fmt::Display for DetectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionFailure::NoSourceMatched =>
                write!(f, "no version source matched"),
            DetectionFailure::UnknownVersion(v) =>
                write!(f, "detected version {} is not a known release", v),
            DetectionFailure::Rejected { version, constraint } =>
                write!(f, "detected version {} is not usable here ({})", version, constraint),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Chosen explicitly by the user.
    Requested { version: String },
    Detected { version: String, source: PathBuf },
    Fallback { version: String, reason: DetectionFailure },
}

impl Resolution {
    pub fn version(&self) -> &str {
        match self {
            Resolution::Requested { version }
            | Resolution::Detected { version, .. }
            | Resolution::Fallback { version, .. } => version,
        }
    }
}

/// First candidate that yields a version, with the file it came from.
pub fn detect(sources: &[CandidateSource]) -> Option<(String, &Path)> {
    sources.iter().find_map(|s| {
        let v = s.read_version();
        if v.is_none() {
            log::debug!("version source {} did not match", s.path.display());
        }
        v.map(|v| (v, s.path.as_path()))
    })
}

/// Resolve against the known-version table, falling back deterministically.
pub fn resolve(
    sources: &[CandidateSource],
    known: &[String],
    constraints: &[PlatformConstraint],
) -> Result<Resolution> {
    let fallback = fallback_version(known)
        .ok_or_else(|| ToolsError::Config("no known versions configured".into()))?
        .to_owned();

    let outcome = match detect(sources) {
        None => Err(DetectionFailure::NoSourceMatched),
        Some((raw, source)) => match canonical(known, &raw) {
            None => Err(DetectionFailure::UnknownVersion(raw)),
            Some(version) => match constraints.iter().find(|c| !c.accepts(version)) {
                Some(c) => Err(DetectionFailure::Rejected {
                    version:    version.to_owned(),
                    constraint: c.description.clone(),
                }),
                None => Ok(Resolution::Detected {
                    version: version.to_owned(),
                    source:  source.to_path_buf(),
                }),
            },
        },
    };

    Ok(outcome.unwrap_or_else(|reason| {
        log::warn!("{}; falling back to {}", reason, fallback);
        Resolution::Fallback { version: fallback, reason }
    }))
}

/// An explicit version must be a known release; no fallback applies.
pub fn requested(known: &[String], version: &str) -> Result<Resolution> {
    match canonical(known, version) {
        Some(v) => Ok(Resolution::Requested { version: v.to_owned() }),
        None => Err(ToolsError::Config(format!(
            "unknown version '{}', known versions: {}", version, known.join(", ")
        ))),
    }
}

/// Highest known version by numeric component comparison.
pub fn fallback_version(known: &[String]) -> Option<&str> {
    let mut sorted: Vec<&String> = known.iter().collect();
    sorted.sort_by(|a, b| cmp_ver(b, a));
    sorted.first().map(|s| s.as_str())
}

/// The known-table spelling of `version` (`14.3` matches `14.3.0`).
/// Versions with a non-numeric component (`14.3.1-beta`) match nothing.
pub fn canonical<'a>(known: &'a [String], version: &str) -> Option<&'a str> {
    if !is_numeric_ver(version) {
        return None;
    }
    known.iter()
        .find(|k| cmp_ver(k, version) == Ordering::Equal)
        .map(|k| k.as_str())
}

/// Component-wise numeric comparison; missing components count as zero.
pub fn cmp_ver(a: &str, b: &str) -> Ordering {
    let mut va = parse_ver(a);
    let mut vb = parse_ver(b);
    let len = va.len().max(vb.len());
    va.resize(len, 0);
    vb.resize(len, 0);
    va.cmp(&vb)
}

fn parse_ver(s: &str) -> Vec<u32> {
    s.trim().split('.').map(|p| p.parse::<u32>().unwrap_or(0)).collect()
}

fn is_numeric_ver(s: &str) -> bool {
    s.trim().split('.').all(|p| p.parse::<u32>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn known() -> Vec<String> {
        ["13.3.0", "14.3.1", "12.4.0", "14.2.0"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_matching_source_wins_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        let unmatched = dir.path().join("config.yml");
        let matching = dir.path().join(".sdk-version");
        let lower = dir.path().join("other.yml");
        fs::write(&unmatched, "jobs:\n  build: {}\n").unwrap();
        fs::write(&matching, "14.2.0\n").unwrap();
        fs::write(&lower, "sdk_version: 13.3.0\n").unwrap();

        let sources = vec![
            CandidateSource::new(&missing, r"^\s*([0-9][0-9.]*)\s*$").unwrap(),
            CandidateSource::new(&unmatched, r"sdk_version:\s*([0-9.]+)").unwrap(),
            CandidateSource::new(&matching, r"^\s*([0-9][0-9.]*)\s*$").unwrap(),
            CandidateSource::new(&lower, r"sdk_version:\s*([0-9.]+)").unwrap(),
        ];

        let res = resolve(&sources, &known(), &[]).unwrap();
        assert_eq!(res, Resolution::Detected { version: "14.2.0".into(), source: matching });
    }

    #[test]
    fn no_match_falls_back_to_highest_known() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![
            CandidateSource::new(dir.path().join("nope"), r"([0-9.]+)").unwrap(),
        ];
        let res = resolve(&sources, &known(), &[]).unwrap();
        assert_eq!(res, Resolution::Fallback {
            version: "14.3.1".into(),
            reason:  DetectionFailure::NoSourceMatched,
        });
    }

    #[test]
    fn unknown_version_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join(".sdk-version");
        fs::write(&f, "99.0\n").unwrap();
        let sources = vec![CandidateSource::new(&f, r"([0-9.]+)").unwrap()];

        let res = resolve(&sources, &known(), &[]).unwrap();
        assert_eq!(res.version(), "14.3.1");
        assert!(matches!(res, Resolution::Fallback { reason: DetectionFailure::UnknownVersion(_), .. }));
    }

    #[test]
    fn prerelease_suffix_is_not_a_known_version() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join(".sdk-version");
        fs::write(&f, "14.3.1-beta\n").unwrap();
        let sources = vec![CandidateSource::new(&f, r"([0-9A-Za-z.-]+)").unwrap()];

        let res = resolve(&sources, &known(), &[]).unwrap();
        assert_eq!(res, Resolution::Fallback {
            version: "14.3.1".into(),
            reason:  DetectionFailure::UnknownVersion("14.3.1-beta".into()),
        });
        assert!(matches!(requested(&known(), "14.3.0-rc1"), Err(ToolsError::Config(_))));
        assert_eq!(canonical(&known(), "14.3.1"), Some("14.3.1"));
    }

    #[test]
    fn rejected_version_falls_back_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join(".sdk-version");
        fs::write(&f, "13.3.0").unwrap();
        let sources = vec![CandidateSource::new(&f, r"([0-9.]+)").unwrap()];
        let constraints = vec![PlatformConstraint::min_version("OS 13+ requires SDK 14+", "14.0.0")];

        let res = resolve(&sources, &known(), &constraints).unwrap();
        assert_eq!(res, Resolution::Fallback {
            version: "14.3.1".into(),
            reason:  DetectionFailure::Rejected {
                version:    "13.3.0".into(),
                constraint: "OS 13+ requires SDK 14+".into(),
            },
        });
    }

    #[test]
    fn short_versions_resolve_to_known_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join(".sdk-version");
        fs::write(&f, "14.2").unwrap();
        let sources = vec![CandidateSource::new(&f, r"([0-9.]+)").unwrap()];
        assert_eq!(resolve(&sources, &known(), &[]).unwrap().version(), "14.2.0");
    }

    #[test]
    fn requested_version_must_be_known() {
        assert_eq!(requested(&known(), "13.3").unwrap(), Resolution::Requested { version: "13.3.0".into() });
        assert!(matches!(requested(&known(), "11.0"), Err(ToolsError::Config(_))));
    }

    #[test]
    fn empty_known_table_is_a_config_error() {
        assert!(matches!(resolve(&[], &[], &[]), Err(ToolsError::Config(_))));
    }

    #[test]
    fn version_ordering_is_numeric() {
        assert_eq!(cmp_ver("14.10.0", "14.9.1"), Ordering::Greater);
        assert_eq!(cmp_ver("14.3", "14.3.0"), Ordering::Equal);
        assert_eq!(fallback_version(&["9.4".to_string(), "10.0".to_string()]), Some("10.0"));
    }
}
