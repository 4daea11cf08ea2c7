//! Recovery of companion files captured alongside a primary file.
//!
//! When a capture file is copied into a working directory, the copy tool
//! leaves a side-car `<file>.origin` whose first line is the directory the
//! file originally came from. Instruments name every file written for one
//! acquisition with the same timestamp prefix, e.g.
//! `2024-05-01_10-30-00_123.bin` and `2024-05-01_10-30-00_123_GNSS.csv`, so
//! the siblings are found by listing that directory for the same token.

use crate::diagnostics::Diagnostics;
use crate::types::CompanionFileSet;
use regex::Regex;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

const SOURCE: &str = "correlator";

/// Extension appended to a primary path to locate its side-car.
pub const ORIGIN_EXTENSION: &str = "origin";

/// `YYYY-MM-DD_HH-MM-SS_<sub-second digits>` at the start of a file name.
pub const TIMESTAMP_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}_\d+";

/// Marker instruments put in the names of GNSS solution exports.
pub const GNSS_MARKER: &str = "_GNSS";

/// Errors raised while correlating companion files.
#[derive(Error, Debug)]
pub enum CorrelateError {
    #[error("provenance directory {} unavailable: {source}", .path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read side-car {}: {source}", .path.display())]
    Origin {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn timestamp_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(TIMESTAMP_PATTERN).expect("timestamp pattern is valid"))
}

/// Extracts the acquisition timestamp token from the start of a file name.
pub fn timestamp_token(file_name: &str) -> Option<&str> {
    timestamp_regex().find(file_name).map(|m| m.as_str())
}

/// Names from `names` that contain the token of `target`, in input order.
///
/// Returns nothing when `target` does not start with a timestamp token.
pub fn match_timestamp<'a, S: AsRef<str>>(target: &str, names: &'a [S]) -> Vec<&'a str> {
    let Some(token) = timestamp_token(target) else {
        return Vec::new();
    };
    names
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| name.contains(token))
        .collect()
}

/// Path of the side-car for `primary`: the full file name plus `.origin`.
pub fn origin_path(primary: &Path) -> PathBuf {
    let mut name = OsString::from(primary.as_os_str());
    name.push(".");
    name.push(ORIGIN_EXTENSION);
    PathBuf::from(name)
}

/// Reads the provenance directory recorded for `primary`.
///
/// Only the first line counts; `Ok(None)` when it is blank.
pub fn read_origin(primary: &Path) -> Result<Option<PathBuf>, CorrelateError> {
    let path = origin_path(primary);
    let contents = fs::read_to_string(&path).map_err(|source| CorrelateError::Origin {
        path: path.clone(),
        source,
    })?;
    let first = contents.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        Ok(None)
    } else {
        Ok(Some(PathBuf::from(first)))
    }
}

/// Lists the regular files directly inside `dir`, sorted by name.
pub fn list_directory(dir: &Path) -> Result<Vec<String>, CorrelateError> {
    let unavailable = |source| CorrelateError::DirectoryUnavailable {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(unavailable)? {
        let entry = entry.map_err(unavailable)?;
        if !entry.path().is_file() {
            continue;
        }
        // Names that are not UTF-8 cannot contain the token.
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// What a companion file is, as far as export is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CompanionRole {
    /// The primary capture file itself
    Primary,
    /// Data derived from the same acquisition, e.g. raw observations
    Data,
    /// GNSS solution export
    Gnss,
    Other,
}

/// Per-sensor decision about which companions to export and how to tag them.
///
/// Chosen once per sensor type; returning `None` leaves a file out.
pub trait CompanionClassifier {
    fn name(&self) -> &str;

    fn classify(&self, primary: &Path, candidate: &Path) -> Option<CompanionRole>;
}

fn same_file_name(a: &Path, b: &Path) -> bool {
    a.file_name().is_some() && a.file_name() == b.file_name()
}

/// Keeps every match.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllCompanions;

impl CompanionClassifier for AllCompanions {
    fn name(&self) -> &str {
        "all"
    }

    fn classify(&self, primary: &Path, candidate: &Path) -> Option<CompanionRole> {
        if same_file_name(primary, candidate) {
            Some(CompanionRole::Primary)
        } else {
            Some(CompanionRole::Other)
        }
    }
}

/// IMU/GNSS units write the raw binary, a raw-observation CSV and a
/// `_GNSS.csv` solution file per acquisition.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImuCompanions;

impl CompanionClassifier for ImuCompanions {
    fn name(&self) -> &str {
        "imu"
    }

    fn classify(&self, primary: &Path, candidate: &Path) -> Option<CompanionRole> {
        if same_file_name(primary, candidate) {
            return Some(CompanionRole::Primary);
        }
        let name = candidate.file_name()?.to_str()?;
        if name.contains(GNSS_MARKER) {
            Some(CompanionRole::Gnss)
        } else if name.ends_with(".csv") {
            Some(CompanionRole::Data)
        } else {
            Some(CompanionRole::Other)
        }
    }
}

/// A companion file tagged by a [`CompanionClassifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Companion {
    pub path: PathBuf,
    pub role: CompanionRole,
}

/// Runs `classifier` over every match, dropping the excluded ones.
pub fn classify_companions(
    set: &CompanionFileSet,
    classifier: &dyn CompanionClassifier,
) -> Vec<Companion> {
    set.matched_paths
        .iter()
        .filter_map(|path| {
            classifier
                .classify(&set.primary_path, path)
                .map(|role| Companion {
                    path: path.clone(),
                    role,
                })
        })
        .collect()
}

/// Resolves companion files through the `.origin` side-car.
#[derive(Debug, Clone)]
pub struct CompanionFileCorrelator {
    diagnostics: Diagnostics,
}

impl CompanionFileCorrelator {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self { diagnostics }
    }

    /// Finds every file captured with `primary`.
    ///
    /// A missing side-car is an error. A primary name without a timestamp
    /// token, a blank side-car or an unreadable provenance directory yield an
    /// empty set and a diagnostic.
    pub fn correlate(&self, primary: &Path) -> Result<CompanionFileSet, CorrelateError> {
        let Some(provenance) = read_origin(primary)? else {
            self.diagnostics.warn(
                SOURCE,
                format!("side-car for {} is empty", primary.display()),
            );
            return Ok(CompanionFileSet::empty(primary.to_path_buf(), PathBuf::new()));
        };
        Ok(self.correlate_in(primary, &provenance))
    }

    /// Like [`correlate`](Self::correlate) with the provenance directory
    /// already known.
    pub fn correlate_in(&self, primary: &Path, provenance: &Path) -> CompanionFileSet {
        let mut set = CompanionFileSet::empty(primary.to_path_buf(), provenance.to_path_buf());

        let token = primary
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(timestamp_token);
        let Some(token) = token else {
            self.diagnostics.info(
                SOURCE,
                format!("{} has no timestamp token", primary.display()),
            );
            return set;
        };

        let names = match list_directory(provenance) {
            Ok(names) => names,
            Err(e) => {
                self.diagnostics.warn(SOURCE, e.to_string());
                return set;
            }
        };

        set.matched_paths = names
            .iter()
            .filter(|name| name.contains(token))
            .map(|name| provenance.join(name))
            .collect();

        debug!(
            primary = %primary.display(),
            provenance = %provenance.display(),
            token,
            matched = set.matched_paths.len(),
            "companions resolved"
        );
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_token() {
        assert_eq!(
            timestamp_token("2024-05-01_10-30-00_123.bin"),
            Some("2024-05-01_10-30-00_123")
        );
        assert_eq!(
            timestamp_token("2024-05-01_10-30-00_123456_imu.bin"),
            Some("2024-05-01_10-30-00_123456")
        );
        assert_eq!(timestamp_token("imu_2024-05-01_10-30-00_123.bin"), None);
        assert_eq!(timestamp_token("2024-05-01_10-30-00.bin"), None);
    }

    #[test]
    fn test_match_timestamp() {
        let names = [
            "2024-05-01_10-30-00_123.csv",
            "2024-05-01_10-30-00_123_GNSS.csv",
            "2024-05-01_10-30-00_124.csv",
            "unrelated.csv",
        ];
        assert_eq!(
            match_timestamp("2024-05-01_10-30-00_123.bin", &names),
            vec![
                "2024-05-01_10-30-00_123.csv",
                "2024-05-01_10-30-00_123_GNSS.csv"
            ]
        );
        assert!(match_timestamp("no-token.bin", &names).is_empty());
    }

    #[test]
    fn test_origin_path_appends_extension() {
        assert_eq!(
            origin_path(Path::new("/work/2024-05-01_10-30-00_123.bin")),
            PathBuf::from("/work/2024-05-01_10-30-00_123.bin.origin")
        );
    }

    #[test]
    fn test_imu_classifier_gnss_by_substring() {
        let primary = Path::new("/work/2024-05-01_10-30-00_123.bin");
        let classifier = ImuCompanions;
        let role = |p: &str| classifier.classify(primary, Path::new(p));

        assert_eq!(
            role("/src/2024-05-01_10-30-00_123.bin"),
            Some(CompanionRole::Primary)
        );
        assert_eq!(
            role("/src/2024-05-01_10-30-00_123_GNSS.csv"),
            Some(CompanionRole::Gnss)
        );
        assert_eq!(
            role("/src/2024-05-01_10-30-00_123_GNSS_extra.csv"),
            Some(CompanionRole::Gnss)
        );
        assert_eq!(
            role("/src/2024-05-01_10-30-00_123.csv"),
            Some(CompanionRole::Data)
        );
    }

    #[test]
    fn test_all_classifier_keeps_everything() {
        let set = CompanionFileSet {
            primary_path: PathBuf::from("/work/a.bin"),
            provenance_directory: PathBuf::from("/src"),
            matched_paths: [PathBuf::from("/src/a.bin"), PathBuf::from("/src/a.csv")]
                .into_iter()
                .collect(),
        };
        let companions = classify_companions(&set, &AllCompanions);
        assert_eq!(companions.len(), 2);
        assert_eq!(companions[0].role, CompanionRole::Primary);
        assert_eq!(companions[1].role, CompanionRole::Other);
    }
}
