use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::error::{JvmanError, JvmanResult};

const RELEASE_FILE: &str = "release";

/// Major line plus the full version string as reported by the JDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JdkVersion {
    pub major: u32,
    pub full: String,
}

impl JdkVersion {
    pub fn parse(full: &str) -> Option<Self> {
        let full = full.trim();
        let major = parse_major_version(full);
        if major == 0 {
            return None;
        }
        Some(Self {
            major,
            full: full.to_string(),
        })
    }
}

impl std::fmt::Display for JdkVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full)
    }
}

/// What a JDK home tells us about itself.
#[derive(Debug, Clone)]
pub struct JdkMetadata {
    /// Normalised home (the inner `Contents/Home` for macOS bundles).
    pub home: PathBuf,
    pub vendor: String,
    pub version: JdkVersion,
}

/// Validate a candidate JDK home and extract vendor/version.
///
/// The version descriptor is the `release` file shipped with every modern
/// JDK; homes without one are probed with `java -version`.
#[instrument]
pub fn inspect_jdk_home(path: &Path) -> JvmanResult<JdkMetadata> {
    if !path.is_dir() {
        return Err(JvmanError::invalid_home(path, "not a directory"));
    }

    let home = normalize_home(path);
    if !has_java_executable(&home) {
        return Err(JvmanError::invalid_home(
            &home,
            format!("missing bin/{}", java_exe()),
        ));
    }

    if let Some(release) = read_release_file(&home) {
        if let Some(version) = release.get("JAVA_VERSION").and_then(|v| JdkVersion::parse(v)) {
            let vendor = release
                .get("IMPLEMENTOR")
                .map(|implementor| normalize_vendor(implementor))
                .unwrap_or_else(|| "unknown".to_string());
            debug!("Read release descriptor for {:?}: {} {}", home, vendor, version);
            return Ok(JdkMetadata {
                home,
                vendor,
                version,
            });
        }
    }

    match probe::probe_java(&java_binary(&home)) {
        Some((version, vendor)) => Ok(JdkMetadata {
            home,
            vendor,
            version,
        }),
        None => Err(JvmanError::invalid_home(
            &home,
            "no parsable version descriptor",
        )),
    }
}

/// Whether `home/bin/java` (or `java.exe`) exists as a file.
pub fn has_java_executable(home: &Path) -> bool {
    java_binary(home).is_file()
}

pub fn java_binary(home: &Path) -> PathBuf {
    home.join("bin").join(java_exe())
}

fn java_exe() -> &'static str {
    if cfg!(windows) {
        "java.exe"
    } else {
        "java"
    }
}

fn normalize_home(path: &Path) -> PathBuf {
    let mac_layout = path.join("Contents").join("Home");
    if has_java_executable(&mac_layout) {
        return mac_layout;
    }
    path.to_path_buf()
}

fn read_release_file(home: &Path) -> Option<HashMap<String, String>> {
    let raw = std::fs::read_to_string(home.join(RELEASE_FILE)).ok()?;
    Some(parse_release(&raw))
}

fn parse_release(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_matches('"');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

pub fn parse_major_version(version: &str) -> u32 {
    let first_part = version.split(['.', '_', '+', '-']).next().unwrap_or("0");
    let major: u32 = first_part.parse().unwrap_or(0);

    if major == 1 {
        version
            .split('.')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(major)
    } else {
        major
    }
}

/// Map implementor strings and `-version` banners onto a short vendor name.
pub fn normalize_vendor(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    let known = [
        ("corretto", "Corretto"),
        ("amazon", "Corretto"),
        ("temurin", "Temurin"),
        ("adoptium", "Temurin"),
        ("zulu", "Zulu"),
        ("azul", "Zulu"),
        ("microsoft", "Microsoft"),
        ("graalvm", "GraalVM"),
        ("semeru", "Semeru"),
        ("ibm", "Semeru"),
        ("oracle", "Oracle"),
        ("java(tm)", "Oracle"),
        ("openjdk", "OpenJDK"),
    ];
    if let Some((_, vendor)) = known.iter().find(|(needle, _)| lower.contains(needle)) {
        return vendor.to_string();
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

mod probe {
    use super::*;

    #[instrument]
    pub fn probe_java(path: &Path) -> Option<(JdkVersion, String)> {
        let output = Command::new(path).arg("-version").output().ok()?;
        let version_output = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stderr),
            String::from_utf8_lossy(&output.stdout)
        );
        debug!(
            "Probing {:?}: {}",
            path,
            version_output.lines().next().unwrap_or("")
        );
        parse_output(&version_output)
    }

    pub(super) fn parse_output(output: &str) -> Option<(JdkVersion, String)> {
        let version = parse_version_string(output).and_then(|v| JdkVersion::parse(&v))?;
        Some((version, normalize_vendor(output)))
    }

    fn parse_version_string(output: &str) -> Option<String> {
        output.lines().find_map(|line| {
            let start = line.find('"')?;
            let end = line[start + 1..].find('"')?;
            Some(line[start + 1..start + 1 + end].to_string())
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Lay out a minimal JDK home: `bin/java` plus a `release` descriptor.
    pub(crate) fn fake_jdk(root: &Path, name: &str, version: &str, implementor: &str) -> PathBuf {
        let home = root.join(name);
        std::fs::create_dir_all(home.join("bin")).unwrap();
        std::fs::write(java_binary(&home), b"#!/bin/sh\n").unwrap();
        std::fs::write(
            home.join(RELEASE_FILE),
            format!("IMPLEMENTOR=\"{implementor}\"\nJAVA_VERSION=\"{version}\"\n"),
        )
        .unwrap();
        home
    }

    #[test]
    fn test_parse_major_modern() {
        assert_eq!(parse_major_version("17.0.8"), 17);
        assert_eq!(parse_major_version("21"), 21);
        assert_eq!(parse_major_version("22-ea"), 22);
    }

    #[test]
    fn test_parse_major_legacy() {
        assert_eq!(parse_major_version("1.8.0_392"), 8);
    }

    #[test]
    fn unparsable_versions_are_rejected() {
        assert!(JdkVersion::parse("").is_none());
        assert!(JdkVersion::parse("banana").is_none());
    }

    #[test]
    fn vendors_are_normalized() {
        assert_eq!(normalize_vendor("Eclipse Adoptium"), "Temurin");
        assert_eq!(normalize_vendor("Amazon.com Inc."), "Corretto");
        assert_eq!(normalize_vendor("Azul Systems, Inc."), "Zulu");
        assert_eq!(normalize_vendor("Oracle Corporation"), "Oracle");
        assert_eq!(normalize_vendor("Acme JVM Works"), "Acme JVM Works");
        assert_eq!(normalize_vendor("  "), "unknown");
    }

    #[test]
    fn release_descriptor_is_read() {
        let temp = tempfile::tempdir().unwrap();
        let home = fake_jdk(temp.path(), "jdk-17", "17.0.2", "Eclipse Adoptium");

        let meta = inspect_jdk_home(&home).unwrap();
        assert_eq!(meta.home, home);
        assert_eq!(meta.vendor, "Temurin");
        assert_eq!(meta.version.major, 17);
        assert_eq!(meta.version.full, "17.0.2");
    }

    #[test]
    fn mac_bundles_resolve_to_inner_home() {
        let temp = tempfile::tempdir().unwrap();
        let bundle = temp.path().join("temurin-21.jdk");
        let inner = fake_jdk(&bundle.join("Contents"), "Home", "21.0.0", "Eclipse Adoptium");

        let meta = inspect_jdk_home(&bundle).unwrap();
        assert_eq!(meta.home, inner);
        assert_eq!(meta.version.major, 21);
    }

    #[test]
    fn homes_without_executable_are_invalid() {
        let temp = tempfile::tempdir().unwrap();
        let home = temp.path().join("not-a-jdk");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(home.join(RELEASE_FILE), "JAVA_VERSION=\"17\"\n").unwrap();

        let err = inspect_jdk_home(&home).unwrap_err();
        assert!(matches!(err, JvmanError::InvalidJdkHome { .. }));
    }

    #[test]
    fn missing_directory_is_invalid() {
        let temp = tempfile::tempdir().unwrap();
        let err = inspect_jdk_home(&temp.path().join("absent")).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn version_banner_is_parsed() {
        let banner = "openjdk version \"21.0.1\" 2023-10-17 LTS\nOpenJDK Runtime Environment Temurin-21.0.1+12 (build 21.0.1+12-LTS)";
        let (version, vendor) = probe::parse_output(banner).unwrap();
        assert_eq!(version.full, "21.0.1");
        assert_eq!(version.major, 21);
        assert_eq!(vendor, "Temurin");
    }
}
