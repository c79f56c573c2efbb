//! Artifact manifest inspection.
//!
//! An uploaded artifact is a zip archive carrying a YAML manifest at a
//! fixed entry name. The only field the pipeline cares about is the
//! identifier under `name`; everything else in the manifest is ignored.

use std::fs::File;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::constants::MANIFEST_ENTRY;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct Manifest {
    name: Option<String>,
}

/// Extract the artifact identifier from the archive at `path`.
///
/// Every failure mode collapses to `None`: a missing or unreadable
/// archive, a missing manifest entry, malformed YAML, or a manifest
/// without a `name` field. Failures are logged, never propagated, so a
/// bad upload can never disturb the listener.
pub fn plugin_name(path: &Path) -> Option<String> {
    match read_name(path) {
        Ok(Some(name)) => {
            debug!(artifact = %path.display(), name = %name, "Resolved artifact identifier");
            Some(name)
        }
        Ok(None) => {
            warn!(artifact = %path.display(), "Manifest has no name field");
            None
        }
        Err(e) => {
            warn!(artifact = %path.display(), error = %e, "Failed to inspect artifact");
            None
        }
    }
}

fn read_name(path: &Path) -> Result<Option<String>> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| Error::Manifest {
        message: format!("not a readable archive: {}", e),
    })?;

    let entry = archive.by_name(MANIFEST_ENTRY).map_err(|e| Error::Manifest {
        message: format!("no {} entry: {}", MANIFEST_ENTRY, e),
    })?;

    let manifest: Manifest = serde_yaml::from_reader(entry).map_err(|e| Error::Manifest {
        message: format!("malformed manifest: {}", e),
    })?;

    Ok(manifest.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn build_artifact(dir: &Path, file_name: &str, manifest: Option<&str>) -> std::path::PathBuf {
        let path = dir.join(file_name);
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        writer.start_file("Main.class", options).unwrap();
        writer.write_all(b"\xca\xfe\xba\xbe").unwrap();

        if let Some(contents) = manifest {
            writer.start_file(MANIFEST_ENTRY, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn reads_name_from_manifest() {
        let tmp = tempdir().unwrap();
        let path = build_artifact(
            tmp.path(),
            "worldedit.jar",
            Some("name: WorldEdit\nversion: 7.2.0\nmain: com.sk89q.worldedit.WorldEdit\n"),
        );
        assert_eq!(plugin_name(&path), Some("WorldEdit".to_string()));
    }

    #[test]
    fn missing_manifest_entry_is_none() {
        let tmp = tempdir().unwrap();
        let path = build_artifact(tmp.path(), "plain.jar", None);
        assert_eq!(plugin_name(&path), None);
    }

    #[test]
    fn manifest_without_name_is_none() {
        let tmp = tempdir().unwrap();
        let path = build_artifact(tmp.path(), "anon.jar", Some("version: 1.0\n"));
        assert_eq!(plugin_name(&path), None);
    }

    #[test]
    fn malformed_yaml_is_none() {
        let tmp = tempdir().unwrap();
        let path = build_artifact(tmp.path(), "broken.jar", Some(": : [ not yaml\n"));
        assert_eq!(plugin_name(&path), None);
    }

    #[test]
    fn non_archive_is_none() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("junk.jar");
        std::fs::write(&path, b"definitely not a zip").unwrap();
        assert_eq!(plugin_name(&path), None);
    }

    #[test]
    fn missing_file_is_none() {
        let tmp = tempdir().unwrap();
        assert_eq!(plugin_name(&tmp.path().join("absent.jar")), None);
    }
}
