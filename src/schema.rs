//! Resolution of named label schemas to lookup table files.
//!
//! Each segmentation tool labels structures according to its own schema. The lookup tables
//! for these schemas are shipped as text files; a [`LutLocator`] turns a schema name into
//! the path of its table, so callers never hard-wire table locations.

use log::info;

use std::path::{Path, PathBuf};

use crate::error::{BrainsegError, Result};
use crate::pipeline::{remap_file_with, RemapOptions, RemapSummary};

/// Known schema names and the file names of their lookup tables.
pub const KNOWN_SCHEMAS: [(&str, &str); 4] = [
    ("gouhfi", "gouhfi-label-list-lut.txt"),
    ("freesurfer", "freesurfer-label-list-lut.txt"),
    ("freesurfer-full", "freesurfer-label-list-full-lut.txt"),
    ("freesurfer-reduced", "freesurfer-label-list-reduced-lut.txt"),
];


/// Resolves label schema names to readable lookup table files.
pub trait LutLocator {
    fn locate(&self, schema: &str) -> Result<PathBuf>;
}


/// Lookup tables stored as files in one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LutDirectory {
    root: PathBuf,
}

impl LutDirectory {

    pub fn new<P: AsRef<Path>>(root: P) -> LutDirectory {
        LutDirectory { root: root.as_ref().to_path_buf() }
    }


    pub fn root(&self) -> &Path {
        &self.root
    }


    /// Use `spec` as a path if such a file exists, else resolve it as a schema name.
    ///
    /// If `spec` cannot be resolved but looks like a path (it has a directory part or an
    /// extension), it is returned unchanged, so that opening it reports the missing file.
    pub fn resolve_or_path(&self, spec: &str) -> Result<PathBuf> {
        let as_path = PathBuf::from(spec);
        if as_path.is_file() {
            return Ok(as_path);
        }
        match self.locate(spec) {
            Err(BrainsegError::UnknownSchema(_)) if looks_like_path(&as_path) => Ok(as_path),
            other => other,
        }
    }
}

impl LutLocator for LutDirectory {

    /// Known schema names map to their table file names, anything else is tried as a file name in the directory.
    fn locate(&self, schema: &str) -> Result<PathBuf> {
        let file_name = KNOWN_SCHEMAS
            .iter()
            .find(|(name, _)| *name == schema)
            .map(|(_, file)| *file)
            .unwrap_or(schema);

        let path = self.root.join(file_name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(BrainsegError::UnknownSchema(schema.to_string()))
        }
    }
}


fn looks_like_path(path: &Path) -> bool {
    path.components().count() > 1 || path.extension().is_some()
}


/// Remap a label volume from one named schema into another.
///
/// This is the post-processing step for segmentation tools whose native label schema differs
/// from the shared target schema, e.g. from `gouhfi` to `freesurfer`.
pub fn remap_schema_file<P, Q, L>(input: P, output: Q, locator: &L, from: &str, to: &str, options: &RemapOptions) -> Result<RemapSummary>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    L: LutLocator + ?Sized,
{
    let old_lut = locator.locate(from)?;
    let new_lut = locator.locate(to)?;
    info!("Remapping '{}' from schema '{}' to '{}'.", input.as_ref().display(), from, to);
    remap_file_with(input, old_lut, new_lut, output, options)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::fs_lut::LabelTable;
    use std::fs;

    #[test]
    fn known_schemas_resolve_to_their_tables() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("gouhfi-label-list-lut.txt"), "0 Unknown\n").unwrap();
        fs::write(dir.path().join("custom.txt"), "0 Unknown\n").unwrap();
        let luts = LutDirectory::new(dir.path());

        assert_eq!(dir.path().join("gouhfi-label-list-lut.txt"), luts.locate("gouhfi").unwrap());
        assert_eq!(dir.path().join("custom.txt"), luts.locate("custom.txt").unwrap());
        assert!(matches!(luts.locate("freesurfer"), Err(BrainsegError::UnknownSchema(_))));
    }

    #[test]
    fn existing_paths_are_used_directly() {
        let dir = tempfile::tempdir().unwrap();
        let lut = dir.path().join("my-lut.txt");
        fs::write(&lut, "0 Unknown\n").unwrap();
        let luts = LutDirectory::new("/nonexistent");

        assert_eq!(lut, luts.resolve_or_path(lut.to_str().unwrap()).unwrap());
        assert!(matches!(luts.resolve_or_path("gouhfi"), Err(BrainsegError::UnknownSchema(_))));
    }

    #[test]
    fn missing_paths_are_reported_as_missing_files() {
        let luts = LutDirectory::new("/nonexistent");

        let resolved = luts.resolve_or_path("/missing/lut.txt").unwrap();
        assert_eq!(PathBuf::from("/missing/lut.txt"), resolved);
        assert!(matches!(LabelTable::from_file(&resolved), Err(BrainsegError::ResourceNotFound(..))));
        assert_eq!(PathBuf::from("old-lut.txt"), luts.resolve_or_path("old-lut.txt").unwrap());
    }

    #[test]
    fn full_and_reduced_freesurfer_schemas_are_known() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("freesurfer-label-list-full-lut.txt"), "0 Unknown\n").unwrap();
        fs::write(dir.path().join("freesurfer-label-list-reduced-lut.txt"), "0 Unknown\n").unwrap();
        let luts = LutDirectory::new(dir.path());

        assert_eq!(dir.path().join("freesurfer-label-list-full-lut.txt"), luts.locate("freesurfer-full").unwrap());
        assert_eq!(dir.path().join("freesurfer-label-list-reduced-lut.txt"), luts.locate("freesurfer-reduced").unwrap());
    }
}
