//! File-to-file remapping of label volumes between two lookup table schemas.

use log::{debug, info};

use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::fs_lut::{LabelTable, LutParseMode};
use crate::remap::{build_mapping, unmapped_labels, CompiledRemap};
use crate::volume::{save_volume, LabelVolume};

/// Settings of a remap operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemapOptions {
    /// Rewrite the loaded voxel array instead of allocating a second one. The result is identical.
    pub in_place: bool,
    /// How to treat malformed lookup table lines.
    pub lut_parse_mode: LutParseMode,
}


/// What a remap operation did.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapSummary {
    /// Number of voxels in the volume.
    pub num_voxels: usize,
    /// Number of voxels whose label code changed.
    pub num_changed: usize,
    /// Source structures without a counterpart in the target schema, which were mapped to background.
    pub dropped_labels: Vec<(String, i32)>,
    /// The lookup strategy used for the voxel substitution, "dense" or "sparse".
    pub strategy: &'static str,
}

impl fmt::Display for RemapSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Remapped {} voxels ({} changed) using {} lookup, {} source structures mapped to background.",
            self.num_voxels, self.num_changed, self.strategy, self.dropped_labels.len())
    }
}


/// Translate a label volume file from the schema of one lookup table into that of another.
///
/// Reads the old and new lookup tables, builds the id mapping by structure name, loads the
/// input volume, remaps every voxel, and saves the result to `output` with the header and
/// affine of the input. Structures of the old schema that are missing in the new one become
/// background (`0`). `output` may be the same path as `input`: the input is completely read
/// before anything is written, and the output is replaced atomically, so on any error no
/// partial file is left behind.
///
/// # Examples
///
/// ```no_run
/// brainseg::remap_file("seg.nii.gz", "gouhfi-label-list-lut.txt", "freesurfer-label-list-lut.txt", "seg.nii.gz").unwrap();
/// ```
pub fn remap_file<P, Q, R, T>(input: P, old_lut: Q, new_lut: R, output: T) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
    T: AsRef<Path>,
{
    remap_file_with(input, old_lut, new_lut, output, &RemapOptions::default()).map(|_| ())
}


/// Like [`remap_file`], with explicit options. Returns a summary of the operation.
pub fn remap_file_with<P, Q, R, T>(input: P, old_lut: Q, new_lut: R, output: T, options: &RemapOptions) -> Result<RemapSummary>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
    T: AsRef<Path>,
{
    let old_labels = LabelTable::from_file_with_mode(&old_lut, options.lut_parse_mode)?;
    let new_labels = LabelTable::from_file_with_mode(&new_lut, options.lut_parse_mode)?;
    info!("Remapping from {} source structures to {} target structures.", old_labels.len(), new_labels.len());

    let mapping = build_mapping(&old_labels, &new_labels);
    let dropped_labels: Vec<(String, i32)> = unmapped_labels(&old_labels, &new_labels)
        .into_iter()
        .map(|(name, id)| (name.to_string(), id))
        .collect();
    for (name, id) in dropped_labels.iter() {
        debug!("Source structure '{}' ({}) is not in the target schema, mapping it to background.", name, id);
    }

    let mut volume = LabelVolume::from_file(&input)?;
    let compiled = CompiledRemap::compile(&mapping);

    let num_changed = if options.in_place {
        compiled.apply_inplace(&mut volume.data)
    } else {
        let remapped = compiled.apply(&volume.data);
        let changed = volume.data.iter().zip(remapped.iter()).filter(|(a, b)| a != b).count();
        volume.data = remapped;
        changed
    };

    save_volume(&output, &volume.data, &volume.header)?;

    let summary = RemapSummary {
        num_voxels: volume.data.len(),
        num_changed,
        dropped_labels,
        strategy: compiled.strategy(),
    };
    info!("{}", summary);
    Ok(summary)
}
