//! Remapping of brain segmentation label volumes between label schemas.
//!
//! A segmentation volume stores one integer label code per voxel. Different tools use different
//! codes for the same anatomical structure, as listed in their lookup tables (LUTs). This crate
//! reads LUTs in the FreeSurfer `ColorLUT` text format, builds an id mapping between two schemas
//! by structure name, and applies it to label volumes in NIfTI-1 (`.nii`, `.nii.gz`) and
//! FreeSurfer MGH (`.mgh`, `.mgz`) format, keeping the header and affine of the input.
//!
//! # Examples
//!
//! ```no_run
//! let old = brainseg::read_lut("gouhfi-label-list-lut.txt").unwrap();
//! let new = brainseg::read_lut("freesurfer-label-list-lut.txt").unwrap();
//! let mapping = brainseg::build_mapping(&old, &new);
//!
//! let vol = brainseg::load_volume("seg.nii.gz").unwrap();
//! let remapped = brainseg::apply(&vol.data, &mapping);
//! brainseg::save_volume("seg_fs.nii.gz", &remapped, &vol.header).unwrap();
//! ```

pub mod error;
pub mod fs_lut;
pub mod fs_mgh;
pub mod nifti;
pub mod pipeline;
pub mod remap;
pub mod schema;
pub mod util;
pub mod volume;
pub mod voxel;

pub use error::{BrainsegError, Result};
pub use fs_lut::{read_lut, LabelTable, LutColor, LutEntry, LutParseMode};
pub use fs_mgh::{read_mgh, FsMgh, FsMghHeader};
pub use nifti::{read_nifti, NiftiHeader, NiftiVolume};
pub use pipeline::{remap_file, remap_file_with, RemapOptions, RemapSummary};
pub use remap::{apply, apply_inplace, build_mapping, unmapped_labels, CompiledRemap, RemapTable, BACKGROUND};
pub use schema::{remap_schema_file, LutDirectory, LutLocator};
pub use volume::{load_volume, save_volume, LabelVolume, VolumeFormat, VolumeHeader};
pub use voxel::VoxelType;
