//! Loading and saving label volumes independent of their file format.
//!
//! A [`LabelVolume`] holds the voxel labels as `i32` codes plus the header of the file it was
//! read from. The header is opaque to the remapping code: it is carried along unchanged and
//! written back verbatim, so the spatial affine and all other metadata survive a remap.

use log::{debug, warn};
use ndarray::{Array2, ArrayD};
use ndarray_stats::QuantileExt;

use std::fmt;
use std::path::Path;

use crate::error::{BrainsegError, Result};
use crate::fs_mgh::{is_mgz_file, write_mgh, FsMgh, FsMghHeader};
use crate::nifti::{write_nifti, NiftiHeader, NiftiVolume};
use crate::util::{is_gz_file, lowercase_file_name, write_atomically};
use crate::voxel::{label_survives_scaling, labels_fit, Scaling, VoxelType};

/// The supported volume file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeFormat {
    /// Single file NIfTI-1, '.nii' or '.nii.gz'.
    Nifti,
    /// FreeSurfer MGH, '.mgh', '.mgz' or '.mgh.gz'.
    Mgh,
}

impl VolumeFormat {

    /// Determine the format from a file name.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<VolumeFormat> {
        let name = lowercase_file_name(path);
        if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Some(VolumeFormat::Nifti)
        } else if name.ends_with(".mgh") || name.ends_with(".mgz") || name.ends_with(".mgh.gz") {
            Some(VolumeFormat::Mgh)
        } else {
            None
        }
    }


    /// Whether a file with this name is GZip compressed.
    pub fn is_compressed_path<P: AsRef<Path>>(self, path: P) -> bool {
        match self {
            VolumeFormat::Nifti => is_gz_file(path),
            VolumeFormat::Mgh => is_mgz_file(path),
        }
    }
}

impl fmt::Display for VolumeFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VolumeFormat::Nifti => write!(f, "NIfTI-1"),
            VolumeFormat::Mgh => write!(f, "MGH"),
        }
    }
}


/// The format specific metadata of a label volume.
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeHeader {
    Nifti(NiftiHeader),
    Mgh { header: FsMghHeader, footer: Vec<u8> },
}

impl VolumeHeader {

    pub fn format(&self) -> VolumeFormat {
        match self {
            VolumeHeader::Nifti(_) => VolumeFormat::Nifti,
            VolumeHeader::Mgh { .. } => VolumeFormat::Mgh,
        }
    }


    /// The 4x4 voxel-to-world affine described by the header.
    pub fn affine(&self) -> Array2<f64> {
        match self {
            VolumeHeader::Nifti(hdr) => hdr.affine(),
            VolumeHeader::Mgh { header, .. } => header.vox2ras(),
        }
    }


    /// The shape of the voxel array described by the header.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            VolumeHeader::Nifti(hdr) => hdr.shape(),
            VolumeHeader::Mgh { header, .. } => header.shape(),
        }
    }


    /// The type the voxels are stored as.
    pub fn voxel_type(&self) -> Result<VoxelType> {
        match self {
            VolumeHeader::Nifti(hdr) => hdr.voxel_type(),
            VolumeHeader::Mgh { header, .. } => header.voxel_type(),
        }
    }


    fn scaling(&self) -> Option<Scaling> {
        match self {
            VolumeHeader::Nifti(hdr) => hdr.scaling(),
            VolumeHeader::Mgh { .. } => None,
        }
    }


    /// The raw header bytes as they are written. For MGH files, the footer follows the voxel data and is not included.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            VolumeHeader::Nifti(hdr) => hdr.as_bytes(),
            VolumeHeader::Mgh { header, .. } => header.as_bytes(),
        }
    }


    fn widened_to_i32(&self) -> Result<VolumeHeader> {
        let mut widened = self.clone();
        match &mut widened {
            VolumeHeader::Nifti(hdr) => hdr.set_voxel_type(VoxelType::I32)?,
            VolumeHeader::Mgh { header, .. } => header.set_voxel_type(VoxelType::I32)?,
        }
        Ok(widened)
    }


    /// The header to write `data` with: this header, unless the labels do not fit the stored voxel type.
    fn for_labels(&self, data: &ArrayD<i32>) -> Result<Option<VolumeHeader>> {
        let (min, max) = match (data.min(), data.max()) {
            (Ok(min), Ok(max)) => (*min, *max),
            _ => return Ok(None),
        };
        let dtype = self.voxel_type()?;
        let scaling = self.scaling();
        if !labels_fit(dtype, scaling, min, max) {
            warn!("Labels in range [{}, {}] do not fit the stored voxel type {:?}, writing int32 voxels instead.", min, max, dtype);
            return Ok(Some(self.widened_to_i32()?));
        }
        if let Some(s) = scaling {
            if let Some(label) = data.iter().copied().find(|&label| !label_survives_scaling(label, dtype, s)) {
                warn!("Label {} cannot be stored exactly as {:?} with slope {} and intercept {}, writing unscaled int32 voxels instead.", label, dtype, s.slope, s.inter);
                return Ok(Some(self.widened_to_i32()?));
            }
        }
        Ok(None)
    }
}


/// A label volume: integer label codes with the header of the file they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelVolume {
    pub data: ArrayD<i32>,
    pub header: VolumeHeader,
}

impl LabelVolume {

    /// Read a label volume, choosing the format from the file name.
    ///
    /// Fails with [`BrainsegError::ResourceNotFound`] if the file cannot be opened, and with
    /// [`BrainsegError::ImageFormat`] if it cannot be parsed as a label volume.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<LabelVolume> {
        let path = path.as_ref();
        let format = VolumeFormat::from_path(path).ok_or_else(|| BrainsegError::UnknownImageFormat(path.to_path_buf()))?;

        let loaded = match format {
            VolumeFormat::Nifti => NiftiVolume::from_file(path).map(|v| LabelVolume { data: v.data, header: VolumeHeader::Nifti(v.header) }),
            VolumeFormat::Mgh => FsMgh::from_file(path).map(|v| LabelVolume { data: v.data, header: VolumeHeader::Mgh { header: v.header, footer: v.footer } }),
        };

        match loaded {
            Ok(volume) => {
                debug!("Read {} label volume of shape {:?} from '{}'.", format, volume.data.shape(), path.display());
                Ok(volume)
            }
            Err(err @ BrainsegError::ResourceNotFound(..)) => Err(err),
            Err(err) => Err(BrainsegError::ImageFormat(path.to_path_buf(), err.to_string())),
        }
    }


    /// The 4x4 voxel-to-world affine of the volume.
    pub fn affine(&self) -> Array2<f64> {
        self.header.affine()
    }


    /// Write the volume, see [`save_volume`].
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_volume(path, &self.data, &self.header)
    }
}


/// Read a label volume from a NIfTI-1 or MGH/MGZ file.
///
/// The voxel values are coerced to `i32` label codes.
///
/// # Examples
///
/// ```no_run
/// let vol = brainseg::load_volume("/path/to/subjects_dir/subject1/mri/aseg.mgz").unwrap();
/// println!("Affine:\n{}", vol.affine());
/// ```
pub fn load_volume<P: AsRef<Path>>(path: P) -> Result<LabelVolume> {
    LabelVolume::from_file(path)
}


/// Write label data with the given header.
///
/// The header bytes are written unchanged, so the saved file has exactly the affine and
/// metadata of the file the header was read from. Only if a label does not fit the stored
/// voxel type, the voxel type is widened to int32. The file name must denote the header's
/// format; its compression follows the file name. The file is written atomically.
pub fn save_volume<P: AsRef<Path>>(path: P, data: &ArrayD<i32>, header: &VolumeHeader) -> Result<()> {
    let path = path.as_ref();
    let format = VolumeFormat::from_path(path).ok_or_else(|| BrainsegError::UnknownImageFormat(path.to_path_buf()))?;
    if format != header.format() {
        return Err(BrainsegError::ImageFormat(path.to_path_buf(), format!("cannot write a {} volume to a {} file name", header.format(), format)));
    }
    if data.shape() != header.shape().as_slice() {
        return Err(BrainsegError::ShapeMismatch(header.shape(), data.shape().to_vec()));
    }

    let widened = header.for_labels(data)?;
    let header = widened.as_ref().unwrap_or(header);

    write_atomically(path, format.is_compressed_path(path), |out| match header {
        VolumeHeader::Nifti(hdr) => write_nifti(out, hdr, data),
        VolumeHeader::Mgh { header, footer } => write_mgh(out, header, data, footer),
    })?;
    debug!("Wrote {} label volume to '{}'.", format, path.display());
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{arr2, Array, IxDyn};
    use std::fs;

    fn nifti_volume(dtype: VoxelType) -> LabelVolume {
        let affine = arr2(&[[1.0, 0.0, 0.0, -10.0], [0.0, 1.0, 0.0, -20.0], [0.0, 0.0, 1.0, 5.0], [0.0, 0.0, 0.0, 1.0]]);
        let header = NiftiHeader::new(&[3, 3, 3], dtype, &affine).unwrap();
        LabelVolume {
            data: Array::from_shape_fn(IxDyn(&[3, 3, 3]), |idx| (idx[0] % 2 + idx[2]) as i32),
            header: VolumeHeader::Nifti(header),
        }
    }

    #[test]
    fn formats_are_detected_from_file_names() {
        assert_eq!(Some(VolumeFormat::Nifti), VolumeFormat::from_path("sub-01_T1w_seg.nii.gz"));
        assert_eq!(Some(VolumeFormat::Nifti), VolumeFormat::from_path("SEG.NII"));
        assert_eq!(Some(VolumeFormat::Mgh), VolumeFormat::from_path("aseg.auto.mgz"));
        assert_eq!(Some(VolumeFormat::Mgh), VolumeFormat::from_path("aseg.mgh.gz"));
        assert_eq!(None, VolumeFormat::from_path("seg.hdr"));
        assert!(VolumeFormat::Mgh.is_compressed_path("aseg.mgz"));
        assert!(!VolumeFormat::Nifti.is_compressed_path("aseg.nii"));
    }

    #[test]
    fn volumes_round_trip_through_both_formats() {
        let dir = tempfile::tempdir().unwrap();

        let nii = nifti_volume(VoxelType::I16);
        let nii_path = dir.path().join("seg.nii.gz");
        nii.to_file(&nii_path).unwrap();
        assert_eq!(nii, load_volume(&nii_path).unwrap());

        let mgh = LabelVolume {
            data: nii.data.clone(),
            header: VolumeHeader::Mgh { header: FsMghHeader::new([3, 3, 3, 1], VoxelType::U8).unwrap(), footer: vec![9, 9] },
        };
        let mgh_path = dir.path().join("seg.mgz");
        mgh.to_file(&mgh_path).unwrap();
        assert_eq!(mgh, load_volume(&mgh_path).unwrap());
    }

    #[test]
    fn labels_too_large_for_the_stored_type_widen_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut vol = nifti_volume(VoxelType::U8);
        vol.data[IxDyn(&[0, 0, 0])] = 1035;
        let path = dir.path().join("seg.nii");
        vol.to_file(&path).unwrap();

        let read = load_volume(&path).unwrap();
        assert_eq!(vol.data, read.data);
        assert_eq!(VoxelType::I32, read.header.voxel_type().unwrap());
        assert_eq!(vol.affine(), read.affine());
    }

    #[test]
    fn headers_must_match_the_output_format() {
        let dir = tempfile::tempdir().unwrap();
        let vol = nifti_volume(VoxelType::U8);

        let res = vol.to_file(dir.path().join("seg.mgz"));
        assert!(matches!(res, Err(BrainsegError::ImageFormat(..))));
        let res = vol.to_file(dir.path().join("seg.img"));
        assert!(matches!(res, Err(BrainsegError::UnknownImageFormat(_))));
        assert_eq!(0, fs::read_dir(dir.path()).unwrap().count());
    }

    #[test]
    fn shapes_must_match_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let vol = nifti_volume(VoxelType::U8);
        let res = save_volume(dir.path().join("seg.nii"), &ArrayD::zeros(IxDyn(&[3, 3])), &vol.header);
        assert!(matches!(res, Err(BrainsegError::ShapeMismatch(..))));
    }

    #[test]
    fn unreadable_images_are_format_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.nii");
        fs::write(&path, b"this is not an image").unwrap();

        match load_volume(&path) {
            Err(BrainsegError::ImageFormat(p, _)) => assert_eq!(path, p),
            other => panic!("expected an image format error, got {:?}", other),
        }
        assert!(matches!(load_volume(dir.path().join("missing.nii")), Err(BrainsegError::ResourceNotFound(..))));
    }
}
