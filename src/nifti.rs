//! Functions for managing label volumes in single file NIfTI-1 images ('.nii' and '.nii.gz').
//!
//! Only the header fields needed to locate and interpret the voxel data and to compute the
//! spatial affine are parsed. The complete header, including extensions, is kept as raw bytes
//! and written back unchanged, so a remapped image carries exactly the metadata of its source.


use byteordered::{ByteOrdered, Endianness};
use flate2::bufread::GzDecoder;
use ndarray::{arr2, Array2, ArrayD, IxDyn, ShapeBuilder};

use std::convert::TryFrom;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::error::{BrainsegError, Result};
use crate::util::{is_gz_file, open_resource, read_exactly, write_atomically};
use crate::voxel::{data_size, decode_labels, encode_labels, fortran_order, Scaling, VoxelType};

pub const NIFTI1_HEADER_SIZE: usize = 348;
pub const NIFTI1_DEFAULT_VOX_OFFSET: usize = 352;
pub const NIFTI1_MAGIC_SINGLE: &[u8; 4] = b"n+1\0";
pub const NIFTI1_MAGIC_PAIR: &[u8; 4] = b"ni1\0";

const DIM_OFFSET: usize = 40;
const DATATYPE_OFFSET: usize = 70;
const PIXDIM_OFFSET: usize = 76;
const VOX_OFFSET_OFFSET: usize = 108;
const SCL_SLOPE_OFFSET: usize = 112;
const XYZT_UNITS_OFFSET: usize = 123;
const QFORM_CODE_OFFSET: usize = 252;
const SROW_X_OFFSET: usize = 280;
const MAGIC_OFFSET: usize = 344;

/// The `xform` code for coordinates aligned to another file or anatomical truth.
pub const NIFTI_XFORM_SCANNER_ANAT: i16 = 1;


/// The header of a NIfTI-1 image.
///
/// The fields are parsed from the raw header bytes once and are read-only, so they always
/// describe the bytes that get written when the volume is saved.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    endianness: Endianness,
    dim: [i16; 8],
    datatype: i16,
    bitpix: i16,
    pixdim: [f32; 8],
    vox_offset: usize,
    scl_slope: f32,
    scl_inter: f32,
    qform_code: i16,
    sform_code: i16,
    quatern: [f32; 3],
    qoffset: [f32; 3],
    srow_x: [f32; 4],
    srow_y: [f32; 4],
    srow_z: [f32; 4],
    raw: Vec<u8>,
}


fn field_reader(raw: &[u8], offset: usize, endianness: Endianness) -> ByteOrdered<&[u8], Endianness> {
    ByteOrdered::runtime(&raw[offset..], endianness)
}

fn field_writer(raw: &mut [u8], offset: usize, endianness: Endianness) -> ByteOrdered<&mut [u8], Endianness> {
    ByteOrdered::runtime(&mut raw[offset..], endianness)
}


impl NiftiHeader {

    /// Create a little-endian header for a new single file image with the given shape, voxel type and voxel-to-world affine.
    pub fn new(shape: &[usize], dtype: VoxelType, affine: &Array2<f64>) -> Result<NiftiHeader> {
        if shape.is_empty() || shape.len() > 7 {
            return Err(BrainsegError::InvalidNiftiFormat(format!("cannot store {} dimensional volumes", shape.len())));
        }
        if affine.shape() != [4, 4] {
            return Err(BrainsegError::InvalidNiftiFormat(String::from("the affine must be a 4x4 matrix")));
        }

        let endianness = Endianness::Little;
        let mut raw = vec![0u8; NIFTI1_DEFAULT_VOX_OFFSET];

        field_writer(&mut raw, 0, endianness).write_i32(NIFTI1_HEADER_SIZE as i32)?;
        {
            let mut out = field_writer(&mut raw, DIM_OFFSET, endianness);
            out.write_i16(shape.len() as i16)?;
            for idx in 0..7 {
                let len = match shape.get(idx) {
                    Some(d) => i16::try_from(*d).map_err(|_| BrainsegError::InvalidNiftiFormat(format!("dimension length {} exceeds the NIfTI-1 limit", d)))?,
                    None => 1,
                };
                out.write_i16(len)?;
            }
        }
        {
            let mut out = field_writer(&mut raw, DATATYPE_OFFSET, endianness);
            out.write_i16(dtype.nifti_code())?;
            out.write_i16((dtype.size_bytes() * 8) as i16)?;
        }
        {
            let mut out = field_writer(&mut raw, PIXDIM_OFFSET, endianness);
            out.write_f32(1.0)?;
            for col in 0..3 {
                let norm = (0..3).map(|row| affine[[row, col]].powi(2)).sum::<f64>().sqrt();
                out.write_f32(norm as f32)?;
            }
            for _ in 4..8 {
                out.write_f32(1.0)?;
            }
            out.write_f32(NIFTI1_DEFAULT_VOX_OFFSET as f32)?;
            out.write_f32(1.0)?;
            out.write_f32(0.0)?;
        }
        raw[XYZT_UNITS_OFFSET] = 2; // millimeters
        {
            let mut out = field_writer(&mut raw, QFORM_CODE_OFFSET, endianness);
            out.write_i16(0)?;
            out.write_i16(NIFTI_XFORM_SCANNER_ANAT)?;
        }
        {
            let mut out = field_writer(&mut raw, SROW_X_OFFSET, endianness);
            for row in 0..3 {
                for col in 0..4 {
                    out.write_f32(affine[[row, col]] as f32)?;
                }
            }
        }
        raw[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(NIFTI1_MAGIC_SINGLE);

        NiftiHeader::from_bytes(raw)
    }


    /// Read a NIfTI-1 header, including extensions, from a file. Files ending with ".gz" are GZip decoded.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NiftiHeader> {
        let mut file = BufReader::new(open_resource(&path)?);
        if is_gz_file(&path) {
            NiftiHeader::from_reader(&mut GzDecoder::new(file))
        } else {
            NiftiHeader::from_reader(&mut file)
        }
    }


    /// Read a NIfTI-1 header from the given byte stream, which must be at the start of the file.
    /// After this, the input is positioned at the start of the voxel data.
    pub fn from_reader<S>(input: &mut S) -> Result<NiftiHeader>
    where
        S: Read,
    {
        let mut raw = vec![0u8; NIFTI1_HEADER_SIZE];
        input.read_exact(&mut raw)?;

        let endianness = detect_endianness(&raw)?;
        let vox_offset = read_vox_offset(&raw, endianness)?;
        let extensions = read_exactly(input, vox_offset - NIFTI1_HEADER_SIZE)?;
        raw.extend_from_slice(&extensions);

        NiftiHeader::from_bytes(raw)
    }


    fn from_bytes(raw: Vec<u8>) -> Result<NiftiHeader> {
        let endianness = detect_endianness(&raw)?;

        let magic = &raw[MAGIC_OFFSET..MAGIC_OFFSET + 4];
        if magic == NIFTI1_MAGIC_PAIR {
            return Err(BrainsegError::InvalidNiftiFormat(String::from("header/image pair files are not supported")));
        }
        if magic != NIFTI1_MAGIC_SINGLE {
            return Err(BrainsegError::InvalidNiftiFormat(String::from("missing NIfTI-1 magic 'n+1'")));
        }

        let mut input = field_reader(&raw, DIM_OFFSET, endianness);
        let mut dim = [0i16; 8];
        for v in dim.iter_mut() { *v = input.read_i16()?; }

        let mut input = field_reader(&raw, DATATYPE_OFFSET, endianness);
        let datatype = input.read_i16()?;
        let bitpix = input.read_i16()?;

        let mut input = field_reader(&raw, PIXDIM_OFFSET, endianness);
        let mut pixdim = [0f32; 8];
        for v in pixdim.iter_mut() { *v = input.read_f32()?; }
        let vox_offset = input.read_f32()? as usize;
        let scl_slope = input.read_f32()?;
        let scl_inter = input.read_f32()?;

        let mut input = field_reader(&raw, QFORM_CODE_OFFSET, endianness);
        let qform_code = input.read_i16()?;
        let sform_code = input.read_i16()?;
        let mut quatern = [0f32; 3];
        for v in quatern.iter_mut() { *v = input.read_f32()?; }
        let mut qoffset = [0f32; 3];
        for v in qoffset.iter_mut() { *v = input.read_f32()?; }
        let mut srow_x = [0f32; 4];
        for v in srow_x.iter_mut() { *v = input.read_f32()?; }
        let mut srow_y = [0f32; 4];
        for v in srow_y.iter_mut() { *v = input.read_f32()?; }
        let mut srow_z = [0f32; 4];
        for v in srow_z.iter_mut() { *v = input.read_f32()?; }

        let ndim = dim[0];
        if ndim < 1 || ndim > 7 {
            return Err(BrainsegError::InvalidNiftiFormat(format!("invalid number of dimensions {}", ndim)));
        }
        if dim[1..=ndim as usize].iter().any(|d| *d < 1) {
            return Err(BrainsegError::InvalidNiftiFormat(format!("invalid dimensions {:?}", &dim[1..=ndim as usize])));
        }
        let dtype = VoxelType::from_nifti_code(datatype)?;
        let shape: Vec<usize> = dim[1..=ndim as usize].iter().map(|d| *d as usize).collect();
        if data_size(&shape, dtype).is_none() {
            return Err(BrainsegError::InvalidNiftiFormat(format!("voxel data of shape {:?} is too large", shape)));
        }

        Ok(NiftiHeader {
            endianness,
            dim,
            datatype,
            bitpix,
            pixdim,
            vox_offset,
            scl_slope,
            scl_inter,
            qform_code,
            sform_code,
            quatern,
            qoffset,
            srow_x,
            srow_y,
            srow_z,
            raw,
        })
    }


    /// The voxel data type.
    pub fn voxel_type(&self) -> Result<VoxelType> {
        VoxelType::from_nifti_code(self.datatype)
    }


    pub fn endianness(&self) -> Endianness {
        self.endianness
    }


    /// The `dim` field: number of dimensions followed by the dimension lengths.
    pub fn dim(&self) -> [i16; 8] {
        self.dim
    }


    /// The NIfTI-1 `datatype` code.
    pub fn datatype(&self) -> i16 {
        self.datatype
    }


    pub fn bitpix(&self) -> i16 {
        self.bitpix
    }


    /// The `pixdim` field: qfac followed by the voxel sizes.
    pub fn pixdim(&self) -> [f32; 8] {
        self.pixdim
    }


    /// Byte offset of the voxel data in the file.
    pub fn vox_offset(&self) -> usize {
        self.vox_offset
    }


    pub fn scl_slope(&self) -> f32 {
        self.scl_slope
    }


    pub fn scl_inter(&self) -> f32 {
        self.scl_inter
    }


    pub fn qform_code(&self) -> i16 {
        self.qform_code
    }


    pub fn sform_code(&self) -> i16 {
        self.sform_code
    }


    /// The intensity scaling to apply to stored voxel values, if any.
    pub fn scaling(&self) -> Option<Scaling> {
        Scaling::from_header(self.scl_slope, self.scl_inter)
    }


    /// The shape of the voxel array.
    pub fn shape(&self) -> Vec<usize> {
        self.dim[1..=self.dim[0] as usize].iter().map(|d| *d as usize).collect()
    }


    /// Number of voxels. Cannot overflow, the data size was checked when the header was parsed.
    pub fn num_voxels(&self) -> usize {
        self.shape().iter().product()
    }


    /// The raw header bytes, including extensions, exactly as they will be written.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }


    /// Compute the 4x4 voxel-to-world affine.
    ///
    /// The sform is used if `sform_code` is set, else the qform if `qform_code` is set, else a
    /// diagonal matrix of the voxel sizes.
    pub fn affine(&self) -> Array2<f64> {
        if self.sform_code > 0 {
            let row = |r: &[f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
            return arr2(&[row(&self.srow_x), row(&self.srow_y), row(&self.srow_z), [0.0, 0.0, 0.0, 1.0]]);
        }
        if self.qform_code > 0 {
            return self.qform_affine();
        }
        let px = |idx: usize| self.pixdim[idx] as f64;
        arr2(&[
            [px(1), 0.0, 0.0, 0.0],
            [0.0, px(2), 0.0, 0.0],
            [0.0, 0.0, px(3), 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }


    /// The affine defined by the quaternion, offsets and voxel sizes.
    fn qform_affine(&self) -> Array2<f64> {
        let b = self.quatern[0] as f64;
        let c = self.quatern[1] as f64;
        let d = self.quatern[2] as f64;
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if self.pixdim[0] < 0.0 { -1.0 } else { 1.0 };

        let rot = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let scale = [self.pixdim[1] as f64, self.pixdim[2] as f64, self.pixdim[3] as f64 * qfac];

        let mut m = Array2::<f64>::eye(4);
        for row in 0..3 {
            for col in 0..3 {
                m[[row, col]] = rot[row][col] * scale[col];
            }
            m[[row, 3]] = self.qoffset[row] as f64;
        }
        m
    }


    /// Change the stored voxel type and drop any intensity scaling.
    ///
    /// Only the datatype, bitpix, scl_slope and scl_inter fields of the raw header change.
    pub(crate) fn set_voxel_type(&mut self, dtype: VoxelType) -> Result<()> {
        let endianness = self.endianness;
        {
            let mut out = field_writer(&mut self.raw, DATATYPE_OFFSET, endianness);
            out.write_i16(dtype.nifti_code())?;
            out.write_i16((dtype.size_bytes() * 8) as i16)?;
        }
        {
            let mut out = field_writer(&mut self.raw, SCL_SLOPE_OFFSET, endianness);
            out.write_f32(1.0)?;
            out.write_f32(0.0)?;
        }
        self.datatype = dtype.nifti_code();
        self.bitpix = (dtype.size_bytes() * 8) as i16;
        self.scl_slope = 1.0;
        self.scl_inter = 0.0;
        Ok(())
    }
}


/// Determine the byte order of a header from its `sizeof_hdr` field, which must be 348.
fn detect_endianness(raw: &[u8]) -> Result<Endianness> {
    for &endianness in &[Endianness::Little, Endianness::Big] {
        if field_reader(&raw[0..4], 0, endianness).read_i32()? == NIFTI1_HEADER_SIZE as i32 {
            return Ok(endianness);
        }
    }
    Err(BrainsegError::InvalidNiftiFormat(String::from("header size is not 348, not a NIfTI-1 file")))
}


fn read_vox_offset(raw: &[u8], endianness: Endianness) -> Result<usize> {
    let vox_offset = field_reader(&raw[..VOX_OFFSET_OFFSET + 4], VOX_OFFSET_OFFSET, endianness).read_f32()?;
    if !(vox_offset >= NIFTI1_HEADER_SIZE as f32) || vox_offset.fract() != 0.0 {
        return Err(BrainsegError::InvalidNiftiFormat(format!("invalid vox_offset {}", vox_offset)));
    }
    Ok(vox_offset as usize)
}


/// A label volume stored in a NIfTI-1 image.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiVolume {
    pub header: NiftiHeader,
    pub data: ArrayD<i32>,
}

impl NiftiVolume {

    /// Read a '.nii' or '.nii.gz' file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NiftiVolume> {
        let file = BufReader::new(open_resource(&path)?);
        if is_gz_file(&path) {
            NiftiVolume::from_reader(GzDecoder::new(file))
        } else {
            NiftiVolume::from_reader(file)
        }
    }


    /// Read a NIfTI-1 image from the given byte stream. The voxel data is coerced to `i32` label codes.
    pub fn from_reader<S>(mut input: S) -> Result<NiftiVolume>
    where
        S: Read,
    {
        let header = NiftiHeader::from_reader(&mut input)?;
        let dtype = header.voxel_type()?;

        let bytes = read_exactly(&mut input, header.num_voxels() * dtype.size_bytes())?;
        let labels = decode_labels(&bytes, dtype, header.endianness, header.scaling())?;
        drop(bytes);

        let data = ArrayD::from_shape_vec(IxDyn(&header.shape()).f(), labels)
            .map_err(|e| BrainsegError::InvalidNiftiFormat(e.to_string()))?;
        Ok(NiftiVolume { header, data })
    }


    /// Write the volume as a '.nii' or '.nii.gz' file, depending on the file name.
    ///
    /// The file is written atomically: on error, no partial file is left at `path`.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_atomically(&path, is_gz_file(&path), |out| self.to_writer(out))
    }


    /// Write the raw header and the voxel data, in the header's byte order, type and scaling.
    pub fn to_writer(&self, out: &mut dyn Write) -> Result<()> {
        write_nifti(out, &self.header, &self.data)
    }
}


/// Write a NIfTI-1 image made of the given header and label data.
pub(crate) fn write_nifti(out: &mut dyn Write, header: &NiftiHeader, data: &ArrayD<i32>) -> Result<()> {
    if data.shape() != header.shape().as_slice() {
        return Err(BrainsegError::ShapeMismatch(header.shape(), data.shape().to_vec()));
    }
    let dtype = header.voxel_type()?;

    out.write_all(header.as_bytes())?;
    out.write_all(&encode_labels(&fortran_order(data), dtype, header.endianness, header.scaling()))?;
    Ok(())
}


/// Read a single file NIfTI-1 image as a label volume.
///
/// # Examples
///
/// ```no_run
/// let vol = brainseg::read_nifti("/path/to/sub-01_seg.nii.gz").unwrap();
/// println!("Affine: {}", vol.header.affine());
/// ```
pub fn read_nifti<P: AsRef<Path>>(path: P) -> Result<NiftiVolume> {
    NiftiVolume::from_file(path)
}
