//! Functions for managing FreeSurfer brain volumes in binary 'MGH' files.
//!
//! MGH files store a big-endian, fixed size header, the voxel data in Fortran order, and an
//! optional footer with scan parameters and tags. MGZ files are GZip compressed MGH files.
//! When a volume is written back, header and footer are copied verbatim.


use byteordered::{ByteOrdered, Endianness};
use flate2::bufread::GzDecoder;
use ndarray::{arr2, Array2, ArrayD, IxDyn, ShapeBuilder};

use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::error::{BrainsegError, Result};
use crate::util::{is_gz_file, lowercase_file_name, open_resource, read_exactly, write_atomically};
use crate::voxel::{data_size, decode_labels, encode_labels, fortran_order, VoxelType};

pub const MGH_VERSION: i32 = 1;

pub const MGH_DATA_START : usize = 284; // The index in bytes where the data part starts in an MGH file.

const MGH_DTYPE_OFFSET: usize = 20;

/// Models the header of a FreeSurfer MGH file containing a brain volume.
///
/// The fields are parsed from the raw 284 header bytes, which are what gets written back
/// when the volume is saved.
#[derive(Debug, Clone, PartialEq)]
pub struct FsMghHeader {
    mgh_format_version: i32,
    dim1len: i32,
    dim2len: i32,
    dim3len: i32,
    dim4len: i32,  // aka "num_frames"
    dtype: i32,
    dof: i32,
    is_ras_good: i16,
    delta: [f32; 3],
    mdc_raw: [f32; 9],
    p_xyz_c: [f32; 3],
    raw: Vec<u8>,
}


/// Models a FreeSurfer MGH file holding a label volume.
#[derive(Debug, Clone, PartialEq)]
pub struct FsMgh {
    pub header: FsMghHeader,
    pub data: ArrayD<i32>,
    /// Everything after the voxel data: scan parameters and tags. Kept verbatim.
    pub footer: Vec<u8>,
}


/// The header of an MGH/MGZ file.
impl FsMghHeader {

    /// Create the header of a new, conformed volume (1 mm isotropic voxels, LIA orientation, centered at the origin).
    pub fn new(dims: [usize; 4], dtype: VoxelType) -> Result<FsMghHeader> {
        let code = dtype.mgh_code().ok_or_else(|| BrainsegError::UnsupportedDataType(dtype.nifti_code() as i32))?;
        let mut raw: Vec<u8> = Vec::with_capacity(MGH_DATA_START);
        {
            let mut out = ByteOrdered::be(&mut raw);
            out.write_i32(MGH_VERSION)?;
            for d in dims.iter() {
                out.write_i32(*d as i32)?;
            }
            out.write_i32(code)?;
            out.write_i32(0)?;
            out.write_i16(1)?;
            for v in [1.0f32; 3].iter() { out.write_f32(*v)?; }
            for v in [-1.0f32, 0., 0., 0., 0., -1., 0., 1., 0.].iter() { out.write_f32(*v)?; }
            for v in [0.0f32; 3].iter() { out.write_f32(*v)?; }
        }
        raw.resize(MGH_DATA_START, 0);
        FsMghHeader::from_bytes(raw)
    }


    /// Read an MGH header from a file. If the file's name ends with ".mgz" or ".gz", it is GZip decoded.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsMghHeader> {
        let mut file = BufReader::new(open_resource(&path)?);
        if is_mgz_file(&path) {
            FsMghHeader::from_reader(&mut GzDecoder::new(file))
        } else {
            FsMghHeader::from_reader(&mut file)
        }
    }


    /// Read an MGH header from the given byte stream.
    /// It is assumed that the input is currently at the start of the
    /// header. After this, the input is positioned at the start of the voxel data.
    pub fn from_reader<S>(input: &mut S) -> Result<FsMghHeader>
    where
        S: Read,
    {
        let mut raw = vec![0u8; MGH_DATA_START];
        input.read_exact(&mut raw)?;
        FsMghHeader::from_bytes(raw)
    }


    /// Parse the fixed size header block of an MGH file.
    fn from_bytes(raw: Vec<u8>) -> Result<FsMghHeader> {
        let mut input = ByteOrdered::be(&raw[..]);

        let mgh_format_version = input.read_i32()?;
        if mgh_format_version != MGH_VERSION {
            return Err(BrainsegError::InvalidFsMghFormat(format!("unsupported format version {}", mgh_format_version)));
        }

        let dim1len = input.read_i32()?;
        let dim2len = input.read_i32()?;
        let dim3len = input.read_i32()?;
        let dim4len = input.read_i32()?;
        let dtype = input.read_i32()?;
        let dof = input.read_i32()?;
        let is_ras_good = input.read_i16()?;

        let mut delta = [0.; 3];
        let mut mdc_raw = [0.; 9];
        let mut p_xyz_c = [0.; 3];
        if is_ras_good == 1 as i16 {
            for v in delta.iter_mut() { *v = input.read_f32()?; }
            for v in mdc_raw.iter_mut() { *v = input.read_f32()?; }
            for v in p_xyz_c.iter_mut() { *v = input.read_f32()?; }
        }

        if [dim1len, dim2len, dim3len, dim4len].iter().any(|d| *d < 1) {
            return Err(BrainsegError::InvalidFsMghFormat(format!("invalid volume dimensions {}x{}x{}x{}", dim1len, dim2len, dim3len, dim4len)));
        }
        let voxel_type = VoxelType::from_mgh_code(dtype)?;
        let dims = [dim1len as usize, dim2len as usize, dim3len as usize, dim4len as usize];
        if data_size(&dims, voxel_type).is_none() {
            return Err(BrainsegError::InvalidFsMghFormat(format!("voxel data of {}x{}x{}x{} voxels is too large", dim1len, dim2len, dim3len, dim4len)));
        }

        Ok(FsMghHeader {
            mgh_format_version,
            dim1len,
            dim2len,
            dim3len,
            dim4len,
            dtype,
            dof,
            is_ras_good,
            delta,
            mdc_raw,
            p_xyz_c,
            raw,
        })
    }


    /// The voxel data type.
    pub fn voxel_type(&self) -> Result<VoxelType> {
        VoxelType::from_mgh_code(self.dtype)
    }


    pub fn mgh_format_version(&self) -> i32 {
        self.mgh_format_version
    }


    /// The lengths of the three spatial dimensions and the number of frames.
    pub fn dims(&self) -> [i32; 4] {
        [self.dim1len, self.dim2len, self.dim3len, self.dim4len]
    }


    /// The MGH `dtype` code.
    pub fn dtype(&self) -> i32 {
        self.dtype
    }


    pub fn dof(&self) -> i32 {
        self.dof
    }


    pub fn is_ras_good(&self) -> bool {
        self.is_ras_good == 1
    }


    /// Voxel size in mm. Zero if the RAS information is not set.
    pub fn delta(&self) -> [f32; 3] {
        self.delta
    }


    /// The direction cosines, column by column. Zero if the RAS information is not set.
    pub fn mdc_raw(&self) -> [f32; 9] {
        self.mdc_raw
    }


    /// The RAS coordinates of the volume center. Zero if the RAS information is not set.
    pub fn p_xyz_c(&self) -> [f32; 3] {
        self.p_xyz_c
    }


    /// The shape of the voxel array. Single frame volumes are 3-dimensional.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.dim1len as usize, self.dim2len as usize, self.dim3len as usize];
        if self.dim4len != 1 {
            shape.push(self.dim4len as usize);
        }
        shape
    }


    /// Number of voxels over all frames. Cannot overflow, the data size was checked when the header was parsed.
    pub fn num_voxels(&self) -> usize {
        self.shape().iter().product()
    }


    /// The raw header bytes, exactly as they will be written.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }


    /// The voxel size in mm, the direction cosines (as columns) and the RAS center. Defaults are used if `is_ras_good` is not set.
    fn ras_geometry(&self) -> ([f64; 3], [[f64; 3]; 3], [f64; 3]) {
        if self.is_ras_good != 1 {
            return ([1.0; 3], [[-1., 0., 0.], [0., 0., -1.], [0., 1., 0.]], [0.0; 3]);
        }
        let delta = [self.delta[0] as f64, self.delta[1] as f64, self.delta[2] as f64];
        let mut mdc = [[0.0; 3]; 3];
        for col in 0..3 {
            for row in 0..3 {
                mdc[col][row] = self.mdc_raw[col * 3 + row] as f64;
            }
        }
        let c_ras = [self.p_xyz_c[0] as f64, self.p_xyz_c[1] as f64, self.p_xyz_c[2] as f64];
        (delta, mdc, c_ras)
    }


    /// Compute the 4x4 voxel-to-RAS matrix of the volume.
    ///
    /// The center voxel `dims / 2` is mapped to the RAS center stored in the header.
    pub fn vox2ras(&self) -> Array2<f64> {
        let (delta, mdc, c_ras) = self.ras_geometry();
        let center = [self.dim1len as f64 / 2.0, self.dim2len as f64 / 2.0, self.dim3len as f64 / 2.0];

        let mut m = [[0.0f64; 3]; 3];
        for row in 0..3 {
            for col in 0..3 {
                m[row][col] = mdc[col][row] * delta[col];
            }
        }
        let mut p0 = [0.0f64; 3];
        for row in 0..3 {
            p0[row] = c_ras[row] - (0..3).map(|col| m[row][col] * center[col]).sum::<f64>();
        }

        arr2(&[
            [m[0][0], m[0][1], m[0][2], p0[0]],
            [m[1][0], m[1][1], m[1][2], p0[1]],
            [m[2][0], m[2][1], m[2][2], p0[2]],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }


    /// Change the stored voxel type. Only the dtype field of the raw header changes.
    pub(crate) fn set_voxel_type(&mut self, dtype: VoxelType) -> Result<()> {
        let code = dtype.mgh_code().ok_or_else(|| BrainsegError::UnsupportedDataType(dtype.nifti_code() as i32))?;
        let mut out = ByteOrdered::be(&mut self.raw[MGH_DTYPE_OFFSET..MGH_DTYPE_OFFSET + 4]);
        out.write_i32(code)?;
        self.dtype = code;
        Ok(())
    }
}


impl FsMgh {

    /// Read an MGH or MGZ file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsMgh> {
        let file = BufReader::new(open_resource(&path)?);
        if is_mgz_file(&path) {
            FsMgh::from_reader(GzDecoder::new(file))
        } else {
            FsMgh::from_reader(file)
        }
    }


    /// Read an MGH volume from the given byte stream, which must be at the start of the header.
    pub fn from_reader<S>(mut input: S) -> Result<FsMgh>
    where
        S: Read,
    {
        let header = FsMghHeader::from_reader(&mut input)?;
        let dtype = header.voxel_type()?;

        let bytes = read_exactly(&mut input, header.num_voxels() * dtype.size_bytes())?;
        let labels = decode_labels(&bytes, dtype, Endianness::Big, None)?;
        drop(bytes);

        let data = ArrayD::from_shape_vec(IxDyn(&header.shape()).f(), labels)
            .map_err(|e| BrainsegError::InvalidFsMghFormat(e.to_string()))?;

        let mut footer = Vec::new();
        input.read_to_end(&mut footer)?;

        Ok(FsMgh { header, data, footer })
    }


    /// Write the volume as an MGH or MGZ file, depending on the file name.
    ///
    /// The file is written atomically: on error, no partial file is left at `path`.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_atomically(&path, is_mgz_file(&path), |out| self.to_writer(out))
    }


    /// Write header, voxel data and footer to the given output.
    pub fn to_writer(&self, out: &mut dyn Write) -> Result<()> {
        write_mgh(out, &self.header, &self.data, &self.footer)
    }
}


/// Write an MGH volume made of the given header, label data and footer.
pub(crate) fn write_mgh(out: &mut dyn Write, header: &FsMghHeader, data: &ArrayD<i32>, footer: &[u8]) -> Result<()> {
    if data.shape() != header.shape().as_slice() {
        return Err(BrainsegError::ShapeMismatch(header.shape(), data.shape().to_vec()));
    }
    let dtype = header.voxel_type()?;

    out.write_all(header.as_bytes())?;
    out.write_all(&encode_labels(&fortran_order(data), dtype, Endianness::Big, None))?;
    out.write_all(footer)?;
    Ok(())
}


/// Check whether a file name denotes a compressed MGH file, i.e., ends with ".mgz" or ".mgh.gz".
pub fn is_mgz_file<P: AsRef<Path>>(path: P) -> bool {
    let name = lowercase_file_name(&path);
    name.ends_with(".mgz") || is_gz_file(&path)
}


/// Read an MGH or MGZ file.
///
/// # Examples
///
/// ```no_run
/// let mgh = brainseg::read_mgh("/path/to/subjects_dir/subject1/mri/aseg.mgz").unwrap();
/// println!("Volume of shape {:?}", mgh.data.shape());
/// ```
pub fn read_mgh<P: AsRef<Path>>(path: P) -> Result<FsMgh> {
    FsMgh::from_file(path)
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;

    fn demo_volume(dtype: VoxelType) -> FsMgh {
        let header = FsMghHeader::new([3, 4, 2, 1], dtype).unwrap();
        let data = Array::from_shape_fn(IxDyn(&[3, 4, 2]), |idx| (idx[0] + 3 * idx[1] + 12 * idx[2]) as i32);
        FsMgh { header, data, footer: Vec::new() }
    }

    #[test]
    fn new_headers_are_284_bytes() {
        let header = FsMghHeader::new([256, 256, 256, 1], VoxelType::I32).unwrap();
        assert_eq!(MGH_DATA_START, header.as_bytes().len());
        assert_eq!(vec![256, 256, 256], header.shape());
        assert_eq!(1, header.dtype());
        assert_eq!([256, 256, 256, 1], header.dims());
        assert!(header.is_ras_good());
        assert!(FsMghHeader::new([2, 2, 2, 1], VoxelType::U16).is_err());
    }

    #[test]
    fn the_conformed_vox2ras_is_lia() {
        let header = FsMghHeader::new([256, 256, 256, 1], VoxelType::U8).unwrap();
        let expected = arr2(&[
            [-1.0, 0.0, 0.0, 128.0],
            [0.0, 0.0, 1.0, -128.0],
            [0.0, -1.0, 0.0, 128.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert_abs_diff_eq!(expected, header.vox2ras(), epsilon = 1e-6);
    }

    #[test]
    fn volumes_survive_writing_and_reading() {
        let dir = tempfile::tempdir().unwrap();
        for name in &["seg.mgh", "seg.mgz", "seg.mgh.gz"] {
            let path = dir.path().join(name);
            let mut mgh = demo_volume(VoxelType::I16);
            mgh.footer = vec![0, 0, 0, 3, 1, 2, 3];
            mgh.to_file(&path).unwrap();

            let read = read_mgh(&path).unwrap();
            assert_eq!(mgh, read);
        }
    }

    #[test]
    fn voxel_data_is_stored_in_fortran_order() {
        let mgh = demo_volume(VoxelType::U8);
        let mut bytes = Vec::new();
        mgh.to_writer(&mut bytes).unwrap();

        let data = &bytes[MGH_DATA_START..];
        assert_eq!(24, data.len());
        assert_eq!(&[0u8, 1, 2, 3, 4, 5], &data[0..6]);
    }

    #[test]
    fn wrong_versions_are_rejected() {
        let mut bytes = Vec::new();
        demo_volume(VoxelType::U8).to_writer(&mut bytes).unwrap();
        bytes[3] = 2;
        let res = FsMgh::from_reader(&bytes[..]);
        assert!(matches!(res, Err(BrainsegError::InvalidFsMghFormat(_))));
    }

    #[test]
    fn truncated_voxel_data_is_an_error() {
        let mut bytes = Vec::new();
        demo_volume(VoxelType::I32).to_writer(&mut bytes).unwrap();
        bytes.truncate(MGH_DATA_START + 10);
        assert!(FsMgh::from_reader(&bytes[..]).is_err());
    }

    #[test]
    fn the_voxel_type_can_be_widened() {
        let mut header = FsMghHeader::new([2, 2, 2, 1], VoxelType::U8).unwrap();
        header.set_voxel_type(VoxelType::I32).unwrap();
        assert_eq!(VoxelType::I32, header.voxel_type().unwrap());
        assert_eq!(&[0u8, 0, 0, 1], &header.as_bytes()[20..24]);
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let mut bytes = Vec::new();
        demo_volume(VoxelType::U8).to_writer(&mut bytes).unwrap();
        for idx in 0..4 {
            bytes[4 + 4 * idx..8 + 4 * idx].copy_from_slice(&i32::MAX.to_be_bytes());
        }
        let res = FsMgh::from_reader(&bytes[..]);
        assert!(matches!(res, Err(BrainsegError::InvalidFsMghFormat(_))));
    }

    #[test]
    fn headers_announcing_more_data_than_present_fail_cleanly() {
        let mut bytes = Vec::new();
        demo_volume(VoxelType::U8).to_writer(&mut bytes).unwrap();
        for idx in 0..3 {
            bytes[4 + 4 * idx..8 + 4 * idx].copy_from_slice(&40000i32.to_be_bytes());
        }
        assert!(FsMgh::from_reader(&bytes[..]).is_err());
    }
}
