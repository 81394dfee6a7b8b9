//! Voxel data types of label volumes, and their conversion from and to `i32` label codes.
//!
//! Both supported volume formats store voxels as a flat run of fixed-width numbers in
//! Fortran order. The functions here decode such a run into label codes, and encode label
//! codes back into the stored representation, optionally through a linear intensity scaling.

use approx::relative_eq;
use byteordered::byteorder::{BigEndian, ByteOrder, LittleEndian};
use byteordered::Endianness;

use ndarray::ArrayD;

use std::borrow::Cow;
use std::convert::TryFrom;

use crate::error::{BrainsegError, Result};

/// The fixed-width number types a volume can store its voxels as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoxelType {
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl VoxelType {

    /// Map a NIfTI-1 `datatype` code to a voxel type.
    pub fn from_nifti_code(code: i16) -> Result<VoxelType> {
        match code {
            2 => Ok(VoxelType::U8),
            4 => Ok(VoxelType::I16),
            8 => Ok(VoxelType::I32),
            16 => Ok(VoxelType::F32),
            64 => Ok(VoxelType::F64),
            256 => Ok(VoxelType::I8),
            512 => Ok(VoxelType::U16),
            768 => Ok(VoxelType::U32),
            1024 => Ok(VoxelType::I64),
            1280 => Ok(VoxelType::U64),
            _ => Err(BrainsegError::UnsupportedDataType(code as i32)),
        }
    }

    /// The NIfTI-1 `datatype` code of this voxel type.
    pub fn nifti_code(self) -> i16 {
        match self {
            VoxelType::U8 => 2,
            VoxelType::I16 => 4,
            VoxelType::I32 => 8,
            VoxelType::F32 => 16,
            VoxelType::F64 => 64,
            VoxelType::I8 => 256,
            VoxelType::U16 => 512,
            VoxelType::U32 => 768,
            VoxelType::I64 => 1024,
            VoxelType::U64 => 1280,
        }
    }

    /// Map a FreeSurfer MGH `dtype` code (MRI_UCHAR, MRI_INT, MRI_FLOAT, MRI_SHORT) to a voxel type.
    pub fn from_mgh_code(code: i32) -> Result<VoxelType> {
        match code {
            0 => Ok(VoxelType::U8),
            1 => Ok(VoxelType::I32),
            3 => Ok(VoxelType::F32),
            4 => Ok(VoxelType::I16),
            _ => Err(BrainsegError::UnsupportedDataType(code)),
        }
    }

    /// The FreeSurfer MGH `dtype` code, if the type can be stored in an MGH file.
    pub fn mgh_code(self) -> Option<i32> {
        match self {
            VoxelType::U8 => Some(0),
            VoxelType::I32 => Some(1),
            VoxelType::F32 => Some(3),
            VoxelType::I16 => Some(4),
            _ => None,
        }
    }

    /// Size of one stored voxel in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            VoxelType::U8 | VoxelType::I8 => 1,
            VoxelType::I16 | VoxelType::U16 => 2,
            VoxelType::I32 | VoxelType::U32 | VoxelType::F32 => 4,
            VoxelType::I64 | VoxelType::U64 | VoxelType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, VoxelType::F32 | VoxelType::F64)
    }

    /// The smallest and largest value representable by this type.
    pub fn range(self) -> (f64, f64) {
        match self {
            VoxelType::U8 => (u8::MIN as f64, u8::MAX as f64),
            VoxelType::I8 => (i8::MIN as f64, i8::MAX as f64),
            VoxelType::I16 => (i16::MIN as f64, i16::MAX as f64),
            VoxelType::U16 => (u16::MIN as f64, u16::MAX as f64),
            VoxelType::I32 => (i32::MIN as f64, i32::MAX as f64),
            VoxelType::U32 => (u32::MIN as f64, u32::MAX as f64),
            VoxelType::I64 => (i64::MIN as f64, i64::MAX as f64),
            VoxelType::U64 => (u64::MIN as f64, u64::MAX as f64),
            VoxelType::F32 => (f32::MIN as f64, f32::MAX as f64),
            VoxelType::F64 => (f64::MIN, f64::MAX),
        }
    }
}


/// Number of bytes of voxel data of the given shape, or `None` if that does not fit `usize`.
pub fn data_size(shape: &[usize], dtype: VoxelType) -> Option<usize> {
    shape.iter().try_fold(dtype.size_bytes(), |acc, &len| acc.checked_mul(len))
}


/// A linear mapping `value = stored * slope + inter` between stored voxel values and label codes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub slope: f64,
    pub inter: f64,
}

impl Scaling {

    /// Interpret a slope/intercept pair from a header. A slope of `0` means no scaling, as do `1` and `0`.
    pub fn from_header(slope: f32, inter: f32) -> Option<Scaling> {
        let slope = slope as f64;
        let inter = inter as f64;
        if !slope.is_finite() || slope == 0.0 || !inter.is_finite() {
            return None;
        }
        if relative_eq!(slope, 1.0) && relative_eq!(inter, 0.0) {
            return None;
        }
        Some(Scaling { slope, inter })
    }

    fn apply(&self, stored: f64) -> f64 {
        stored * self.slope + self.inter
    }

    fn invert(&self, value: f64) -> f64 {
        (value - self.inter) / self.slope
    }
}


/// The stored value a label code is written as.
fn stored_value(label: i32, scaling: Option<Scaling>) -> f64 {
    match scaling {
        Some(s) => s.invert(label as f64),
        None => label as f64,
    }
}


/// Check whether all label codes in `[min, max]` can be written as `dtype` under the given scaling.
pub fn labels_fit(dtype: VoxelType, scaling: Option<Scaling>, min: i32, max: i32) -> bool {
    let (lo, hi) = dtype.range();
    let a = stored_value(min, scaling);
    let b = stored_value(max, scaling);
    let (smin, smax) = if a <= b { (a, b) } else { (b, a) };
    if dtype.is_float() {
        return smin >= lo && smax <= hi;
    }
    smin.round() >= lo && smax.round() <= hi
}


/// Check whether `label`, written as `dtype` under `scaling`, reads back as the same label.
///
/// Integer stored values are rounded, so only labels on the grid `inter + k * slope` survive.
pub fn label_survives_scaling(label: i32, dtype: VoxelType, scaling: Scaling) -> bool {
    let stored = scaling.invert(label as f64);
    let stored = match dtype {
        VoxelType::F32 => stored as f32 as f64,
        VoxelType::F64 => stored,
        _ => stored.round(),
    };
    float_to_label(scaling.apply(stored)) == label
}


fn float_to_label(v: f64) -> i32 {
    // Saturating cast, NaN becomes 0.
    v.trunc() as i32
}

fn int_to_label<T>(v: T) -> Result<i32>
where
    T: Copy + std::fmt::Display,
    i32: TryFrom<T>,
{
    i32::try_from(v).map_err(|_| BrainsegError::LabelOutOfRange(v.to_string()))
}

fn scaled_labels<I: Iterator<Item = f64>>(values: I, scaling: Scaling) -> Vec<i32> {
    values.map(|v| float_to_label(scaling.apply(v))).collect()
}


macro_rules! read_numbers {
    ($bytes:expr, $endian:expr, $t:ty, $read_into:ident) => {{
        let mut buf: Vec<$t> = vec![<$t>::default(); $bytes.len() / std::mem::size_of::<$t>()];
        match $endian {
            Endianness::Little => LittleEndian::$read_into($bytes, &mut buf),
            Endianness::Big => BigEndian::$read_into($bytes, &mut buf),
        }
        buf
    }};
}

macro_rules! write_numbers {
    ($values:expr, $endian:expr, $t:ty, $write_into:ident) => {{
        let values: Vec<$t> = $values;
        let mut out = vec![0u8; values.len() * std::mem::size_of::<$t>()];
        match $endian {
            Endianness::Little => LittleEndian::$write_into(&values, &mut out),
            Endianness::Big => BigEndian::$write_into(&values, &mut out),
        }
        out
    }};
}


/// Decode raw voxel bytes into `i32` label codes.
///
/// The length of `bytes` must be a multiple of the voxel size. Float values are truncated
/// toward zero. Integer values outside the `i32` range are reported as [`BrainsegError::LabelOutOfRange`].
pub fn decode_labels(bytes: &[u8], dtype: VoxelType, endian: Endianness, scaling: Option<Scaling>) -> Result<Vec<i32>> {
    if let Some(s) = scaling {
        let values: Vec<f64> = match dtype {
            VoxelType::U8 => bytes.iter().map(|&v| v as f64).collect(),
            VoxelType::I8 => bytes.iter().map(|&v| v as i8 as f64).collect(),
            VoxelType::I16 => read_numbers!(bytes, endian, i16, read_i16_into).into_iter().map(f64::from).collect(),
            VoxelType::U16 => read_numbers!(bytes, endian, u16, read_u16_into).into_iter().map(f64::from).collect(),
            VoxelType::I32 => read_numbers!(bytes, endian, i32, read_i32_into).into_iter().map(f64::from).collect(),
            VoxelType::U32 => read_numbers!(bytes, endian, u32, read_u32_into).into_iter().map(f64::from).collect(),
            VoxelType::I64 => read_numbers!(bytes, endian, i64, read_i64_into).into_iter().map(|v| v as f64).collect(),
            VoxelType::U64 => read_numbers!(bytes, endian, u64, read_u64_into).into_iter().map(|v| v as f64).collect(),
            VoxelType::F32 => read_numbers!(bytes, endian, f32, read_f32_into).into_iter().map(f64::from).collect(),
            VoxelType::F64 => read_numbers!(bytes, endian, f64, read_f64_into),
        };
        return Ok(scaled_labels(values.into_iter(), s));
    }

    let labels: Vec<i32> = match dtype {
        VoxelType::U8 => bytes.iter().map(|&v| v as i32).collect(),
        VoxelType::I8 => bytes.iter().map(|&v| v as i8 as i32).collect(),
        VoxelType::I16 => read_numbers!(bytes, endian, i16, read_i16_into).into_iter().map(i32::from).collect(),
        VoxelType::U16 => read_numbers!(bytes, endian, u16, read_u16_into).into_iter().map(i32::from).collect(),
        VoxelType::I32 => read_numbers!(bytes, endian, i32, read_i32_into),
        VoxelType::U32 => read_numbers!(bytes, endian, u32, read_u32_into).into_iter().map(int_to_label).collect::<Result<Vec<i32>>>()?,
        VoxelType::I64 => read_numbers!(bytes, endian, i64, read_i64_into).into_iter().map(int_to_label).collect::<Result<Vec<i32>>>()?,
        VoxelType::U64 => read_numbers!(bytes, endian, u64, read_u64_into).into_iter().map(int_to_label).collect::<Result<Vec<i32>>>()?,
        VoxelType::F32 => read_numbers!(bytes, endian, f32, read_f32_into).into_iter().map(|v| float_to_label(v as f64)).collect(),
        VoxelType::F64 => read_numbers!(bytes, endian, f64, read_f64_into).into_iter().map(float_to_label).collect(),
    };
    Ok(labels)
}


/// Encode `i32` label codes into raw voxel bytes of the given type.
///
/// Callers must check with [`labels_fit`] that the labels are representable first, values
/// outside the range of `dtype` are saturated.
pub fn encode_labels(labels: &[i32], dtype: VoxelType, endian: Endianness, scaling: Option<Scaling>) -> Vec<u8> {
    if scaling.is_none() {
        return match dtype {
            VoxelType::U8 => labels.iter().map(|&v| v as u8).collect(),
            VoxelType::I8 => labels.iter().map(|&v| v as i8 as u8).collect(),
            VoxelType::I16 => write_numbers!(labels.iter().map(|&v| v as i16).collect(), endian, i16, write_i16_into),
            VoxelType::U16 => write_numbers!(labels.iter().map(|&v| v as u16).collect(), endian, u16, write_u16_into),
            VoxelType::I32 => write_numbers!(labels.to_vec(), endian, i32, write_i32_into),
            VoxelType::U32 => write_numbers!(labels.iter().map(|&v| v as u32).collect(), endian, u32, write_u32_into),
            VoxelType::I64 => write_numbers!(labels.iter().map(|&v| v as i64).collect(), endian, i64, write_i64_into),
            VoxelType::U64 => write_numbers!(labels.iter().map(|&v| v as u64).collect(), endian, u64, write_u64_into),
            VoxelType::F32 => write_numbers!(labels.iter().map(|&v| v as f32).collect(), endian, f32, write_f32_into),
            VoxelType::F64 => write_numbers!(labels.iter().map(|&v| v as f64).collect(), endian, f64, write_f64_into),
        };
    }

    let stored = labels.iter().map(|&v| stored_value(v, scaling));
    match dtype {
        VoxelType::F32 => write_numbers!(stored.map(|v| v as f32).collect(), endian, f32, write_f32_into),
        VoxelType::F64 => write_numbers!(stored.collect(), endian, f64, write_f64_into),
        VoxelType::U8 => stored.map(|v| v.round() as u8).collect(),
        VoxelType::I8 => stored.map(|v| v.round() as i8 as u8).collect(),
        VoxelType::I16 => write_numbers!(stored.map(|v| v.round() as i16).collect(), endian, i16, write_i16_into),
        VoxelType::U16 => write_numbers!(stored.map(|v| v.round() as u16).collect(), endian, u16, write_u16_into),
        VoxelType::I32 => write_numbers!(stored.map(|v| v.round() as i32).collect(), endian, i32, write_i32_into),
        VoxelType::U32 => write_numbers!(stored.map(|v| v.round() as u32).collect(), endian, u32, write_u32_into),
        VoxelType::I64 => write_numbers!(stored.map(|v| v.round() as i64).collect(), endian, i64, write_i64_into),
        VoxelType::U64 => write_numbers!(stored.map(|v| v.round() as u64).collect(), endian, u64, write_u64_into),
    }
}


/// The labels of a volume in Fortran order (first axis fastest), as volume files store them.
///
/// Volumes read from files are already laid out this way in memory and are not copied.
pub fn fortran_order(data: &ArrayD<i32>) -> Cow<'_, [i32]> {
    if data.t().is_standard_layout() {
        if let Some(slice) = data.as_slice_memory_order() {
            return Cow::Borrowed(slice);
        }
    }
    Cow::Owned(data.t().iter().copied().collect())
}
