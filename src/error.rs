use quick_error::quick_error;
use std::io::Error as IOError;
use std::path::PathBuf;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum BrainsegError {
        /// A lookup table or image file does not exist or cannot be opened.
        ResourceNotFound(path: PathBuf, err: IOError) {
            display("Resource not found or unreadable: '{}': {}", path.display(), err)
            source(err)
        }

        /// The file exists, but is not a readable volumetric label image.
        ImageFormat(path: PathBuf, reason: String) {
            display("Not a readable volumetric label image: '{}': {}", path.display(), reason)
        }

        InvalidNiftiFormat(reason: String) {
            display("Invalid NIfTI file: {}", reason)
        }

        InvalidFsMghFormat(reason: String) {
            display("Invalid FreeSurfer MGH file: {}", reason)
        }

        UnsupportedDataType(code: i32) {
            display("Unsupported voxel data type code {}", code)
        }

        /// A stored voxel value cannot be represented as an `i32` label code.
        LabelOutOfRange(value: String) {
            display("Voxel value {} does not fit a 32 bit label code", value)
        }

        /// Only raised when parsing lookup tables in strict mode.
        MalformedLutLine(line_no: usize, line: String) {
            display("Malformed lookup table line {}: '{}'", line_no, line)
        }

        UnknownImageFormat(path: PathBuf) {
            display("Cannot determine volume format from file name '{}'", path.display())
        }

        ShapeMismatch(expected: Vec<usize>, found: Vec<usize>) {
            display("Volume shape {:?} does not match the header shape {:?}", found, expected)
        }

        UnknownSchema(name: String) {
            display("No lookup table found for label schema '{}'", name)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
        }
    }
}

impl BrainsegError {
    /// The process exit status a command line tool should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            BrainsegError::ResourceNotFound(..) | BrainsegError::UnknownSchema(..) => 2,
            BrainsegError::ImageFormat(..)
            | BrainsegError::InvalidNiftiFormat(..)
            | BrainsegError::InvalidFsMghFormat(..)
            | BrainsegError::UnsupportedDataType(..)
            | BrainsegError::LabelOutOfRange(..)
            | BrainsegError::UnknownImageFormat(..) => 3,
            _ => 1,
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, BrainsegError>;


#[cfg(test)]
mod test {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn exit_codes_distinguish_missing_resources_from_bad_images() {
        let missing = BrainsegError::ResourceNotFound(PathBuf::from("a.txt"), IOError::from(ErrorKind::NotFound));
        let bad = BrainsegError::ImageFormat(PathBuf::from("a.nii"), String::from("truncated"));
        let io = BrainsegError::from(IOError::from(ErrorKind::PermissionDenied));

        assert_eq!(2, missing.exit_code());
        assert_eq!(3, bad.exit_code());
        assert_eq!(1, io.exit_code());
    }

    #[test]
    fn resource_errors_name_the_path() {
        let missing = BrainsegError::ResourceNotFound(PathBuf::from("/luts/gouhfi.txt"), IOError::from(ErrorKind::NotFound));
        assert!(missing.to_string().contains("/luts/gouhfi.txt"));
    }
}
