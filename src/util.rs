//! Utility functions used in all other brainseg modules.

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::Builder;

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{BrainsegError, Result};

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    lowercase_file_name(path).ends_with(".gz")
}


/// The file name of the path in lower case, or an empty string if there is none.
pub fn lowercase_file_name<P>(path: P) -> String
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}


/// Open a file for reading, reporting a missing or unreadable file as [`BrainsegError::ResourceNotFound`].
pub fn open_resource<P: AsRef<Path>>(path: P) -> Result<File> {
    File::open(path.as_ref()).map_err(|err| BrainsegError::ResourceNotFound(path.as_ref().to_path_buf(), err))
}


/// Read exactly `len` bytes from the input.
///
/// The buffer only grows with the data actually read, so a corrupt header announcing far
/// more data than the input holds fails with `UnexpectedEof` instead of a huge allocation.
pub fn read_exactly<S: Read>(input: &mut S, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    input.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, format!("expected {} bytes of data, found {}", len, buf.len())));
    }
    Ok(buf)
}


/// Write a file so that readers never observe a partially written result.
///
/// The content is produced by `write_content` into a temporary file in the directory of
/// `path`, which is renamed onto `path` only after everything was written and flushed. If
/// `gz` is set, the content is GZip compressed. On error, the temporary file is removed and
/// an existing file at `path` is left untouched.
pub fn write_atomically<P, F>(path: P, gz: bool, write_content: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let path = path.as_ref();
    let dir: PathBuf = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let tmp = Builder::new().prefix(".brainseg-").suffix(".part").tempfile_in(&dir)?;
    {
        let writer = BufWriter::new(tmp.as_file());
        if gz {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            write_content(&mut encoder)?;
            let mut writer = encoder.finish()?;
            writer.flush()?;
        } else {
            let mut writer = writer;
            write_content(&mut writer)?;
            writer.flush()?;
        }
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| BrainsegError::Io(e.error))?;
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use std::io::Read;
    use flate2::read::GzDecoder;

    #[test]
    fn gz_files_are_detected_by_extension() {
        assert!(is_gz_file("/data/sub-01/aseg.nii.gz"));
        assert!(is_gz_file("ASEG.NII.GZ"));
        assert!(!is_gz_file("/data/sub-01/aseg.mgz"));
        assert!(!is_gz_file("/"));
    }

    #[test]
    fn missing_resources_are_reported_with_their_path() {
        let err = open_resource("/no/such/dir/lut.txt").unwrap_err();
        match err {
            BrainsegError::ResourceNotFound(path, _) => assert_eq!(PathBuf::from("/no/such/dir/lut.txt"), path),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn reading_stops_at_the_requested_length() {
        let data = [1u8, 2, 3, 4, 5];
        let mut input = &data[..];
        assert_eq!(vec![1, 2, 3], read_exactly(&mut input, 3).unwrap());
        assert_eq!(vec![4, 5], read_exactly(&mut input, 2).unwrap());

        let mut short = &data[..];
        let err = read_exactly(&mut short, usize::MAX).unwrap_err();
        assert_eq!(ErrorKind::UnexpectedEof, err.kind());
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        fs::write(&path, b"old content").unwrap();

        write_atomically(&path, false, |w| { w.write_all(b"new")?; Ok(()) }).unwrap();

        assert_eq!(b"new".to_vec(), fs::read(&path).unwrap());
        assert_eq!(1, fs::read_dir(dir.path()).unwrap().count());
    }

    #[test]
    fn atomic_write_keeps_the_old_file_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        fs::write(&path, b"old content").unwrap();

        let res = write_atomically(&path, false, |w| {
            w.write_all(b"partial")?;
            Err(BrainsegError::InvalidNiftiFormat(String::from("boom")))
        });

        assert!(res.is_err());
        assert_eq!(b"old content".to_vec(), fs::read(&path).unwrap());
        assert_eq!(1, fs::read_dir(dir.path()).unwrap().count());
    }

    #[test]
    fn atomic_write_can_compress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin.gz");

        write_atomically(&path, true, |w| { w.write_all(b"compressed payload")?; Ok(()) }).unwrap();

        let mut decoded = String::new();
        GzDecoder::new(fs::File::open(&path).unwrap()).read_to_string(&mut decoded).unwrap();
        assert_eq!("compressed payload", decoded);
    }
}
