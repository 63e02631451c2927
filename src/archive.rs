//! Archive format detection, extraction and results-directory discovery.
//!
//! Everything in here is blocking I/O; callers run it on
//! `tokio::task::spawn_blocking`.

use crate::errors::ExtractError;
use crate::results::is_result_file;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name of the directory the report compiler expects results in.
pub const RESULTS_DIR_NAME: &str = "allure-results";

/// Archive containers accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.tar.zst` / `.tzst`
    TarZst,
    /// `.tar.gz` / `.tgz`
    TarGz,
    /// `.zip`
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from a file name or path by its extension.
    pub fn detect(path: impl AsRef<Path>) -> Option<Self> {
        let name = path.as_ref().file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Default ceiling on the bytes written while unpacking one archive: 64 GiB.
pub const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 64 * 1024 * 1024 * 1024;

/// Unpack `archive` into `dest`, which must already exist.
///
/// Stops with [`ExtractError::TooLarge`] once the unpacked file contents
/// exceed `max_bytes`. Whatever was written up to that point stays in `dest`.
pub fn extract(
    archive: &Path,
    format: ArchiveFormat,
    dest: &Path,
    max_bytes: u64,
) -> Result<(), ExtractError> {
    let file = BufReader::new(File::open(archive)?);
    match format {
        ArchiveFormat::TarZst => {
            let decoder = zstd::stream::read::Decoder::with_buffer(file)?;
            unpack_tar(decoder, dest, max_bytes)
        }
        ArchiveFormat::TarGz => {
            unpack_tar(flate2::bufread::GzDecoder::new(file), dest, max_bytes)
        }
        ArchiveFormat::Zip => unpack_zip(file, dest, max_bytes),
    }
}

/// Like [`extract`], but detects the format from `archive`'s name first.
pub fn extract_detected(
    archive: &Path,
    dest: &Path,
    max_bytes: u64,
) -> Result<ArchiveFormat, ExtractError> {
    let format = ArchiveFormat::detect(archive)
        .ok_or_else(|| ExtractError::UnsupportedFormat(archive.to_path_buf()))?;
    extract(archive, format, dest, max_bytes)?;
    Ok(format)
}

fn unpack_tar(reader: impl io::Read, dest: &Path, max_bytes: u64) -> Result<(), ExtractError> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(false);

    let mut unpacked: u64 = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        // The header size is exactly what `unpack_in` will write
        unpacked = unpacked.saturating_add(entry.size());
        if unpacked > max_bytes {
            return Err(ExtractError::TooLarge { limit: max_bytes });
        }
        // `unpack_in` refuses entries that would land outside `dest`
        entry.unpack_in(dest)?;
    }
    Ok(())
}

fn unpack_zip(
    reader: impl io::Read + io::Seek,
    dest: &Path,
    max_bytes: u64,
) -> Result<(), ExtractError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut unpacked: u64 = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(enclosed) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(enclosed);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        // Declared sizes can lie, so count what is actually inflated
        let remaining = max_bytes.saturating_sub(unpacked);
        let mut limited = (&mut entry).take(remaining.saturating_add(1));
        unpacked = unpacked.saturating_add(io::copy(&mut limited, &mut out)?);
        if unpacked > max_bytes {
            return Err(ExtractError::TooLarge { limit: max_bytes });
        }
    }
    Ok(())
}

/// Find the directory holding the result files below `root`.
///
/// Archives are packed in different ways: results at the top level, inside
/// an `allure-results` folder, or under some other wrapper directory. The
/// first match wins:
/// 1. `root` itself, if it directly contains result files
/// 2. the shallowest directory containing result files, preferring ones
///    named `allure-results`
/// 3. the shallowest directory named `allure-results`
/// 4. `root`
pub fn locate_results_dir(root: &Path) -> PathBuf {
    if contains_result_files(root) {
        return root.to_path_buf();
    }

    let mut with_results: Option<(bool, usize, PathBuf)> = None;
    let mut named: Option<(usize, PathBuf)> = None;

    let dirs = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir());

    for entry in dirs {
        let depth = entry.depth();
        let is_named = entry.file_name() == RESULTS_DIR_NAME;

        if is_named && named.as_ref().is_none_or(|(d, _)| depth < *d) {
            named = Some((depth, entry.path().to_path_buf()));
        }

        if contains_result_files(entry.path()) {
            // `false` sorts first, so named directories win ties on depth
            let key = (!is_named, depth);
            if with_results
                .as_ref()
                .is_none_or(|(n, d, _)| key < (*n, *d))
            {
                with_results = Some((!is_named, depth, entry.path().to_path_buf()));
            }
        }
    }

    with_results
        .map(|(_, _, path)| path)
        .or(named.map(|(_, path)| path))
        .unwrap_or_else(|| root.to_path_buf())
}

fn contains_result_files(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(Result::ok).any(|entry| {
        entry.file_type().is_ok_and(|t| t.is_file())
            && entry.file_name().to_str().is_some_and(is_result_file)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn detects_supported_formats() {
        assert_eq!(ArchiveFormat::detect("a/b/results.tar.zst"), Some(ArchiveFormat::TarZst));
        assert_eq!(ArchiveFormat::detect("results.TZST"), Some(ArchiveFormat::TarZst));
        assert_eq!(ArchiveFormat::detect("results.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("results.tgz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("Results.Zip"), Some(ArchiveFormat::Zip));
    }

    #[test]
    fn rejects_unsupported_formats() {
        assert_eq!(ArchiveFormat::detect("results.rar"), None);
        assert_eq!(ArchiveFormat::detect("results.tar"), None);
        assert_eq!(ArchiveFormat::detect("zip"), None);
        assert_eq!(ArchiveFormat::detect(""), None);
    }

    #[test]
    fn extract_detected_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("results.7z");
        fs::write(&archive, b"whatever").unwrap();

        let err = extract_detected(&archive, dir.path(), DEFAULT_MAX_EXTRACTED_BYTES).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[test]
    fn zip_bombs_stop_at_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bomb.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("zeros-result.json", options).unwrap();
            zip.write_all(&[0u8; 64 * 1024]).unwrap();
            zip.finish().unwrap();
        }
        assert!(fs::metadata(&archive).unwrap().len() < 1024);

        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        let err = extract_detected(&archive, &dest, 1024).unwrap_err();
        assert!(matches!(err, ExtractError::TooLarge { limit: 1024 }));
        assert!(fs::metadata(dest.join("zeros-result.json")).unwrap().len() <= 1025);
    }

    #[test]
    fn tar_gz_bombs_stop_at_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bomb.tar.gz");
        {
            let encoder = flate2::write::GzEncoder::new(
                File::create(&archive).unwrap(),
                flate2::Compression::default(),
            );
            let mut builder = tar::Builder::new(encoder);
            for name in ["a-result.json", "b-result.json"] {
                let data = vec![0u8; 800];
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, data.as_slice()).unwrap();
            }
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        let err = extract_detected(&archive, &dest, 1024).unwrap_err();
        assert!(matches!(err, ExtractError::TooLarge { limit: 1024 }));
        assert!(dest.join("a-result.json").is_file());
        assert!(!dest.join("b-result.json").exists());

        // The same archive fits under a larger limit
        let dest = dir.path().join("out2");
        fs::create_dir(&dest).unwrap();
        assert_eq!(extract_detected(&archive, &dest, 1600).unwrap(), ArchiveFormat::TarGz);
        assert!(dest.join("b-result.json").is_file());
    }

    #[test]
    fn zip_entries_escaping_the_destination_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("../escaped-result.json", options).unwrap();
            zip.write_all(br#"{"status":"passed"}"#).unwrap();
            zip.start_file("ok-result.json", options).unwrap();
            zip.write_all(br#"{"status":"passed"}"#).unwrap();
            zip.finish().unwrap();
        }

        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        extract(&archive, ArchiveFormat::Zip, &dest, DEFAULT_MAX_EXTRACTED_BYTES).unwrap();

        assert!(dest.join("ok-result.json").exists());
        assert!(!dir.path().join("escaped-result.json").exists());
    }

    #[test]
    fn locate_prefers_root_with_results() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a-result.json"), "{}").unwrap();
        fs::create_dir(dir.path().join(RESULTS_DIR_NAME)).unwrap();

        assert_eq!(locate_results_dir(dir.path()), dir.path());
    }

    #[test]
    fn locate_finds_nested_results_under_unexpected_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("build").join("output");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("a-result.json"), "{}").unwrap();

        assert_eq!(locate_results_dir(dir.path()), nested);
    }

    #[test]
    fn locate_prefers_named_directory_at_equal_depth() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("aaa");
        let named = dir.path().join(RESULTS_DIR_NAME);
        fs::create_dir_all(&other).unwrap();
        fs::create_dir_all(&named).unwrap();
        fs::write(other.join("a-result.json"), "{}").unwrap();
        fs::write(named.join("b-result.json"), "{}").unwrap();

        assert_eq!(locate_results_dir(dir.path()), named);
    }

    #[test]
    fn locate_falls_back_to_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();

        assert_eq!(locate_results_dir(dir.path()), dir.path());
    }
}
