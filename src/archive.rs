//! Archive builder: stream a directory tree into one ZIP file
//!
//! Inputs are mostly pre-compressed game assets, so the writer uses the
//! fastest deflate level; ratio is not the goal. Entries are stored
//! relative to the source root — absolute paths never land in the archive.
//! The builder is synchronous; callers run it under `spawn_blocking` with
//! the build deadline applied outside.

use crate::error::JobError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Inputs below this size skip the compression-ratio sanity check
const RATIO_CHECK_FLOOR: u64 = 10 * 1024;

/// Minimum interval between progress callbacks
const PROGRESS_THROTTLE: Duration = Duration::from_millis(100);

/// One entry discovered under the source root
struct Entry {
    absolute: PathBuf,
    relative: String,
    is_dir: bool,
}

/// Build `output` from the tree rooted at `source`.
///
/// `progress` receives `(entries_done, total_entries)` at a throttled
/// rate, plus a final call when the last entry lands. Returns the archive
/// size in bytes.
///
/// Failure modes: [`JobError::NoContent`] for an empty source,
/// [`JobError::ArchiveTooSmall`] when the output falls under `min_size`,
/// [`JobError::ArchiveTooLarge`] when it exceeds `max_size`.
pub fn build_archive(
    source: &Path,
    output: &Path,
    min_size: u64,
    max_size: Option<u64>,
    mut progress: impl FnMut(usize, usize),
) -> Result<u64, JobError> {
    let mut entries = Vec::new();
    collect_entries(source, source, &mut entries).map_err(|e| JobError::Internal {
        detail: format!("failed to walk '{}': {e}", source.display()),
    })?;

    if !entries.iter().any(|e| !e.is_dir) {
        return Err(JobError::NoContent);
    }

    let file = std::fs::File::create(output).map_err(|e| JobError::Internal {
        detail: format!("failed to create '{}': {e}", output.display()),
    })?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(1))
        .large_file(true);

    let total = entries.len();
    let mut uncompressed: u64 = 0;
    let mut last_report = Instant::now() - PROGRESS_THROTTLE;

    for (index, entry) in entries.iter().enumerate() {
        if entry.is_dir {
            writer
                .add_directory(entry.relative.clone(), options)
                .map_err(|e| JobError::Internal {
                    detail: format!("failed to add directory '{}': {e}", entry.relative),
                })?;
        } else {
            writer
                .start_file(entry.relative.clone(), options)
                .map_err(|e| JobError::Internal {
                    detail: format!("failed to start entry '{}': {e}", entry.relative),
                })?;
            let mut input =
                std::fs::File::open(&entry.absolute).map_err(|e| JobError::Internal {
                    detail: format!("failed to open '{}': {e}", entry.absolute.display()),
                })?;
            let copied =
                std::io::copy(&mut input, &mut writer).map_err(|e| JobError::Internal {
                    detail: format!("failed to write entry '{}': {e}", entry.relative),
                })?;
            uncompressed += copied;
        }

        let done = index + 1;
        if done == total || last_report.elapsed() >= PROGRESS_THROTTLE {
            progress(done, total);
            last_report = Instant::now();
        }
    }

    let mut file = writer.finish().map_err(|e| JobError::Internal {
        detail: format!("failed to finalize archive: {e}"),
    })?;
    file.flush().map_err(|e| JobError::Internal {
        detail: format!("failed to flush archive: {e}"),
    })?;
    drop(file);

    let size = std::fs::metadata(output)
        .map_err(|e| JobError::Internal {
            detail: format!("failed to stat archive: {e}"),
        })?
        .len();

    if size < min_size {
        return Err(JobError::ArchiveTooSmall {
            size,
            floor: min_size,
        });
    }
    if let Some(cap) = max_size {
        if size > cap {
            return Err(JobError::ArchiveTooLarge { size, cap });
        }
    }

    if uncompressed > RATIO_CHECK_FLOOR && size < uncompressed / 100 {
        tracing::warn!(
            archive = %output.display(),
            archive_size = size,
            input_size = uncompressed,
            "unusually high compression ratio"
        );
    }

    Ok(size)
}

fn collect_entries(root: &Path, dir: &Path, out: &mut Vec<Entry>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        // Symlinks are skipped: a link escaping the workspace must not
        // pull foreign files into the artifact.
        if file_type.is_symlink() {
            continue;
        }
        let relative = match path.strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if file_type.is_dir() {
            out.push(Entry {
                absolute: path.clone(),
                relative,
                is_dir: true,
            });
            collect_entries(root, &path, out)?;
        } else {
            out.push(Entry {
                absolute: path,
                relative,
                is_dir: false,
            });
        }
    }
    Ok(())
}
