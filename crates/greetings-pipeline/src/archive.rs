//! Gzip-compressed tar archives of source tree directories.

use flate2::Compression;
use flate2::write::GzEncoder;
use greetings_core::tree::normalize;
use greetings_core::{Error, Result, SourceTree};

/// Replace the directory `dir` of `tree` with a `.tar.gz` archive of it.
///
/// Archive entries keep the `dir/` prefix, so unpacking recreates the
/// directory. The returned tree holds the archive at `archive_name` and no
/// longer contains `dir/`.
pub fn pack_directory(tree: &SourceTree, dir: &str, archive_name: &str) -> Result<SourceTree> {
    let dir = normalize(dir);
    if !tree.has_directory(&dir) {
        return Err(Error::NotFound(format!("directory '{}/' to archive", dir)));
    }

    let archive = tar_gz(&tree.directory(&dir), &dir)?;
    Ok(tree.without_directory(&dir).with_file(archive_name, archive))
}

fn tar_gz(tree: &SourceTree, prefix: &str) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, contents) in tree.entries() {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        // Fixed mtime keeps archives reproducible
        header.set_mtime(0);
        builder
            .append_data(&mut header, format!("{}/{}", prefix, path), &contents[..])
            .map_err(|e| Error::Archive(format!("failed to add {}: {}", path, e)))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::Archive(e.to_string()))?;
    encoder.finish().map_err(|e| Error::Archive(e.to_string()))
}

#[cfg(test)]
pub(crate) fn unpack(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;

    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(bytes));
    let mut files = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().to_string();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        files.push((path, contents));
    }
    files
}
