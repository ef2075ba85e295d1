//! Builders for synthetic archives used across the unit tests.

use std::io::{Cursor, Write};

use zip::CompressionMethod;

/// Builds an in-memory tar archive from `(path, content)` members.
pub(crate) fn tar_bytes(members: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

/// Builds an in-memory tar archive wrapped in a cursor.
pub(crate) fn tar_archive(members: &[(&str, &str)]) -> tar::Archive<Cursor<Vec<u8>>> {
    tar::Archive::new(Cursor::new(tar_bytes(members)))
}

/// Compresses the given members into a `.tar.bz2` artifact.
pub(crate) fn fake_tar_bz2_archive(members: &[(&str, &str)]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(&tar_bytes(members)).unwrap();
    encoder.finish().unwrap()
}

/// Builds a minimal but well-formed `.conda` archive: a zip holding a stored
/// `pkg-*.tar.zst` and a stored `info-*.tar.zst` with the given members.
pub(crate) fn fake_conda_archive(name: &str, members: &[(&str, &str)]) -> Vec<u8> {
    let mut zip_writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    zip_writer
        .start_file(format!("pkg-{name}.tar.zst"), options)
        .unwrap();
    zip_writer
        .write_all(&zstd::encode_all(&b""[..], 0).unwrap())
        .unwrap();

    zip_writer
        .start_file(format!("info-{name}.tar.zst"), options)
        .unwrap();
    zip_writer
        .write_all(&zstd::encode_all(tar_bytes(members).as_slice(), 0).unwrap())
        .unwrap();

    zip_writer.finish().unwrap().into_inner()
}
