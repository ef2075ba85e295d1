//! Functionality to read the `info/` section of an artifact for objects that
//! implement both [`std::io::Read`] and [`std::io::Seek`] like a
//! [`std::fs::File`] or a [`std::io::Cursor<T>`].

use std::io::{Read, Seek, SeekFrom};

use zip::CompressionMethod;

use crate::{
    info::InfoFiles,
    read::{stream_tar_bz2, stream_tar_zst},
    ArtifactInfo, ExtractError,
};
use mapper_types::ArchiveType;

fn stream_conda_zip_entry<'a>(
    mut archive: zip::ZipArchive<impl Read + Seek + 'a>,
    file_name: &str,
) -> Result<tar::Archive<impl Read + Sized + 'a>, ExtractError> {
    // Find the offset and size of the file in the zip.
    let (offset, size) = {
        let entry = archive.by_name(file_name)?;

        // Make sure the file is uncompressed.
        if entry.compression() != CompressionMethod::Stored {
            return Err(ExtractError::UnsupportedCompressionMethod);
        }

        (
            entry
                .data_start()
                .expect("data_start is populated by ZipArchive::by_name"),
            entry.size(),
        )
    };

    // Seek to the position of the file
    let mut reader = archive.into_inner();
    reader.seek(SeekFrom::Start(offset))?;

    // Given the bytes in the zip archive of the file, decode it as a zst
    // compressed tar file.
    stream_tar_zst(reader.take(size))
}

/// Stream the info section of a `.conda` package as a tar archive.
pub fn stream_conda_info<'a>(
    reader: impl Read + Seek + 'a,
) -> Result<tar::Archive<impl Read + Sized + 'a>, ExtractError> {
    let archive = zip::ZipArchive::new(reader)?;

    // Find the info entry in the archive
    let file_name = archive
        .file_names()
        .find(|file_name| file_name.starts_with("info-") && file_name.ends_with(".tar.zst"))
        .ok_or(ExtractError::MissingComponent)?
        .to_owned();

    stream_conda_zip_entry(archive, &file_name)
}

/// Reads the artifact metadata from a complete archive held in a seekable
/// reader. The archive type decides how the `info/` section is located.
pub fn read_artifact_info(
    reader: impl Read + Seek,
    archive_type: ArchiveType,
) -> Result<ArtifactInfo, ExtractError> {
    let info = match archive_type {
        ArchiveType::Conda => InfoFiles::collect_from_tar(stream_conda_info(reader)?, false)?,
        ArchiveType::TarBz2 => InfoFiles::collect_from_tar(stream_tar_bz2(reader), false)?,
    };
    ArtifactInfo::from_info_files(info)
}

#[cfg(test)]
mod test {
    use std::io::{Cursor, Write};

    use super::*;
    use crate::test_utils::fake_conda_archive;

    const INDEX_JSON: &str = r#"{"name": "numpy", "version": "1.26.4"}"#;

    #[test]
    fn test_read_artifact_from_conda() {
        let bytes = fake_conda_archive(
            "numpy-1.26.4-py311h64a7726_0",
            &[
                ("info/index.json", INDEX_JSON),
                (
                    "info/paths.json",
                    r#"{"paths": [{"_path": "site-packages/numpy-1.26.4.dist-info/METADATA"}]}"#,
                ),
            ],
        );

        let artifact = read_artifact_info(Cursor::new(bytes), ArchiveType::Conda).unwrap();
        assert_eq!(artifact.name, "numpy");
        assert_eq!(
            artifact.files,
            vec!["site-packages/numpy-1.26.4.dist-info/METADATA"]
        );
    }

    #[test]
    fn test_conda_without_info_entry_is_missing_component() {
        let mut zip_writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored);
        zip_writer.start_file("pkg-x.tar.zst", options).unwrap();
        zip_writer
            .write_all(&zstd::encode_all(&b""[..], 0).unwrap())
            .unwrap();
        let bytes = zip_writer.finish().unwrap().into_inner();

        assert!(matches!(
            read_artifact_info(Cursor::new(bytes), ArchiveType::Conda),
            Err(ExtractError::MissingComponent)
        ));
    }
}
