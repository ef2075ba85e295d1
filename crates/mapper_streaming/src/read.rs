//! Functions that enable streaming the contents of a conda package for
//! objects that implement the [`std::io::Read`] trait.

use std::io::Read;

use crate::ExtractError;

/// Returns the `.tar.bz2` as a decompressed `tar::Archive`. The
/// `tar::Archive` can be used to extract the files from it, or perform
/// introspection.
pub fn stream_tar_bz2(reader: impl Read) -> tar::Archive<impl Read + Sized> {
    tar::Archive::new(bzip2::read::BzDecoder::new(reader))
}

/// Returns the `.tar.zst` as a decompressed `tar` archive. The `tar::Archive`
/// can be used to extract the files from it, or perform introspection.
pub fn stream_tar_zst(
    reader: impl Read,
) -> Result<tar::Archive<impl Read + Sized>, ExtractError> {
    Ok(tar::Archive::new(zstd::stream::read::Decoder::new(reader)?))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{fake_tar_bz2_archive, tar_bytes};

    #[test]
    fn test_stream_tar_bz2() {
        let compressed = fake_tar_bz2_archive(&[("info/index.json", "{}")]);

        let mut archive = stream_tar_bz2(compressed.as_slice());
        let entries: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(entries, vec!["info/index.json"]);
    }

    #[test]
    fn test_stream_tar_zst() {
        let compressed =
            zstd::encode_all(tar_bytes(&[("info/about.json", "{}")]).as_slice(), 0).unwrap();

        let mut archive = stream_tar_zst(compressed.as_slice()).unwrap();
        let entries: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(entries, vec!["info/about.json"]);
    }
}
