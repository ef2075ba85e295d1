//! The range-streamed backend.
//!
//! For `.conda` artifacts only the tail of the zip archive is fetched via
//! HTTP range requests: the end-of-central-directory record points at the
//! central directory, which points at the `info-*.tar.zst` entry, which is
//! all the pipeline needs. A 64 KiB tail usually covers all three in a single
//! roundtrip.
//!
//! For `.tar.bz2` artifacts there is no index to jump through, so the
//! response body is streamed through the bzip2/tar decoders and abandoned as
//! soon as the `info/` members have been read.

use std::io::Cursor;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::StatusCode;
use mapper_types::ArchiveType;
use reqwest_middleware::ClientWithMiddleware;
use tokio_util::io::{StreamReader, SyncIoBridge};
use url::Url;

use super::{download, ArtifactRequest, ARTIFACT_FETCH_TIMEOUT};
use crate::{
    info::InfoFiles, read::stream_tar_bz2, seek::read_artifact_info, ArtifactInfo, ExtractError,
};

/// Default number of bytes to fetch from the end of the file. 64KB is enough
/// for most packages to include the EOCD, the central directory, and often
/// the entire info archive.
const DEFAULT_TAIL_SIZE: u64 = 64 * 1024;

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const CDH_SIGNATURE: u32 = 0x0201_4b50;
const LFH_SIGNATURE: u32 = 0x0403_4b50;

/// Size of the end-of-central-directory record without the trailing comment.
const EOCD_MIN_SIZE: usize = 22;

/// Size of a central directory entry header without its variable fields.
const CD_HEADER_SIZE: usize = 46;

/// Size of a local file header without its variable fields.
const LOCAL_HEADER_SIZE: usize = 30;

fn u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn invalid_data(message: &str) -> ExtractError {
    ExtractError::IoError(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message.to_owned(),
    ))
}

/// Information about a zip entry's location in the archive.
#[derive(Debug)]
struct ZipEntryLocation {
    /// Offset to the local file header from the start of the archive.
    local_header_offset: u64,
    /// Compressed size of the file data.
    compressed_size: u64,
}

/// The end-of-central-directory fields the reader needs.
#[derive(Debug)]
struct EndOfCentralDirectory {
    cd_offset: u64,
    cd_size: u64,
}

/// Parsed Content-Range header information.
#[derive(Debug)]
struct ContentRange {
    /// Start byte position (inclusive).
    start: u64,
    /// Total file size.
    total: u64,
}

impl ContentRange {
    /// Parse a Content-Range header value like "bytes 1000-2000/3000".
    fn parse(header_value: &str) -> Option<Self> {
        let header_value = header_value.strip_prefix("bytes ")?;
        let (range, total) = header_value.split_once('/')?;
        let (start, _end) = range.split_once('-')?;

        Some(ContentRange {
            start: start.parse().ok()?,
            total: total.parse().ok()?,
        })
    }
}

/// Result of a range request.
enum RangeRequestResult {
    /// Successful range response with bytes and content range info.
    Success(Bytes, ContentRange),
    /// Server doesn't support range requests (405 Method Not Allowed).
    NotSupported,
    /// Server returned full content (200 OK instead of 206).
    FullContent(Bytes),
    /// The artifact does not exist.
    NotFound,
}

/// Fetch bytes from a URL using the HTTP Range header.
async fn fetch_range(
    client: &ClientWithMiddleware,
    url: &Url,
    range: &str,
) -> Result<RangeRequestResult, ExtractError> {
    tracing::debug!("fetching range {range} from {url}");

    let response = client
        .get(url.clone())
        .timeout(ARTIFACT_FETCH_TIMEOUT)
        .header(http::header::RANGE, range)
        .send()
        .await?;

    match response.status() {
        StatusCode::PARTIAL_CONTENT => {
            let content_range = response
                .headers()
                .get(http::header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(ContentRange::parse)
                .ok_or_else(|| invalid_data("missing or invalid Content-Range header"))?;

            let bytes = response.bytes().await?;

            tracing::debug!(
                "received {} bytes (range {}-{}/{})",
                bytes.len(),
                content_range.start,
                content_range.start + bytes.len() as u64,
                content_range.total
            );

            Ok(RangeRequestResult::Success(bytes, content_range))
        }
        StatusCode::METHOD_NOT_ALLOWED => {
            tracing::debug!("server does not support range requests (405)");
            Ok(RangeRequestResult::NotSupported)
        }
        StatusCode::OK => {
            // Server ignored the range request and returned the whole file
            let bytes = response.bytes().await?;
            tracing::debug!(
                "server returned full content ({} bytes) instead of range",
                bytes.len()
            );
            Ok(RangeRequestResult::FullContent(bytes))
        }
        StatusCode::NOT_FOUND => Ok(RangeRequestResult::NotFound),
        _ => {
            let error = response
                .error_for_status()
                .expect_err("non-success status should error");
            Err(ExtractError::ReqwestError(error.into()))
        }
    }
}

/// Find the end-of-central-directory record in the tail bytes. Returns the
/// offset within the tail and the parsed record.
fn find_eocd(tail_bytes: &[u8]) -> Option<(usize, EndOfCentralDirectory)> {
    // The EOCD can carry a variable-length comment (up to 65535 bytes), so
    // search backwards for the signature.
    for i in (0..=tail_bytes.len().checked_sub(EOCD_MIN_SIZE)?).rev() {
        if u32_le(tail_bytes, i) != EOCD_SIGNATURE {
            continue;
        }

        let comment_length = u16_le(tail_bytes, i + 20) as usize;
        if i + EOCD_MIN_SIZE + comment_length <= tail_bytes.len() {
            let record = EndOfCentralDirectory {
                cd_size: u64::from(u32_le(tail_bytes, i + 12)),
                cd_offset: u64::from(u32_le(tail_bytes, i + 16)),
            };
            return Some((i, record));
        }
    }
    None
}

/// Parse central directory entries to find the `info-*.tar.zst` file.
fn find_info_entry(cd_bytes: &[u8]) -> Option<ZipEntryLocation> {
    let mut offset = 0;

    while offset + CD_HEADER_SIZE <= cd_bytes.len() {
        if u32_le(cd_bytes, offset) != CDH_SIGNATURE {
            break;
        }

        let compressed_size = u64::from(u32_le(cd_bytes, offset + 20));
        let file_name_length = u16_le(cd_bytes, offset + 28) as usize;
        let extra_field_length = u16_le(cd_bytes, offset + 30) as usize;
        let file_comment_length = u16_le(cd_bytes, offset + 32) as usize;
        let local_header_offset = u64::from(u32_le(cd_bytes, offset + 42));

        let filename_start = offset + CD_HEADER_SIZE;
        let filename_end = filename_start + file_name_length;
        if filename_end > cd_bytes.len() {
            break;
        }

        let filename = String::from_utf8_lossy(&cd_bytes[filename_start..filename_end]);
        if filename.starts_with("info-") && filename.ends_with(".tar.zst") {
            return Some(ZipEntryLocation {
                local_header_offset,
                compressed_size,
            });
        }

        offset += CD_HEADER_SIZE + file_name_length + extra_field_length + file_comment_length;
    }

    None
}

/// Calculate the data offset from a local file header: the header has its own
/// copy of the variable-length fields which may differ from the central
/// directory.
fn data_offset_from_local_header(header_bytes: &[u8]) -> Option<u64> {
    if header_bytes.len() < LOCAL_HEADER_SIZE || u32_le(header_bytes, 0) != LFH_SIGNATURE {
        return None;
    }

    let file_name_length = u64::from(u16_le(header_bytes, 26));
    let extra_field_length = u64::from(u16_le(header_bytes, 28));

    Some(LOCAL_HEADER_SIZE as u64 + file_name_length + extra_field_length)
}

/// Try to extract a slice from the tail bytes if the requested range is fully
/// contained within them.
fn slice_from_tail(
    tail_bytes: &Bytes,
    tail_start_offset: u64,
    offset: u64,
    len: u64,
) -> Option<Bytes> {
    if offset >= tail_start_offset {
        let start_in_tail = (offset - tail_start_offset) as usize;
        let end_in_tail = start_in_tail + len as usize;
        if end_in_tail <= tail_bytes.len() {
            return Some(tail_bytes.slice(start_in_tail..end_in_tail));
        }
    }
    None
}

pub(super) async fn fetch(
    client: &ClientWithMiddleware,
    request: &ArtifactRequest,
) -> Result<Option<ArtifactInfo>, ExtractError> {
    match request.archive_type()? {
        ArchiveType::Conda => fetch_conda_ranged(client, request).await,
        ArchiveType::TarBz2 => fetch_tar_bz2_streamed(client, request).await,
    }
}

/// Fetch the info section of a `.conda` artifact using range requests.
async fn fetch_conda_ranged(
    client: &ClientWithMiddleware,
    request: &ArtifactRequest,
) -> Result<Option<ArtifactInfo>, ExtractError> {
    let url = request.artifact_url();

    // Step 1: fetch the tail of the file
    let range = format!("bytes=-{DEFAULT_TAIL_SIZE}");
    let (tail_bytes, content_range) = match fetch_range(client, &url, &range).await? {
        RangeRequestResult::Success(bytes, range) => (bytes, range),
        RangeRequestResult::NotSupported => {
            tracing::debug!("no range support on {url}, downloading in full");
            return download::fetch(client, request).await;
        }
        RangeRequestResult::FullContent(bytes) => {
            return parse_full_conda(bytes).await.map(Some);
        }
        RangeRequestResult::NotFound => return Ok(None),
    };

    // Validate that the response covers up to the end of the file
    let tail_start_offset = content_range.start;
    if tail_start_offset + tail_bytes.len() as u64 != content_range.total {
        return Err(invalid_data("Content-Range does not match response body length"));
    }

    // Step 2: find the EOCD in the tail
    let (_eocd_offset_in_tail, eocd) =
        find_eocd(&tail_bytes).ok_or_else(|| invalid_data("could not find end of central directory"))?;

    // Step 3: get hold of the central directory
    tracing::debug!(
        "central directory: offset={}, size={}, total_file_size={}",
        eocd.cd_offset,
        eocd.cd_size,
        content_range.total
    );
    let cd_bytes = match slice_from_tail(&tail_bytes, tail_start_offset, eocd.cd_offset, eocd.cd_size)
    {
        Some(bytes) => bytes,
        None => {
            tracing::debug!("central directory not in tail, fetching separately");
            let range = format!(
                "bytes={}-{}",
                eocd.cd_offset,
                eocd.cd_offset + eocd.cd_size - 1
            );
            match fetch_range(client, &url, &range).await? {
                RangeRequestResult::Success(bytes, _) => bytes,
                RangeRequestResult::NotFound => return Ok(None),
                _ => return download::fetch(client, request).await,
            }
        }
    };

    // Step 4: find the info-*.tar.zst entry in the central directory
    let entry = find_info_entry(&cd_bytes).ok_or(ExtractError::MissingComponent)?;
    tracing::debug!(
        "found info archive entry: local_header_offset={}, compressed_size={}",
        entry.local_header_offset,
        entry.compressed_size
    );

    // Step 5: read the local file header to get the actual data offset
    let local_header_bytes = match slice_from_tail(
        &tail_bytes,
        tail_start_offset,
        entry.local_header_offset,
        LOCAL_HEADER_SIZE as u64,
    ) {
        Some(bytes) => bytes,
        None => {
            tracing::debug!("local header not in tail, fetching separately");
            let range = format!(
                "bytes={}-{}",
                entry.local_header_offset,
                entry.local_header_offset + LOCAL_HEADER_SIZE as u64 - 1
            );
            match fetch_range(client, &url, &range).await? {
                RangeRequestResult::Success(bytes, _) => bytes,
                RangeRequestResult::NotFound => return Ok(None),
                _ => return download::fetch(client, request).await,
            }
        }
    };

    let data_offset = data_offset_from_local_header(&local_header_bytes)
        .ok_or_else(|| invalid_data("invalid local file header"))?;
    let data_start = entry.local_header_offset + data_offset;

    // Step 6: fetch the info archive data (if not already in tail)
    let info_archive_bytes = match slice_from_tail(
        &tail_bytes,
        tail_start_offset,
        data_start,
        entry.compressed_size,
    ) {
        Some(bytes) => bytes,
        None => {
            tracing::debug!("info archive data not in tail, fetching separately");
            let range = format!("bytes={}-{}", data_start, data_start + entry.compressed_size - 1);
            match fetch_range(client, &url, &range).await? {
                RangeRequestResult::Success(bytes, _) => bytes,
                RangeRequestResult::NotFound => return Ok(None),
                _ => return download::fetch(client, request).await,
            }
        }
    };

    // Step 7: decompress and read the info members
    let artifact = tokio::task::spawn_blocking(move || {
        let tar_bytes = zstd::decode_all(Cursor::new(&info_archive_bytes[..]))?;
        let info =
            InfoFiles::collect_from_tar(tar::Archive::new(Cursor::new(tar_bytes)), false)?;
        ArtifactInfo::from_info_files(info)
    })
    .await??;

    Ok(Some(artifact))
}

async fn parse_full_conda(bytes: Bytes) -> Result<ArtifactInfo, ExtractError> {
    tokio::task::spawn_blocking(move || {
        read_artifact_info(Cursor::new(bytes), ArchiveType::Conda)
    })
    .await?
}

/// Stream a `.tar.bz2` artifact and stop reading once the `info/` members
/// have been collected.
async fn fetch_tar_bz2_streamed(
    client: &ClientWithMiddleware,
    request: &ArtifactRequest,
) -> Result<Option<ArtifactInfo>, ExtractError> {
    let url = request.artifact_url();

    tracing::debug!("streaming {url}");

    let response = client
        .get(url)
        .timeout(ARTIFACT_FETCH_TIMEOUT)
        .send()
        .await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response = response.error_for_status()?;

    let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
    let bridge = SyncIoBridge::new(reader);

    let artifact = tokio::task::spawn_blocking(move || {
        let info = InfoFiles::collect_from_tar(stream_tar_bz2(bridge), true)?;
        ArtifactInfo::from_info_files(info)
    })
    .await??;

    Ok(Some(artifact))
}
