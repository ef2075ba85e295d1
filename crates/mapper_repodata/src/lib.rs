#![deny(missing_docs)]

//! This crate provides the read side of the pipeline's upstream interfaces:
//! fetching `channeldata.json` and per-subdir `repodata.json` files from a
//! channel (including per-label views), and a conditionally-cached reader for
//! the published channel index.

pub mod cache;
pub mod fetch;

pub use cache::{CacheStatus, IndexCache};
pub use fetch::{
    fetch_channeldata, fetch_merged_repodata, fetch_repodata, list_labels, list_subdirs,
    repodata_url, FetchRepodataError,
};
