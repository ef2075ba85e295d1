//! The relations builder: denormalize the canonical index into the relations
//! table and derive the per-PyPI-name lookups.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use mapper_store::{upload_pypi_lookups, StoreGateway, UploadOptions, UploadSummary};
use mapper_types::{Channel, IndexMapping, PyPIPackageLookup, RelationsTable};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use crate::{write_atomic, PipelineError};

/// The timeout for downloading the index from a public endpoint.
const PUBLIC_INDEX_TIMEOUT: Duration = Duration::from_secs(120);

/// Options for a relations run.
#[derive(Debug, Clone)]
pub struct RelationsOptions {
    /// The channel to build the table for.
    pub channel: Channel,

    /// Upload the table, its metadata and the changed lookups.
    pub upload: bool,

    /// When set, also write the table, the metadata and every lookup under
    /// this directory.
    pub output_dir: Option<PathBuf>,

    /// Only upload lookups whose content hash changed (the default).
    pub skip_unchanged: bool,

    /// Download the index from this public endpoint instead of the object
    /// store. Needs no credentials; uploading is unavailable in this mode.
    pub public_url: Option<Url>,

    /// Maximum number of in-flight lookup uploads.
    pub upload_concurrency: usize,
}

impl RelationsOptions {
    /// Creates options with the defaults of the production pipeline.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            upload: false,
            output_dir: None,
            skip_unchanged: true,
            public_url: None,
            upload_concurrency: 50,
        }
    }
}

/// The result of a relations run.
#[derive(Debug, Clone)]
pub struct RelationsSummary {
    /// Number of rows in the generated table.
    pub total_relations: usize,

    /// Number of derived lookups.
    pub total_lookups: usize,

    /// What the incremental lookup upload did, when uploading was enabled.
    pub upload: Option<UploadSummary>,
}

/// Builds the relations table and the derived lookups for a channel, then
/// uploads and/or writes them out per the options.
pub async fn build_relations(
    client: &ClientWithMiddleware,
    gateway: &StoreGateway,
    options: &RelationsOptions,
) -> Result<RelationsSummary, PipelineError> {
    let channel = options.channel;

    let index = match &options.public_url {
        Some(base) => download_public_index(client, base, channel).await?,
        None => gateway.get_index(channel).await?.ok_or_else(|| {
            PipelineError::Config(format!("no index exists for channel {channel}"))
        })?,
    };
    tracing::info!("loaded index with {} conda packages", index.len());

    let table = RelationsTable::from_index(&index, channel);
    let metadata = table.metadata();
    tracing::info!(
        "generated table: {} relations, {} conda packages, {} pypi packages",
        metadata.total_relations,
        metadata.unique_conda_packages,
        metadata.unique_pypi_packages
    );

    let table_bytes = table.to_jsonl_gz()?;
    tracing::info!("serialized table to {} bytes (gzipped jsonl)", table_bytes.len());

    let lookups = create_pypi_lookups(&table);
    let mut serialized: IndexMap<String, Vec<u8>> = IndexMap::with_capacity(lookups.len());
    for (pypi_name, lookup) in &lookups {
        let bytes = lookup
            .to_json_bytes()
            .map_err(|err| PipelineError::Parse(format!("lookup for {pypi_name}"), err))?;
        serialized.insert(pypi_name.clone(), bytes);
    }

    let mut upload_summary = None;
    if options.upload {
        if options.public_url.is_some() {
            tracing::warn!("cannot upload when reading from a public url (no credentials)");
        } else {
            tracing::info!("uploading the relations table");
            gateway
                .put_relations_table(channel, table_bytes.clone().into())
                .await?;
            gateway.put_relations_metadata(channel, &metadata).await?;

            let upload_options = UploadOptions {
                skip_unchanged: options.skip_unchanged,
                concurrency: options.upload_concurrency,
            };
            upload_summary =
                Some(upload_pypi_lookups(gateway, channel, &serialized, &upload_options).await?);
        }
    }

    if let Some(output_dir) = &options.output_dir {
        write_local_outputs(output_dir, &table_bytes, &metadata, &serialized)?;
    }

    Ok(RelationsSummary {
        total_relations: table.relations.len(),
        total_lookups: lookups.len(),
        upload: upload_summary,
    })
}

/// Downloads the canonical index from a public read endpoint, e.g. the one
/// the explorer uses. Useful for credential-less local runs.
async fn download_public_index(
    client: &ClientWithMiddleware,
    base: &Url,
    channel: Channel,
) -> Result<IndexMapping, PipelineError> {
    let url = base
        .join(&format!("hash-v0/{channel}/index.json"))
        .map_err(|err| PipelineError::Config(format!("invalid public url: {err}")))?;

    tracing::info!("downloading index from public url: {url}");

    let response = client
        .get(url.clone())
        .timeout(PUBLIC_INDEX_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;
    let bytes = response.bytes().await?;

    IndexMapping::from_slice(&bytes)
        .map_err(|err| PipelineError::Parse(url.to_string(), err))
}

fn write_local_outputs(
    output_dir: &std::path::Path,
    table_bytes: &[u8],
    metadata: &mapper_types::RelationsTableMetadata,
    serialized: &IndexMap<String, Vec<u8>>,
) -> Result<(), PipelineError> {
    write_atomic(&output_dir.join("relations.jsonl.gz"), table_bytes)?;

    let metadata_path = output_dir.join("metadata.json");
    let metadata_bytes = serde_json::to_vec_pretty(metadata)
        .map_err(|err| PipelineError::Parse(metadata_path.display().to_string(), err))?;
    write_atomic(&metadata_path, &metadata_bytes)?;

    let lookups_dir = output_dir.join("pypi_lookups");
    for (pypi_name, bytes) in serialized {
        write_atomic(&lookups_dir.join(format!("{pypi_name}.json")), bytes)?;
    }

    tracing::info!(
        "saved table, metadata and {} lookups to {}",
        serialized.len(),
        output_dir.display()
    );
    Ok(())
}

/// Derives the per-PyPI-name lookups from the relations table.
///
/// For every `(pypi_name, pypi_version)` a single conda package name is
/// chosen among all providers: the one with the smallest Levenshtein
/// distance to the PyPI name, ties broken by lexicographic order. `numpy`
/// therefore beats `numpy-base` for the `numpy` lookup.
pub fn create_pypi_lookups(table: &RelationsTable) -> IndexMap<String, PyPIPackageLookup> {
    // pypi_name -> pypi_version -> candidate conda names
    let mut candidates: IndexMap<String, IndexMap<String, BTreeSet<String>>> = IndexMap::new();
    for relation in &table.relations {
        candidates
            .entry(relation.pypi_name.clone())
            .or_default()
            .entry(relation.pypi_version.clone())
            .or_default()
            .insert(relation.conda_name.clone());
    }

    let mut lookups = IndexMap::with_capacity(candidates.len());
    for (pypi_name, versions) in candidates {
        let mut lookup = PyPIPackageLookup::new(table.channel, &pypi_name);
        for (pypi_version, conda_names) in versions {
            let best = best_matching_conda_name(&pypi_name, &conda_names);
            lookup.conda_versions.insert(pypi_version, best);
        }
        lookups.insert(pypi_name, lookup);
    }
    lookups
}

/// Picks the conda name closest to the PyPI name. The candidate set is a
/// `BTreeSet`, so equal distances resolve to the lexicographically smallest
/// name.
fn best_matching_conda_name(pypi_name: &str, conda_names: &BTreeSet<String>) -> String {
    conda_names
        .iter()
        .min_by_key(|conda_name| strsim::levenshtein(conda_name, pypi_name))
        .cloned()
        .expect("candidate sets are never empty")
}

#[cfg(test)]
mod test {
    use mapper_types::PackageRelation;

    use super::*;

    fn relation(conda_name: &str, pypi_name: &str, pypi_version: &str) -> PackageRelation {
        PackageRelation {
            conda_name: conda_name.to_owned(),
            conda_filename: format!("{conda_name}-{pypi_version}-0.conda"),
            conda_hash: "a".repeat(64),
            pypi_name: pypi_name.to_owned(),
            pypi_version: pypi_version.to_owned(),
            channel: "conda-forge".to_owned(),
            direct_url: None,
        }
    }

    fn table(relations: Vec<PackageRelation>) -> RelationsTable {
        let mut table = RelationsTable::new(Channel::CondaForge);
        table.relations = relations;
        table
    }

    #[test]
    fn test_exact_match_wins() {
        let table = table(vec![
            relation("numpy", "numpy", "1.26.4"),
            relation("numpy-base", "numpy", "1.26.4"),
        ]);

        let lookups = create_pypi_lookups(&table);
        assert_eq!(lookups["numpy"].conda_versions["1.26.4"], "numpy");
    }

    #[test]
    fn test_closest_match_wins_without_exact() {
        let table = table(vec![
            relation("py-numpy", "numpy", "1.26.4"),
            relation("python-numpy-extended", "numpy", "1.26.4"),
        ]);

        let lookups = create_pypi_lookups(&table);
        assert_eq!(lookups["numpy"].conda_versions["1.26.4"], "py-numpy");
    }

    #[test]
    fn test_tie_breaks_lexicographically() {
        // both are distance 1 from "foo"
        let table = table(vec![
            relation("fooa", "foo", "1.0"),
            relation("foob", "foo", "1.0"),
        ]);

        let lookups = create_pypi_lookups(&table);
        assert_eq!(lookups["foo"].conda_versions["1.0"], "fooa");
    }

    #[test]
    fn test_versions_are_kept_separate() {
        let table = table(vec![
            relation("numpy", "numpy", "1.26.4"),
            relation("numpy-base", "numpy", "1.25.0"),
        ]);

        let lookups = create_pypi_lookups(&table);
        let lookup = &lookups["numpy"];
        assert_eq!(lookup.conda_versions["1.26.4"], "numpy");
        assert_eq!(lookup.conda_versions["1.25.0"], "numpy-base");
        assert_eq!(lookup.format_version, "1.0");
        assert_eq!(lookup.channel, "conda-forge");
    }

    #[test]
    fn test_lookup_per_pypi_name() {
        let table = table(vec![
            relation("numpy", "numpy", "1.26.4"),
            relation("six", "six", "1.16.0"),
        ]);

        let lookups = create_pypi_lookups(&table);
        assert_eq!(lookups.len(), 2);
        assert!(lookups.contains_key("numpy"));
        assert!(lookups.contains_key("six"));
    }
}
