use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::backend::BackendKind;
use crate::checksum::{md5_hex, CHECKSUM_SUFFIX};
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::store::{ObjectStore, StoreRegistry};
use crate::uri::{StorageUri, UriKind};

/// Nesting limit for deep localization. Documents deeper than this are
/// copied as-is, which also terminates reference cycles.
pub const MAX_RECURSION_DEPTH: usize = 10;

/// One localization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizationRequest {
    /// Local absolute path, `gs://` or `s3://` URI
    pub source: String,
    /// Backend the file must be reachable from
    pub backend: BackendKind,
    /// Also localize files referenced from JSON/CSV/TSV documents
    pub recursive: bool,
    /// Write a `.md5` sidecar next to files localized on local storage
    pub make_checksum_file: bool,
}

impl LocalizationRequest {
    pub fn new(source: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            source: source.into(),
            backend,
            recursive: false,
            make_checksum_file: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn make_checksum_file(mut self, make_checksum_file: bool) -> Self {
        self.make_checksum_file = make_checksum_file;
        self
    }
}

/// Where a localized file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizationResult {
    pub destination: StorageUri,
    /// True when the destination is a rewritten copy of a structured document
    pub rewritten: bool,
}

#[derive(Debug, Clone, Copy)]
struct LocalizeOptions {
    recursive: bool,
    make_checksum_file: bool,
}

/// Copies files onto the storage root of an execution backend.
///
/// Placement is a pure function of the source and the prefix:
/// ```text
/// /somewhere/test.txt        --gcp-->   gs://{gcs_root}/somewhere/test.txt
/// gs://bkt/a/test.txt        --local--> {local_root}/bkt/a/test.txt
/// /somewhere/test.json (*)   --gcp-->   gs://{gcs_root}/somewhere/test.gcs.json
/// ```
/// (*) when deep localization changed at least one embedded path.
pub struct Localizer {
    config: Arc<StorageConfig>,
    stores: StoreRegistry,
}

impl Localizer {
    pub fn new(config: Arc<StorageConfig>, stores: StoreRegistry) -> Self {
        Self { config, stores }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn stores(&self) -> &StoreRegistry {
        &self.stores
    }

    /// Storage prefix for `backend`, or a configuration error if its root was
    /// never configured.
    pub fn resolve_prefix(&self, backend: BackendKind) -> Result<&StorageUri, StorageError> {
        self.config.storage_root(backend).ok_or_else(|| {
            StorageError::Configuration(format!(
                "no {} storage root configured for backend {}",
                backend.storage_kind(),
                backend
            ))
        })
    }

    /// Localize `request.source` onto the storage root of `request.backend`.
    #[instrument(skip(self), level = "debug", fields(source = %request.source, backend = %request.backend))]
    pub async fn localize(
        &self,
        request: &LocalizationRequest,
    ) -> Result<LocalizationResult, StorageError> {
        let prefix = self.resolve_prefix(request.backend)?;
        self.stores.store_for(prefix)?;

        let source = StorageUri::parse(&request.source)?;
        let options = LocalizeOptions {
            recursive: request.recursive,
            make_checksum_file: request.make_checksum_file,
        };

        let result = self.localize_on(source, prefix, options, 0).await?;
        debug!(
            "Localized {} -> {} (rewritten={})",
            request.source, result.destination, result.rewritten
        );
        Ok(result)
    }

    fn localize_on<'a>(
        &'a self,
        source: StorageUri,
        prefix: &'a StorageUri,
        options: LocalizeOptions,
        depth: usize,
    ) -> BoxFuture<'a, Result<LocalizationResult, StorageError>> {
        async move {
            if options.recursive && depth < MAX_RECURSION_DEPTH {
                if let Some(format) = DocumentFormat::from_uri(&source) {
                    if let Some(destination) = self
                        .localize_document(&source, prefix, format, options, depth)
                        .await?
                    {
                        return Ok(LocalizationResult {
                            destination,
                            rewritten: true,
                        });
                    }
                }
            } else if options.recursive {
                debug!("Recursion limit reached at {}, copying as-is", source);
            }

            let destination = self.copy_to_prefix(&source, prefix, options).await?;
            Ok(LocalizationResult {
                destination,
                rewritten: false,
            })
        }
        .boxed()
    }

    /// Localize every path embedded in a structured document and write the
    /// rewritten copy. Returns `None` when nothing in the document changed.
    async fn localize_document(
        &self,
        source: &StorageUri,
        prefix: &StorageUri,
        format: DocumentFormat,
        options: LocalizeOptions,
        depth: usize,
    ) -> Result<Option<StorageUri>, StorageError> {
        let data = self.stores.store_for(source)?.read(source).await?;
        let text = match String::from_utf8(data) {
            Ok(text) => text,
            Err(_) => {
                warn!("{} is not valid UTF-8, skipping deep localization", source);
                return Ok(None);
            }
        };

        let values = match format.collect_values(&text) {
            Ok(values) => values,
            Err(e) => {
                warn!("Failed to parse {}: {}, skipping deep localization", source, e);
                return Ok(None);
            }
        };

        let mut replacements = HashMap::new();
        for value in values {
            let Ok(nested) = StorageUri::parse(&value) else {
                continue;
            };
            if nested == *source || nested.is_bucket_root() {
                continue;
            }
            let Some(store) = self.stores.get(nested.kind()) else {
                debug!("No store for {}, leaving it untouched", nested);
                continue;
            };
            if !store.exists(&nested).await? {
                continue;
            }

            let localized = self.localize_on(nested, prefix, options, depth + 1).await?;
            let localized = localized.destination.to_string();
            if localized != value {
                replacements.insert(value, localized);
            }
        }

        if replacements.is_empty() {
            debug!("No embedded paths changed in {}", source);
            return Ok(None);
        }

        let rewritten = format.rewrite(&text, &replacements)?;
        let destination = prefix
            .join(&source.relative_path())
            .with_tag(prefix.kind().tag());
        let store = self.stores.store_for(&destination)?;
        let digest = md5_hex(rewritten.as_bytes());
        self.write_unless_identical(store, &destination, rewritten.as_bytes(), &digest)
            .await?;
        if options.make_checksum_file {
            self.write_checksum_file(&destination, &digest).await?;
        }

        debug!(
            "Rewrote {} embedded paths of {} into {}",
            replacements.len(),
            source,
            destination
        );
        Ok(Some(destination))
    }

    /// Copy `source` under `prefix` unless it already lives on that kind of
    /// storage.
    async fn copy_to_prefix(
        &self,
        source: &StorageUri,
        prefix: &StorageUri,
        options: LocalizeOptions,
    ) -> Result<StorageUri, StorageError> {
        if source.kind() == prefix.kind() {
            debug!("{} already on {} storage", source, prefix.kind());
            return Ok(source.clone());
        }

        let destination = prefix.join(&source.relative_path());
        let source_store = self.stores.store_for(source)?;
        let destination_store = self.stores.store_for(&destination)?;

        let data = source_store.read(source).await?;
        let digest = md5_hex(&data);
        self.write_unless_identical(destination_store, &destination, &data, &digest)
            .await?;
        if options.make_checksum_file {
            self.write_checksum_file(&destination, &digest).await?;
        }
        Ok(destination)
    }

    async fn write_unless_identical(
        &self,
        store: &Arc<dyn ObjectStore>,
        destination: &StorageUri,
        data: &[u8],
        digest: &str,
    ) -> Result<(), StorageError> {
        if store.md5(destination).await?.as_deref() == Some(digest) {
            debug!("{} is up to date, skipping copy", destination);
            return Ok(());
        }
        store.write(destination, data).await?;
        debug!(
            "Wrote {} bytes to {} via {}",
            data.len(),
            destination,
            store.backend_name()
        );
        Ok(())
    }

    /// Remote stores keep MD5 in object metadata, so sidecars are local-only.
    async fn write_checksum_file(
        &self,
        destination: &StorageUri,
        digest: &str,
    ) -> Result<(), StorageError> {
        if destination.kind() != UriKind::Local {
            return Ok(());
        }
        let sidecar = destination.with_suffix(CHECKSUM_SUFFIX);
        self.stores
            .store_for(&sidecar)?
            .write(&sidecar, digest.as_bytes())
            .await
    }
}

/// Structured documents whose values may reference other files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Json,
    Csv,
    Tsv,
}

impl DocumentFormat {
    fn from_uri(uri: &StorageUri) -> Option<Self> {
        match uri.extension()?.as_str() {
            "json" => Some(DocumentFormat::Json),
            "csv" => Some(DocumentFormat::Csv),
            "tsv" => Some(DocumentFormat::Tsv),
            _ => None,
        }
    }

    fn delimiter(self) -> char {
        match self {
            DocumentFormat::Csv => ',',
            _ => '\t',
        }
    }

    /// Every distinct string value in the document, sorted.
    fn collect_values(self, text: &str) -> Result<Vec<String>, StorageError> {
        let mut values = BTreeSet::new();
        match self {
            DocumentFormat::Json => {
                let doc: Value = serde_json::from_str(text)?;
                collect_json_strings(&doc, &mut values);
            }
            DocumentFormat::Csv | DocumentFormat::Tsv => {
                for line in text.split('\n') {
                    let line = line.strip_suffix('\r').unwrap_or(line);
                    for cell in line.split(self.delimiter()) {
                        if !cell.is_empty() {
                            values.insert(cell.to_string());
                        }
                    }
                }
            }
        }
        Ok(values.into_iter().collect())
    }

    fn rewrite(
        self,
        text: &str,
        replacements: &HashMap<String, String>,
    ) -> Result<String, StorageError> {
        match self {
            DocumentFormat::Json => {
                let mut doc: Value = serde_json::from_str(text)?;
                replace_json_strings(&mut doc, replacements);
                Ok(serde_json::to_string_pretty(&doc)?)
            }
            DocumentFormat::Csv | DocumentFormat::Tsv => {
                let delimiter = self.delimiter().to_string();
                let lines: Vec<String> = text
                    .split('\n')
                    .map(|line| {
                        let (body, cr) = match line.strip_suffix('\r') {
                            Some(body) => (body, "\r"),
                            None => (line, ""),
                        };
                        let cells: Vec<&str> = body
                            .split(self.delimiter())
                            .map(|cell| replacements.get(cell).map(String::as_str).unwrap_or(cell))
                            .collect();
                        format!("{}{}", cells.join(&delimiter), cr)
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
        }
    }
}

fn collect_json_strings(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            out.insert(s.clone());
        }
        Value::Array(items) => items.iter().for_each(|v| collect_json_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_json_strings(v, out)),
        _ => {}
    }
}

fn replace_json_strings(value: &mut Value, replacements: &HashMap<String, String>) {
    match value {
        Value::String(s) => {
            if let Some(new) = replacements.get(s.as_str()) {
                *s = new.clone();
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| replace_json_strings(v, replacements)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| replace_json_strings(v, replacements)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    struct Setup {
        localizer: Localizer,
        store: Arc<MemoryStore>,
    }

    fn uri(s: &str) -> StorageUri {
        StorageUri::parse(s).unwrap()
    }

    fn build(config: StorageConfig) -> Setup {
        let store = Arc::new(MemoryStore::new());
        let stores = StoreRegistry::new()
            .with_store(UriKind::Local, store.clone())
            .with_store(UriKind::Gcs, store.clone())
            .with_store(UriKind::S3, store.clone());
        Setup {
            localizer: Localizer::new(Arc::new(config), stores),
            store,
        }
    }

    #[fixture]
    fn setup() -> Setup {
        build(
            StorageConfig::builder("/cache")
                .gcs_root("gs://cache-bkt/tmp")
                .s3_root("s3://cache-bkt/tmp")
                .without_heartbeat()
                .build()
                .unwrap(),
        )
    }

    fn text(store: &MemoryStore, s: &str) -> String {
        String::from_utf8(store.get(&uri(s)).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_unconfigured_backend_fails_before_transfer() {
        let Setup { localizer, store } = build(
            StorageConfig::builder("/cache")
                .without_heartbeat()
                .build()
                .unwrap(),
        );
        store.insert(uri("/data/in.txt"), "hello");

        for backend in [BackendKind::Gcp, BackendKind::Aws] {
            let err = localizer
                .localize(&LocalizationRequest::new("/data/in.txt", backend))
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::Configuration(_)), "{err}");
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_destination_store_is_configuration_error() {
        let config = StorageConfig::builder("/cache")
            .gcs_root("gs://cache-bkt")
            .without_heartbeat()
            .build()
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let localizer = Localizer::new(
            Arc::new(config),
            StoreRegistry::new().with_store(UriKind::Local, store),
        );

        let err = localizer
            .localize(&LocalizationRequest::new("/data/in.txt", BackendKind::Gcp))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[rstest]
    #[tokio::test]
    async fn test_plain_copy_to_remote(setup: Setup) {
        setup.store.insert(uri("/data/in.txt"), "hello");

        let result = setup
            .localizer
            .localize(&LocalizationRequest::new("/data/in.txt", BackendKind::Gcp))
            .await
            .unwrap();

        assert_eq!(result.destination, uri("gs://cache-bkt/tmp/data/in.txt"));
        assert!(!result.rewritten);
        assert_eq!(text(&setup.store, "gs://cache-bkt/tmp/data/in.txt"), "hello");
    }

    #[rstest]
    #[tokio::test]
    async fn test_remote_to_local_copy(setup: Setup) {
        setup.store.insert(uri("s3://src-bkt/a/b.txt"), "remote");

        let result = setup
            .localizer
            .localize(&LocalizationRequest::new("s3://src-bkt/a/b.txt", BackendKind::Local))
            .await
            .unwrap();

        assert_eq!(result.destination, uri("/cache/src-bkt/a/b.txt"));
        assert_eq!(text(&setup.store, "/cache/src-bkt/a/b.txt"), "remote");
    }

    #[rstest]
    #[tokio::test]
    async fn test_same_storage_kind_is_not_copied(setup: Setup) {
        setup.store.insert(uri("gs://src-bkt/in.txt"), "x");

        let result = setup
            .localizer
            .localize(&LocalizationRequest::new("gs://src-bkt/in.txt", BackendKind::Gcp))
            .await
            .unwrap();

        assert_eq!(result.destination, uri("gs://src-bkt/in.txt"));
        assert_eq!(setup.store.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_unknown_backend_behaves_like_local(setup: Setup) {
        setup.store.insert(uri("gs://src-bkt/in.txt"), "x");

        let explicit = setup
            .localizer
            .localize(&LocalizationRequest::new("gs://src-bkt/in.txt", BackendKind::Local))
            .await
            .unwrap();
        let fallback = setup
            .localizer
            .localize(&LocalizationRequest::new(
                "gs://src-bkt/in.txt",
                BackendKind::from_identifier("slurm"),
            ))
            .await
            .unwrap();

        assert_eq!(explicit, fallback);
        assert_eq!(fallback.destination, uri("/cache/src-bkt/in.txt"));
    }

    #[rstest]
    #[tokio::test]
    async fn test_invalid_source(setup: Setup) {
        let err = setup
            .localizer
            .localize(&LocalizationRequest::new("not/absolute", BackendKind::Local))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidUri(_)));
    }

    #[rstest]
    #[tokio::test]
    async fn test_missing_source_is_not_found(setup: Setup) {
        let err = setup
            .localizer
            .localize(&LocalizationRequest::new("/data/missing.txt", BackendKind::Gcp))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[rstest]
    #[tokio::test]
    async fn test_deep_json_localization(setup: Setup) {
        setup.store.insert(uri("/data/a.txt"), "A");
        setup.store.insert(uri("/data/sub/b.txt"), "B");
        setup.store.insert(
            uri("/somewhere/test.json"),
            r#"{"wf.a": "/data/a.txt", "wf.list": ["/data/sub/b.txt", "/data/none.txt"], "wf.n": 3}"#,
        );

        let result = setup
            .localizer
            .localize(
                &LocalizationRequest::new("/somewhere/test.json", BackendKind::Gcp).recursive(true),
            )
            .await
            .unwrap();

        assert!(result.rewritten);
        assert_eq!(result.destination, uri("gs://cache-bkt/tmp/somewhere/test.gcs.json"));

        let doc: Value =
            serde_json::from_str(&text(&setup.store, "gs://cache-bkt/tmp/somewhere/test.gcs.json"))
                .unwrap();
        assert_eq!(doc["wf.a"], "gs://cache-bkt/tmp/data/a.txt");
        assert_eq!(doc["wf.list"][0], "gs://cache-bkt/tmp/data/sub/b.txt");
        assert_eq!(doc["wf.list"][1], "/data/none.txt");
        assert_eq!(doc["wf.n"], 3);
        assert_eq!(text(&setup.store, "gs://cache-bkt/tmp/data/sub/b.txt"), "B");
    }

    #[rstest]
    #[tokio::test]
    async fn test_recursive_localization_is_idempotent(setup: Setup) {
        setup.store.insert(uri("gs://src-bkt/x.txt"), "X");
        setup.store.insert(
            uri("/data/inputs.json"),
            r#"{"x": "gs://src-bkt/x.txt", "nested": {"y": ["gs://src-bkt/x.txt"]}}"#,
        );
        let request = LocalizationRequest::new("/data/inputs.json", BackendKind::Local)
            .recursive(true)
            .make_checksum_file(true);

        let first = setup.localizer.localize(&request).await.unwrap();
        let first_content = text(&setup.store, "/cache/data/inputs.local.json");
        let objects = setup.store.uris();

        let second = setup.localizer.localize(&request).await.unwrap();
        let second_content = text(&setup.store, "/cache/data/inputs.local.json");

        assert_eq!(first, second);
        assert_eq!(first.destination, uri("/cache/data/inputs.local.json"));
        assert_eq!(first_content, second_content);
        assert_eq!(objects, setup.store.uris());
        assert!(!second_content.contains("inputs.local.local"));
    }

    #[rstest]
    #[tokio::test]
    async fn test_unchanged_document_is_not_rewritten(setup: Setup) {
        setup.store.insert(uri("/data/plain.json"), r#"{"a": "not a path", "b": 1}"#);

        let result = setup
            .localizer
            .localize(&LocalizationRequest::new("/data/plain.json", BackendKind::Aws).recursive(true))
            .await
            .unwrap();

        assert!(!result.rewritten);
        assert_eq!(result.destination, uri("s3://cache-bkt/tmp/data/plain.json"));
        assert_eq!(
            text(&setup.store, "s3://cache-bkt/tmp/data/plain.json"),
            r#"{"a": "not a path", "b": 1}"#
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_non_recursive_leaves_document_alone(setup: Setup) {
        setup.store.insert(uri("/data/a.txt"), "A");
        setup.store.insert(uri("/data/in.json"), r#"{"a": "/data/a.txt"}"#);

        let result = setup
            .localizer
            .localize(&LocalizationRequest::new("/data/in.json", BackendKind::Gcp))
            .await
            .unwrap();

        assert_eq!(result.destination, uri("gs://cache-bkt/tmp/data/in.json"));
        assert!(setup.store.get(&uri("gs://cache-bkt/tmp/data/a.txt")).is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn test_deep_tsv_localization(setup: Setup) {
        setup.store.insert(uri("/data/r1.fastq"), "r1");
        setup.store.insert(uri("/data/r2.fastq"), "r2");
        setup
            .store
            .insert(uri("/data/samples.tsv"), "s1\t/data/r1.fastq\t/data/r2.fastq\ns2\tmissing\n");

        let result = setup
            .localizer
            .localize(&LocalizationRequest::new("/data/samples.tsv", BackendKind::Aws).recursive(true))
            .await
            .unwrap();

        assert_eq!(result.destination, uri("s3://cache-bkt/tmp/data/samples.s3.tsv"));
        assert_eq!(
            text(&setup.store, "s3://cache-bkt/tmp/data/samples.s3.tsv"),
            "s1\ts3://cache-bkt/tmp/data/r1.fastq\ts3://cache-bkt/tmp/data/r2.fastq\ns2\tmissing\n"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_nested_documents_are_localized(setup: Setup) {
        setup.store.insert(uri("/data/leaf.txt"), "leaf");
        setup.store.insert(uri("/data/inner.csv"), "id,/data/leaf.txt");
        setup.store.insert(uri("/data/outer.json"), r#"{"table": "/data/inner.csv"}"#);

        setup
            .localizer
            .localize(&LocalizationRequest::new("/data/outer.json", BackendKind::Gcp).recursive(true))
            .await
            .unwrap();

        let outer: Value =
            serde_json::from_str(&text(&setup.store, "gs://cache-bkt/tmp/data/outer.gcs.json"))
                .unwrap();
        assert_eq!(outer["table"], "gs://cache-bkt/tmp/data/inner.gcs.csv");
        assert_eq!(
            text(&setup.store, "gs://cache-bkt/tmp/data/inner.gcs.csv"),
            "id,gs://cache-bkt/tmp/data/leaf.txt"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_reference_cycle_terminates(setup: Setup) {
        setup.store.insert(uri("/data/a.json"), r#"{"b": "/data/b.json"}"#);
        setup.store.insert(uri("/data/b.json"), r#"{"a": "/data/a.json"}"#);

        let result = setup
            .localizer
            .localize(&LocalizationRequest::new("/data/a.json", BackendKind::Gcp).recursive(true))
            .await
            .unwrap();

        assert!(result.rewritten);
        assert_eq!(result.destination, uri("gs://cache-bkt/tmp/data/a.gcs.json"));
    }

    #[rstest]
    #[tokio::test]
    async fn test_checksum_sidecar_only_on_local(setup: Setup) {
        setup.store.insert(uri("gs://src-bkt/in.txt"), "hello");
        setup.store.insert(uri("/data/in.txt"), "hello");

        setup
            .localizer
            .localize(
                &LocalizationRequest::new("gs://src-bkt/in.txt", BackendKind::Local)
                    .make_checksum_file(true),
            )
            .await
            .unwrap();
        assert_eq!(
            text(&setup.store, "/cache/src-bkt/in.txt.md5"),
            "5d41402abc4b2a76b9719d911017c592"
        );

        setup
            .localizer
            .localize(
                &LocalizationRequest::new("/data/in.txt", BackendKind::Gcp).make_checksum_file(true),
            )
            .await
            .unwrap();
        assert!(setup
            .store
            .get(&uri("gs://cache-bkt/tmp/data/in.txt.md5"))
            .is_none());
    }

    /// Object-only store: like the cloud stores, it rejects bucket roots.
    struct ObjectOnlyStore(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl ObjectStore for ObjectOnlyStore {
        fn backend_name(&self) -> &'static str {
            "object-only"
        }

        async fn exists(&self, uri: &StorageUri) -> Result<bool, StorageError> {
            if uri.is_bucket_root() {
                return Err(StorageError::InvalidUri(format!("object name missing in {}", uri)));
            }
            self.0.exists(uri).await
        }

        async fn read(&self, uri: &StorageUri) -> Result<Vec<u8>, StorageError> {
            self.0.read(uri).await
        }

        async fn write(&self, uri: &StorageUri, data: &[u8]) -> Result<(), StorageError> {
            self.0.write(uri, data).await
        }

        async fn md5(&self, uri: &StorageUri) -> Result<Option<String>, StorageError> {
            self.0.md5(uri).await
        }
    }

    #[tokio::test]
    async fn test_bucket_root_values_are_left_untouched() {
        let store = Arc::new(MemoryStore::new());
        let config = StorageConfig::builder("/cache")
            .gcs_root("gs://cache-bkt/tmp")
            .without_heartbeat()
            .build()
            .unwrap();
        let localizer = Localizer::new(
            Arc::new(config),
            StoreRegistry::new()
                .with_store(UriKind::Local, store.clone())
                .with_store(UriKind::Gcs, Arc::new(ObjectOnlyStore(store.clone()))),
        );
        store.insert(uri("gs://inputs/a.txt"), "A");
        store.insert(
            uri("/data/in.json"),
            r#"{"a": "gs://inputs/a.txt", "out": "gs://my-output-bucket", "out2": "gs://my-output-bucket/"}"#,
        );

        let result = localizer
            .localize(&LocalizationRequest::new("/data/in.json", BackendKind::Local).recursive(true))
            .await
            .unwrap();

        assert_eq!(result.destination, uri("/cache/data/in.local.json"));
        let doc: Value = serde_json::from_str(&text(&store, "/cache/data/in.local.json")).unwrap();
        assert_eq!(doc["a"], "/cache/inputs/a.txt");
        assert_eq!(doc["out"], "gs://my-output-bucket");
        assert_eq!(doc["out2"], "gs://my-output-bucket/");
        assert_eq!(text(&store, "/cache/inputs/a.txt"), "A");
    }

    #[test]
    fn test_csv_rewrite_preserves_layout() {
        let mut replacements = HashMap::new();
        replacements.insert("/a".to_string(), "gs://b/a".to_string());
        let out = DocumentFormat::Csv
            .rewrite("x,/a\r\n/a,y\r\n", &replacements)
            .unwrap();
        assert_eq!(out, "x,gs://b/a\r\ngs://b/a,y\r\n");
    }
}
