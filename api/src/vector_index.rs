//! Vector Index (4.D): text→embedding→ANN store keyed by record UUID,
//! backed by ChromaDB (adapted from the teacher's Discord memory tool
//! client). Training/quantization is owned by the ChromaDB server, so
//! unlike a local ANN index there's no explicit "lazy training" step on
//! our side; `save`/`load` are kept as explicit calls per the component
//! contract but are no-ops here since every `add_text` already persists
//! synchronously server-side (see DESIGN.md for the open-question
//! resolution).

use std::sync::Arc;

use chromadb::client::{ChromaAuthMethod, ChromaClient, ChromaClientOptions, ChromaTokenHeader};
use chromadb::collection::{CollectionEntries, QueryOptions};
use chromadb::ChromaCollection;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;

const CHUNK_MIN_TOKENS: usize = 512;
const CHUNK_MAX_TOKENS: usize = 768;
const MAX_CHUNKS_PER_ITEM: usize = 64;

#[derive(Debug, thiserror::Error)]
#[error("vector index error: {0}")]
pub struct VectorIndexError(String);

pub struct VectorIndex {
    client: ChromaClient,
    embedding_model: Mutex<TextEmbedding>,
    collection_name: String,
}

impl VectorIndex {
    pub async fn new(config: &Config) -> Result<Self, VectorIndexError> {
        let client_options = ChromaClientOptions {
            url: Some(config.chroma_url.clone()),
            database: config.chroma_database.clone(),
            auth: match &config.chroma_token {
                Some(token) => ChromaAuthMethod::TokenAuth {
                    token: token.clone(),
                    header: ChromaTokenHeader::XChromaToken,
                },
                None => ChromaAuthMethod::None,
            },
        };

        let client = ChromaClient::new(client_options)
            .await
            .map_err(|e| VectorIndexError(format!("failed to create ChromaDB client: {e}")))?;

        tracing::info!("initializing FastEmbed model (may download weights on first run)");
        let embedding_model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML12V2)
                .with_cache_dir(config.fastembed_cache_dir.clone().into()),
        )
        .map_err(|e| VectorIndexError(format!("failed to initialize embedding model: {e}")))?;

        Ok(VectorIndex {
            client,
            embedding_model: Mutex::new(embedding_model),
            collection_name: config.chroma_collection.clone(),
        })
    }

    async fn collection(&self) -> Result<ChromaCollection, VectorIndexError> {
        self.client
            .get_or_create_collection(&self.collection_name, None)
            .await
            .map_err(|e| VectorIndexError(format!("failed to get or create collection: {e}")))
    }

    fn chunk(text: &str) -> Vec<String> {
        use text_splitter::{ChunkConfig, MarkdownSplitter};

        let splitter = MarkdownSplitter::new(ChunkConfig::new(CHUNK_MIN_TOKENS..CHUNK_MAX_TOKENS));
        splitter
            .chunks(text)
            .take(MAX_CHUNKS_PER_ITEM)
            .map(str::to_string)
            .collect()
    }

    /// Splits `text` into chunks, embeds each, and upserts them keyed as
    /// `"{uuid}#{chunk index}"` carrying `record_uuid` metadata so that
    /// `search` can de-duplicate by the originating record.
    pub async fn add_text(self: &Arc<Self>, uuid: Uuid, text: &str) -> Result<(), VectorIndexError> {
        let chunks = Self::chunk(text);
        if chunks.is_empty() {
            return Ok(());
        }

        let this = Arc::clone(self);
        let chunks_for_embed = chunks.clone();
        let embeddings = tokio::task::spawn_blocking(move || {
            let model = this.embedding_model.blocking_lock();
            model.embed(chunks_for_embed, None)
        })
        .await
        .map_err(|e| VectorIndexError(format!("embedding task panicked: {e}")))?
        .map_err(|e| VectorIndexError(format!("failed to generate embeddings: {e}")))?;

        let collection = self.collection().await?;

        let ids: Vec<String> = (0..chunks.len())
            .map(|i| format!("{uuid}#{i}"))
            .collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let doc_refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let metadatas: Vec<serde_json::Map<String, serde_json::Value>> = (0..chunks.len())
            .map(|_| {
                let mut m = serde_json::Map::new();
                m.insert(
                    "record_uuid".to_string(),
                    serde_json::Value::String(uuid.to_string()),
                );
                m
            })
            .collect();

        let entries = CollectionEntries {
            ids: id_refs,
            embeddings: Some(embeddings),
            metadatas: Some(metadatas),
            documents: Some(doc_refs),
        };

        collection
            .upsert(entries, None)
            .await
            .map_err(|e| VectorIndexError(format!("failed to upsert chunks: {e}")))?;

        Ok(())
    }

    /// Embeds `text`, queries for `top_n * 4` nearest chunks (to absorb
    /// multiple chunks per record), de-duplicates by UUID keeping the best
    /// score, and returns at most `top_n` results at or above `threshold`.
    pub async fn search(
        &self,
        text: &str,
        top_n: usize,
        threshold: f32,
    ) -> Result<Vec<(Uuid, f32)>, VectorIndexError> {
        let collection = match self.client.get_collection(&self.collection_name).await {
            Ok(c) => c,
            Err(_) => return Ok(vec![]),
        };

        let embedding = {
            let model = self.embedding_model.lock().await;
            model
                .embed(vec![text.to_string()], None)
                .map_err(|e| VectorIndexError(format!("failed to embed query: {e}")))?
                .into_iter()
                .next()
                .ok_or_else(|| VectorIndexError("no query embedding generated".into()))?
        };

        let query_options = QueryOptions {
            query_texts: None,
            query_embeddings: Some(vec![embedding]),
            where_metadata: None,
            where_document: None,
            n_results: Some((top_n * 4).max(top_n)),
            include: Some(vec!["metadatas", "distances"]),
        };

        let mut result = collection
            .query(query_options, None)
            .await
            .map_err(|e| VectorIndexError(format!("failed to query collection: {e}")))?;

        let Some(distances) = result.distances.take().and_then(|mut v| v.pop()) else {
            return Ok(vec![]);
        };
        let metadatas = result
            .metadatas
            .take()
            .and_then(|mut v| v.pop())
            .unwrap_or_default();

        let mut best: std::collections::HashMap<Uuid, f32> = std::collections::HashMap::new();
        for (distance, metadata) in distances.into_iter().zip(metadatas.into_iter()) {
            let Some(record_uuid) = metadata
                .as_ref()
                .and_then(|m| m.get("record_uuid"))
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            let score = 1.0 - distance.clamp(0.0, 1.0);
            best.entry(record_uuid)
                .and_modify(|s| *s = s.max(score))
                .or_insert(score);
        }

        let mut results: Vec<(Uuid, f32)> = best
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_n);
        Ok(results)
    }

    pub async fn delete(&self, uuid: Uuid) -> Result<(), VectorIndexError> {
        let collection = match self.client.get_collection(&self.collection_name).await {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let where_metadata = serde_json::json!({ "record_uuid": uuid.to_string() });
        collection
            .delete(None, Some(where_metadata), None)
            .await
            .map_err(|e| VectorIndexError(format!("failed to delete record: {e}")))?;
        Ok(())
    }

    /// No-op: every `add_text` call already persists synchronously via the
    /// ChromaDB upsert RPC. Kept so call sites can express "persist now"
    /// intent without caring which store backs the index.
    pub fn save(&self) {}

    /// No-op for the same reason as `save`: there is no process-local
    /// index state to rehydrate, ChromaDB is the source of truth.
    pub fn load(&self) {}
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chunking_short_text_yields_a_single_chunk() {
        let chunks = VectorIndex::chunk("a short event brief with little content");
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn chunking_never_exceeds_the_configured_cap() {
        let long_text = "word ".repeat(50_000);
        let chunks = VectorIndex::chunk(&long_text);
        assert!(chunks.len() <= MAX_CHUNKS_PER_ITEM);
    }
}
