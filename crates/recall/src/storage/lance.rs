use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::index::Index;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RecallError, Result};
use crate::memory::graph::NeighborSource;
use crate::memory::types::{Link, LinkType, MemoryCategory, MemoryItem};
use crate::storage::filter::{MemoryFilter, escape_sql, keywords};
use crate::storage::records::RecordTable;

pub const MEMORIES_TABLE: &str = "memories";
pub const LINKS_TABLE: &str = "links";
pub const TASKS_TABLE: &str = "tasks";
pub const STAGED_FACTS_TABLE: &str = "staged_facts";
pub const QUESTIONS_TABLE: &str = "questions";

/// Rows scanned per requested result when falling back to keyword search
const KEYWORD_SCAN_FACTOR: usize = 10;
/// Ids per `IN (...)` clause for batch lookups
const ID_LOOKUP_CHUNK: usize = 100;

/// How a search was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Nearest-neighbour vector search
    Vector,
    /// Degraded substring match over the same filters
    Keyword,
}

/// Ranked search results plus the mode that produced them
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub memories: Vec<MemoryItem>,
    pub mode: SearchMode,
}

impl SearchResults {
    pub fn is_degraded(&self) -> bool {
        self.mode == SearchMode::Keyword
    }
}

/// LanceDB-backed store for memories, links, and the keyed record tables
/// used by the task queue and the consolidation pipeline.
pub struct LanceStore {
    connection: Connection,
    memories: Table,
    links: Table,
    tasks: RecordTable,
    staged_facts: RecordTable,
    questions: RecordTable,
    dimensions: usize,
}

impl LanceStore {
    /// Open the store at `path`, creating any missing tables.
    pub async fn open(path: &Path, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RecallError::Config(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        let uri = path
            .to_str()
            .ok_or_else(|| RecallError::Storage("Invalid path encoding".to_string()))?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to connect to LanceDB: {e}")))?;

        let memories_schema = Self::memories_schema(dimensions)?;
        let memories = open_or_create(
            &connection,
            MEMORIES_TABLE,
            Self::memories_to_batch(&[], memories_schema.clone(), dimensions)?,
            memories_schema,
        )
        .await?;

        let links_schema = Self::links_schema();
        let links = open_or_create(
            &connection,
            LINKS_TABLE,
            Self::links_to_batch(&[], links_schema.clone())?,
            links_schema,
        )
        .await?;

        let tasks = RecordTable::open(&connection, TASKS_TABLE).await?;
        let staged_facts = RecordTable::open(&connection, STAGED_FACTS_TABLE).await?;
        let questions = RecordTable::open(&connection, QUESTIONS_TABLE).await?;

        Ok(Self {
            connection,
            memories,
            links,
            tasks,
            staged_facts,
            questions,
            dimensions,
        })
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        table_exists(&self.connection, name).await
    }

    /// Fixed embedding dimension of this deployment
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Durable task records
    pub fn tasks(&self) -> &RecordTable {
        &self.tasks
    }

    /// Facts waiting for the quality gate
    pub fn staged_facts(&self) -> &RecordTable {
        &self.staged_facts
    }

    /// Open and resolved questions
    pub fn questions(&self) -> &RecordTable {
        &self.questions
    }

    fn memories_schema(dimensions: usize) -> Result<SchemaRef> {
        let dims = i32::try_from(dimensions)
            .map_err(|_| RecallError::Config(format!("embedding dimension {dimensions} too large")))?;

        Ok(Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("owner_id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dims,
                ),
                false,
            ),
            Field::new("embedding_model", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("importance", DataType::Float32, false),
            Field::new("emotion_valence", DataType::Float32, true),
            Field::new("emotion_intensity", DataType::Float32, true),
            Field::new(
                "created_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("tags", DataType::Utf8, false),
            Field::new("linked_ids", DataType::Utf8, false),
        ])))
    }

    fn links_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("from_id", DataType::Utf8, false),
            Field::new("to_id", DataType::Utf8, false),
            Field::new("link_type", DataType::Utf8, false),
            Field::new(
                "created_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
        ]))
    }

    /// Build an IVF-PQ index once the table is large enough to train one
    pub async fn create_vector_index(&self) -> Result<()> {
        let row_count = self
            .memories
            .count_rows(None)
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to count rows: {e}")))?;

        // IVF-PQ requires at least 256 rows for training
        if row_count < 256 {
            return Ok(());
        }

        let ivf_pq = IvfPqIndexBuilder::default()
            .num_partitions(256)
            .num_sub_vectors(16);

        self.memories
            .create_index(&["embedding"], Index::IvfPq(ivf_pq))
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to create vector index: {e}")))?;

        Ok(())
    }

    /// Convert memories to an Arrow RecordBatch
    fn memories_to_batch(
        memories: &[MemoryItem],
        schema: SchemaRef,
        dimensions: usize,
    ) -> Result<RecordBatch> {
        let dims = i32::try_from(dimensions)
            .map_err(|_| RecallError::Config(format!("embedding dimension {dimensions} too large")))?;

        let ids: Vec<String> = memories.iter().map(|m| m.id.to_string()).collect();
        let owners: Vec<&str> = memories.iter().map(|m| m.owner_id.as_str()).collect();
        let contents: Vec<&str> = memories.iter().map(|m| m.content.as_str()).collect();
        let embeddings: Vec<Option<Vec<Option<f32>>>> = memories
            .iter()
            .map(|m| Some(m.embedding.iter().map(|&v| Some(v)).collect()))
            .collect();
        let models: Vec<&str> = memories.iter().map(|m| m.embedding_model.as_str()).collect();
        let categories: Vec<&str> = memories.iter().map(|m| m.category.as_str()).collect();
        let importances: Vec<f32> = memories.iter().map(|m| m.importance).collect();
        let valences: Vec<Option<f32>> = memories.iter().map(|m| m.emotion_valence).collect();
        let intensities: Vec<Option<f32>> = memories.iter().map(|m| m.emotion_intensity).collect();
        let created_at: Vec<i64> = memories
            .iter()
            .map(|m| m.created_at.timestamp_micros())
            .collect();
        let tags = memories
            .iter()
            .map(|m| serde_json::to_string(&m.tags))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let linked = memories
            .iter()
            .map(|m| serde_json::to_string(&m.linked_ids))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(owners)),
            Arc::new(StringArray::from(contents)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<
                arrow_array::types::Float32Type,
                _,
                _,
            >(embeddings, dims)),
            Arc::new(StringArray::from(models)),
            Arc::new(StringArray::from(categories)),
            Arc::new(Float32Array::from(importances)),
            Arc::new(Float32Array::from(valences)),
            Arc::new(Float32Array::from(intensities)),
            Arc::new(TimestampMicrosecondArray::from(created_at).with_timezone("UTC")),
            Arc::new(StringArray::from(tags)),
            Arc::new(StringArray::from(linked)),
        ];

        RecordBatch::try_new(schema, columns)
            .map_err(|e| RecallError::Storage(format!("Failed to create RecordBatch: {e}")))
    }

    /// Convert an Arrow RecordBatch row back to a MemoryItem
    fn batch_to_memory(batch: &RecordBatch, row: usize) -> Result<MemoryItem> {
        let id = parse_uuid(string_column(batch, "id")?.value(row))?;
        let owner_id = string_column(batch, "owner_id")?.value(row).to_string();
        let content = string_column(batch, "content")?.value(row).to_string();

        let embedding_array = column::<FixedSizeListArray>(batch, "embedding")?;
        let embedding_list = embedding_array.value(row);
        let embedding_values = embedding_list
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| RecallError::Storage("Failed to get embedding values".to_string()))?;
        let embedding: Vec<f32> = embedding_values.values().to_vec();

        let embedding_model = string_column(batch, "embedding_model")?.value(row).to_string();

        let category_str = string_column(batch, "category")?.value(row);
        let category = MemoryCategory::parse(category_str).ok_or_else(|| {
            RecallError::Storage(format!("Unknown memory category: {category_str}"))
        })?;

        let importance = column::<Float32Array>(batch, "importance")?.value(row);
        let emotion_valence = optional_f32(column::<Float32Array>(batch, "emotion_valence")?, row);
        let emotion_intensity =
            optional_f32(column::<Float32Array>(batch, "emotion_intensity")?, row);

        let created_at = parse_timestamp(
            column::<TimestampMicrosecondArray>(batch, "created_at")?.value(row),
        )?;

        let tags: BTreeSet<String> =
            serde_json::from_str(string_column(batch, "tags")?.value(row))?;
        let linked_ids: BTreeSet<Uuid> =
            serde_json::from_str(string_column(batch, "linked_ids")?.value(row))?;

        Ok(MemoryItem {
            id,
            owner_id,
            content,
            embedding,
            embedding_model,
            category,
            importance,
            emotion_valence,
            emotion_intensity,
            created_at,
            tags,
            linked_ids,
        })
    }

    fn links_to_batch(links: &[Link], schema: SchemaRef) -> Result<RecordBatch> {
        let from_ids: Vec<String> = links.iter().map(|l| l.from_id.to_string()).collect();
        let to_ids: Vec<String> = links.iter().map(|l| l.to_id.to_string()).collect();
        let types: Vec<&str> = links.iter().map(|l| l.link_type.as_str()).collect();
        let created_at: Vec<i64> = links
            .iter()
            .map(|l| l.created_at.timestamp_micros())
            .collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(from_ids)),
                Arc::new(StringArray::from(to_ids)),
                Arc::new(StringArray::from(types)),
                Arc::new(TimestampMicrosecondArray::from(created_at).with_timezone("UTC")),
            ],
        )
        .map_err(|e| RecallError::Storage(format!("Failed to create link RecordBatch: {e}")))
    }

    fn batch_to_link(batch: &RecordBatch, row: usize) -> Result<Link> {
        Ok(Link {
            from_id: parse_uuid(string_column(batch, "from_id")?.value(row))?,
            to_id: parse_uuid(string_column(batch, "to_id")?.value(row))?,
            link_type: LinkType::parse(string_column(batch, "link_type")?.value(row)),
            created_at: parse_timestamp(
                column::<TimestampMicrosecondArray>(batch, "created_at")?.value(row),
            )?,
        })
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(RecallError::EmbeddingMismatch(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(())
    }

    /// Insert a single memory, returning its id
    pub async fn insert(&self, memory: &MemoryItem) -> Result<Uuid> {
        self.insert_batch(std::slice::from_ref(memory)).await?;
        Ok(memory.id)
    }

    /// Insert multiple memories in one write
    pub async fn insert_batch(&self, memories: &[MemoryItem]) -> Result<()> {
        if memories.is_empty() {
            return Ok(());
        }
        for memory in memories {
            self.check_dimensions(&memory.embedding)?;
        }

        let schema = Self::memories_schema(self.dimensions)?;
        let batch = Self::memories_to_batch(memories, schema.clone(), self.dimensions)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.memories
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to insert memories: {e}")))?;

        Ok(())
    }

    /// Get a memory by id
    pub async fn get(&self, id: Uuid) -> Result<Option<MemoryItem>> {
        let mut found = self.query_memories(format!("id = '{id}'"), Some(1)).await?;
        Ok(found.pop())
    }

    /// Batch point lookup. Missing ids are silently omitted and the order
    /// of the result is unspecified.
    pub async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<MemoryItem>> {
        let mut memories = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let in_clause = chunk
                .iter()
                .map(|id| format!("'{id}'"))
                .collect::<Vec<_>>()
                .join(", ");
            memories.extend(
                self.query_memories(format!("id IN ({in_clause})"), None)
                    .await?,
            );
        }
        Ok(memories)
    }

    /// Delete a memory and every link touching it.
    /// Returns true if a memory was deleted, false if not found
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let exists = self.get(id).await?.is_some();

        if exists {
            self.memories
                .delete(&format!("id = '{id}'"))
                .await
                .map_err(|e| RecallError::Storage(format!("Failed to delete memory: {e}")))?;
            self.links
                .delete(&format!("from_id = '{id}' OR to_id = '{id}'"))
                .await
                .map_err(|e| RecallError::Storage(format!("Failed to delete links: {e}")))?;
        }

        Ok(exists)
    }

    /// Number of memories, optionally for a single owner
    pub async fn count(&self, owner_id: Option<&str>) -> Result<usize> {
        let filter = owner_id.map(|o| format!("owner_id = '{}'", escape_sql(o)));
        self.memories
            .count_rows(filter)
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to count memories: {e}")))
    }

    /// Similarity search under `filter`.
    ///
    /// With no embedding, or when the vector query fails, this degrades to a
    /// keyword match over the same filter and reports `SearchMode::Keyword`.
    pub async fn search(
        &self,
        query_text: &str,
        embedding: Option<&[f32]>,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<SearchResults> {
        if limit == 0 {
            return Ok(SearchResults {
                memories: Vec::new(),
                mode: SearchMode::Vector,
            });
        }

        if let Some(embedding) = embedding {
            self.check_dimensions(embedding)?;
            match self.vector_search(embedding, filter, limit).await {
                Ok(memories) => {
                    return Ok(SearchResults {
                        memories,
                        mode: SearchMode::Vector,
                    });
                }
                Err(e) => warn!("Vector search failed, falling back to keyword search: {e}"),
            }
        }

        let memories = self.keyword_search(query_text, filter, limit).await?;
        Ok(SearchResults {
            memories,
            mode: SearchMode::Keyword,
        })
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        let mut query = self
            .memories
            .query()
            .nearest_to(embedding)
            .map_err(|e| RecallError::Storage(format!("Failed to create vector query: {e}")))?
            .limit(limit);

        if let Some(sql_filter) = filter.to_sql_clause() {
            query = query.only_if(sql_filter);
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to execute search: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to collect search results: {e}")))?;

        batches_to_memories(&batches)
    }

    /// Substring search over content, ranked by matched keyword count,
    /// then importance, then recency.
    pub async fn keyword_search(
        &self,
        query_text: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        let words = keywords(query_text);
        let scan_limit = limit.saturating_mul(KEYWORD_SCAN_FACTOR).max(limit);

        let mut query = self.memories.query().limit(scan_limit);
        if let Some(clause) = filter.to_keyword_clause(&words) {
            query = query.only_if(clause);
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to execute keyword search: {e}")))?;

        let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(|e| {
            RecallError::Storage(format!("Failed to collect keyword results: {e}"))
        })?;

        let mut scored: Vec<(usize, MemoryItem)> = batches_to_memories(&batches)?
            .into_iter()
            .map(|m| {
                let lower = m.content.to_lowercase();
                let hits = words.iter().filter(|w| lower.contains(w.as_str())).count();
                (hits, m)
            })
            .collect();

        scored.sort_by(|(hits_a, a), (hits_b, b)| {
            hits_b
                .cmp(hits_a)
                .then_with(|| b.importance.total_cmp(&a.importance))
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        debug!(
            "Keyword search matched {} rows for {} keywords",
            scored.len(),
            words.len()
        );

        Ok(scored.into_iter().take(limit).map(|(_, m)| m).collect())
    }

    /// Memories for `owner_id` carrying `tag`, optionally restricted to a category
    pub async fn find_by_tag(
        &self,
        owner_id: &str,
        tag: &str,
        category: Option<MemoryCategory>,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        let token = serde_json::to_string(tag)?;
        let mut clause = format!(
            "owner_id = '{}' AND tags LIKE '%{}%'",
            escape_sql(owner_id),
            escape_sql(&token)
        );
        if let Some(category) = category {
            clause.push_str(&format!(" AND category = '{}'", category.as_str()));
        }

        let memories = self.query_memories(clause, None).await?;
        Ok(memories
            .into_iter()
            .filter(|m| m.tags.contains(tag))
            .take(limit)
            .collect())
    }

    /// Persist a link and refresh the source memory's `linked_ids` cache
    pub async fn insert_link(&self, link: &Link) -> Result<()> {
        if link.is_self_loop() {
            return Err(RecallError::Memory(format!(
                "Refusing self-loop link on {}",
                link.from_id
            )));
        }

        let schema = Self::links_schema();
        let batch = Self::links_to_batch(std::slice::from_ref(link), schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.links
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to insert link: {e}")))?;

        if let Some(mut source) = self.get(link.from_id).await? {
            if source.linked_ids.insert(link.to_id) {
                self.update_linked_ids(source.id, &source.linked_ids).await?;
            }
        }

        Ok(())
    }

    /// Overwrite the denormalized `linked_ids` column
    pub async fn update_linked_ids(&self, id: Uuid, linked_ids: &BTreeSet<Uuid>) -> Result<()> {
        let json = serde_json::to_string(linked_ids)?;

        self.memories
            .update()
            .only_if(format!("id = '{id}'"))
            .column("linked_ids", format!("'{}'", escape_sql(&json)))
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to update linked ids: {e}")))?;

        Ok(())
    }

    /// Every link with `id` as either endpoint
    pub async fn neighbors(&self, id: Uuid) -> Result<Vec<Link>> {
        let stream = self
            .links
            .query()
            .only_if(format!("from_id = '{id}' OR to_id = '{id}'"))
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to query links: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to collect links: {e}")))?;

        let mut links = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                links.push(Self::batch_to_link(batch, row)?);
            }
        }
        Ok(links)
    }

    async fn query_memories(&self, clause: String, limit: Option<usize>) -> Result<Vec<MemoryItem>> {
        let mut query = self.memories.query().only_if(clause);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to query memories: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to collect query results: {e}")))?;

        batches_to_memories(&batches)
    }
}

#[async_trait]
impl NeighborSource for LanceStore {
    async fn neighbors(&self, id: Uuid) -> Result<Vec<Link>> {
        LanceStore::neighbors(self, id).await
    }
}

pub(crate) async fn table_exists(connection: &Connection, name: &str) -> Result<bool> {
    let names = connection
        .table_names()
        .execute()
        .await
        .map_err(|e| RecallError::Storage(format!("Failed to list tables: {e}")))?;

    Ok(names.iter().any(|n| n == name))
}

pub(crate) async fn open_or_create(
    connection: &Connection,
    name: &str,
    empty: RecordBatch,
    schema: SchemaRef,
) -> Result<Table> {
    if table_exists(connection, name).await? {
        debug!("Opening existing {name} table");
        return connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to open {name} table: {e}")));
    }

    debug!("Creating {name} table");
    let batches = RecordBatchIterator::new(vec![Ok(empty)], schema);
    connection
        .create_table(name, Box::new(batches))
        .execute()
        .await
        .map_err(|e| RecallError::Storage(format!("Failed to create {name} table: {e}")))
}

fn batches_to_memories(batches: &[RecordBatch]) -> Result<Vec<MemoryItem>> {
    let mut memories = Vec::new();
    for batch in batches {
        for row in 0..batch.num_rows() {
            memories.push(LanceStore::batch_to_memory(batch, row)?);
        }
    }
    Ok(memories)
}

pub(crate) fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| RecallError::Storage(format!("Failed to get {name} column")))
}

pub(crate) fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    column::<StringArray>(batch, name)
}

fn optional_f32(array: &Float32Array, row: usize) -> Option<f32> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row))
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| RecallError::Storage(format!("Failed to parse UUID: {e}")))
}

pub(crate) fn parse_timestamp(micros: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| RecallError::Storage(format!("Failed to parse timestamp {micros}")))
}
