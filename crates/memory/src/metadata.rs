/// Transactional metadata store backed by [`redb`].
///
/// Tables:
///
/// | Name                  | Key               | Value                          |
/// |-----------------------|-------------------|--------------------------------|
/// | `personas`            | persona id        | JSON [`Persona`]               |
/// | `memories`            | memory id         | JSON [`MemoryRecord`]          |
/// | `configurations`      | config key        | JSON [`ConfigRow`]             |
/// | `memories_by_persona` | persona id        | newline-separated memory ids   |
/// | `memory_by_vector`    | vector id         | memory id                      |
///
/// Every operation is one write transaction: commit-or-abort, no handle held
/// across awaits.  The two secondary tables stand in for the relational
/// indexes `(persona_id, created_at)` and `(vector_id, entity_id)` of a SQL
/// layout.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use tracing::info;

use crate::schema::{ConfigRow, MemoryRecord, Persona, now_ms};

const PERSONAS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("personas");
const MEMORIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("memories");
const CONFIGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("configurations");
/// Secondary index: persona id → newline-joined memory id list.
const PERSONA_MEMS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("memories_by_persona");
/// Secondary index: vector id → memory id.
const VECTOR_MEM_TABLE: TableDefinition<&str, &str> = TableDefinition::new("memory_by_vector");

/// The metadata operations the pipeline needs.  A trait so tests can inject
/// failing stores and verify the write coordinator's compensation path.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put_persona(&self, persona: Persona) -> Result<()>;
    async fn get_persona(&self, id: &str) -> Result<Option<Persona>>;
    async fn list_personas(&self, limit: usize) -> Result<Vec<Persona>>;
    async fn delete_persona(&self, id: &str) -> Result<bool>;

    async fn insert_memory(&self, record: MemoryRecord) -> Result<()>;
    async fn update_memory(&self, record: MemoryRecord) -> Result<()>;
    async fn get_memory(&self, id: &str) -> Result<Option<MemoryRecord>>;
    async fn memory_by_vector(&self, vector_id: &str) -> Result<Option<MemoryRecord>>;
    async fn list_memories(&self, persona_id: Option<&str>, limit: usize) -> Result<Vec<MemoryRecord>>;
    async fn bump_access(&self, id: &str, now: i64) -> Result<()>;
    async fn delete_memory(&self, id: &str) -> Result<bool>;

    async fn get_config(&self, key: &str) -> Result<Option<ConfigRow>>;
    async fn put_config(&self, key: &str, value: Value, description: &str) -> Result<()>;
}

pub struct RedbMetadataStore {
    db: Database,
    path: PathBuf,
}

impl RedbMetadataStore {
    /// Open or create the store, creating all tables idempotently.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening metadata store at {}", path.display()))?;

        {
            let tx = db.begin_write()?;
            tx.open_table(PERSONAS_TABLE)?;
            tx.open_table(MEMORIES_TABLE)?;
            tx.open_table(CONFIGS_TABLE)?;
            tx.open_table(PERSONA_MEMS_TABLE)?;
            tx.open_table(VECTOR_MEM_TABLE)?;
            tx.commit()?;
        }

        info!(path = %path.display(), "metadata store ready");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_memory(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(MEMORIES_TABLE)?;
        match tbl.get(id)? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
        }
    }

    fn persona_memory_ids(&self, persona_id: &str) -> Result<Vec<String>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(PERSONA_MEMS_TABLE)?;
        let list = tbl
            .get(persona_id)?
            .map(|v| v.value().to_string())
            .unwrap_or_default();
        Ok(list.lines().filter(|s| !s.is_empty()).map(String::from).collect())
    }
}

#[async_trait]
impl MetadataStore for RedbMetadataStore {
    async fn put_persona(&self, persona: Persona) -> Result<()> {
        let bytes = serde_json::to_vec(&persona)?;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(PERSONAS_TABLE)?;
            tbl.insert(persona.id.as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_persona(&self, id: &str) -> Result<Option<Persona>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(PERSONAS_TABLE)?;
        match tbl.get(id)? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
        }
    }

    async fn list_personas(&self, limit: usize) -> Result<Vec<Persona>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(PERSONAS_TABLE)?;
        let mut personas = Vec::new();
        for entry in tbl.iter()? {
            let (_, raw) = entry?;
            personas.push(serde_json::from_slice::<Persona>(raw.value())?);
        }
        personas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        personas.truncate(limit);
        Ok(personas)
    }

    async fn delete_persona(&self, id: &str) -> Result<bool> {
        let tx = self.db.begin_write()?;
        let existed;
        {
            let mut tbl = tx.open_table(PERSONAS_TABLE)?;
            existed = tbl.remove(id)?.is_some();
            let mut index = tx.open_table(PERSONA_MEMS_TABLE)?;
            index.remove(id)?;
        }
        tx.commit()?;
        Ok(existed)
    }

    async fn insert_memory(&self, record: MemoryRecord) -> Result<()> {
        let bytes = serde_json::to_vec(&record)?;
        let tx = self.db.begin_write()?;
        {
            // One vector record per memory: a second memory claiming the same
            // vector id would break the 1:1 invariant.
            let mut vec_index = tx.open_table(VECTOR_MEM_TABLE)?;
            if let Some(owner) = vec_index.get(record.vector_id.as_str())? {
                if owner.value() != record.id {
                    bail!(
                        "vector id {} already owned by memory {}",
                        record.vector_id,
                        owner.value()
                    );
                }
            }
            vec_index.insert(record.vector_id.as_str(), record.id.as_str())?;

            let mut tbl = tx.open_table(MEMORIES_TABLE)?;
            tbl.insert(record.id.as_str(), bytes.as_slice())?;

            let mut index = tx.open_table(PERSONA_MEMS_TABLE)?;
            let existing = index
                .get(record.persona_id.as_str())?
                .map(|v| v.value().to_string())
                .unwrap_or_default();
            let already_listed = existing.lines().any(|line| line == record.id);
            if !already_listed {
                let updated = if existing.is_empty() {
                    record.id.clone()
                } else {
                    format!("{existing}\n{}", record.id)
                };
                index.insert(record.persona_id.as_str(), updated.as_str())?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn update_memory(&self, record: MemoryRecord) -> Result<()> {
        let bytes = serde_json::to_vec(&record)?;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(MEMORIES_TABLE)?;
            if tbl.get(record.id.as_str())?.is_none() {
                bail!("memory {} not found", record.id);
            }
            tbl.insert(record.id.as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_memory(&self, id: &str) -> Result<Option<MemoryRecord>> {
        self.read_memory(id)
    }

    async fn memory_by_vector(&self, vector_id: &str) -> Result<Option<MemoryRecord>> {
        let memory_id = {
            let tx = self.db.begin_read()?;
            let tbl = tx.open_table(VECTOR_MEM_TABLE)?;
            tbl.get(vector_id)?.map(|v| v.value().to_string())
        };
        match memory_id {
            None => Ok(None),
            Some(id) => self.read_memory(&id),
        }
    }

    async fn list_memories(&self, persona_id: Option<&str>, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut records = match persona_id {
            Some(persona) => {
                let mut out = Vec::new();
                for id in self.persona_memory_ids(persona)? {
                    if let Some(record) = self.read_memory(&id)? {
                        out.push(record);
                    }
                }
                out
            }
            None => {
                let tx = self.db.begin_read()?;
                let tbl = tx.open_table(MEMORIES_TABLE)?;
                let mut out = Vec::new();
                for entry in tbl.iter()? {
                    let (_, raw) = entry?;
                    out.push(serde_json::from_slice::<MemoryRecord>(raw.value())?);
                }
                out
            }
        };
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn bump_access(&self, id: &str, now: i64) -> Result<()> {
        let Some(mut record) = self.read_memory(id)? else {
            bail!("memory {id} not found");
        };
        record.last_accessed_at = now;
        record.access_count += 1;
        self.update_memory(record).await
    }

    async fn delete_memory(&self, id: &str) -> Result<bool> {
        let Some(record) = self.read_memory(id)? else {
            return Ok(false);
        };

        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(MEMORIES_TABLE)?;
            tbl.remove(id)?;

            let mut vec_index = tx.open_table(VECTOR_MEM_TABLE)?;
            vec_index.remove(record.vector_id.as_str())?;

            let mut index = tx.open_table(PERSONA_MEMS_TABLE)?;
            let remaining = index
                .get(record.persona_id.as_str())?
                .map(|v| v.value().to_string())
                .unwrap_or_default()
                .lines()
                .filter(|line| !line.is_empty() && *line != id)
                .collect::<Vec<_>>()
                .join("\n");
            if remaining.is_empty() {
                index.remove(record.persona_id.as_str())?;
            } else {
                index.insert(record.persona_id.as_str(), remaining.as_str())?;
            }
        }
        tx.commit()?;
        Ok(true)
    }

    async fn get_config(&self, key: &str) -> Result<Option<ConfigRow>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(CONFIGS_TABLE)?;
        match tbl.get(key)? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
        }
    }

    async fn put_config(&self, key: &str, value: Value, description: &str) -> Result<()> {
        let now = now_ms();
        let created_at = self
            .get_config(key)
            .await?
            .map(|row| row.created_at)
            .unwrap_or(now);
        let row = ConfigRow {
            key: key.to_string(),
            value,
            description: description.to_string(),
            created_at,
            updated_at: now,
        };
        let bytes = serde_json::to_vec(&row)?;

        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(CONFIGS_TABLE)?;
            tbl.insert(key, bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
