/// Embedded graph store: entity/concept/user nodes and their relations,
/// persona-scoped, persisted through redb.
///
/// Node tables are keyed by `persona_id`/`name` composite keys, so queries
/// are structured lookups rather than composed query strings — there is
/// nothing to inject into.  Length and character validation still happens at
/// this boundary so garbage from the extraction LM never lands in the store.
///
/// All writes are upserts with create-only field semantics: re-creating an
/// existing node or relation is indistinguishable from having created it
/// once.  Nothing here deletes — graph knowledge is long-lived and survives
/// persona cascades.
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::schema::{GraphEdge, GraphNode, Neighborhood, now_ms};

const ENTITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("node_entity");
const CONCEPT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("node_concept");
const USER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("node_user");
const RELATED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("rel_related_to");
const BELONGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("rel_belongs_to");
const MENTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("rel_mentions");

pub const RELATED_TO: &str = "RELATED_TO";
pub const BELONGS_TO: &str = "BELONGS_TO";
pub const MENTIONS: &str = "MENTIONS";

const MAX_NAME_LEN: usize = 100;
const MAX_TYPE_LEN: usize = 50;
const MAX_DESCRIPTION_LEN: usize = 1000;
const MAX_DEPTH: usize = 5;

/// Separator inside composite keys.  Rejected by [`validate_name`], so keys
/// cannot collide across personas or entity names.
const KEY_SEP: char = '\u{1f}';

/// Upsert and k-hop query operations over a persona's knowledge graph.
#[async_trait]
pub trait GraphIndex: Send + Sync {
    async fn upsert_entity(
        &self,
        persona_id: &str,
        name: &str,
        entity_type: &str,
        description: Option<&str>,
    ) -> Result<()>;
    async fn upsert_concept(&self, persona_id: &str, name: &str, description: Option<&str>) -> Result<()>;
    async fn upsert_user(&self, persona_id: &str, user_id: &str, name: &str) -> Result<()>;
    /// Unknown `kind` values downgrade to `RELATED_TO` with a warning.
    async fn upsert_relation(
        &self,
        persona_id: &str,
        from: &str,
        to: &str,
        kind: &str,
        weight: Option<f64>,
    ) -> Result<()>;
    async fn upsert_mention(&self, persona_id: &str, user_id: &str, entity: &str) -> Result<()>;
    /// BFS neighborhood of `entity` up to `max_depth` hops (1–5).  A missing
    /// entity yields an empty neighborhood, not an error.
    async fn neighborhood(&self, persona_id: &str, entity: &str, max_depth: usize) -> Result<Neighborhood>;
    async fn full_graph(&self, persona_id: &str) -> Result<Neighborhood>;
    async fn touch_entity(&self, persona_id: &str, name: &str, now: i64) -> Result<()>;
}

fn validate_name(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        bail!("{what} must not be empty");
    }
    if value.chars().count() > MAX_NAME_LEN {
        bail!("{what} too long ({} chars, max {MAX_NAME_LEN})", value.chars().count());
    }
    if value.chars().any(char::is_control) {
        bail!("{what} contains control characters");
    }
    Ok(())
}

fn validate_type(value: &str) -> Result<()> {
    if value.is_empty() {
        bail!("entity type must not be empty");
    }
    if value.chars().count() > MAX_TYPE_LEN {
        bail!("entity type too long ({} chars, max {MAX_TYPE_LEN})", value.chars().count());
    }
    Ok(())
}

fn clip_description(description: Option<&str>) -> String {
    let description = description.unwrap_or_default();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        warn!(len = description.chars().count(), "description too long, truncating");
        description.chars().take(MAX_DESCRIPTION_LEN).collect()
    } else {
        description.to_string()
    }
}

fn node_key(persona_id: &str, name: &str) -> String {
    format!("{persona_id}{KEY_SEP}{name}")
}

fn edge_key(persona_id: &str, from: &str, to: &str) -> String {
    format!("{persona_id}{KEY_SEP}{from}{KEY_SEP}{to}")
}

// ── Stored row shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct EntityRow {
    name: String,
    entity_type: String,
    description: String,
    created_at: i64,
    last_accessed_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConceptRow {
    name: String,
    description: String,
    created_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserRow {
    id: String,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RelatedRow {
    weight: f64,
    created_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BelongsRow {
    created_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MentionRow {
    timestamp: i64,
}

/// One loaded edge with its persona-relative endpoints.
struct LoadedEdge {
    from: String,
    to: String,
    relation: &'static str,
    weight: Option<f64>,
    created_at: i64,
}

pub struct RedbGraphIndex {
    db: Database,
    path: PathBuf,
}

impl RedbGraphIndex {
    /// Open or create the store; all node and relation tables are created
    /// idempotently.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening graph store at {}", path.display()))?;

        {
            let tx = db.begin_write()?;
            tx.open_table(ENTITY_TABLE)?;
            tx.open_table(CONCEPT_TABLE)?;
            tx.open_table(USER_TABLE)?;
            tx.open_table(RELATED_TABLE)?;
            tx.open_table(BELONGS_TABLE)?;
            tx.open_table(MENTIONS_TABLE)?;
            tx.commit()?;
        }

        info!(path = %path.display(), "graph store ready");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert `row` under `key` unless the key already exists (MERGE ... ON
    /// CREATE semantics).  Returns whether a write happened.
    fn insert_if_absent<T: Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        row: &T,
    ) -> Result<bool> {
        let bytes = serde_json::to_vec(row)?;
        let tx = self.db.begin_write()?;
        let created;
        {
            let mut tbl = tx.open_table(table)?;
            if tbl.get(key)?.is_some() {
                created = false;
            } else {
                tbl.insert(key, bytes.as_slice())?;
                created = true;
            }
        }
        tx.commit()?;
        Ok(created)
    }

    fn entity_row(&self, persona_id: &str, name: &str) -> Result<Option<EntityRow>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(ENTITY_TABLE)?;
        match tbl.get(node_key(persona_id, name).as_str())? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
        }
    }

    fn ensure_entity(&self, persona_id: &str, name: &str) -> Result<()> {
        let now = now_ms();
        self.insert_if_absent(
            ENTITY_TABLE,
            &node_key(persona_id, name),
            &EntityRow {
                name: name.to_string(),
                entity_type: "unknown".to_string(),
                description: String::new(),
                created_at: now,
                last_accessed_at: now,
            },
        )?;
        Ok(())
    }

    /// All RELATED_TO and BELONGS_TO edges of one persona.
    fn load_edges(&self, persona_id: &str) -> Result<Vec<LoadedEdge>> {
        let prefix = format!("{persona_id}{KEY_SEP}");
        let tx = self.db.begin_read()?;
        let mut edges = Vec::new();

        let related = tx.open_table(RELATED_TABLE)?;
        for entry in related.iter()? {
            let (key, raw) = entry?;
            let key = key.value().to_string();
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Some((from, to)) = rest.split_once(KEY_SEP) else {
                continue;
            };
            let row: RelatedRow = serde_json::from_slice(raw.value())?;
            edges.push(LoadedEdge {
                from: from.to_string(),
                to: to.to_string(),
                relation: RELATED_TO,
                weight: Some(row.weight),
                created_at: row.created_at,
            });
        }

        let belongs = tx.open_table(BELONGS_TABLE)?;
        for entry in belongs.iter()? {
            let (key, raw) = entry?;
            let key = key.value().to_string();
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Some((from, to)) = rest.split_once(KEY_SEP) else {
                continue;
            };
            let row: BelongsRow = serde_json::from_slice(raw.value())?;
            edges.push(LoadedEdge {
                from: from.to_string(),
                to: to.to_string(),
                relation: BELONGS_TO,
                weight: None,
                created_at: row.created_at,
            });
        }

        Ok(edges)
    }

    /// Resolve node rows for a set of names, preferring the entity table and
    /// falling back to concepts.
    fn load_nodes(&self, persona_id: &str, names: &[String]) -> Result<Vec<GraphNode>> {
        let tx = self.db.begin_read()?;
        let entities = tx.open_table(ENTITY_TABLE)?;
        let concepts = tx.open_table(CONCEPT_TABLE)?;

        let mut nodes = Vec::new();
        for name in names {
            let key = node_key(persona_id, name);
            if let Some(raw) = entities.get(key.as_str())? {
                let row: EntityRow = serde_json::from_slice(raw.value())?;
                nodes.push(GraphNode {
                    name: row.name,
                    kind: "entity".to_string(),
                    entity_type: Some(row.entity_type),
                    description: Some(row.description),
                    created_at: row.created_at,
                    last_accessed_at: Some(row.last_accessed_at),
                });
            } else if let Some(raw) = concepts.get(key.as_str())? {
                let row: ConceptRow = serde_json::from_slice(raw.value())?;
                nodes.push(GraphNode {
                    name: row.name,
                    kind: "concept".to_string(),
                    entity_type: None,
                    description: Some(row.description),
                    created_at: row.created_at,
                    last_accessed_at: None,
                });
            }
        }
        Ok(nodes)
    }
}

#[async_trait]
impl GraphIndex for RedbGraphIndex {
    async fn upsert_entity(
        &self,
        persona_id: &str,
        name: &str,
        entity_type: &str,
        description: Option<&str>,
    ) -> Result<()> {
        validate_name(persona_id, "persona id")?;
        validate_name(name, "entity name")?;
        validate_type(entity_type)?;

        let now = now_ms();
        let created = self.insert_if_absent(
            ENTITY_TABLE,
            &node_key(persona_id, name),
            &EntityRow {
                name: name.to_string(),
                entity_type: entity_type.to_string(),
                description: clip_description(description),
                created_at: now,
                last_accessed_at: now,
            },
        )?;
        debug!(persona = persona_id, name, created, "entity upsert");
        Ok(())
    }

    async fn upsert_concept(&self, persona_id: &str, name: &str, description: Option<&str>) -> Result<()> {
        validate_name(persona_id, "persona id")?;
        validate_name(name, "concept name")?;

        self.insert_if_absent(
            CONCEPT_TABLE,
            &node_key(persona_id, name),
            &ConceptRow {
                name: name.to_string(),
                description: clip_description(description),
                created_at: now_ms(),
            },
        )?;
        Ok(())
    }

    async fn upsert_user(&self, persona_id: &str, user_id: &str, name: &str) -> Result<()> {
        validate_name(persona_id, "persona id")?;
        validate_name(user_id, "user id")?;
        validate_name(name, "user name")?;

        self.insert_if_absent(
            USER_TABLE,
            &node_key(persona_id, user_id),
            &UserRow {
                id: user_id.to_string(),
                name: name.to_string(),
            },
        )?;
        Ok(())
    }

    async fn upsert_relation(
        &self,
        persona_id: &str,
        from: &str,
        to: &str,
        kind: &str,
        weight: Option<f64>,
    ) -> Result<()> {
        validate_name(persona_id, "persona id")?;
        validate_name(from, "relation source")?;
        validate_name(to, "relation target")?;

        let kind = if kind == RELATED_TO || kind == BELONGS_TO {
            kind
        } else {
            warn!(kind, "unknown relation type, downgrading to RELATED_TO");
            RELATED_TO
        };

        match kind {
            BELONGS_TO => {
                self.ensure_entity(persona_id, from)?;
                self.insert_if_absent(
                    CONCEPT_TABLE,
                    &node_key(persona_id, to),
                    &ConceptRow {
                        name: to.to_string(),
                        description: String::new(),
                        created_at: now_ms(),
                    },
                )?;
                self.insert_if_absent(
                    BELONGS_TABLE,
                    &edge_key(persona_id, from, to),
                    &BelongsRow { created_at: now_ms() },
                )?;
            }
            _ => {
                self.ensure_entity(persona_id, from)?;
                self.ensure_entity(persona_id, to)?;
                self.insert_if_absent(
                    RELATED_TABLE,
                    &edge_key(persona_id, from, to),
                    &RelatedRow {
                        weight: weight.unwrap_or(0.0),
                        created_at: now_ms(),
                    },
                )?;
            }
        }
        debug!(persona = persona_id, from, to, kind, "relation upsert");
        Ok(())
    }

    async fn upsert_mention(&self, persona_id: &str, user_id: &str, entity: &str) -> Result<()> {
        validate_name(persona_id, "persona id")?;
        validate_name(user_id, "user id")?;
        validate_name(entity, "entity name")?;

        self.insert_if_absent(
            USER_TABLE,
            &node_key(persona_id, user_id),
            &UserRow {
                id: user_id.to_string(),
                name: user_id.to_string(),
            },
        )?;
        self.ensure_entity(persona_id, entity)?;
        self.insert_if_absent(
            MENTIONS_TABLE,
            &edge_key(persona_id, user_id, entity),
            &MentionRow { timestamp: now_ms() },
        )?;
        Ok(())
    }

    async fn neighborhood(&self, persona_id: &str, entity: &str, max_depth: usize) -> Result<Neighborhood> {
        validate_name(persona_id, "persona id")?;
        validate_name(entity, "entity name")?;
        if max_depth == 0 || max_depth > MAX_DEPTH {
            bail!("max_depth must be between 1 and {MAX_DEPTH}");
        }

        if self.entity_row(persona_id, entity)?.is_none() {
            return Ok(Neighborhood::default());
        }

        let edges = self.load_edges(persona_id)?;

        // Adjacency: RELATED_TO is traversed both ways, BELONGS_TO only from
        // entity to concept.
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &edges {
            adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
            if edge.relation == RELATED_TO {
                adjacency.entry(edge.to.as_str()).or_default().push(edge.from.as_str());
            }
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut order: Vec<String> = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        visited.insert(entity.to_string());
        order.push(entity.to_string());
        queue.push_back((entity.to_string(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth == max_depth {
                continue;
            }
            if let Some(next) = adjacency.get(current.as_str()) {
                for neighbor in next {
                    if visited.insert((*neighbor).to_string()) {
                        order.push((*neighbor).to_string());
                        queue.push_back(((*neighbor).to_string(), depth + 1));
                    }
                }
            }
        }
        drop(adjacency);

        let nodes = self.load_nodes(persona_id, &order)?;
        let edges = edges
            .into_iter()
            .filter(|e| visited.contains(&e.from) && visited.contains(&e.to))
            .map(|e| GraphEdge {
                from_entity: e.from,
                to_entity: e.to,
                relation_type: e.relation.to_string(),
                weight: e.weight,
                created_at: e.created_at,
            })
            .collect();

        Ok(Neighborhood { nodes, edges })
    }

    async fn full_graph(&self, persona_id: &str) -> Result<Neighborhood> {
        validate_name(persona_id, "persona id")?;
        let prefix = format!("{persona_id}{KEY_SEP}");

        let mut nodes = Vec::new();
        {
            let tx = self.db.begin_read()?;
            let entities = tx.open_table(ENTITY_TABLE)?;
            for entry in entities.iter()? {
                let (key, raw) = entry?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                let row: EntityRow = serde_json::from_slice(raw.value())?;
                nodes.push(GraphNode {
                    name: row.name,
                    kind: "entity".to_string(),
                    entity_type: Some(row.entity_type),
                    description: Some(row.description),
                    created_at: row.created_at,
                    last_accessed_at: Some(row.last_accessed_at),
                });
            }
            let concepts = tx.open_table(CONCEPT_TABLE)?;
            for entry in concepts.iter()? {
                let (key, raw) = entry?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                let row: ConceptRow = serde_json::from_slice(raw.value())?;
                nodes.push(GraphNode {
                    name: row.name,
                    kind: "concept".to_string(),
                    entity_type: None,
                    description: Some(row.description),
                    created_at: row.created_at,
                    last_accessed_at: None,
                });
            }
        }

        let edges = self
            .load_edges(persona_id)?
            .into_iter()
            .map(|e| GraphEdge {
                from_entity: e.from,
                to_entity: e.to,
                relation_type: e.relation.to_string(),
                weight: e.weight,
                created_at: e.created_at,
            })
            .collect();

        Ok(Neighborhood { nodes, edges })
    }

    async fn touch_entity(&self, persona_id: &str, name: &str, now: i64) -> Result<()> {
        validate_name(persona_id, "persona id")?;
        validate_name(name, "entity name")?;

        let Some(mut row) = self.entity_row(persona_id, name)? else {
            return Ok(());
        };
        row.last_accessed_at = now;
        let bytes = serde_json::to_vec(&row)?;

        let key = node_key(persona_id, name);
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(ENTITY_TABLE)?;
            tbl.insert(key.as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn temp_graph() -> RedbGraphIndex {
        let path = std::env::temp_dir()
            .join("memgate-graph-tests")
            .join(format!("{}.redb", Uuid::new_v4()));
        RedbGraphIndex::open(path).unwrap()
    }

    #[tokio::test]
    async fn entity_upsert_is_idempotent() {
        let graph = temp_graph();
        graph.upsert_entity("p", "Kyoto", "city", Some("a city")).await.unwrap();
        graph.upsert_entity("p", "Kyoto", "place", Some("changed")).await.unwrap();

        let hood = graph.neighborhood("p", "Kyoto", 1).await.unwrap();
        assert_eq!(hood.nodes.len(), 1);
        // ON CREATE semantics: the second upsert must not overwrite.
        assert_eq!(hood.nodes[0].entity_type.as_deref(), Some("city"));
    }

    #[tokio::test]
    async fn unknown_relation_kind_downgrades_to_related_to() {
        let graph = temp_graph();
        graph.upsert_relation("p", "Alice", "Tea", "LIKES", Some(1.0)).await.unwrap();

        let hood = graph.neighborhood("p", "Alice", 1).await.unwrap();
        assert_eq!(hood.edges.len(), 1);
        assert_eq!(hood.edges[0].relation_type, RELATED_TO);
    }

    #[tokio::test]
    async fn belongs_to_creates_concept_node() {
        let graph = temp_graph();
        graph.upsert_relation("p", "Kyoto", "Places", BELONGS_TO, None).await.unwrap();

        let hood = graph.neighborhood("p", "Kyoto", 2).await.unwrap();
        let concept = hood.nodes.iter().find(|n| n.name == "Places").unwrap();
        assert_eq!(concept.kind, "concept");
    }

    #[tokio::test]
    async fn neighborhood_respects_depth() {
        let graph = temp_graph();
        graph.upsert_relation("p", "A", "B", RELATED_TO, Some(1.0)).await.unwrap();
        graph.upsert_relation("p", "B", "C", RELATED_TO, Some(1.0)).await.unwrap();
        graph.upsert_relation("p", "C", "D", RELATED_TO, Some(1.0)).await.unwrap();

        let one_hop = graph.neighborhood("p", "A", 1).await.unwrap();
        let names: Vec<_> = one_hop.nodes.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&"A") && names.contains(&"B"));
        assert!(!names.contains(&"C"));

        let two_hops = graph.neighborhood("p", "A", 2).await.unwrap();
        assert_eq!(two_hops.nodes.len(), 3);
    }

    #[tokio::test]
    async fn related_to_is_traversed_both_ways() {
        let graph = temp_graph();
        graph.upsert_relation("p", "A", "B", RELATED_TO, Some(1.0)).await.unwrap();

        let from_target = graph.neighborhood("p", "B", 1).await.unwrap();
        let names: Vec<_> = from_target.nodes.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&"A"));
    }

    #[tokio::test]
    async fn neighborhood_is_persona_scoped() {
        let graph = temp_graph();
        graph.upsert_relation("p1", "A", "B", RELATED_TO, Some(1.0)).await.unwrap();
        graph.upsert_relation("p2", "A", "C", RELATED_TO, Some(1.0)).await.unwrap();

        let hood = graph.neighborhood("p1", "A", 2).await.unwrap();
        let names: Vec<_> = hood.nodes.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&"B"));
        assert!(!names.contains(&"C"));
    }

    #[tokio::test]
    async fn missing_entity_yields_empty_neighborhood() {
        let graph = temp_graph();
        let hood = graph.neighborhood("p", "Nobody", 2).await.unwrap();
        assert!(hood.nodes.is_empty());
        assert!(hood.edges.is_empty());
    }

    #[tokio::test]
    async fn oversized_names_are_rejected() {
        let graph = temp_graph();
        let long_name = "x".repeat(101);
        assert!(graph.upsert_entity("p", &long_name, "thing", None).await.is_err());
        assert!(graph.upsert_entity("p", "ok", &"t".repeat(51), None).await.is_err());
        assert!(graph.upsert_entity("p", "bad\u{1f}name", "thing", None).await.is_err());
    }

    #[tokio::test]
    async fn invalid_depth_is_rejected() {
        let graph = temp_graph();
        graph.upsert_entity("p", "A", "thing", None).await.unwrap();
        assert!(graph.neighborhood("p", "A", 0).await.is_err());
        assert!(graph.neighborhood("p", "A", 6).await.is_err());
    }

    #[tokio::test]
    async fn full_graph_returns_all_persona_nodes_and_edges() {
        let graph = temp_graph();
        graph.upsert_relation("p", "A", "B", RELATED_TO, Some(0.5)).await.unwrap();
        graph.upsert_relation("p", "A", "Ideas", BELONGS_TO, None).await.unwrap();

        let all = graph.full_graph("p").await.unwrap();
        assert_eq!(all.nodes.len(), 3);
        assert_eq!(all.edges.len(), 2);
    }

    #[tokio::test]
    async fn touch_entity_updates_last_access() {
        let graph = temp_graph();
        graph.upsert_entity("p", "A", "thing", None).await.unwrap();
        graph.touch_entity("p", "A", 123_456).await.unwrap();

        let hood = graph.neighborhood("p", "A", 1).await.unwrap();
        assert_eq!(hood.nodes[0].last_accessed_at, Some(123_456));
        // Touching a missing entity is a quiet no-op.
        graph.touch_entity("p", "Missing", 1).await.unwrap();
    }
}
