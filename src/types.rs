//! Core data model: memories, scopes, and embeddings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for content-addressed ids (UUIDv5)
pub const MEMORY_NAMESPACE: Uuid = Uuid::from_u128(0x6ba7b810_9dad_11d1_80b4_00c04fd430c8);

/// Which tier of the knowledge store a memory belongs to.
///
/// Documents hold complete, unchunked source text; fragments hold the
/// overlapping chunks that carry the searchable embeddings. One table serves
/// both tiers, distinguished by this enum rather than by a table-name string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Complete source texts; never vector-searched directly
    Documents,
    /// Overlapping chunks carrying the searchable embeddings
    Fragments,
}

impl MemoryKind {
    /// Stable storage name for the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Documents => "documents",
            MemoryKind::Fragments => "fragments",
        }
    }

    /// Parse a stored kind name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "documents" => Some(MemoryKind::Documents),
            "fragments" => Some(MemoryKind::Fragments),
            _ => None,
        }
    }
}

/// Tenancy boundary within which search and dedup operate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Owning room; the primary visibility boundary
    pub room: Uuid,
    /// Optional owning user within the room
    pub user: Option<Uuid>,
    /// Optional owning agent within the room
    pub agent: Option<Uuid>,
}

impl Scope {
    /// Scope covering an entire room
    pub fn room(room: Uuid) -> Self {
        Scope {
            room,
            user: None,
            agent: None,
        }
    }

    /// Narrow the scope to a user
    pub fn with_user(mut self, user: Uuid) -> Self {
        self.user = Some(user);
        self
    }

    /// Narrow the scope to an agent
    pub fn with_agent(mut self, agent: Uuid) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Key used to partition the embedding cache (tenancy boundary is the room)
    pub fn cache_key(&self) -> String {
        self.room.to_string()
    }

    /// Whether a memory's owners fall inside this scope
    pub fn contains(&self, room: Uuid, user: Option<Uuid>, agent: Option<Uuid>) -> bool {
        if self.room != room {
            return false;
        }
        if let Some(u) = self.user {
            if user != Some(u) {
                return false;
            }
        }
        if let Some(a) = self.agent {
            if agent != Some(a) {
                return false;
            }
        }
        true
    }
}

/// An embedding with its provenance.
///
/// A degraded embedding is the zero-vector fallback recorded when the
/// provider failed; it is persisted so ingest never loses text, excluded
/// from vector search, and never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Embedding {
    /// Successfully computed by a provider (or reused from cache)
    Computed {
        /// The embedding vector
        vector: Vec<f32>,
    },
    /// Zero-vector fallback after a provider failure
    Degraded {
        /// Zero vector of the deployment's dimensionality
        vector: Vec<f32>,
        /// Why the provider call failed
        reason: String,
    },
}

impl Embedding {
    /// Build a degraded zero-vector embedding
    pub fn degraded(dimensions: usize, reason: impl Into<String>) -> Self {
        Embedding::Degraded {
            vector: vec![0.0; dimensions],
            reason: reason.into(),
        }
    }

    /// The underlying vector, regardless of provenance
    pub fn vector(&self) -> &[f32] {
        match self {
            Embedding::Computed { vector } => vector,
            Embedding::Degraded { vector, .. } => vector,
        }
    }

    /// Whether this is the zero-vector fallback
    pub fn is_degraded(&self) -> bool {
        matches!(self, Embedding::Degraded { .. })
    }
}

/// Text payload of a memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryContent {
    /// The stored text
    pub text: String,
    /// For fragments, the id of the owning document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Uuid>,
    /// Free-form metadata attached by the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// The atomic persisted unit: text, optional embedding, and scoping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Stable identifier; content-addressed unless explicitly assigned
    pub id: Uuid,
    /// Storage tier, assigned by the owning manager
    pub kind: MemoryKind,
    /// Text payload
    pub content: MemoryContent,
    /// Embedding vector, absent until computed
    pub embedding: Option<Embedding>,
    /// Tenancy scope
    pub scope: Scope,
    /// Near-duplicate check applies at write time when true
    pub unique: bool,
    /// Creation timestamp, immutable once set
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Create a new memory with a content-addressed id.
    ///
    /// The id is a UUIDv5 over the room and text, so identical text in the
    /// same room always maps to the same id.
    pub fn new(scope: Scope, text: impl Into<String>) -> Self {
        let text = text.into();
        let id = Self::content_addressed_id(scope.room, &text);
        Memory {
            id,
            kind: MemoryKind::Documents,
            content: MemoryContent {
                text,
                source: None,
                metadata: None,
            },
            embedding: None,
            scope,
            unique: false,
            created_at: Utc::now(),
        }
    }

    /// Derive the content-addressed id for a room and text
    pub fn content_addressed_id(room: Uuid, text: &str) -> Uuid {
        Uuid::new_v5(&MEMORY_NAMESPACE, format!("{room}:{text}").as_bytes())
    }

    /// Derive the deterministic id of a document's fragment
    pub fn fragment_id(document_id: Uuid, index: usize) -> Uuid {
        Uuid::new_v5(
            &MEMORY_NAMESPACE,
            format!("{document_id}:fragment:{index}").as_bytes(),
        )
    }

    /// Assign an explicit id
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Link this memory to its source document
    pub fn with_source(mut self, source: Uuid) -> Self {
        self.content.source = Some(source);
        self
    }

    /// Attach caller metadata
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.content.metadata = Some(metadata);
        self
    }

    /// The embedding vector, if one is present
    pub fn vector(&self) -> Option<&[f32]> {
        self.embedding.as_ref().map(|e| e.vector())
    }
}

/// A memory paired with its similarity score from a vector search
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    /// The matched memory
    pub memory: Memory,
    /// Similarity score in [0, 1], higher is more similar
    pub similarity: f32,
}
