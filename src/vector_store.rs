//! Índice vectorial sobre `:Movie(taglineEmbedding)`.
//!
//! API pública:
//!   - `ensure_index(&dyn MovieGraph, &VectorIndexSpec)`
//!   - `backfill(&dyn MovieGraph, &[MovieRecord])`
//!   - `search_similar(&dyn MovieGraph, &str, &[f32])`.

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::graph::{MovieGraph, EMBEDDING_PROPERTY, MOVIE_LABEL};
use crate::models::{MovieRecord, ScoredMovie};

pub const INDEX_NAME: &str = "movie_tagline_embeddings";
pub const DEFAULT_DIMENSIONS: usize = 384;
/// Películas que devuelve la búsqueda por similitud.
pub const TOP_K: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Similarity {
    Cosine,
}

impl Similarity {
    /// Nombre en `vector.similarity_function`.
    pub fn as_neo4j(&self) -> &'static str {
        match self {
            Similarity::Cosine => "cosine",
        }
    }

    /// Neo4j devuelve el nombre en mayúsculas (`COSINE`).
    pub fn from_neo4j(name: &str) -> Option<Self> {
        name.eq_ignore_ascii_case("cosine").then_some(Similarity::Cosine)
    }

    /// Score normalizado a [0, 1], igual que los índices vectoriales de Neo4j.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Similarity::Cosine => {
                let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
                for (x, y) in a.iter().zip(b) {
                    let (x, y) = (f64::from(*x), f64::from(*y));
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                if norm_a <= 0.0 || norm_b <= 0.0 {
                    return 0.0;
                }
                let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
                (1.0 + cosine) / 2.0
            }
        }
    }
}

/// Definición del índice vectorial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorIndexSpec {
    pub name: String,
    pub label: String,
    pub property: String,
    pub dimensions: usize,
    pub similarity: Similarity,
}

impl Default for VectorIndexSpec {
    fn default() -> Self {
        Self {
            name: INDEX_NAME.to_string(),
            label: MOVIE_LABEL.to_string(),
            property: EMBEDDING_PROPERTY.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            similarity: Similarity::Cosine,
        }
    }
}

impl VectorIndexSpec {
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    /// Los nombres acaban interpolados en el DDL (no admite parámetros),
    /// así que sólo se aceptan identificadores simples.
    pub fn validate(&self) -> Result<(), String> {
        let is_identifier = |s: &str| {
            !s.is_empty()
                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !s.starts_with(|c: char| c.is_ascii_digit())
        };
        for (what, value) in [
            ("nombre", &self.name),
            ("etiqueta", &self.label),
            ("propiedad", &self.property),
        ] {
            if !is_identifier(value) {
                return Err(format!("{what} de índice inválido: '{value}'"));
            }
        }
        if self.dimensions == 0 {
            return Err("el índice necesita al menos una dimensión".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for VectorIndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":{}({}), {} dimensiones, {}",
            self.label,
            self.property,
            self.dimensions,
            self.similarity.as_neo4j()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexStatus {
    Created,
    AlreadyExists,
}

/// Garantiza que el índice vectorial exista. Idempotente mientras la
/// definición coincida; un índice con el mismo nombre y otra forma
/// (dimensiones, similitud, etiqueta o propiedad) es un error.
pub async fn ensure_index(graph: &dyn MovieGraph, spec: &VectorIndexSpec) -> PipelineResult<IndexStatus> {
    spec.validate().map_err(PipelineError::IndexSetup)?;

    let existing = graph
        .vector_index(&spec.name)
        .await
        .map_err(|e| PipelineError::IndexSetup(e.to_string()))?;
    match existing {
        Some(existing) if existing == *spec => {
            info!("Índice vectorial '{}' ya existe.", spec.name);
            return Ok(IndexStatus::AlreadyExists);
        }
        Some(existing) => {
            return Err(PipelineError::IndexSetup(format!(
                "el índice '{}' ya existe como {existing}, pero se necesita {spec}; bórrelo para recrearlo",
                spec.name
            )));
        }
        None => {}
    }

    graph
        .create_vector_index(spec)
        .await
        .map_err(|e| PipelineError::IndexSetup(e.to_string()))?;
    info!("Índice vectorial '{}' creado ({spec}).", spec.name);
    Ok(IndexStatus::Created)
}

/// Copia los embeddings del dataset a los nodos (:Movie). Todas las filas
/// deben tener embedding y todos los títulos deben existir en el grafo.
pub async fn backfill(graph: &dyn MovieGraph, movies: &[MovieRecord]) -> PipelineResult<usize> {
    let missing: Vec<&str> = movies
        .iter()
        .filter(|m| m.tagline_embedding.is_none())
        .map(|m| m.title.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::IndexSetup(format!(
            "películas sin embedding: {}",
            missing.join(", ")
        )));
    }

    let rows: Vec<(String, Vec<f32>)> = movies
        .iter()
        .filter_map(|m| m.tagline_embedding.clone().map(|e| (m.title.clone(), e)))
        .collect();

    let updated = graph
        .set_embeddings(&rows)
        .await
        .map_err(|e| PipelineError::IndexSetup(e.to_string()))?;

    let distinct_titles = {
        let mut titles: Vec<&str> = rows.iter().map(|(t, _)| t.as_str()).collect();
        titles.sort_unstable();
        titles.dedup();
        titles.len()
    };
    if updated < distinct_titles {
        return Err(PipelineError::IndexSetup(format!(
            "sólo se actualizaron {updated} de {distinct_titles} películas; ¿se ejecutó la sincronización?"
        )));
    }

    info!("Embeddings asignados a {updated} nodos (:Movie).");
    Ok(updated)
}

/// Búsqueda semántica: siempre pide exactamente `TOP_K` vecinos y devuelve
/// como mucho `TOP_K` filas, ordenadas por score descendente.
pub async fn search_similar(
    graph: &dyn MovieGraph,
    index_name: &str,
    embedding: &[f32],
) -> PipelineResult<Vec<ScoredMovie>> {
    let mut hits = graph
        .query_nodes(index_name, TOP_K, embedding)
        .await
        .map_err(|e| PipelineError::VectorSearch(e.to_string()))?;

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(TOP_K);
    Ok(hits)
}
