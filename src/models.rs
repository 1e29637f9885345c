//! Modelos de dominio (filas del dataset y nodos del grafo de películas).

use serde::{Deserialize, Serialize};

/// Una fila del dataset de películas, tal y como se carga del CSV.
/// Los campos multivalor (`directors`, `cast`, `genres`) van separados por `|`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub movie_id: String,
    pub title: String,
    pub tagline: String,
    pub awards: i64,
    pub imdb_rating: f64,
    pub directors: String,
    pub cast: String,
    pub genres: String,
    pub languages: String,
    /// Se rellena en el paso de embeddings; `None` justo después de cargar.
    #[serde(default)]
    pub tagline_embedding: Option<Vec<f32>>,
}

/// Representa un nodo (:Movie) listo para persistir, con sus relaciones
/// ya separadas y limpias de tokens vacíos.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieUpsert {
    pub id: String,
    pub title: String,
    pub tagline: String,
    pub awards: i64,
    pub imdb_rating: f64,
    pub directors: Vec<String>,
    pub cast: Vec<String>,
    pub genres: Vec<String>,
    pub language: Option<String>,
}

/// Vista de una película con todo lo que cuelga de ella en el grafo.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MovieProfile {
    pub title: String,
    pub movie_id: Option<String>,
    pub tagline: Option<String>,
    pub awards: Option<i64>,
    pub imdb_rating: Option<f64>,
    pub genres: Vec<String>,
    pub directors: Vec<String>,
    pub cast: Vec<String>,
    pub languages: Vec<String>,
}

/// Resultado de la búsqueda vectorial sobre los taglines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMovie {
    pub title: String,
    pub tagline: String,
    pub score: f64,
}

/// Recuento de nodos y relaciones del grafo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    pub nodes: u64,
    pub relationships: u64,
}
