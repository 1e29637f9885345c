//! Taxonomía de errores del pipeline de recomendación.
//!
//! Los errores de frontera (`GraphError`, `ModelError`) saben si son
//! transitorios; sólo esos se reintentan. Los errores semánticos (Cypher
//! mal formado, consulta rechazada) nunca se repiten tal cual.

use std::path::PathBuf;

use thiserror::Error;

/// Indica si un fallo merece otro intento (red, timeouts, sobrecarga).
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Errores del almacén de grafo.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("fallo transitorio del grafo: {0}")]
    Transient(String),
    #[error("el grafo rechazó la operación: {0}")]
    Rejected(String),
    #[error("operación no soportada por este backend: {0}")]
    Unsupported(String),
}

impl GraphError {
    /// Clasifica un mensaje de error del driver.
    pub fn from_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if looks_transient(&msg) {
            Self::Transient(msg)
        } else {
            Self::Rejected(msg)
        }
    }
}

impl Transient for GraphError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<neo4rs::Error> for GraphError {
    fn from(err: neo4rs::Error) -> Self {
        Self::from_message(err.to_string())
    }
}

/// Errores del modelo de lenguaje o del servicio de embeddings.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("fallo transitorio del modelo: {0}")]
    Transient(String),
    #[error("el modelo falló: {0}")]
    Failed(String),
}

impl ModelError {
    pub fn from_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if looks_transient(&msg) {
            Self::Transient(msg)
        } else {
            Self::Failed(msg)
        }
    }
}

impl Transient for ModelError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Por qué falló la estrategia A (generación de Cypher).
#[derive(Debug, Clone, Error)]
pub enum QueryGenerationError {
    #[error("el modelo no devolvió ninguna consulta")]
    EmptyOutput,
    #[error("consulta rechazada por el validador: {0}")]
    Rejected(String),
    #[error("no se pudo generar la consulta: {0}")]
    Model(#[source] ModelError),
    #[error("la consulta generada falló al ejecutarse: {0}")]
    Execution(#[source] GraphError),
    #[error("no se pudo formatear el resultado: {0}")]
    Formatting(#[source] ModelError),
}

/// Errores del pipeline completo (carga, sincronización y consultas).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("error cargando el dataset {}: {reason}", path.display())]
    DataLoad { path: PathBuf, reason: String },

    #[error("fallo del servicio de embeddings ({} filas afectadas: {}): {reason}", failed.len(), failed.join(", "))]
    EmbeddingService { failed: Vec<String>, reason: String },

    #[error("error sincronizando el grafo: {0}")]
    GraphSync(#[source] GraphError),

    #[error("error preparando el índice vectorial: {0}")]
    IndexSetup(String),

    #[error(transparent)]
    QueryGeneration(#[from] QueryGenerationError),

    #[error("error en la búsqueda vectorial: {0}")]
    VectorSearch(String),

    #[error("error formateando la respuesta: {0}")]
    Formatting(#[source] ModelError),

    #[error("configuración inválida: {0}")]
    Config(String),

    #[error("servicio no disponible: {0}")]
    Unavailable(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Heurística compartida para los mensajes de los drivers (neo4rs, rig),
/// que no exponen una clasificación estable.
pub fn looks_transient(msg: &str) -> bool {
    const MARKERS: [&str; 12] = [
        "timed out",
        "timeout",
        "connection",
        "broken pipe",
        "io error",
        "ioerror",
        "unavailable",
        "too many requests",
        "429",
        "502",
        "503",
        "504",
    ];
    let lower = msg.to_lowercase();
    MARKERS.iter().any(|marker| lower.contains(marker))
}
