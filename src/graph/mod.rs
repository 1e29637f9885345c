//! Frontera con el almacén de grafo.
//!
//! `MovieGraph` es todo lo que el pipeline necesita del grafo: describir el
//! esquema, refrescar el contenido de forma atómica, mantener el índice
//! vectorial y ejecutar consultas de lectura. Hay dos implementaciones:
//! Neo4j (`neo4j`) y un grafo embebido en memoria (`memory`).

pub mod memory;
pub mod neo4j;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::GraphError;
use crate::models::{GraphCounts, MovieProfile, MovieUpsert, ScoredMovie};
use crate::vector_store::VectorIndexSpec;

pub use memory::MemoryGraph;
pub use neo4j::Neo4jGraph;

pub const MOVIE_LABEL: &str = "Movie";
pub const PERSON_LABEL: &str = "Person";
pub const GENRE_LABEL: &str = "Genre";
pub const LANGUAGE_LABEL: &str = "Language";

pub const DIRECTED: &str = "DIRECTED";
pub const ACTED_IN: &str = "ACTED_IN";
pub const IN_GENRE: &str = "IN_GENRE";
pub const WAS_RELEASED_IN: &str = "WAS_RELEASED_IN";

/// Propiedad de (:Movie) con el embedding del tagline.
pub const EMBEDDING_PROPERTY: &str = "taglineEmbedding";

#[async_trait]
pub trait MovieGraph: Send + Sync {
    /// Nombre corto del backend, para logs y `/api/neo4j-info`.
    fn backend_name(&self) -> &'static str;

    async fn ping(&self) -> Result<(), GraphError>;

    /// Descripción del esquema vivo (etiquetas, propiedades y relaciones).
    async fn schema(&self) -> Result<GraphSchema, GraphError>;

    async fn counts(&self) -> Result<GraphCounts, GraphError>;

    /// Unicidad de las claves naturales (título, nombre).
    async fn ensure_constraints(&self) -> Result<(), GraphError>;

    /// Sustituye el contenido del grafo en una única unidad atómica.
    /// Con `wipe` se borran antes todos los nodos y relaciones.
    async fn replace_movies(&self, wipe: bool, movies: &[MovieUpsert]) -> Result<(), GraphError>;

    /// Definición del índice vectorial `name`, si existe.
    async fn vector_index(&self, name: &str) -> Result<Option<VectorIndexSpec>, GraphError>;

    async fn create_vector_index(&self, spec: &VectorIndexSpec) -> Result<(), GraphError>;

    /// Asigna embeddings por título; devuelve cuántos nodos se actualizaron.
    async fn set_embeddings(&self, rows: &[(String, Vec<f32>)]) -> Result<usize, GraphError>;

    /// Los `k` nodos más parecidos según el índice, ordenados por score descendente.
    async fn query_nodes(
        &self,
        index_name: &str,
        k: usize,
        embedding: &[f32],
    ) -> Result<Vec<ScoredMovie>, GraphError>;

    /// Ejecuta una consulta Cypher de sólo lectura y devuelve cada fila como objeto JSON.
    async fn execute_read(&self, cypher: &str) -> Result<Vec<serde_json::Value>, GraphError>;

    async fn movie_profile(&self, title: &str) -> Result<Option<MovieProfile>, GraphError>;
}

/// Esquema del grafo en el formato que entienden los modelos text2cypher.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSchema {
    /// etiqueta -> [(propiedad, tipo)]
    pub node_properties: BTreeMap<String, Vec<(String, String)>>,
    /// tipo de relación -> [(propiedad, tipo)]
    pub relationship_properties: BTreeMap<String, Vec<(String, String)>>,
    /// (origen, tipo, destino)
    pub relationships: Vec<(String, String, String)>,
}

impl GraphSchema {
    pub fn is_empty(&self) -> bool {
        self.node_properties.is_empty()
            && self.relationship_properties.is_empty()
            && self.relationships.is_empty()
    }

    /// Texto para los prompts. El embedding se omite: son cientos de
    /// floats que no aportan nada al modelo.
    pub fn render(&self) -> String {
        let nodes: Vec<String> = self
            .node_properties
            .iter()
            .map(|(label, props)| format!("{label} {}", render_props(props)))
            .collect();
        let rels: Vec<String> = self
            .relationship_properties
            .iter()
            .filter(|(_, props)| !props.is_empty())
            .map(|(rel, props)| format!("{rel} {}", render_props(props)))
            .collect();
        let patterns: Vec<String> = self
            .relationships
            .iter()
            .map(|(from, rel, to)| format!("(:{from})-[:{rel}]->(:{to})"))
            .collect();

        format!(
            "Node properties:\n{}\nRelationship properties:\n{}\nThe relationships:\n{}",
            nodes.join("\n"),
            rels.join("\n"),
            patterns.join("\n")
        )
    }
}

fn render_props(props: &[(String, String)]) -> String {
    let inner: Vec<String> = props
        .iter()
        .filter(|(name, _)| name != EMBEDDING_PROPERTY)
        .map(|(name, ty)| format!("{name}: {ty}"))
        .collect();
    format!("{{{}}}", inner.join(", "))
}
