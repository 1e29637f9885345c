//! Implementación de `MovieGraph` sobre Neo4j (driver `neo4rs`).
//!
//! Todas las consultas van parametrizadas; sólo los nombres del índice
//! vectorial se interpolan, y `VectorIndexSpec::validate` los restringe a
//! identificadores simples.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use neo4rs::{query, Graph, Node, Query, Relation, Row, Txn};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use super::{GraphSchema, MovieGraph, EMBEDDING_PROPERTY};
use crate::config::Neo4jConfig;
use crate::cypher;
use crate::error::GraphError;
use crate::models::{GraphCounts, MovieProfile, MovieUpsert, ScoredMovie};
use crate::retry::{with_retry, RetryPolicy};
use crate::vector_store::{Similarity, VectorIndexSpec};

const UPSERT_MOVIE: &str = "
MERGE (m:Movie {title: $title})
SET m.id = $id,
    m.tagline = $tagline,
    m.awards = $awards,
    m.imdbRating = toFloat($imdb_rating)
FOREACH (director IN $directors |
    MERGE (p:Person {name: director})
    MERGE (p)-[:DIRECTED]->(m))
FOREACH (actor IN $cast |
    MERGE (p:Person {name: actor})
    MERGE (p)-[:ACTED_IN]->(m))
FOREACH (genre IN $genres |
    MERGE (g:Genre {name: genre})
    MERGE (m)-[:IN_GENRE]->(g))
FOREACH (language IN $languages |
    MERGE (l:Language {name: language})
    MERGE (m)-[:WAS_RELEASED_IN]->(l))";

const MOVIE_PROFILE: &str = "
MATCH (m:Movie {title: $title})
OPTIONAL MATCH (m)-[:IN_GENRE]->(g:Genre)
OPTIONAL MATCH (d:Person)-[:DIRECTED]->(m)
OPTIONAL MATCH (a:Person)-[:ACTED_IN]->(m)
OPTIONAL MATCH (m)-[:WAS_RELEASED_IN]->(l:Language)
RETURN m.title AS title, m.id AS id, m.tagline AS tagline, m.awards AS awards,
       m.imdbRating AS imdbRating,
       collect(DISTINCT g.name) AS genres, collect(DISTINCT d.name) AS directors,
       collect(DISTINCT a.name) AS cast, collect(DISTINCT l.name) AS languages";

const SHOW_VECTOR_INDEX: &str = "
SHOW VECTOR INDEXES YIELD name, labelsOrTypes, properties, options
WHERE name = $name
RETURN name, labelsOrTypes[0] AS label, properties[0] AS property,
       options.indexConfig['vector.dimensions'] AS dimensions,
       options.indexConfig['vector.similarity_function'] AS similarity";

pub async fn connect_from_config(cfg: &Neo4jConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.user, &cfg.password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

#[derive(Clone)]
pub struct Neo4jGraph {
    graph: Arc<Graph>,
    policy: RetryPolicy,
}

impl Neo4jGraph {
    pub fn new(graph: Arc<Graph>, policy: RetryPolicy) -> Self {
        Self { graph, policy }
    }

    pub async fn connect(cfg: &Neo4jConfig, policy: RetryPolicy) -> Result<Self> {
        let graph = connect_from_config(cfg).await?;
        Ok(Self::new(Arc::new(graph), policy))
    }

    async fn run(&self, operation: &str, make: impl Fn() -> Query) -> Result<(), GraphError> {
        let make = &make;
        with_retry(&self.policy, operation, || async move {
            self.graph.run(make()).await.map_err(GraphError::from)
        })
        .await
    }

    /// Ejecuta la consulta y materializa las filas con `extract`.
    async fn fetch<T>(
        &self,
        operation: &str,
        make: impl Fn() -> Query,
        extract: impl Fn(&neo4rs::Row) -> Result<T, GraphError>,
    ) -> Result<Vec<T>, GraphError> {
        let (make, extract) = (&make, &extract);
        with_retry(&self.policy, operation, || async move {
            let mut cursor = self.graph.execute(make()).await?;
            let mut rows = Vec::new();
            while let Some(row) = cursor.next().await? {
                rows.push(extract(&row)?);
            }
            Ok::<_, GraphError>(rows)
        })
        .await
    }

    async fn replace_once(&self, wipe: bool, movies: &[MovieUpsert]) -> Result<(), GraphError> {
        let tx = self.graph.start_txn().await?;
        match write_movies(&tx, wipe, movies).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                // Sin commit no queda nada a medias.
                if let Err(rollback_err) = tx.rollback().await {
                    debug!("Rollback fallido tras error de sincronización: {rollback_err}");
                }
                Err(err)
            }
        }
    }
}

async fn write_movies(tx: &Txn, wipe: bool, movies: &[MovieUpsert]) -> Result<(), GraphError> {
    if wipe {
        tx.run(query("MATCH (n) DETACH DELETE n")).await?;
    }

    for movie in movies {
        let languages: Vec<String> = movie.language.iter().cloned().collect();
        tx.run(
            query(UPSERT_MOVIE)
                .param("title", movie.title.clone())
                .param("id", movie.id.clone())
                .param("tagline", movie.tagline.clone())
                .param("awards", movie.awards)
                .param("imdb_rating", movie.imdb_rating)
                .param("directors", movie.directors.clone())
                .param("cast", movie.cast.clone())
                .param("genres", movie.genres.clone())
                .param("languages", languages),
        )
        .await?;
    }
    Ok(())
}

#[async_trait]
impl MovieGraph for Neo4jGraph {
    fn backend_name(&self) -> &'static str {
        "neo4j"
    }

    async fn ping(&self) -> Result<(), GraphError> {
        self.run("ping", || query("RETURN 1")).await
    }

    async fn schema(&self) -> Result<GraphSchema, GraphError> {
        let mut schema = GraphSchema::default();

        let node_props = self
            .fetch(
                "esquema de nodos",
                || {
                    query(
                        "CALL db.schema.nodeTypeProperties()
                         YIELD nodeLabels, propertyName, propertyTypes
                         RETURN nodeLabels, propertyName, propertyTypes",
                    )
                },
                |row| {
                    Ok((
                        row.get::<Vec<String>>("nodeLabels").unwrap_or_default(),
                        row.get::<String>("propertyName"),
                        row.get::<Vec<String>>("propertyTypes").unwrap_or_default(),
                    ))
                },
            )
            .await?;
        for (labels, property, types) in node_props {
            for label in labels {
                let entry = schema.node_properties.entry(label).or_default();
                if let Some(property) = &property {
                    entry.push((property.clone(), normalize_type(&types)));
                }
            }
        }

        let rel_props = self
            .fetch(
                "esquema de relaciones",
                || {
                    query(
                        "CALL db.schema.relTypeProperties()
                         YIELD relType, propertyName, propertyTypes
                         RETURN relType, propertyName, propertyTypes",
                    )
                },
                |row| {
                    Ok((
                        row.get::<String>("relType").unwrap_or_default(),
                        row.get::<String>("propertyName"),
                        row.get::<Vec<String>>("propertyTypes").unwrap_or_default(),
                    ))
                },
            )
            .await?;
        for (rel_type, property, types) in rel_props {
            // Llega como ":`DIRECTED`"
            let rel_type = rel_type.trim_start_matches(':').trim_matches('`').to_string();
            let entry = schema.relationship_properties.entry(rel_type).or_default();
            if let Some(property) = property {
                entry.push((property, normalize_type(&types)));
            }
        }

        schema.relationships = self
            .fetch(
                "patrones de relaciones",
                || {
                    query(
                        "MATCH (a)-[r]->(b)
                         WITH DISTINCT labels(a)[0] AS source, type(r) AS rel, labels(b)[0] AS target
                         RETURN source, rel, target
                         ORDER BY source, rel, target",
                    )
                },
                |row| {
                    Ok((
                        row.get::<String>("source").unwrap_or_default(),
                        row.get::<String>("rel").unwrap_or_default(),
                        row.get::<String>("target").unwrap_or_default(),
                    ))
                },
            )
            .await?;

        for props in schema.node_properties.values_mut() {
            props.sort();
            props.dedup();
        }
        Ok(schema)
    }

    async fn counts(&self) -> Result<GraphCounts, GraphError> {
        let counts = self
            .fetch(
                "recuento",
                || {
                    query(
                        "CALL { MATCH (n) RETURN count(n) AS nodes }
                         CALL { MATCH ()-[r]->() RETURN count(r) AS relationships }
                         RETURN nodes, relationships",
                    )
                },
                |row| {
                    Ok(GraphCounts {
                        nodes: row.get::<i64>("nodes").unwrap_or_default().max(0) as u64,
                        relationships: row.get::<i64>("relationships").unwrap_or_default().max(0) as u64,
                    })
                },
            )
            .await?;
        Ok(counts.into_iter().next().unwrap_or_default())
    }

    async fn ensure_constraints(&self) -> Result<(), GraphError> {
        let statements = [
            // Movie.title único: la clave natural del dataset
            "CREATE CONSTRAINT movie_title IF NOT EXISTS
             FOR (m:Movie)
             REQUIRE m.title IS UNIQUE",
            "CREATE CONSTRAINT person_name IF NOT EXISTS
             FOR (p:Person)
             REQUIRE p.name IS UNIQUE",
            "CREATE CONSTRAINT genre_name IF NOT EXISTS
             FOR (g:Genre)
             REQUIRE g.name IS UNIQUE",
            "CREATE CONSTRAINT language_name IF NOT EXISTS
             FOR (l:Language)
             REQUIRE l.name IS UNIQUE",
        ];

        for stmt in statements {
            self.run("constraint", || query(stmt)).await?;
        }

        info!("Esquema de Neo4j asegurado (constraints de unicidad creados).");
        Ok(())
    }

    async fn replace_movies(&self, wipe: bool, movies: &[MovieUpsert]) -> Result<(), GraphError> {
        // Una transacción grande necesita más margen que una llamada suelta.
        let scale = 1 + u32::try_from(movies.len() / 100).unwrap_or(u32::MAX);
        let policy = RetryPolicy {
            call_timeout: self.policy.call_timeout.saturating_mul(scale),
            ..self.policy
        };
        with_retry(&policy, "refresco del grafo", || self.replace_once(wipe, movies)).await
    }

    async fn vector_index(&self, name: &str) -> Result<Option<VectorIndexSpec>, GraphError> {
        let found = self
            .fetch(
                "consulta de índices",
                || query(SHOW_VECTOR_INDEX).param("name", name.to_string()),
                |row| {
                    let similarity = row.get::<String>("similarity").unwrap_or_default();
                    let similarity = Similarity::from_neo4j(&similarity).ok_or_else(|| {
                        GraphError::Rejected(format!(
                            "el índice '{name}' usa una similitud no soportada: '{similarity}'"
                        ))
                    })?;
                    let dimensions = row.get::<i64>("dimensions").unwrap_or_default();
                    Ok(VectorIndexSpec {
                        name: row.get::<String>("name").unwrap_or_default(),
                        label: row.get::<String>("label").unwrap_or_default(),
                        property: row.get::<String>("property").unwrap_or_default(),
                        dimensions: usize::try_from(dimensions).unwrap_or_default(),
                        similarity,
                    })
                },
            )
            .await?;
        Ok(found.into_iter().next())
    }

    async fn create_vector_index(&self, spec: &VectorIndexSpec) -> Result<(), GraphError> {
        spec.validate().map_err(GraphError::Rejected)?;

        let cypher = format!(
            "\
CREATE VECTOR INDEX {name} IF NOT EXISTS
FOR (m:{label})
ON (m.{property})
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: '{similarity}'
  }}
}}",
            name = spec.name,
            label = spec.label,
            property = spec.property,
            dimensions = spec.dimensions,
            similarity = spec.similarity.as_neo4j(),
        );

        self.run("creación de índice", || query(&cypher)).await
    }

    async fn set_embeddings(&self, rows: &[(String, Vec<f32>)]) -> Result<usize, GraphError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let titles: Vec<String> = rows.iter().map(|(t, _)| t.clone()).collect();
        let embeddings: Vec<Vec<f64>> = rows
            .iter()
            .map(|(_, e)| e.iter().map(|v| f64::from(*v)).collect())
            .collect();
        let cypher = format!(
            "UNWIND range(0, size($titles) - 1) AS i
             MATCH (m:Movie {{title: $titles[i]}})
             CALL db.create.setNodeVectorProperty(m, '{EMBEDDING_PROPERTY}', $embeddings[i])
             RETURN count(m) AS updated"
        );

        let updated = self
            .fetch(
                "asignación de embeddings",
                || {
                    query(&cypher)
                        .param("titles", titles.clone())
                        .param("embeddings", embeddings.clone())
                },
                |row| Ok(row.get::<i64>("updated").unwrap_or_default()),
            )
            .await?;
        Ok(updated.into_iter().sum::<i64>().max(0) as usize)
    }

    async fn query_nodes(
        &self,
        index_name: &str,
        k: usize,
        embedding: &[f32],
    ) -> Result<Vec<ScoredMovie>, GraphError> {
        let vector: Vec<f64> = embedding.iter().map(|v| f64::from(*v)).collect();
        self.fetch(
            "búsqueda vectorial",
            || {
                query(
                    "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                     YIELD node AS movie, score
                     RETURN movie.title AS title, movie.tagline AS tagline, score
                     ORDER BY score DESC",
                )
                .param("index_name", index_name.to_string())
                .param("k", k as i64)
                .param("embedding", vector.clone())
            },
            |row| {
                let title: String = row
                    .get("title")
                    .ok_or_else(|| GraphError::Rejected("Falta campo 'title' en resultado de Neo4j".into()))?;
                let score: f64 = row
                    .get("score")
                    .ok_or_else(|| GraphError::Rejected("Falta campo 'score' en resultado de Neo4j".into()))?;
                let tagline: String = row.get("tagline").unwrap_or_default();
                Ok(ScoredMovie { title, tagline, score })
            },
        )
        .await
    }

    async fn execute_read(&self, cypher_text: &str) -> Result<Vec<Value>, GraphError> {
        let columns = cypher::return_columns(cypher_text);
        if columns.is_empty() {
            return Err(GraphError::Rejected(
                "no se pudieron determinar las columnas del RETURN".to_string(),
            ));
        }

        // Las consultas generadas no se reintentan: un error semántico se
        // repetiría igual y uno transitorio lo cubre la estrategia B.
        let run = async {
            let mut cursor = self.graph.execute(query(cypher_text)).await?;
            let mut rows = Vec::new();
            while let Some(row) = cursor.next().await? {
                let object: serde_json::Map<String, Value> = columns
                    .iter()
                    .map(|col| {
                        (col.clone(), column_to_json(&row, col))
                    })
                    .collect();
                rows.push(Value::Object(object));
            }
            Ok::<_, GraphError>(rows)
        };

        match tokio::time::timeout(self.policy.call_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(GraphError::Transient(format!(
                "consulta generada: timeout tras {:?}",
                self.policy.call_timeout
            ))),
        }
    }

    async fn movie_profile(&self, title: &str) -> Result<Option<MovieProfile>, GraphError> {
        let profiles = self
            .fetch(
                "perfil de película",
                || query(MOVIE_PROFILE).param("title", title.to_string()),
                |row| {
                    let sorted = |key: &str| {
                        let mut values = row.get::<Vec<String>>(key).unwrap_or_default();
                        values.sort();
                        values
                    };
                    Ok(MovieProfile {
                        title: row.get::<String>("title").unwrap_or_default(),
                        movie_id: row.get::<String>("id"),
                        tagline: row.get::<String>("tagline"),
                        awards: row.get::<i64>("awards"),
                        imdb_rating: row.get::<f64>("imdbRating"),
                        genres: sorted("genres"),
                        directors: sorted("directors"),
                        cast: sorted("cast"),
                        languages: sorted("languages"),
                    })
                },
            )
            .await?;
        Ok(profiles.into_iter().next())
    }
}

/// "String" -> "STRING", "Long" -> "INTEGER", ... como en los prompts de text2cypher.
fn normalize_type(types: &[String]) -> String {
    let Some(first) = types.first() else {
        return "ANY".to_string();
    };
    match first.as_str() {
        "String" => "STRING",
        "Long" | "Integer" => "INTEGER",
        "Double" | "Float" => "FLOAT",
        "Boolean" => "BOOLEAN",
        t if t.ends_with("Array") || t.starts_with("List") || t.starts_with("Vector") => "LIST",
        other => return other.to_uppercase(),
    }
    .to_string()
}

/// Propiedades que se copian de un nodo devuelto por una consulta generada.
/// El driver no enumera las claves de un nodo, así que se leen las del
/// modelo de películas; el embedding queda fuera.
const NODE_PROPERTIES: [&str; 6] = ["title", "name", "id", "tagline", "awards", "imdbRating"];

/// Prueba los tipos que producen las consultas de películas, de escalares a
/// listas homogéneas. `$source` es un `Row` o un `Node`.
macro_rules! decode_value {
    ($source:expr, $key:expr) => {{
        let (source, key) = ($source, $key);
        source
            .get::<String>(key)
            .map(Value::from)
            .or_else(|| source.get::<i64>(key).map(Value::from))
            .or_else(|| source.get::<f64>(key).map(Value::from))
            .or_else(|| source.get::<bool>(key).map(Value::from))
            .or_else(|| source.get::<Vec<String>>(key).map(Value::from))
            .or_else(|| source.get::<Vec<i64>>(key).map(Value::from))
            .or_else(|| source.get::<Vec<f64>>(key).map(Value::from))
            .or_else(|| source.get::<Vec<bool>>(key).map(Value::from))
    }};
}

/// Valor JSON de una columna. Lo que no se sabe convertir (mapas, listas
/// mixtas, fechas, nulos) queda como `null`.
fn column_to_json(row: &Row, column: &str) -> Value {
    if let Some(value) = decode_value!(row, column) {
        return value;
    }
    if let Some(node) = row.get::<Node>(column) {
        return node_to_json(&node);
    }
    if let Some(nodes) = row.get::<Vec<Node>>(column) {
        return Value::Array(nodes.iter().map(node_to_json).collect());
    }
    if let Some(relation) = row.get::<Relation>(column) {
        return json!({ "type": relation.typ() });
    }
    Value::Null
}

fn node_to_json(node: &Node) -> Value {
    let properties: serde_json::Map<String, Value> = NODE_PROPERTIES
        .iter()
        .filter_map(|key| decode_value!(node, *key).map(|value| (key.to_string(), value)))
        .collect();
    Value::Object(properties)
}
