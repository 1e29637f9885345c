//! Grafo embebido en memoria.
//!
//! Cumple el contrato de `MovieGraph` salvo la ejecución de Cypher libre,
//! que rechaza como no soportada: con este backend todas las preguntas
//! acaban en la búsqueda vectorial. Sirve para arrancar sin Neo4j y para
//! los tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{
    GraphSchema, MovieGraph, ACTED_IN, DIRECTED, EMBEDDING_PROPERTY, GENRE_LABEL, IN_GENRE,
    LANGUAGE_LABEL, MOVIE_LABEL, PERSON_LABEL, WAS_RELEASED_IN,
};
use crate::error::GraphError;
use crate::models::{GraphCounts, MovieProfile, MovieUpsert, ScoredMovie};
use crate::vector_store::VectorIndexSpec;

#[derive(Debug, Clone)]
struct MovieNode {
    id: String,
    tagline: String,
    awards: i64,
    imdb_rating: f64,
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default)]
struct State {
    /// Clave natural: el título.
    movies: BTreeMap<String, MovieNode>,
    people: BTreeSet<String>,
    genres: BTreeSet<String>,
    languages: BTreeSet<String>,
    /// (persona, película)
    directed: BTreeSet<(String, String)>,
    acted_in: BTreeSet<(String, String)>,
    /// (película, género)
    in_genre: BTreeSet<(String, String)>,
    /// (película, idioma)
    released_in: BTreeSet<(String, String)>,
    indexes: BTreeMap<String, VectorIndexSpec>,
}

impl State {
    fn clear_data(&mut self) {
        let indexes = std::mem::take(&mut self.indexes);
        *self = State {
            indexes,
            ..State::default()
        };
    }

    /// MERGE por título + SET de escalares, como en Neo4j.
    fn upsert(&mut self, movie: &MovieUpsert) {
        let previous_embedding = self
            .movies
            .get(&movie.title)
            .and_then(|m| m.embedding.clone());
        self.movies.insert(
            movie.title.clone(),
            MovieNode {
                id: movie.id.clone(),
                tagline: movie.tagline.clone(),
                awards: movie.awards,
                imdb_rating: movie.imdb_rating,
                embedding: previous_embedding,
            },
        );

        for director in &movie.directors {
            self.people.insert(director.clone());
            self.directed.insert((director.clone(), movie.title.clone()));
        }
        for actor in &movie.cast {
            self.people.insert(actor.clone());
            self.acted_in.insert((actor.clone(), movie.title.clone()));
        }
        for genre in &movie.genres {
            self.genres.insert(genre.clone());
            self.in_genre.insert((movie.title.clone(), genre.clone()));
        }
        if let Some(language) = &movie.language {
            self.languages.insert(language.clone());
            self.released_in.insert((movie.title.clone(), language.clone()));
        }
    }

    fn relationship_count(&self) -> usize {
        self.directed.len() + self.acted_in.len() + self.in_genre.len() + self.released_in.len()
    }
}

#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: RwLock<State>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, GraphError> {
        self.state
            .read()
            .map_err(|_| GraphError::Rejected("estado del grafo en memoria envenenado".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, GraphError> {
        self.state
            .write()
            .map_err(|_| GraphError::Rejected("estado del grafo en memoria envenenado".into()))
    }
}

#[async_trait]
impl MovieGraph for MemoryGraph {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), GraphError> {
        self.read().map(|_| ())
    }

    async fn schema(&self) -> Result<GraphSchema, GraphError> {
        let state = self.read()?;
        let mut schema = GraphSchema::default();
        let string = |name: &str| (name.to_string(), "STRING".to_string());

        if !state.movies.is_empty() {
            let mut props = vec![
                string("id"),
                string("title"),
                string("tagline"),
                ("awards".to_string(), "INTEGER".to_string()),
                ("imdbRating".to_string(), "FLOAT".to_string()),
            ];
            if state.movies.values().any(|m| m.embedding.is_some()) {
                props.push((EMBEDDING_PROPERTY.to_string(), "LIST".to_string()));
            }
            schema.node_properties.insert(MOVIE_LABEL.to_string(), props);
        }
        for (label, set) in [
            (PERSON_LABEL, &state.people),
            (GENRE_LABEL, &state.genres),
            (LANGUAGE_LABEL, &state.languages),
        ] {
            if !set.is_empty() {
                schema.node_properties.insert(label.to_string(), vec![string("name")]);
            }
        }

        let patterns = [
            (PERSON_LABEL, DIRECTED, MOVIE_LABEL, state.directed.is_empty()),
            (PERSON_LABEL, ACTED_IN, MOVIE_LABEL, state.acted_in.is_empty()),
            (MOVIE_LABEL, IN_GENRE, GENRE_LABEL, state.in_genre.is_empty()),
            (MOVIE_LABEL, WAS_RELEASED_IN, LANGUAGE_LABEL, state.released_in.is_empty()),
        ];
        for (from, rel, to, empty) in patterns {
            if !empty {
                schema
                    .relationships
                    .push((from.to_string(), rel.to_string(), to.to_string()));
            }
        }
        Ok(schema)
    }

    async fn counts(&self) -> Result<GraphCounts, GraphError> {
        let state = self.read()?;
        let nodes = state.movies.len() + state.people.len() + state.genres.len() + state.languages.len();
        Ok(GraphCounts {
            nodes: nodes as u64,
            relationships: state.relationship_count() as u64,
        })
    }

    async fn ensure_constraints(&self) -> Result<(), GraphError> {
        // Las claves de los mapas ya garantizan la unicidad.
        Ok(())
    }

    async fn replace_movies(&self, wipe: bool, movies: &[MovieUpsert]) -> Result<(), GraphError> {
        let mut state = self.write()?;
        let mut next = state.clone();
        if wipe {
            next.clear_data();
        }
        for movie in movies {
            next.upsert(movie);
        }
        *state = next;
        Ok(())
    }

    async fn vector_index(&self, name: &str) -> Result<Option<VectorIndexSpec>, GraphError> {
        Ok(self.read()?.indexes.get(name).cloned())
    }

    async fn create_vector_index(&self, spec: &VectorIndexSpec) -> Result<(), GraphError> {
        let mut state = self.write()?;
        // IF NOT EXISTS
        state
            .indexes
            .entry(spec.name.clone())
            .or_insert_with(|| spec.clone());
        Ok(())
    }

    async fn set_embeddings(&self, rows: &[(String, Vec<f32>)]) -> Result<usize, GraphError> {
        let mut state = self.write()?;
        let mut updated = 0;
        for (title, embedding) in rows {
            if let Some(movie) = state.movies.get_mut(title) {
                movie.embedding = Some(embedding.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn query_nodes(
        &self,
        index_name: &str,
        k: usize,
        embedding: &[f32],
    ) -> Result<Vec<ScoredMovie>, GraphError> {
        let state = self.read()?;
        let spec = state.indexes.get(index_name).ok_or_else(|| {
            GraphError::Rejected(format!("no existe el índice vectorial '{index_name}'"))
        })?;
        if embedding.len() != spec.dimensions {
            return Err(GraphError::Rejected(format!(
                "el vector de consulta tiene {} dimensiones y el índice {}",
                embedding.len(),
                spec.dimensions
            )));
        }

        let mut scored: Vec<ScoredMovie> = state
            .movies
            .iter()
            .filter_map(|(title, movie)| {
                let vector = movie.embedding.as_ref()?;
                if vector.len() != spec.dimensions {
                    return None;
                }
                Some(ScoredMovie {
                    title: title.clone(),
                    tagline: movie.tagline.clone(),
                    score: spec.similarity.score(embedding, vector),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.title.cmp(&b.title)));
        scored.truncate(k);
        Ok(scored)
    }

    async fn execute_read(&self, _cypher: &str) -> Result<Vec<serde_json::Value>, GraphError> {
        Err(GraphError::Unsupported(
            "el grafo en memoria no ejecuta Cypher".to_string(),
        ))
    }

    async fn movie_profile(&self, title: &str) -> Result<Option<MovieProfile>, GraphError> {
        let state = self.read()?;
        let Some(movie) = state.movies.get(title) else {
            return Ok(None);
        };

        let people_for = |edges: &BTreeSet<(String, String)>| -> Vec<String> {
            edges
                .iter()
                .filter(|(_, m)| m == title)
                .map(|(p, _)| p.clone())
                .collect()
        };
        let targets_of = |edges: &BTreeSet<(String, String)>| -> Vec<String> {
            edges
                .iter()
                .filter(|(m, _)| m == title)
                .map(|(_, t)| t.clone())
                .collect()
        };

        Ok(Some(MovieProfile {
            title: title.to_string(),
            movie_id: Some(movie.id.clone()),
            tagline: Some(movie.tagline.clone()),
            awards: Some(movie.awards),
            imdb_rating: Some(movie.imdb_rating),
            genres: targets_of(&state.in_genre),
            directors: people_for(&state.directed),
            cast: people_for(&state.acted_in),
            languages: targets_of(&state.released_in),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(title: &str, directors: &[&str], genres: &[&str]) -> MovieUpsert {
        MovieUpsert {
            id: format!("id-{title}"),
            title: title.to_string(),
            tagline: format!("tagline de {title}"),
            awards: 1,
            imdb_rating: 7.5,
            directors: directors.iter().map(|s| s.to_string()).collect(),
            cast: vec![],
            genres: genres.iter().map(|s| s.to_string()).collect(),
            language: Some("English".to_string()),
        }
    }

    fn index(dimensions: usize) -> VectorIndexSpec {
        VectorIndexSpec {
            dimensions,
            ..VectorIndexSpec::default()
        }
    }

    #[tokio::test]
    async fn shared_people_and_genres_are_merged() {
        let graph = MemoryGraph::new();
        graph
            .replace_movies(
                false,
                &[
                    upsert("Dunkirk", &["Christopher Nolan"], &["War"]),
                    upsert("Tenet", &["Christopher Nolan"], &["Action", "SciFi"]),
                ],
            )
            .await
            .unwrap();

        let counts = graph.counts().await.unwrap();
        // 2 películas + 1 persona + 3 géneros + 1 idioma
        assert_eq!(counts.nodes, 7);
        // 2 DIRECTED + 3 IN_GENRE + 2 WAS_RELEASED_IN
        assert_eq!(counts.relationships, 7);
    }

    #[tokio::test]
    async fn wipe_keeps_vector_indexes() {
        let graph = MemoryGraph::new();
        graph.create_vector_index(&index(2)).await.unwrap();
        graph
            .replace_movies(false, &[upsert("Heat", &["Michael Mann"], &["Crime"])])
            .await
            .unwrap();
        graph.replace_movies(true, &[]).await.unwrap();

        assert_eq!(graph.counts().await.unwrap(), GraphCounts::default());
        assert!(graph.schema().await.unwrap().is_empty());
        assert!(graph
            .vector_index(&VectorIndexSpec::default().name)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn query_nodes_orders_by_cosine_score() {
        let graph = MemoryGraph::new();
        graph.create_vector_index(&index(2)).await.unwrap();
        graph
            .replace_movies(
                false,
                &[upsert("A", &[], &[]), upsert("B", &[], &[]), upsert("C", &[], &[])],
            )
            .await
            .unwrap();
        graph
            .set_embeddings(&[
                ("A".into(), vec![1.0, 0.0]),
                ("B".into(), vec![0.0, 1.0]),
                ("C".into(), vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = graph.query_nodes("movie_tagline_embeddings", 2, &[1.0, 0.1]).await.unwrap();
        let titles: Vec<&str> = hits.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "C"]);
        assert!(hits[0].score >= hits[1].score);
        assert!(hits[0].score <= 1.0);
    }

    #[tokio::test]
    async fn unknown_index_is_rejected() {
        let graph = MemoryGraph::new();
        let err = graph.query_nodes("nope", 3, &[1.0]).await.unwrap_err();
        assert!(matches!(err, GraphError::Rejected(_)));
    }

    #[tokio::test]
    async fn cypher_execution_is_unsupported() {
        let graph = MemoryGraph::new();
        let err = graph.execute_read("MATCH (n) RETURN n").await.unwrap_err();
        assert!(matches!(err, GraphError::Unsupported(_)));
    }
}
