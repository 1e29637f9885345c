//! Prueba contra un Neo4j real. BORRA el contenido de la base de datos.
//!
//! NEO4J_URI=bolt://localhost:7687 NEO4J_USER=neo4j NEO4J_PASSWORD=... \
//!     cargo test --test neo4j_integration -- --ignored

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use neo4j_movie_recs_webapp::app_state::Status;
use neo4j_movie_recs_webapp::config::Neo4jConfig;
use neo4j_movie_recs_webapp::error::ModelError;
use neo4j_movie_recs_webapp::graph::{MovieGraph, Neo4jGraph};
use neo4j_movie_recs_webapp::llm::{Embedder, LanguageModel};
use neo4j_movie_recs_webapp::models::MovieRecord;
use neo4j_movie_recs_webapp::query_router::Strategy;
use neo4j_movie_recs_webapp::retry::RetryPolicy;
use neo4j_movie_recs_webapp::session::{Session, SessionParts};

const INCEPTION_QUERY: &str = "MATCH (m:Movie {title: 'Inception'})
OPTIONAL MATCH (m)-[:IN_GENRE]->(g:Genre)
OPTIONAL MATCH (p:Person)-[:DIRECTED]->(m)
RETURN collect(DISTINCT g.name) AS genres, collect(DISTINCT p.name) AS directors";

struct Letters;

#[async_trait]
impl Embedder for Letters {
    fn dimensions(&self) -> usize {
        384
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let mut vector = vec![0.0f32; 384];
        for (i, b) in text.bytes().enumerate() {
            vector[(usize::from(b) + i) % 384] += 1.0;
        }
        vector[0] += 1.0;
        Ok(vector)
    }
}

struct Scripted(&'static str);

#[async_trait]
impl LanguageModel for Scripted {
    async fn complete(&self, _preamble: &str, prompt: &str) -> Result<String, ModelError> {
        // El formateador recibe las filas; se devuelven tal cual.
        if prompt.contains("format the response") {
            Ok(prompt.to_string())
        } else {
            Ok(self.0.to_string())
        }
    }
}

fn neo4j_from_env() -> Option<Neo4jConfig> {
    Some(Neo4jConfig {
        uri: std::env::var("NEO4J_URI").ok()?,
        user: std::env::var("NEO4J_USER")
            .or_else(|_| std::env::var("NEO4J_USERNAME"))
            .unwrap_or_else(|_| "neo4j".into()),
        password: std::env::var("NEO4J_PASSWORD").ok()?,
    })
}

#[tokio::test]
#[ignore = "necesita un servidor Neo4j (NEO4J_URI, NEO4J_PASSWORD)"]
async fn inception_end_to_end_on_neo4j() {
    let cfg = neo4j_from_env().expect("NEO4J_URI y NEO4J_PASSWORD");
    let policy = RetryPolicy::once(Duration::from_secs(30));
    let graph = Arc::new(Neo4jGraph::connect(&cfg, policy).await.unwrap());

    let inception = MovieRecord {
        movie_id: "tt1375666".into(),
        title: "Inception".into(),
        tagline: "Your mind is the scene of the crime.".into(),
        awards: 4,
        imdb_rating: 8.8,
        directors: "Christopher Nolan".into(),
        cast: "Leonardo DiCaprio|Elliot Page".into(),
        genres: "Sci-Fi|Thriller".into(),
        languages: "English".into(),
        tagline_embedding: None,
    };

    let parts = SessionParts {
        graph: graph.clone(),
        query_model: Arc::new(Scripted(INCEPTION_QUERY)),
        format_model: Arc::new(Scripted("")),
        embedder: Arc::new(Letters),
        policy,
    };
    let status = Mutex::new(Status::default());
    let session = match Session::bootstrap(parts, vec![inception], 1, &status).await {
        Ok(session) => session,
        Err(err) => panic!("bootstrap: {err}"),
    };

    let rows = graph.execute_read(INCEPTION_QUERY).await.unwrap();
    assert_eq!(rows.len(), 1);
    let mut genres: Vec<String> = serde_json::from_value(rows[0]["genres"].clone()).unwrap();
    genres.sort();
    assert_eq!(genres, vec!["Sci-Fi", "Thriller"]);
    assert_eq!(rows[0]["directors"], serde_json::json!(["Christopher Nolan"]));

    // Nodos, números y nulos también se convierten a JSON.
    let rows = graph
        .execute_read(
            "MATCH (m:Movie {title: 'Inception'}) RETURN m, m.imdbRating AS rating, m.awards AS awards, m.missing AS missing",
        )
        .await
        .unwrap();
    assert_eq!(rows[0]["m"]["title"], "Inception");
    assert!(rows[0]["m"].get("taglineEmbedding").is_none());
    assert_eq!(rows[0]["rating"], serde_json::json!(8.8));
    assert_eq!(rows[0]["awards"], serde_json::json!(4));
    assert!(rows[0]["missing"].is_null());

    let turn = session.handle_query("Which genres is Inception and who directed it?").await.unwrap();
    assert_eq!(turn.strategy, Strategy::StructuredQuery);
    assert!(turn.answer.contains("Christopher Nolan"));

    let profile = session.movie_profile("Inception").await.unwrap().unwrap();
    assert_eq!(profile.directors, vec!["Christopher Nolan"]);
}
