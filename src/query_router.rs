//! Enrutado de preguntas.
//!
//! Flujo por pregunta:
//!   1. Estrategia A: el modelo traduce la pregunta a Cypher (esquema leído
//!      al preparar la sesión + ejemplos few-shot), el validador comprueba que sea de sólo lectura,
//!      se ejecuta y el resultado se formatea.
//!   2. Si A falla por cualquier motivo, estrategia B: embedding de la
//!      pregunta y búsqueda de las `TOP_K` películas más parecidas por tagline.
//!
//! A devuelve un `Result` explícito que el router inspecciona; los fallos de
//! B se propagan tal cual, no hay un tercer nivel.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::cypher;
use crate::embeddings;
use crate::error::{ModelError, PipelineError, PipelineResult, QueryGenerationError};
use crate::formatter;
use crate::graph::MovieGraph;
use crate::llm::{Embedder, LanguageModel};
use crate::models::ScoredMovie;
use crate::prompts;
use crate::retry::{with_retry, RetryPolicy};
use crate::vector_store;

/// Respuesta cuando la búsqueda vectorial no encuentra ninguna película.
pub const NO_MATCHES: &str = "No se encontraron películas parecidas a tu pregunta.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    StructuredQuery,
    VectorSimilarity,
}

/// Resultado de la estrategia A.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredAnswer {
    pub cypher: String,
    pub rows: Vec<serde_json::Value>,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedAnswer {
    pub strategy: Strategy,
    pub answer: String,
    pub cypher: Option<String>,
    pub matches: Vec<ScoredMovie>,
    /// Motivo por el que falló la estrategia A, si se usó B.
    pub fallback_reason: Option<String>,
}

pub struct QueryRouter {
    graph: Arc<dyn MovieGraph>,
    query_model: Arc<dyn LanguageModel>,
    format_model: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    policy: RetryPolicy,
    index_name: String,
    /// Esquema ya renderizado. El grafo sólo cambia al preparar la sesión,
    /// así que no se vuelve a leer en cada pregunta.
    schema: String,
}

impl QueryRouter {
    pub fn new(
        graph: Arc<dyn MovieGraph>,
        query_model: Arc<dyn LanguageModel>,
        format_model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        policy: RetryPolicy,
        index_name: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            query_model,
            format_model,
            embedder,
            policy,
            index_name: index_name.into(),
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Responde a una pregunta: siempre A primero, B sólo si A falla.
    pub async fn route(&self, question: &str) -> PipelineResult<RoutedAnswer> {
        match self.structured_query(&self.schema, question).await {
            Ok(answer) => {
                info!(strategy = "structured_query", rows = answer.rows.len(), "Pregunta resuelta con Cypher.");
                Ok(RoutedAnswer {
                    strategy: Strategy::StructuredQuery,
                    answer: answer.answer,
                    cypher: Some(answer.cypher),
                    matches: Vec::new(),
                    fallback_reason: None,
                })
            }
            Err(reason) => {
                warn!("Estrategia A fallida ({reason}); usando búsqueda por similitud.");
                let (answer, matches) = self.similarity_fallback(question, &self.schema).await?;
                info!(strategy = "vector_similarity", rows = matches.len(), "Pregunta resuelta por similitud.");
                Ok(RoutedAnswer {
                    strategy: Strategy::VectorSimilarity,
                    answer,
                    cypher: None,
                    matches,
                    fallback_reason: Some(reason.to_string()),
                })
            }
        }
    }

    /// Estrategia A: genera, valida, ejecuta y formatea una consulta Cypher.
    pub async fn structured_query(
        &self,
        schema: &str,
        question: &str,
    ) -> Result<StructuredAnswer, QueryGenerationError> {
        let prompt = prompts::cypher_generation(schema, question);
        let raw = with_retry(&self.policy, "generación de Cypher", || {
            self.query_model.complete(prompts::CYPHER_PREAMBLE, &prompt)
        })
        .await
        .map_err(QueryGenerationError::Model)?;

        let query = cypher::clean_model_output(&raw);
        if query.is_empty() {
            return Err(QueryGenerationError::EmptyOutput);
        }
        info!(cypher = %query, "Cypher generado.");

        if let Err(reason) = cypher::validate_read_only(&query) {
            warn!("Cypher rechazado: {reason}");
            return Err(QueryGenerationError::Rejected(reason));
        }

        let rows = self
            .graph
            .execute_read(&query)
            .await
            .map_err(QueryGenerationError::Execution)?;
        info!("La consulta devolvió {} filas.", rows.len());

        let answer = formatter::format(
            self.format_model.as_ref(),
            &self.policy,
            question,
            &serde_json::Value::Array(rows.clone()),
            None,
        )
        .await
        .map_err(QueryGenerationError::Formatting)?;

        Ok(StructuredAnswer {
            cypher: query,
            rows,
            answer,
        })
    }

    /// Estrategia B: las `TOP_K` películas con el tagline más parecido a la pregunta.
    pub async fn similarity_fallback(
        &self,
        question: &str,
        schema: &str,
    ) -> PipelineResult<(String, Vec<ScoredMovie>)> {
        let embedding = embeddings::embed(self.embedder.as_ref(), &self.policy, question)
            .await
            .map_err(|e| PipelineError::VectorSearch(format!("embedding de la pregunta: {e}")))?;

        let matches = vector_store::search_similar(self.graph.as_ref(), &self.index_name, &embedding).await?;
        if matches.is_empty() {
            return Ok((NO_MATCHES.to_string(), matches));
        }

        let rows = serde_json::to_value(&matches)
            .map_err(|e| PipelineError::Formatting(ModelError::Failed(e.to_string())))?;
        let answer = formatter::format(self.format_model.as_ref(), &self.policy, question, &rows, Some(schema))
            .await
            .map_err(PipelineError::Formatting)?;

        Ok((answer, matches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::graph::GraphSchema;
    use crate::models::{GraphCounts, MovieProfile, MovieUpsert};
    use crate::vector_store::VectorIndexSpec;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const SCHEMA: &str = "Node properties:\nMovie {title: STRING, tagline: STRING}\nThe relationships:\n(:Person)-[:DIRECTED]->(:Movie)";

    const INCEPTION: &str = "MATCH (m:Movie {title: 'Inception'})
OPTIONAL MATCH (m)-[:IN_GENRE]->(g:Genre)
OPTIONAL MATCH (p:Person)-[:DIRECTED]->(m)
RETURN collect(DISTINCT g.name) AS genres, collect(DISTINCT p.name) AS directors";

    /// Grafo de pega: devuelve filas fijas y recuerda qué Cypher se ejecutó.
    struct StubGraph {
        rows: Result<Vec<serde_json::Value>, GraphError>,
        hits: Vec<ScoredMovie>,
        executed: Mutex<Vec<String>>,
        schema_reads: AtomicUsize,
    }

    impl StubGraph {
        fn new(rows: Result<Vec<serde_json::Value>, GraphError>) -> Self {
            Self {
                rows,
                hits: vec![
                    hit("Heat", 0.71),
                    hit("Inception", 0.93),
                    hit("Alien", 0.80),
                ],
                executed: Mutex::new(Vec::new()),
                schema_reads: AtomicUsize::new(0),
            }
        }
    }

    fn hit(title: &str, score: f64) -> ScoredMovie {
        ScoredMovie {
            title: title.to_string(),
            tagline: format!("tagline {title}"),
            score,
        }
    }

    #[async_trait]
    impl MovieGraph for StubGraph {
        fn backend_name(&self) -> &'static str {
            "stub"
        }
        async fn ping(&self) -> Result<(), GraphError> {
            Ok(())
        }
        async fn schema(&self) -> Result<GraphSchema, GraphError> {
            self.schema_reads.fetch_add(1, Ordering::SeqCst);
            Ok(GraphSchema::default())
        }
        async fn counts(&self) -> Result<GraphCounts, GraphError> {
            Ok(GraphCounts::default())
        }
        async fn ensure_constraints(&self) -> Result<(), GraphError> {
            Ok(())
        }
        async fn replace_movies(&self, _wipe: bool, _movies: &[MovieUpsert]) -> Result<(), GraphError> {
            Ok(())
        }
        async fn vector_index(&self, _name: &str) -> Result<Option<VectorIndexSpec>, GraphError> {
            Ok(Some(VectorIndexSpec::default()))
        }
        async fn create_vector_index(&self, _spec: &VectorIndexSpec) -> Result<(), GraphError> {
            Ok(())
        }
        async fn set_embeddings(&self, rows: &[(String, Vec<f32>)]) -> Result<usize, GraphError> {
            Ok(rows.len())
        }
        async fn query_nodes(
            &self,
            _index_name: &str,
            k: usize,
            _embedding: &[f32],
        ) -> Result<Vec<ScoredMovie>, GraphError> {
            assert_eq!(k, vector_store::TOP_K);
            Ok(self.hits.clone())
        }
        async fn execute_read(&self, cypher: &str) -> Result<Vec<serde_json::Value>, GraphError> {
            self.executed.lock().unwrap().push(cypher.to_string());
            self.rows.clone()
        }
        async fn movie_profile(&self, _title: &str) -> Result<Option<MovieProfile>, GraphError> {
            Ok(None)
        }
    }

    /// Siempre responde lo mismo.
    struct Scripted(Result<String, ModelError>);

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn complete(&self, _preamble: &str, _prompt: &str) -> Result<String, ModelError> {
            self.0.clone()
        }
    }

    /// Devuelve el prompt tal cual; así el test ve qué datos recibió el formateador.
    struct Echo;

    #[async_trait]
    impl LanguageModel for Echo {
        async fn complete(&self, _preamble: &str, prompt: &str) -> Result<String, ModelError> {
            Ok(prompt.to_string())
        }
    }

    /// Guarda cada prompt recibido y responde siempre lo mismo.
    struct Recording {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for Recording {
        async fn complete(&self, _preamble: &str, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct FixedEmbedder(Result<Vec<f32>, ModelError>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
            self.0.clone()
        }
    }

    fn router(graph: Arc<StubGraph>, generated: Result<String, ModelError>) -> QueryRouter {
        QueryRouter::new(
            graph,
            Arc::new(Scripted(generated)),
            Arc::new(Echo),
            Arc::new(FixedEmbedder(Ok(vec![1.0, 0.0]))),
            RetryPolicy::once(Duration::from_secs(1)),
            vector_store::INDEX_NAME,
            SCHEMA,
        )
    }

    #[tokio::test]
    async fn valid_query_is_answered_with_cypher() {
        let graph = Arc::new(StubGraph::new(Ok(vec![json!({"directors": ["Christopher Nolan"]})])));
        let generated = "```cypher\nMATCH (p:Person)-[:DIRECTED]->(m:Movie {title: 'Inception'}) RETURN collect(p.name) AS directors\n```";

        let answer = router(graph.clone(), Ok(generated.to_string()))
            .route("Who directed Inception?")
            .await
            .unwrap();

        assert_eq!(answer.strategy, Strategy::StructuredQuery);
        assert!(answer.cypher.unwrap().starts_with("MATCH (p:Person)"));
        assert!(answer.answer.contains("Christopher Nolan"));
        assert!(answer.matches.is_empty());
        assert_eq!(graph.executed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_generation_falls_back_to_similarity() {
        let graph = Arc::new(StubGraph::new(Ok(Vec::new())));

        let answer = router(graph.clone(), Ok("  ".to_string()))
            .route("Something like a dream heist")
            .await
            .unwrap();

        assert_eq!(answer.strategy, Strategy::VectorSimilarity);
        assert!(answer.cypher.is_none());
        let titles: Vec<&str> = answer.matches.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Inception", "Alien", "Heat"]);
        assert!(answer.answer.contains("Inception"));
        assert!(answer.fallback_reason.unwrap().contains("no devolvió"));
        assert!(graph.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn destructive_queries_are_never_executed() {
        let graph = Arc::new(StubGraph::new(Ok(Vec::new())));

        let answer = router(graph.clone(), Ok("MATCH (n) DETACH DELETE n".to_string()))
            .route("Delete everything")
            .await
            .unwrap();

        assert_eq!(answer.strategy, Strategy::VectorSimilarity);
        assert!(graph.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn execution_errors_fall_back() {
        let graph = Arc::new(StubGraph::new(Err(GraphError::Rejected("SyntaxError".into()))));

        let answer = router(graph.clone(), Ok("MATCH (m:Movie) RETURN m.title".to_string()))
            .route("Any movie?")
            .await
            .unwrap();

        assert_eq!(answer.strategy, Strategy::VectorSimilarity);
        assert_eq!(graph.executed.lock().unwrap().len(), 1);
        assert!(answer.fallback_reason.unwrap().contains("SyntaxError"));
    }

    #[tokio::test]
    async fn model_failure_falls_back() {
        let graph = Arc::new(StubGraph::new(Ok(Vec::new())));
        let answer = router(graph, Err(ModelError::Failed("model not found".into())))
            .route("Any movie?")
            .await
            .unwrap();
        assert_eq!(answer.strategy, Strategy::VectorSimilarity);
    }

    #[tokio::test]
    async fn similarity_failures_propagate() {
        let graph = Arc::new(StubGraph::new(Ok(Vec::new())));
        let router = QueryRouter::new(
            graph,
            Arc::new(Scripted(Ok(String::new()))),
            Arc::new(Echo),
            Arc::new(FixedEmbedder(Err(ModelError::Failed("embedding model missing".into())))),
            RetryPolicy::once(Duration::from_secs(1)),
            vector_store::INDEX_NAME,
            SCHEMA,
        );

        let err = router.route("Any movie?").await.unwrap_err();
        assert!(matches!(err, PipelineError::VectorSearch(_)));
        assert!(err.to_string().contains("embedding model missing"));
    }

    #[tokio::test]
    async fn no_hits_yield_the_fixed_message() {
        let mut stub = StubGraph::new(Ok(Vec::new()));
        stub.hits.clear();

        let answer = router(Arc::new(stub), Ok(String::new()))
            .route("Anything?")
            .await
            .unwrap();

        assert_eq!(answer.answer, NO_MATCHES);
        assert!(answer.matches.is_empty());
    }

    #[tokio::test]
    async fn inception_genres_and_directors_come_back_as_rows() {
        let rows = vec![json!({"genres": ["Sci-Fi", "Thriller"], "directors": ["Christopher Nolan"]})];
        let graph = Arc::new(StubGraph::new(Ok(rows.clone())));
        let router = router(graph.clone(), Ok(INCEPTION.to_string()));

        let answer = router
            .structured_query(router.schema(), "Which genres is Inception and who directed it?")
            .await
            .unwrap();

        assert_eq!(answer.cypher, INCEPTION);
        assert_eq!(answer.rows, rows);
        assert_eq!(answer.rows[0]["genres"], json!(["Sci-Fi", "Thriller"]));
        assert_eq!(answer.rows[0]["directors"], json!(["Christopher Nolan"]));
        assert!(answer.answer.contains("Christopher Nolan"));
        assert_eq!(*graph.executed.lock().unwrap(), vec![INCEPTION.to_string()]);

        let routed = router.route("Which genres is Inception and who directed it?").await.unwrap();
        assert_eq!(routed.strategy, Strategy::StructuredQuery);
        assert_eq!(routed.cypher.as_deref(), Some(INCEPTION));
    }

    #[tokio::test]
    async fn questions_reuse_the_schema_rendered_at_setup() {
        let graph = Arc::new(StubGraph::new(Ok(vec![json!({"title": "Heat"})])));
        let query_model = Arc::new(Recording {
            reply: "MATCH (m:Movie) RETURN m.title AS title".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let router = QueryRouter::new(
            graph.clone(),
            query_model.clone(),
            Arc::new(Echo),
            Arc::new(FixedEmbedder(Ok(vec![1.0, 0.0]))),
            RetryPolicy::once(Duration::from_secs(1)),
            vector_store::INDEX_NAME,
            SCHEMA,
        );

        for question in ["Any movie?", "Another movie?", "One more?"] {
            router.route(question).await.unwrap();
        }

        assert_eq!(graph.schema_reads.load(Ordering::SeqCst), 0);
        let prompts = query_model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts.iter().all(|p| p.contains("(:Person)-[:DIRECTED]->(:Movie)")));
    }
}
