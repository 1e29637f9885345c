//! Contexto de la aplicación: las conexiones de larga vida (grafo, modelos)
//! y el dataset ya sincronizado. Se construye una vez al arrancar y después
//! sólo se lee, así que se comparte entre peticiones sin bloqueos.
//!
//! Un `Session` sólo existe cuando la preparación (embeddings, refresco del
//! grafo, índice vectorial) terminó bien; eso hace de barrera entre el
//! refresco destructivo y las consultas.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::app_state::{report, Status};
use crate::config::{AppConfig, GraphBackend};
use crate::dataset;
use crate::embeddings;
use crate::error::{GraphError, PipelineError, PipelineResult};
use crate::graph::{MemoryGraph, MovieGraph, Neo4jGraph};
use crate::llm::{Embedder, LanguageModel, LlmManager};
use crate::models::{MovieProfile, MovieRecord, ScoredMovie};
use crate::query_router::{QueryRouter, Strategy};
use crate::retry::RetryPolicy;
use crate::sync::{self, SyncSummary};
use crate::vector_store::{self, VectorIndexSpec};

/// Servicios externos que necesita una sesión.
pub struct SessionParts {
    pub graph: Arc<dyn MovieGraph>,
    pub query_model: Arc<dyn LanguageModel>,
    pub format_model: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    pub policy: RetryPolicy,
}

impl SessionParts {
    /// Conecta el backend de grafo configurado y prepara los modelos.
    pub async fn from_config(cfg: &AppConfig) -> PipelineResult<Self> {
        let policy = RetryPolicy::from_config(cfg);
        let graph: Arc<dyn MovieGraph> = match cfg.graph_backend {
            GraphBackend::Neo4j => {
                let neo4j = cfg
                    .neo4j
                    .as_ref()
                    .ok_or_else(|| PipelineError::Config("faltan las credenciales de Neo4j".to_string()))?;
                let graph = Neo4jGraph::connect(neo4j, policy)
                    .await
                    .map_err(|e| PipelineError::Unavailable(format!("no se pudo conectar a Neo4j: {e:#}")))?;
                Arc::new(graph)
            }
            GraphBackend::Memory => Arc::new(MemoryGraph::new()),
        };

        let llm = LlmManager::from_config(cfg);
        info!(
            "Modelos: proveedor {:?}, Cypher '{}', formateo '{}', embeddings '{}' ({} dims).",
            llm.provider, llm.chat_model, llm.format_model, llm.embedding_model, llm.embedding_dimensions
        );

        Ok(Self {
            graph,
            query_model: Arc::new(llm.query_model()),
            format_model: Arc::new(llm.format_model()),
            embedder: Arc::new(llm.embedder()),
            policy,
        })
    }
}

/// Un turno de conversación ya respondido.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub turn_id: Uuid,
    pub question: String,
    pub answer: String,
    pub strategy: Strategy,
    pub cypher: Option<String>,
    pub matches: Vec<ScoredMovie>,
    pub fallback_reason: Option<String>,
    pub answered_at: DateTime<Utc>,
}

pub struct Session {
    graph: Arc<dyn MovieGraph>,
    router: QueryRouter,
    summary: SyncSummary,
}

impl Session {
    /// Preparación completa a partir de la configuración: carga el dataset,
    /// conecta los servicios y deja el grafo listo para consultas.
    pub async fn configure(cfg: &AppConfig, status: &Mutex<Status>) -> PipelineResult<Self> {
        report(status, "Cargando el dataset...", 0.05);
        let movies = dataset::load(&cfg.dataset_path)?;

        report(status, "Conectando con el grafo y los modelos...", 0.1);
        let parts = SessionParts::from_config(cfg).await?;

        Self::bootstrap(parts, movies, cfg.embedding_concurrency, status).await
    }

    /// Embeddings, refresco del grafo, índice vectorial y backfill, en ese orden.
    pub async fn bootstrap(
        parts: SessionParts,
        mut movies: Vec<MovieRecord>,
        concurrency: usize,
        status: &Mutex<Status>,
    ) -> PipelineResult<Self> {
        report(status, &format!("Calculando embeddings de {} taglines...", movies.len()), 0.2);
        embeddings::embed_all(parts.embedder.as_ref(), &parts.policy, &mut movies, concurrency).await?;

        report(status, "Sincronizando el grafo...", 0.5);
        let summary = sync::sync(parts.graph.as_ref(), &movies).await?;

        report(status, "Preparando el índice vectorial...", 0.8);
        let spec = VectorIndexSpec::with_dimensions(parts.embedder.dimensions());
        vector_store::ensure_index(parts.graph.as_ref(), &spec).await?;
        vector_store::backfill(parts.graph.as_ref(), &movies).await?;

        // El grafo ya no cambia hasta la próxima preparación: el esquema se
        // lee una vez y se reutiliza en cada pregunta.
        let schema = parts.graph.schema().await.map_err(PipelineError::GraphSync)?.render();
        info!("Esquema del grafo listo para el prompt ({} caracteres).", schema.len());

        let router = QueryRouter::new(
            parts.graph.clone(),
            parts.query_model,
            parts.format_model,
            parts.embedder,
            parts.policy,
            spec.name,
            schema,
        );

        Ok(Self {
            graph: parts.graph,
            router,
            summary,
        })
    }

    /// Responde a una pregunta del usuario.
    pub async fn handle_query(&self, question: &str) -> PipelineResult<ChatTurn> {
        let turn_id = Uuid::new_v4();
        let question = question.trim().to_string();

        async move {
            info!("Pregunta recibida: {question}");
            let routed = self.router.route(&question).await?;
            Ok(ChatTurn {
                turn_id,
                question,
                answer: routed.answer,
                strategy: routed.strategy,
                cypher: routed.cypher,
                matches: routed.matches,
                fallback_reason: routed.fallback_reason,
                answered_at: Utc::now(),
            })
        }
        .instrument(info_span!("turn", %turn_id))
        .await
    }

    pub async fn movie_profile(&self, title: &str) -> Result<Option<MovieProfile>, GraphError> {
        self.graph.movie_profile(title).await
    }

    pub fn graph(&self) -> &Arc<dyn MovieGraph> {
        &self.graph
    }

    pub fn summary(&self) -> &SyncSummary {
        &self.summary
    }
}
