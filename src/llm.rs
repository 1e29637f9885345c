//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//!
//! Hay dos roles de chat (generación de Cypher y formateo de respuestas) y un
//! modelo de embeddings. El resto del pipeline sólo ve los traits
//! `LanguageModel` y `Embedder`, así los tests pueden sustituirlos.

use async_trait::async_trait;
use rig::client::{CompletionClient as _, EmbeddingsClient as _, ProviderClient as _};
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel as _;
use rig::providers::{gemini, ollama, openai};

use crate::config::{AppConfig, LlmProvider};
use crate::error::ModelError;

/// Un modelo que completa texto a partir de un preámbulo y un prompt.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, ModelError>;
}

/// Un modelo que convierte texto en un vector de longitud fija.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    pub format_model: String,
    pub embedding_dimensions: usize,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            format_model: cfg.llm_format_model.clone(),
            embedding_dimensions: cfg.embedding_dimensions,
        }
    }

    /// Modelo para traducir preguntas a Cypher. Temperatura 0: queremos
    /// la misma consulta para la misma pregunta.
    pub fn query_model(&self) -> RigChatModel {
        RigChatModel {
            provider: self.provider.clone(),
            model: self.chat_model.clone(),
            temperature: 0.0,
        }
    }

    /// Modelo para reescribir resultados en prosa.
    pub fn format_model(&self) -> RigChatModel {
        RigChatModel {
            provider: self.provider.clone(),
            model: self.format_model.clone(),
            temperature: 0.2,
        }
    }

    pub fn embedder(&self) -> RigEmbedder {
        RigEmbedder {
            provider: self.provider.clone(),
            model: self.embedding_model.clone(),
            ndims: self.embedding_dimensions,
        }
    }
}

// ---------------------------------------------------------------------
// CHAT / COMPLETION
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RigChatModel {
    provider: LlmProvider,
    model: String,
    temperature: f64,
}

#[async_trait]
impl LanguageModel for RigChatModel {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, ModelError> {
        let answer = match self.provider {
            LlmProvider::OpenAI => {
                let agent = openai::Client::from_env()
                    .agent(&self.model)
                    .preamble(preamble)
                    .temperature(self.temperature)
                    .build();
                agent.prompt(prompt).await
            }
            LlmProvider::Ollama => {
                let agent = ollama::Client::from_env()
                    .agent(&self.model)
                    .preamble(preamble)
                    .temperature(self.temperature)
                    .build();
                agent.prompt(prompt).await
            }
            LlmProvider::Gemini => {
                let agent = gemini::Client::from_env()
                    .agent(&self.model)
                    .preamble(preamble)
                    .temperature(self.temperature)
                    .build();
                agent.prompt(prompt).await
            }
        };

        answer.map_err(|e| ModelError::from_message(e.to_string()))
    }
}

// ---------------------------------------------------------------------
// EMBEDDINGS
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RigEmbedder {
    provider: LlmProvider,
    model: String,
    ndims: usize,
}

#[async_trait]
impl Embedder for RigEmbedder {
    fn dimensions(&self) -> usize {
        self.ndims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let embedding = match self.provider {
            LlmProvider::OpenAI => {
                openai::Client::from_env()
                    .embedding_model_with_ndims(&self.model, self.ndims)
                    .embed_text(text)
                    .await
            }
            LlmProvider::Ollama => {
                ollama::Client::from_env()
                    .embedding_model_with_ndims(&self.model, self.ndims)
                    .embed_text(text)
                    .await
            }
            LlmProvider::Gemini => {
                gemini::Client::from_env()
                    .embedding_model_with_ndims(&self.model, self.ndims)
                    .embed_text(text)
                    .await
            }
        }
        .map_err(|e| ModelError::from_message(e.to_string()))?;

        Ok(embedding.vec.into_iter().map(|v| v as f32).collect())
    }
}
