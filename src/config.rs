//! Carga y gestión de configuración de la aplicación (grafo + LLM + pipeline).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Dónde vive el grafo: un servidor Neo4j o el backend embebido en memoria.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphBackend {
    Neo4j,
    Memory,
}

impl FromStr for GraphBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "neo4j" => Ok(Self::Neo4j),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(anyhow!("Backend de grafo no soportado: {other}")),
        }
    }
}

/// Credenciales del servidor Neo4j.
#[derive(Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

// La contraseña nunca debe acabar en los logs.
impl std::fmt::Debug for Neo4jConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub graph_backend: GraphBackend,
    pub neo4j: Option<Neo4jConfig>,
    pub server_addr: String,
    pub open_browser: bool,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub llm_format_model: String,

    pub dataset_path: PathBuf,
    pub embedding_dimensions: usize,
    pub embedding_concurrency: usize,

    pub call_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let graph_backend: GraphBackend = env_or("GRAPH_BACKEND", "neo4j").parse()?;

        let neo4j = match graph_backend {
            GraphBackend::Neo4j => {
                let uri = env::var("NEO4J_URI")
                    .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
                let user = env::var("NEO4J_USER")
                    .or_else(|_| env::var("NEO4J_USERNAME"))
                    .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
                let password = env::var("NEO4J_PASSWORD")
                    .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;
                Some(Neo4jConfig { uri, user, password })
            }
            GraphBackend::Memory => None,
        };

        let server_addr = env_or("SERVER_ADDR", "127.0.0.1:3322");
        let open_browser = parse_env("OPEN_BROWSER", true)?;

        let llm_provider: LlmProvider = env_or("LLM_PROVIDER", "ollama").parse()?;
        let llm_embedding_model = env_or("LLM_EMBEDDING_MODEL", "all-minilm");
        let llm_chat_model = env_or("LLM_CHAT_MODEL", "tomasonjo/llama3-text2cypher-demo");
        let llm_format_model = env_or("LLM_FORMAT_MODEL", &llm_chat_model);

        let dataset_path = PathBuf::from(env_or("DATASET_PATH", "data/movies.csv"));
        let embedding_dimensions: usize = parse_env("EMBEDDING_DIMENSIONS", 384)?;
        let embedding_concurrency: usize = parse_env("EMBEDDING_CONCURRENCY", 4)?;

        let call_timeout = Duration::from_secs(parse_env("CALL_TIMEOUT_SECS", 60)?);
        let max_retries: u32 = parse_env("MAX_RETRIES", 3)?;
        let retry_backoff = Duration::from_millis(parse_env("RETRY_BACKOFF_MS", 500)?);

        let cfg = Self {
            graph_backend,
            neo4j,
            server_addr,
            open_browser,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            llm_format_model,
            dataset_path,
            embedding_dimensions,
            embedding_concurrency,
            call_timeout,
            max_retries,
            retry_backoff,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimensions == 0 {
            return Err(anyhow!("EMBEDDING_DIMENSIONS debe ser mayor que 0"));
        }
        if self.embedding_concurrency == 0 {
            return Err(anyhow!("EMBEDDING_CONCURRENCY debe ser mayor que 0"));
        }
        if self.call_timeout.is_zero() {
            return Err(anyhow!("CALL_TIMEOUT_SECS debe ser mayor que 0"));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Valor inválido para {key}: '{raw}'")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_are_case_insensitive() {
        assert_eq!("Ollama".parse::<LlmProvider>().unwrap(), LlmProvider::Ollama);
        assert_eq!("OPENAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAI);
        assert!("mistral".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn backend_accepts_memory_alias() {
        assert_eq!("in-memory".parse::<GraphBackend>().unwrap(), GraphBackend::Memory);
        assert_eq!("neo4j".parse::<GraphBackend>().unwrap(), GraphBackend::Neo4j);
    }

    #[test]
    fn debug_output_hides_password() {
        let cfg = Neo4jConfig {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: "s3cr3t".into(),
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("s3cr3t"));
    }
}
