// Módulos de la aplicación
pub mod api;
pub mod app_state;
pub mod config;
pub mod cypher;
pub mod dataset;
pub mod embeddings;
pub mod error;
pub mod formatter;
pub mod graph;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod query_router;
pub mod retry;
pub mod session;
pub mod sync;
pub mod vector_store;
