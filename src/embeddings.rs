//! Generación de embeddings para los taglines del dataset.

use futures::stream::{self, StreamExt};
use tracing::{error, info};

use crate::error::{ModelError, PipelineError, PipelineResult};
use crate::llm::Embedder;
use crate::models::MovieRecord;
use crate::retry::{with_retry, RetryPolicy};

/// Embedding de un único texto, con timeout, reintentos y control de dimensión.
pub async fn embed(
    embedder: &dyn Embedder,
    policy: &RetryPolicy,
    text: &str,
) -> Result<Vec<f32>, ModelError> {
    let vector = with_retry(policy, "embedding", || embedder.embed(text)).await?;
    if vector.len() != embedder.dimensions() {
        return Err(ModelError::Failed(format!(
            "el embedding tiene {} dimensiones, se esperaban {}",
            vector.len(),
            embedder.dimensions()
        )));
    }
    Ok(vector)
}

/// Rellena `tagline_embedding` en cada fila. Cada fila es independiente, así
/// que se procesan hasta `concurrency` a la vez. Si alguna falla tras agotar
/// los reintentos, falla el lote entero indicando qué títulos fallaron.
pub async fn embed_all(
    embedder: &dyn Embedder,
    policy: &RetryPolicy,
    movies: &mut [MovieRecord],
    concurrency: usize,
) -> PipelineResult<()> {
    let taglines: Vec<String> = movies.iter().map(|m| m.tagline.clone()).collect();

    // Cada future es dueño de su tagline: así el lote es `Send` y puede
    // correr dentro de `tokio::spawn`.
    let results: Vec<Result<Vec<f32>, ModelError>> = stream::iter(taglines)
        .map(|tagline| async move { embed(embedder, policy, &tagline).await })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut failed = Vec::new();
    let mut last_error = None;
    for (movie, result) in movies.iter_mut().zip(results) {
        match result {
            Ok(vector) => movie.tagline_embedding = Some(vector),
            Err(err) => {
                error!("Fallo calculando el embedding de '{}': {err}", movie.title);
                failed.push(movie.title.clone());
                last_error = Some(err);
            }
        }
    }

    if let Some(err) = last_error {
        return Err(PipelineError::EmbeddingService {
            failed,
            reason: err.to_string(),
        });
    }

    info!("Embeddings calculados para {} películas.", movies.len());
    Ok(())
}
