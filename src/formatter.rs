//! Reescritura de resultados crudos en una respuesta legible.

use tracing::debug;

use crate::error::ModelError;
use crate::llm::LanguageModel;
use crate::prompts;
use crate::retry::{with_retry, RetryPolicy};

/// Pide al modelo de formateo que convierta `rows` en prosa. Con `schema`
/// se usa la plantilla de la búsqueda vectorial, que describe el grafo.
pub async fn format(
    model: &dyn LanguageModel,
    policy: &RetryPolicy,
    question: &str,
    rows: &serde_json::Value,
    schema: Option<&str>,
) -> Result<String, ModelError> {
    let raw = serde_json::to_string(rows).map_err(|e| ModelError::Failed(e.to_string()))?;
    let prompt = match schema {
        Some(schema) => prompts::format_similarity(schema, question, &raw),
        None => prompts::format_structured(question, &raw),
    };
    debug!("Formateando {} bytes de resultado.", raw.len());

    let answer = with_retry(policy, "formateo", || {
        model.complete(prompts::FORMAT_PREAMBLE, &prompt)
    })
    .await?;

    let answer = answer.trim();
    if answer.is_empty() {
        return Err(ModelError::Failed("el modelo devolvió una respuesta vacía".to_string()));
    }
    Ok(answer.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Devuelve una respuesta fija y guarda el último prompt recibido.
    struct Recorder {
        reply: String,
        last_prompt: Mutex<String>,
    }

    #[async_trait]
    impl LanguageModel for Recorder {
        async fn complete(&self, _preamble: &str, prompt: &str) -> Result<String, ModelError> {
            *self.last_prompt.lock().unwrap() = prompt.to_string();
            Ok(self.reply.clone())
        }
    }

    fn recorder(reply: &str) -> Recorder {
        Recorder {
            reply: reply.to_string(),
            last_prompt: Mutex::new(String::new()),
        }
    }

    #[tokio::test]
    async fn structured_rows_are_sent_with_the_question() {
        let model = recorder("  Inception is Sci-Fi and Thriller.\n");
        let rows = json!([{"genres": ["Sci-Fi", "Thriller"]}]);

        let answer = format(&model, &RetryPolicy::once(Duration::from_secs(1)), "Genres of Inception?", &rows, None)
            .await
            .unwrap();

        assert_eq!(answer, "Inception is Sci-Fi and Thriller.");
        let prompt = model.last_prompt.lock().unwrap().clone();
        assert!(prompt.contains("Genres of Inception?"));
        assert!(prompt.contains(r#"["Sci-Fi","Thriller"]"#));
        assert!(!prompt.contains("graph db schema"));
    }

    #[tokio::test]
    async fn similarity_rows_include_the_schema() {
        let model = recorder("ok");
        format(
            &model,
            &RetryPolicy::once(Duration::from_secs(1)),
            "Something like Heat?",
            &json!([]),
            Some("Node properties:\nMovie {title: STRING}"),
        )
        .await
        .unwrap();

        let prompt = model.last_prompt.lock().unwrap().clone();
        assert!(prompt.contains("graph db schema"));
        assert!(prompt.contains("Movie {title: STRING}"));
    }

    #[tokio::test]
    async fn blank_answers_are_failures() {
        let model = recorder("   ");
        let err = format(&model, &RetryPolicy::once(Duration::from_secs(1)), "q", &json!([]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Failed(_)));
    }
}
