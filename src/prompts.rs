//! Plantillas de prompt para los dos roles del modelo.

pub const CYPHER_PREAMBLE: &str = "Given an input question, convert it to a Cypher query. No pre-amble.";

pub const FORMAT_PREAMBLE: &str = "You rewrite database results for movie fans. \
Use only the information you are given and never add facts of your own.";

/// Ejemplos few-shot (pregunta, Cypher) sobre el esquema de películas.
const FEW_SHOT_EXAMPLES: [(&str, &str); 7] = [
    (
        "Which genres does the movie Inception belong to and who directed it?",
        "MATCH (m:Movie {title: \"Inception\"})
OPTIONAL MATCH (m)-[:IN_GENRE]->(g:Genre)
OPTIONAL MATCH (p:Person)-[:DIRECTED]->(m)
RETURN collect(DISTINCT g.name) AS genres, collect(DISTINCT p.name) AS directors",
    ),
    (
        "What is the IMDb rating of The Dark Knight, and in which language was it released?",
        "MATCH (m:Movie {title: \"The Dark Knight\"})
OPTIONAL MATCH (m)-[:WAS_RELEASED_IN]->(l:Language)
RETURN m.imdbRating AS imdbRating, collect(DISTINCT l.name) AS languages",
    ),
    (
        "Who acted in the movie Titanic, and what is its tagline?",
        "MATCH (m:Movie {title: \"Titanic\"})
OPTIONAL MATCH (p:Person)-[:ACTED_IN]->(m)
RETURN collect(DISTINCT p.name) AS cast, m.tagline AS tagline",
    ),
    (
        "Did the movie Avatar win any awards, and what is its IMDb rating?",
        "MATCH (m:Movie {title: \"Avatar\"})
RETURN m.awards AS awards, m.imdbRating AS imdbRating",
    ),
    (
        "Which languages was the movie Parasite released in and who directed it?",
        "MATCH (m:Movie {title: \"Parasite\"})
OPTIONAL MATCH (m)-[:WAS_RELEASED_IN]->(l:Language)
OPTIONAL MATCH (p:Person)-[:DIRECTED]->(m)
RETURN collect(DISTINCT l.name) AS languages, collect(DISTINCT p.name) AS directors",
    ),
    (
        "Recommend 3 movies with at least one award that were released in English",
        "MATCH (m:Movie)-[:WAS_RELEASED_IN]->(l:Language)
WHERE l.name = 'English' AND m.awards >= 1
RETURN m.title
LIMIT 3",
    ),
    (
        "Recommend 3 movies with IMDb rating at least 7, at least one award and released in English",
        "MATCH (m:Movie)-[:WAS_RELEASED_IN]->(l:Language)
WHERE l.name = 'English' AND m.awards >= 1 AND m.imdbRating >= 7.0
RETURN m.title
LIMIT 3",
    ),
];

/// Prompt de extracción de entidades + generación de Cypher.
pub fn cypher_generation(schema: &str, question: &str) -> String {
    let examples: Vec<String> = FEW_SHOT_EXAMPLES
        .iter()
        .map(|(q, cypher)| format!("# Example user input: \"{q}\"\nOutput:\n{cypher}"))
        .collect();

    format!(
        "Task: Break down the user input, extract the relevant entities and generate a Cypher query \
that retrieves the unknown entities using the known ones.
Instructions:
1. Identify and extract the known entities (e.g., movie title) from the user input.
2. Determine the unknown entities (e.g., cast, awards, genres, directors) that need to be retrieved from the graph database.
3. Use the known entities to generate a read-only Cypher query that retrieves the unknown entities. \
Only use the node labels, relationship types and properties present in the schema.
Schema:
{schema}
Note: Do not include any explanations or apologies in your responses.
Do not respond to any questions that might ask for anything other than generating a Cypher query.
Do not include any text except the generated Cypher query.
Examples:

{examples}

The question is:
{question}",
        examples = examples.join("\n\n"),
    )
}

/// Reformateo del resultado de la consulta Cypher.
pub fn format_structured(question: &str, result: &str) -> String {
    format!(
        "Given the user question:
{question}
and the output response:
{result}
format the response in a more readable and understandable way for clarity, without adding any additional information.
Note:
Do not include any text except the provided information."
    )
}

/// Reformateo del resultado de la búsqueda vectorial (incluye el esquema
/// para que el modelo entienda qué representan las filas).
pub fn format_similarity(schema: &str, question: &str, result: &str) -> String {
    format!(
        "Here is the graph db schema which has entities with properties and the relationship between entities
{schema}
Here is the user question: {question}
Here is the model output response: {result}

format the model output response in a more readable and understandable way for clarity, without adding any additional information.
Note:
Do not include any text except the provided information."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher;

    #[test]
    fn generation_prompt_embeds_schema_examples_and_question() {
        let prompt = cypher_generation("Node properties:\nMovie {title: STRING}", "Who directed Heat?");
        assert!(prompt.contains("Movie {title: STRING}"));
        assert!(prompt.contains("# Example user input: \"Which genres does the movie Inception"));
        assert!(prompt.ends_with("Who directed Heat?"));
    }

    #[test]
    fn few_shot_examples_pass_the_read_only_validator() {
        for (question, query) in FEW_SHOT_EXAMPLES {
            assert_eq!(cypher::validate_read_only(query), Ok(()), "{question}");
        }
    }
}
