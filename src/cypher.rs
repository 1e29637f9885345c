//! Utilidades sobre el Cypher que genera el modelo: limpieza de la salida,
//! validación de sólo lectura y columnas del `RETURN` final.

use std::collections::BTreeSet;

/// Cláusulas con las que puede empezar una consulta aceptada.
const LEADING_CLAUSES: [&str; 6] = ["MATCH", "OPTIONAL", "WITH", "UNWIND", "CALL", "RETURN"];

/// Únicas palabras clave admitidas. Cualquier otra palabra tiene que estar
/// en posición de identificador (variable, alias, clave de mapa, función).
const ALLOWED_KEYWORDS: [&str; 38] = [
    "MATCH", "OPTIONAL", "WHERE", "WITH", "RETURN", "UNWIND", "ORDER", "BY", "SKIP", "LIMIT",
    "UNION", "ALL", "DISTINCT", "AS", "AND", "OR", "XOR", "NOT", "IN", "IS", "NULL", "TRUE",
    "FALSE", "CONTAINS", "STARTS", "ENDS", "ASC", "DESC", "ASCENDING", "DESCENDING", "CASE",
    "WHEN", "THEN", "ELSE", "END", "CALL", "YIELD", "EXISTS",
];

/// Palabras que escriben, borran o administran. Se rechazan en cualquier
/// posición fuera de literales, incluso como identificador.
const FORBIDDEN_KEYWORDS: [&str; 20] = [
    "CREATE", "INSERT", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "DROP", "LOAD", "FOREACH",
    "USE", "ALTER", "GRANT", "DENY", "REVOKE", "START", "STOP", "TERMINATE", "RENAME", "FINISH",
];

/// Único procedimiento invocable desde una consulta generada.
const ALLOWED_PROCEDURE: &str = "db.index.vector.querynodes";

const RETURN_TERMINATORS: [&str; 4] = ["ORDER", "SKIP", "LIMIT", "UNION"];

/// Quita vallas Markdown, etiquetas tipo `Cypher query:` y el `;` final.
pub fn clean_model_output(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        // Salta el identificador de lenguaje (```cypher)
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        text = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
    }

    let mut text = text.trim();
    for label in ["cypher query:", "cypher:", "output:", "query:"] {
        if let Some(rest) = text
            .get(..label.len())
            .filter(|head| head.eq_ignore_ascii_case(label))
            .map(|_| &text[label.len()..])
        {
            text = rest.trim();
        }
    }

    text.trim_end_matches(';').trim().to_string()
}

/// Comprueba que la consulta sólo lea. Devuelve el motivo del rechazo.
pub fn validate_read_only(cypher: &str) -> Result<(), String> {
    if cypher.trim().is_empty() {
        return Err("consulta vacía".to_string());
    }

    let masked = mask_literals(cypher)?;
    if masked.contains(';') {
        return Err("no se admiten varias sentencias".to_string());
    }

    let words = keywords(&masked);
    let Some((_, first)) = words.first() else {
        return Err("consulta sin cláusulas".to_string());
    };
    if !LEADING_CLAUSES.contains(&first.as_str()) {
        return Err(format!("cláusula inicial no permitida: {first}"));
    }

    for (pos, word) in &words {
        if FORBIDDEN_KEYWORDS.contains(&word.as_str()) {
            return Err(format!("palabra clave no permitida: {word}"));
        }
        if word == "CALL" {
            let procedure: String = masked[pos + 4..]
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
                .collect();
            if procedure.to_lowercase() != ALLOWED_PROCEDURE {
                let shown = if procedure.is_empty() { "{ ... }" } else { procedure.as_str() };
                return Err(format!("procedimiento no permitido: {shown}"));
            }
        }
    }

    let names = identifiers(&masked, &words);
    for (_, word) in &words {
        if !ALLOWED_KEYWORDS.contains(&word.as_str()) && !names.contains(word.as_str()) {
            return Err(format!("palabra clave no permitida: {word}"));
        }
    }

    if !words.iter().any(|(_, w)| w == "RETURN") {
        return Err("la consulta no tiene RETURN".to_string());
    }
    Ok(())
}

/// Palabras que aparecen en alguna posición de identificador: tras `(`, `[`,
/// `,` o `|`, tras `AS`/`YIELD`, delante de `:`, `.` o `=`, o pegadas a `(`
/// (llamada a función). Una cláusula nunca ocupa esas posiciones.
fn identifiers<'a>(masked: &str, words: &'a [(usize, String)]) -> BTreeSet<&'a str> {
    let mut names = BTreeSet::new();
    for (i, (pos, word)) in words.iter().enumerate() {
        let before = masked[..*pos].trim_end();
        let after_raw = &masked[pos + word.len()..];
        let after = after_raw.trim_start();
        let prev_word = i
            .checked_sub(1)
            .map(|j| &words[j])
            .filter(|(p, w)| before.len() == p + w.len())
            .map(|(_, w)| w.as_str());

        let bound = before.ends_with(['(', '[', ',', '|'])
            || matches!(prev_word, Some("AS" | "YIELD"))
            || after.starts_with([':', '.', '='])
            || after_raw.starts_with('(');
        if bound {
            names.insert(word.as_str());
        }
    }
    names
}

/// Nombres de columna del último `RETURN` de nivel superior, tal y como
/// los nombra Neo4j: el alias si hay `AS`, si no el texto de la expresión.
pub fn return_columns(cypher: &str) -> Vec<String> {
    let Ok(masked) = mask_literals(cypher) else {
        return Vec::new();
    };

    let depths = nesting_depths(&masked);
    let words = keywords(&masked);
    let Some(return_pos) = words
        .iter()
        .filter(|(pos, w)| w == "RETURN" && depths[*pos] == 0)
        .map(|(pos, _)| *pos)
        .last()
    else {
        return Vec::new();
    };

    let body_start = return_pos + "RETURN".len();
    let body_end = words
        .iter()
        .filter(|(pos, w)| *pos > return_pos && depths[*pos] == 0 && RETURN_TERMINATORS.contains(&w.as_str()))
        .map(|(pos, _)| *pos)
        .next()
        .unwrap_or(masked.len());

    let mut start = body_start;
    let mut items = Vec::new();
    for (offset, ch) in masked[body_start..body_end].char_indices() {
        let pos = body_start + offset;
        if ch == ',' && depths[pos] == 0 {
            items.push((start, pos));
            start = pos + 1;
        }
    }
    items.push((start, body_end));

    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, (from, to))| {
            let masked_item = &masked[from..to];
            let original_item = &cypher[from..to];
            column_name(masked_item, original_item, i == 0)
        })
        .collect()
}

fn column_name(masked_item: &str, original_item: &str, first: bool) -> Option<String> {
    let item_words = keywords(masked_item);
    let mut expr_start = 0;
    if first {
        if let Some((pos, w)) = item_words.first() {
            if w == "DISTINCT" {
                expr_start = pos + "DISTINCT".len();
            }
        }
    }

    let alias = item_words
        .iter()
        .filter(|(pos, w)| w == "AS" && *pos >= expr_start)
        .map(|(pos, _)| *pos)
        .last();

    let name = match alias {
        Some(pos) => original_item[pos + 2..].trim().trim_matches('`').to_string(),
        None => original_item[expr_start..].trim().to_string(),
    };
    (!name.is_empty()).then_some(name)
}

/// Copia de la consulta con el contenido de literales y comentarios
/// sustituido por espacios. Conserva las posiciones en bytes.
fn mask_literals(cypher: &str) -> Result<String, String> {
    let mut out = String::with_capacity(cypher.len());
    let mut chars = cypher.char_indices().peekable();

    let blank = |out: &mut String, c: char| out.extend(std::iter::repeat(' ').take(c.len_utf8()));

    while let Some((_, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(c);
                let mut closed = false;
                while let Some((_, inner)) = chars.next() {
                    if inner == '\\' && c != '`' {
                        blank(&mut out, inner);
                        if let Some((_, escaped)) = chars.next() {
                            blank(&mut out, escaped);
                        }
                        continue;
                    }
                    if inner == c {
                        out.push(inner);
                        closed = true;
                        break;
                    }
                    blank(&mut out, inner);
                }
                if !closed {
                    return Err("literal sin cerrar".to_string());
                }
            }
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                out.push(' ');
                while let Some(&(_, inner)) = chars.peek() {
                    if inner == '\n' {
                        break;
                    }
                    blank(&mut out, inner);
                    chars.next();
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                out.push(' ');
                let mut prev = ' ';
                let mut closed = false;
                for (_, inner) in chars.by_ref() {
                    blank(&mut out, inner);
                    if prev == '*' && inner == '/' {
                        closed = true;
                        break;
                    }
                    prev = inner;
                }
                if !closed {
                    return Err("comentario sin cerrar".to_string());
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Palabras en mayúsculas con su posición. Se ignoran las que van tras `.`,
/// `:` o `$` (propiedades, etiquetas y parámetros).
fn keywords(masked: &str) -> Vec<(usize, String)> {
    let mut words = Vec::new();
    let mut current: Option<(usize, String)> = None;
    let mut prev_char = ' ';
    let mut skip_current = false;

    for (pos, c) in masked.char_indices() {
        if c.is_ascii_alphanumeric() || c == '_' {
            match current.as_mut() {
                Some((_, word)) => word.push(c.to_ascii_uppercase()),
                None => {
                    skip_current = matches!(prev_char, '.' | ':' | '$') || c.is_ascii_digit();
                    current = Some((pos, c.to_ascii_uppercase().to_string()));
                }
            }
        } else if let Some(word) = current.take() {
            if !skip_current {
                words.push(word);
            }
        }
        prev_char = c;
    }
    if let Some(word) = current {
        if !skip_current {
            words.push(word);
        }
    }
    words
}

/// Profundidad de anidamiento ((), [], {}) en cada byte.
fn nesting_depths(masked: &str) -> Vec<usize> {
    let mut depths = vec![0; masked.len() + 1];
    let mut depth: usize = 0;
    for (pos, c) in masked.char_indices() {
        match c {
            '(' | '[' | '{' => {
                depths[pos] = depth;
                depth += 1;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                depths[pos] = depth;
            }
            _ => depths[pos] = depth,
        }
        for extra in 1..c.len_utf8() {
            depths[pos + extra] = depth;
        }
    }
    depths[masked.len()] = depth;
    depths
}
