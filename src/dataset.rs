//! Carga del dataset tabular de películas.

use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::models::MovieRecord;

const REQUIRED_COLUMNS: [&str; 9] = [
    "title",
    "awards",
    "movie_id",
    "tagline",
    "imdb_rating",
    "directors",
    "cast",
    "genres",
    "languages",
];

/// Lee el CSV de películas y normaliza los títulos.
pub fn load(path: &Path) -> PipelineResult<Vec<MovieRecord>> {
    let load_err = |reason: String| PipelineError::DataLoad {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| load_err(e.to_string()))?;
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

    let headers = reader.headers().map_err(|e| load_err(e.to_string()))?.clone();
    let columns = ColumnIndex::resolve(&headers).map_err(load_err)?;

    let mut movies = Vec::new();
    let mut skipped = 0usize;
    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| load_err(e.to_string()))?;
        // +2: cabecera y numeración desde 1.
        match columns.parse(&record, line + 2) {
            Some(movie) => movies.push(movie),
            None => skipped += 1,
        }
    }

    if movies.is_empty() {
        warn!("El dataset {} no contiene filas válidas.", path.display());
    }
    info!(
        "Dataset cargado: {} películas desde {} ({} filas descartadas)",
        movies.len(),
        path.display(),
        skipped
    );
    Ok(movies)
}

/// Elimina todo lo que no sea alfanumérico ASCII o espacio en blanco.
/// Evita comillas y signos que rompían las consultas del grafo.
pub fn normalize_title(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect()
}

struct ColumnIndex {
    title: usize,
    awards: usize,
    movie_id: usize,
    tagline: usize,
    imdb_rating: usize,
    directors: usize,
    cast: usize,
    genres: usize,
    languages: usize,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord) -> Result<Self, String> {
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|col| !headers.iter().any(|h| h.trim() == *col))
            .collect();
        if !missing.is_empty() {
            return Err(format!("faltan columnas obligatorias: {}", missing.join(", ")));
        }

        let pos = |name: &str| headers.iter().position(|h| h.trim() == name).unwrap_or_default();
        Ok(Self {
            title: pos("title"),
            awards: pos("awards"),
            movie_id: pos("movie_id"),
            tagline: pos("tagline"),
            imdb_rating: pos("imdb_rating"),
            directors: pos("directors"),
            cast: pos("cast"),
            genres: pos("genres"),
            languages: pos("languages"),
        })
    }

    /// `None` cuando la fila no tiene título utilizable tras normalizar.
    fn parse(&self, record: &StringRecord, line: usize) -> Option<MovieRecord> {
        let field = |idx: usize| record.get(idx).unwrap_or("").trim().to_string();

        let raw_title = field(self.title);
        let title = normalize_title(&raw_title);
        if title.trim().is_empty() {
            warn!("Fila {line} descartada: el título '{raw_title}' queda vacío al normalizarlo.");
            return None;
        }

        Some(MovieRecord {
            movie_id: field(self.movie_id),
            tagline: field(self.tagline),
            awards: parse_number(&field(self.awards), "awards", line),
            imdb_rating: parse_number(&field(self.imdb_rating), "imdb_rating", line),
            directors: field(self.directors),
            cast: field(self.cast),
            genres: field(self.genres),
            languages: field(self.languages),
            title,
            tagline_embedding: None,
        })
    }
}

/// Los huecos y los valores ilegibles cuentan como cero; pandas los dejaba
/// como NaN.
fn parse_number<T>(raw: &str, column: &str, line: usize) -> T
where
    T: std::str::FromStr + Default,
{
    if raw.is_empty() {
        return T::default();
    }
    if let Ok(value) = raw.parse::<T>() {
        return value;
    }
    // "3.0" en una columna entera (exportado desde pandas).
    match raw
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(|f| f.trunc().to_string().parse::<T>().ok())
    {
        Some(value) => value,
        None => {
            warn!("Fila {line}: valor no numérico en {column} ('{raw}'), se toma como vacío.");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "title,awards,movie_id,tagline,imdb_rating,directors,cast,genres,languages";

    fn write_csv(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        write!(file, "{body}").unwrap();
        file
    }

    #[test]
    fn strips_punctuation_and_keeps_spaces() {
        assert_eq!(
            normalize_title("Spider-Man: Far From Home!"),
            "SpiderMan Far From Home"
        );
        assert_eq!(normalize_title("Ocean's Eleven"), "Oceans Eleven");
    }

    #[test]
    fn loads_rows_with_normalized_titles() {
        let file = write_csv(
            "\"Spider-Man: Far From Home!\",2,tt6320628,Its time to go,7.4,Jon Watts,Tom Holland|Zendaya,Action|Adventure,English\n",
        );
        let movies = load(file.path()).unwrap();
        assert_eq!(movies.len(), 1);
        let movie = &movies[0];
        assert_eq!(movie.title, "SpiderMan Far From Home");
        assert_eq!(movie.awards, 2);
        assert_eq!(movie.movie_id, "tt6320628");
        assert!((movie.imdb_rating - 7.4).abs() < f64::EPSILON);
        assert_eq!(movie.cast, "Tom Holland|Zendaya");
        assert!(movie.tagline_embedding.is_none());
    }

    #[test]
    fn float_awards_and_empty_cells_are_accepted() {
        let file = write_csv("Heat,3.0,tt0113277,A Los Angeles crime saga,,Michael Mann,,Crime,English\n");
        let movies = load(file.path()).unwrap();
        assert_eq!(movies[0].awards, 3);
        assert_eq!(movies[0].imdb_rating, 0.0);
        assert_eq!(movies[0].cast, "");
    }

    #[test]
    fn missing_columns_fail_with_data_load_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "title,tagline").unwrap();
        writeln!(file, "Heat,A Los Angeles crime saga").unwrap();

        let err = load(file.path()).unwrap_err();
        match err {
            PipelineError::DataLoad { reason, .. } => {
                assert!(reason.contains("awards"));
                assert!(reason.contains("languages"));
            }
            other => panic!("error inesperado: {other:?}"),
        }
    }

    #[test]
    fn unreadable_path_fails_with_data_load_error() {
        let err = load(Path::new("/definitivamente/no/existe.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::DataLoad { .. }));
    }

    #[test]
    fn unreadable_numbers_count_as_missing() {
        let file = write_csv("Heat,many,tt0113277,tagline,excelente,Michael Mann,,Crime,English\n");
        let movies = load(file.path()).unwrap();
        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].awards, 0);
        assert_eq!(movies[0].imdb_rating, 0.0);
    }

    #[test]
    fn rows_whose_title_normalizes_to_nothing_are_skipped() {
        let file = write_csv(
            "千と千尋の神隠し,5,tt0245429,,8.6,Hayao Miyazaki,,Animation,Japanese\n\
             ?!,0,tt0000001,,1.0,,,,\n\
             Heat,1,tt0113277,A Los Angeles crime saga,8.3,Michael Mann,,Crime,English\n",
        );
        let movies = load(file.path()).unwrap();
        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].title, "Heat");
    }
}
