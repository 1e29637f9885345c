//! Sincronización del dataset con el grafo.
//!
//! Modelo de refresco completo: si el grafo ya tiene datos se borra todo
//! (`DETACH DELETE`) y se vuelve a cargar. Borrado y carga van en la misma
//! unidad atómica del backend, así que un fallo a mitad no deja el grafo
//! poblado a medias.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::graph::MovieGraph;
use crate::models::{GraphCounts, MovieRecord, MovieUpsert};

/// Resumen de una sincronización.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub wiped_existing: bool,
    pub movies: usize,
    pub people: usize,
    pub genres: usize,
    pub languages: usize,
    pub counts: GraphCounts,
}

impl std::fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} películas, {} personas, {} géneros, {} idiomas ({} nodos, {} relaciones{})",
            self.movies,
            self.people,
            self.genres,
            self.languages,
            self.counts.nodes,
            self.counts.relationships,
            if self.wiped_existing { ", grafo previo borrado" } else { "" }
        )
    }
}

/// Vuelca el dataset en el grafo, sustituyendo lo que hubiera.
pub async fn sync(graph: &dyn MovieGraph, movies: &[MovieRecord]) -> PipelineResult<SyncSummary> {
    let schema = graph.schema().await.map_err(PipelineError::GraphSync)?;
    let wipe = !schema.is_empty();
    if wipe {
        info!("El grafo no está vacío: se borrarán todos los nodos y relaciones antes de cargar.");
    } else {
        info!("Grafo vacío: carga directa.");
    }

    graph.ensure_constraints().await.map_err(PipelineError::GraphSync)?;

    let upserts: Vec<MovieUpsert> = movies.iter().map(to_upsert).collect();
    graph
        .replace_movies(wipe, &upserts)
        .await
        .map_err(PipelineError::GraphSync)?;

    let counts = graph.counts().await.map_err(PipelineError::GraphSync)?;
    let summary = summarize(&upserts, wipe, counts);
    info!("Grafo sincronizado: {summary}");
    Ok(summary)
}

/// Separa un campo multivalor (`a|b|c`), recortando espacios y
/// descartando tokens vacíos y repetidos.
pub fn split_multi(raw: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    raw.split('|')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter(|token| seen.insert(token.to_string()))
        .map(str::to_string)
        .collect()
}

pub fn to_upsert(movie: &MovieRecord) -> MovieUpsert {
    let language = movie.languages.trim();
    MovieUpsert {
        id: movie.movie_id.clone(),
        title: movie.title.clone(),
        tagline: movie.tagline.clone(),
        awards: movie.awards,
        imdb_rating: movie.imdb_rating,
        directors: split_multi(&movie.directors),
        cast: split_multi(&movie.cast),
        genres: split_multi(&movie.genres),
        language: (!language.is_empty()).then(|| language.to_string()),
    }
}

fn summarize(upserts: &[MovieUpsert], wiped_existing: bool, counts: GraphCounts) -> SyncSummary {
    let titles: BTreeSet<&str> = upserts.iter().map(|m| m.title.as_str()).collect();
    let people: BTreeSet<&str> = upserts
        .iter()
        .flat_map(|m| m.directors.iter().chain(m.cast.iter()))
        .map(String::as_str)
        .collect();
    let genres: BTreeSet<&str> = upserts
        .iter()
        .flat_map(|m| m.genres.iter())
        .map(String::as_str)
        .collect();
    let languages: BTreeSet<&str> = upserts.iter().filter_map(|m| m.language.as_deref()).collect();

    SyncSummary {
        wiped_existing,
        movies: titles.len(),
        people: people.len(),
        genres: genres.len(),
        languages: languages.len(),
        counts,
    }
}
