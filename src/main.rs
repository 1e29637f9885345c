use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use neo4j_movie_recs_webapp::{
    api,
    app_state::{self, AppState, SetupPhase},
    config::AppConfig,
    session::Session,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 3. Estado compartido; la preparación corre en segundo plano y hasta
    //    que termine el chat responde 503.
    let app_state = AppState::new(cfg.clone(), shutdown_tx);
    tokio::spawn(run_setup(app_state.clone()));

    // 4. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 5. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    let server_url = format!("http://{}", cfg.server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

/// Carga, sincroniza e indexa; al terminar publica la sesión.
async fn run_setup(state: AppState) {
    match Session::configure(&state.config, &state.status).await {
        Ok(session) => {
            let summary = session.summary().clone();
            let message = format!("Sistema listo. {summary}");
            if state.session.set(session).is_err() {
                warn!("La sesión ya estaba inicializada.");
            }
            info!("{message}");
            app_state::finish(&state.status, SetupPhase::Ready, message, Some(summary));
        }
        Err(err) => {
            error!("Error en la preparación: {err}");
            app_state::finish(&state.status, SetupPhase::Failed, err.to_string(), None);
        }
    }
}
