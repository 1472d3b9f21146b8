mod error;
mod handlers;

pub use error::AppError;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use color_eyre::eyre::{eyre, Context, Result};
use rust_embed::RustEmbed;
use tera::Tera;
use tracing::info;

use crate::{
    core::{ClobbererConfig, ReleasePolicy},
    store::Store,
};

#[derive(RustEmbed)]
#[folder = "src/public"]
struct Asset;

#[derive(RustEmbed)]
#[folder = "src/templates"]
struct Templates;

#[derive(Clone)]
pub(crate) struct AppState {
    pub store: Store,
    pub config: Arc<ClobbererConfig>,
    pub policy: Arc<dyn ReleasePolicy>,
    pub templates: Arc<Tera>,
}

impl AppState {
    pub fn new(
        store: Store,
        config: ClobbererConfig,
        policy: Arc<dyn ReleasePolicy>,
    ) -> Result<AppState> {
        Ok(AppState {
            store,
            config: Arc::new(config),
            policy,
            templates: Arc::new(load_templates()?),
        })
    }
}

fn load_templates() -> Result<Tera> {
    let mut tera = Tera::default();
    for name in Templates::iter() {
        let file = Templates::get(&name).ok_or_else(|| eyre!("Missing template '{}'", name))?;
        let content = std::str::from_utf8(&file.data)
            .with_context(|| format!("Template '{}' is not valid UTF-8", name))?;
        tera.add_raw_template(&name, content)
            .with_context(|| format!("Failed to parse template '{}'", name))?;
    }
    Ok(tera)
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(handlers::index_handler).post(handlers::submit_handler),
        )
        // Agents configured against the old deployment still use this path.
        .route(
            "/index.php",
            get(handlers::index_handler).post(handlers::submit_handler),
        )
        .route("/cleanup", get(handlers::cleanup_handler))
        .route("/static/*file", get(static_handler))
        .fallback(not_found)
        .with_state(state)
}

pub(crate) async fn start(state: AppState, addr: SocketAddr) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to listen on {}", addr))?;
    info!("Server started on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

async fn static_handler(Path(file): Path<String>) -> impl IntoResponse {
    StaticFile(file)
}

async fn not_found() -> (StatusCode, Html<&'static str>) {
    (
        StatusCode::NOT_FOUND,
        Html("<h1>404</h1><p>Not Found</p>"),
    )
}

pub struct StaticFile<T>(pub T);

impl<T> IntoResponse for StaticFile<T>
where
    T: Into<String>,
{
    fn into_response(self) -> Response {
        let path = self.0.into();

        match Asset::get(path.as_str()) {
            Some(content) => {
                let mime = mime_guess::from_path(path).first_or_octet_stream();
                (
                    [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                    content.data.into_owned(),
                )
                    .into_response()
            }
            None => (StatusCode::NOT_FOUND, "404").into_response(),
        }
    }
}
