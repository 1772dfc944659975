use crate::authorization::AuthorizationClient;
use crate::config::{ServiceSettings, Settings};
use crate::labels::load_character_labels;
use crate::model_service::CharacterModel;
use crate::ort_service::OrtCharacterModel;
use crate::routes::api_routes;
use anyhow::Context;
use axum::Router;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn CharacterModel>,
    pub authorization: Arc<AuthorizationClient>,
    pub min_text_confidence: f32,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: AppState, settings: &ServiceSettings) -> anyhow::Result<Self> {
        let router = api_routes().with_state(state);
        let listener = TcpListener::bind(settings.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            "Recognition service listening on {}",
            self.listener.local_addr()?
        );

        let shutdown = async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown")
        };

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

pub async fn start_server(settings: Settings) -> anyhow::Result<()> {
    let labels = load_character_labels(&settings.labels.get_path())
        .with_context(|| format!("failed to load labels from {:?}", settings.labels.get_path()))?;

    let model = OrtCharacterModel::new(&settings.model, labels)
        .context("failed to instantiate character recognition model")?;
    let authorization = AuthorizationClient::new(&settings.authorization)?;

    let state = AppState {
        model: Arc::new(model),
        authorization: Arc::new(authorization),
        min_text_confidence: settings.decision.min_text_confidence,
    };

    let server = HttpServer::new(state, &settings.service).await?;
    server.run().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
