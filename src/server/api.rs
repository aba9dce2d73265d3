use crate::agent::RelayAgent;
use crate::cli::ServeArgs;
use crate::error::RelayError;
use crate::models::chat::{ ChatTurnRequest, HealthBody };
use std::error::Error;
use std::net::SocketAddr;
use axum::{
    routing::{ get, post },
    Router,
    extract::{ rejection::JsonRejection, State },
    response::{ IntoResponse, Response },
    http::{ header, HeaderValue, Method },
    Json,
};
use tower_http::cors::{ AllowOrigin, CorsLayer };
use log::{ info, error };

#[derive(Clone)]
struct AppState {
    agent: RelayAgent,
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, Box<dyn Error + Send + Sync>> {
    let origins = allowed_origins
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(|o| {
            HeaderValue::from_str(o).map_err(|e| format!("Invalid allowed origin '{}': {}", o, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if origins.is_empty() {
        return Err("At least one allowed origin must be configured".into());
    }

    Ok(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
    )
}

pub fn router(
    agent: RelayAgent,
    allowed_origins: &[String]
) -> Result<Router, Box<dyn Error + Send + Sync>> {
    let cors = cors_layer(allowed_origins)?;

    Ok(
        Router::new()
            .route("/health", get(health_handler))
            .route("/api/chat", post(chat_handler))
            .layer(cors)
            .with_state(AppState { agent })
    )
}

pub async fn start_http_server(
    args: &ServeArgs,
    agent: RelayAgent
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = args.server_addr().parse::<SocketAddr>()?;
    let app = router(agent, &args.allowed_origins)?;

    if args.enable_tls {
        let (cert_path, key_path) = match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("TLS enabled without cert/key".into());
            }
        };

        info!(
            "TLS enabled. Loading certificate from '{}' and key from '{}'",
            cert_path,
            key_path
        );
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        info!("HTTPS server listening on: https://{}", addr);
        axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            format!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e)
        })?;
        info!("HTTP server listening on: http://{}", addr);
        axum::serve(listener, app.into_make_service()).await?;
    }

    Ok(())
}

async fn health_handler() -> Json<HealthBody> {
    Json(HealthBody { status: "ok".into() })
}

async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatTurnRequest>, JsonRejection>
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return RelayError::InvalidBody(rejection.body_text()).into_response();
        }
    };

    match state.agent.begin_turn(request).await {
        Ok(reply) => {
            info!("Turn {}: upstream accepted, streaming reply", reply.turn_id());
            reply.into_response()
        }
        Err(e) => e.into_response(),
    }
}
