use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Env;
use serde::Deserialize;

use image_gateway::inference::OpenRouteClient;
use image_gateway::keystore::PocketBaseClient;
use image_gateway::router::app_router;
use image_gateway::state::AppState;

#[derive(Deserialize, Debug)]
struct EnvVars {
    #[serde(default = "default_listen_addr")]
    host: Ipv4Addr,
    #[serde(default = "default_port")]
    port: u16,

    /// Bearer token for the inference endpoint. Required: refusing to start
    /// beats serving requests we cannot authenticate upstream.
    openrouter_api_key: String,
    #[serde(default = "default_openrouter_base_url")]
    openrouter_base_url: String,
    #[serde(default = "default_model")]
    model: String,

    #[serde(default = "default_pocketbase_url")]
    pocketbase_url: String,
    #[serde(default = "default_auth_collection")]
    auth_collection: String,
}

fn default_listen_addr() -> Ipv4Addr {
    Ipv4Addr::new(127, 0, 0, 1)
}

fn default_port() -> u16 {
    8000
}

fn default_openrouter_base_url() -> String {
    String::from("https://openrouter.ai/api/v1")
}

fn default_model() -> String {
    String::from("google/gemini-2.5-flash-image-preview:free")
}

fn default_pocketbase_url() -> String {
    String::from("http://127.0.0.1:8090")
}

fn default_auth_collection() -> String {
    String::from("shouban")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let env: EnvVars = envy::from_env().context("missing or invalid environment configuration")?;
    log::info!(
        "configured: model={} store={} collection={}",
        &env.model,
        &env.pocketbase_url,
        &env.auth_collection
    );

    let store = PocketBaseClient::new(env.pocketbase_url, env.auth_collection)
        .context("failed to build record store client")?;
    let generator = OpenRouteClient::new(
        env.openrouter_base_url,
        env.openrouter_api_key,
        env.model.clone(),
    )
    .context("failed to build inference client")?;

    let state = AppState {
        store: Arc::new(store),
        generator: Arc::new(generator),
        model: env.model,
    };

    let app = app_router().with_state(state);

    let listen_addr: SocketAddr = format!("{}:{}", &env.host, &env.port)
        .parse()
        .context("invalid bind addr")?;
    log::info!("listening on {}", &listen_addr);
    axum::Server::bind(&listen_addr)
        .serve(app.into_make_service())
        .await
        .context("failed to start axum server")?;

    Ok(())
}
