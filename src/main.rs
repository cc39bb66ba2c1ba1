use std::sync::Arc;

use guitar_store_mcp::{
    auth::{Identity, SharedTokenVerifier, StaticVerifier, TokenVerifier},
    build_app,
    clerk_client::{ClerkClient, StaticUserDirectory, UserDirectory},
    config::{AuthMode, Config},
    domain::tools::build_tool_registry,
    logging,
    mcp::server::McpServer,
    session::SessionRegistry,
    AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;

    let (verifier, directory): (Arc<dyn TokenVerifier>, Arc<dyn UserDirectory>) =
        match &config.auth_mode {
            AuthMode::Stub => (
                Arc::new(StaticVerifier::new(Identity::new(&config.stub_subject))),
                Arc::new(StaticUserDirectory),
            ),
            AuthMode::Token { api_token } => (
                Arc::new(SharedTokenVerifier::new(
                    api_token.clone(),
                    Identity::new(&config.stub_subject),
                )),
                Arc::new(StaticUserDirectory),
            ),
            AuthMode::Clerk {
                secret_key,
                api_url,
            } => {
                let clerk = Arc::new(ClerkClient::new(api_url.clone(), secret_key.clone())?);
                let verifier: Arc<dyn TokenVerifier> = clerk.clone();
                let directory: Arc<dyn UserDirectory> = clerk;
                (verifier, directory)
            }
        };

    let server = Arc::new(McpServer::new(build_tool_registry(directory)));
    let sessions = Arc::new(
        SessionRegistry::new(server, config.session_buffer)
            .with_delivery_timeout(config.delivery_timeout),
    );
    let state = AppState::new(sessions, verifier, config.authorization_server.clone());
    let app = build_app(state);

    let bind_socket = config.bind_socket()?;
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        auth_mode = config.auth_mode.name(),
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
