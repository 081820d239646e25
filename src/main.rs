use aicrop::{create_router, init, AppState, Config, Result};

use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may be set directly
    dotenv::dotenv().ok();

    // Initialize the application
    init()?;

    let config = Config::from_env()?;
    let report = config.validate();
    report.log();
    if !report.is_valid() {
        log::warn!("starting with configuration errors; affected features will degrade");
    }

    let addr = config.bind_address();
    let state = AppState::new(config);
    state.pipeline.store().ensure().await?;

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
