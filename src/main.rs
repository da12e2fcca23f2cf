use qgen_relay::init::{app_init, create_app_router};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("🚀 Starting question generation relay...");
    let (config, state) = app_init().await?;
    log::info!("✅ Application state initialized");
    let app = create_app_router(state, config.max_upload_bytes());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("");
    log::info!("🎉 Server started!");
    log::info!("📍 http://{}", addr);
    log::info!("📤 Upload:   POST http://{}/api/generate", addr);
    log::info!("📡 Generate: GET  http://{}/api/generate", addr);
    log::info!("❤️  Health: http://{}/health", addr);
    log::info!("");
    log::info!("📂 Scratch: {}", config.scratch_dir.display());
    log::info!("🔗 Generator: {}", config.generator_url);
    log::info!("🤖 Default model: {}", config.default_model);
    log::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
