use std::sync::Arc;

use cellgrader::config::Config;
use cellgrader::coordinator::JobCoordinator;
use cellgrader::server::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cellgrader::tracing::init_tracing();

    let config = Config::from_env();

    if config.gemini_api_key.is_empty() {
        eprintln!("[WARN] GEMINI_API_KEY is not set; grading jobs will fail at the model call");
    }

    println!("[INFO] Judging model: {}", config.gemini_model);
    println!("[INFO] Jupyter server: {}", config.jupyter_base_url);

    let bind_addr = config.bind_addr.clone();
    let coordinator = Arc::new(JobCoordinator::new(config));
    let app = create_router(AppState { coordinator });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("[INFO] Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
