//! agentloop HTTP 服务
//!
//! 启动: cargo run --bin agentloop-web
//! 默认监听 http://127.0.0.1:8000（[web] host / port 或 AGENTLOOP__WEB__PORT 覆盖）

use agentloop::agent::ChatAgent;
use agentloop::config::{load_config, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agentloop::observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let agent = ChatAgent::from_config(&cfg).await?;
    tracing::info!(
        model = %agent.model_name(),
        tools = ?agent.tool_declarations().iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
        "agent ready"
    );
    let app = agentloop::web::router(agent);

    let addr = format!("{}:{}", cfg.web.host, cfg.web.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("agentloop web: http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
