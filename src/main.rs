use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use docket_scout::{api, config, AppState, CdpPortalFactory};

/// `--port N` or `--port=N`.
fn port_flag() -> Option<u16> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    args.iter().enumerate().find_map(|(i, arg)| {
        let value = match arg.strip_prefix("--port") {
            Some("") => args.get(i + 1)?.as_str(),
            Some(rest) => rest.strip_prefix('=')?,
            None => return None,
        };
        value.parse().ok()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,tower_http=warn,chromiumoxide=warn")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let scout_config = config::load_scout_config();
    let bind_addr = scout_config.server.resolve_bind_addr(port_flag());
    let policy = scout_config.checkpoint_policy();
    info!(
        mode = ?policy.mode,
        court_skip_trust = ?policy.court_skip_trust,
        interaction_timeout = ?policy.interaction_timeout,
        max_active_jobs = scout_config.resolve_max_active_jobs(),
        headless = scout_config.browser.resolve_headless(),
        "starting docket-scout"
    );

    let factory = Arc::new(CdpPortalFactory::from_config(&scout_config));
    let state = Arc::new(AppState::new(scout_config, factory));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| {
            format!("cannot bind {bind_addr}; pass --port or set DOCKET_SCOUT_PORT to use another port")
        })?;
    info!("listening on http://{} (operator channel at /ws)", bind_addr);

    axum::serve(listener, api::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => futures::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown requested; cancelling active jobs");
    state.jobs.shutdown().await;
}
