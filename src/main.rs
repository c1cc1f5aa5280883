use anyhow::Context;

use inbox_assist::api::{AppState, routes};
use inbox_assist::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let Settings {
        mail: mail_config,
        server: server_config,
        suggest,
    } = Settings::from_env().context("Invalid configuration")?;

    eprintln!("📬 Inbox Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   IMAP: {}:{} ({})",
        mail_config.imap_host, mail_config.imap_port, mail_config.mailbox
    );
    eprintln!("   SMTP: {}:{}", mail_config.smtp_host, mail_config.smtp_port);
    eprintln!("   API: http://0.0.0.0:{}/api/emails", server_config.port);
    match &suggest {
        Some(config) => eprintln!("   Suggestions: {}", config.model),
        None => eprintln!("   Suggestions: disabled (ANTHROPIC_API_KEY not set)"),
    }

    let state = AppState::from_config(&mail_config, suggest.as_ref())
        .context("Failed to set up mail and suggestion providers")?;
    let app = routes(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server_config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", server_config.port))?;
    tracing::info!(port = server_config.port, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}
