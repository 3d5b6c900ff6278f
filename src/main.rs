use anyhow::Result;
use chrono::Local;
use smtp_sink::{Config, Server, SessionState};

fn log_session(st: SessionState) -> Result<()> {
    tracing::info!(
        "Captured mail at {} from {} {} for [{}]:\n{}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        st.greeting,
        st.client_name,
        st.recipients.join(", "),
        st
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let addr = config.socket_addr().await?;

    Server::bind(addr, &config.hostname, log_session)
        .await?
        .serve()
        .await
}
