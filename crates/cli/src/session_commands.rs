use {
    anyhow::{Context, Result},
    clap::Subcommand,
    relay_config::RelayConfig,
    relay_sessions::{SessionStore, SledSessionStore},
    serde_json::json,
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Show whether a persisted session exists.
    Status,
    /// Delete the persisted session. The next start asks to pair again.
    Reset,
}

/// Operates on the store directly, so the gateway must not be running.
pub async fn handle_session(action: SessionAction, config: &RelayConfig) -> Result<()> {
    let path = relay_gateway::server::session_store_path(config);
    let store = SledSessionStore::open(&path).with_context(|| {
        format!(
            "opening session store at {} (is the gateway running?)",
            path.display()
        )
    })?;
    let session_id = &config.connection.session_id;

    match action {
        SessionAction::Status => {
            let report = status(&store, session_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
        SessionAction::Reset => {
            if reset(&store, session_id).await? {
                println!("Deleted session \"{session_id}\"");
            } else {
                println!("No session \"{session_id}\" to delete");
            }
        },
    }
    Ok(())
}

async fn status(store: &dyn SessionStore, session_id: &str) -> Result<serde_json::Value> {
    let info = store.describe(session_id).await?;
    Ok(json!({
        "sessionId": session_id,
        "backend": store.backend(),
        "sessionExists": info.is_some(),
        "sessionInfo": info,
    }))
}

/// Returns whether there was anything to delete.
async fn reset(store: &dyn SessionStore, session_id: &str) -> Result<bool> {
    let existed = store.exists(session_id).await?;
    store.delete(session_id).await?;
    Ok(existed)
}
