use std::path::Path;

use agentrelay::build_context;
use agentrelay::cli::{Cli, SessionCommands};
use agentrelay::commands::Command;
use agentrelay::commands::session::SessionCommand;
use agentrelay_core::AppContext;
use clap::Parser;
use tempfile::TempDir;

async fn context(dir: &Path) -> AppContext {
    let store = dir.join("sessions.json");
    let config = dir.join("config.toml");
    let cli = Cli::try_parse_from([
        "agentrelay",
        "--store",
        store.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "session",
        "list",
    ])
    .unwrap();
    build_context(&cli).await.unwrap()
}

async fn run(ctx: &AppContext, command: SessionCommands) -> eyre::Result<()> {
    SessionCommand {
        command,
        ctx: ctx.clone(),
    }
    .execute()
    .await
}

#[tokio::test]
async fn session_lifecycle_is_persisted() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path()).await;

    run(&ctx, SessionCommands::Create {
        title: "Research".to_string(),
    })
    .await
    .unwrap();
    run(&ctx, SessionCommands::Create {
        title: "Scratch".to_string(),
    })
    .await
    .unwrap();

    let document = ctx.store().get_all().await;
    assert_eq!(document.sessions.len(), 2);
    let research = document
        .sessions
        .iter()
        .find(|s| s.title == "Research")
        .unwrap()
        .id
        .clone();
    let scratch = document.sessions[0].id.clone();
    assert_eq!(document.active_session_id.as_ref(), Some(&scratch));

    // A unique prefix is enough to address a session.
    let prefix = research.as_str()[..12].to_string();
    run(&ctx, SessionCommands::Select {
        session_id: prefix.clone(),
    })
    .await
    .unwrap();
    run(&ctx, SessionCommands::Rename {
        session_id: prefix,
        title: "Reading list".to_string(),
    })
    .await
    .unwrap();
    run(&ctx, SessionCommands::Show {
        session_id: research.as_str().to_string(),
    })
    .await
    .unwrap();
    run(&ctx, SessionCommands::List).await.unwrap();

    run(&ctx, SessionCommands::Delete {
        session_id: research.as_str().to_string(),
        force: true,
    })
    .await
    .unwrap();
    ctx.shutdown().await.unwrap();

    let reopened = context(dir.path()).await;
    let document = reopened.store().get_all().await;
    assert_eq!(document.sessions.len(), 1);
    assert_eq!(document.sessions[0].title, "Scratch");
    // Deleting the active session moved the pointer to the remaining one.
    assert_eq!(document.active_session_id.as_ref(), Some(&scratch));
}

#[tokio::test]
async fn unknown_sessions_are_reported() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path()).await;

    let err = run(&ctx, SessionCommands::Select {
        session_id: "does-not-exist".to_string(),
    })
    .await
    .unwrap_err();
    assert!(err.to_string().contains("No session matches 'does-not-exist'"));
    assert_eq!(ctx.store().active_session_id().await, None);
}
