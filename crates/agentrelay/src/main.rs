use agentrelay::build_context;
use agentrelay::cli::{Cli, Commands};
use agentrelay::commands::{
    Command, send::SendCommand, serve::ServeCommand, session::SessionCommand,
    settings::SettingsCommand, status::StatusCommand,
};
use clap::Parser;
use eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre for better error reports
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load .env file if it exists
    agentrelay::cli::config::load_env()?;

    // Initialize tracing (level configured via RUST_LOG env var)
    agentrelay_core::utils::tracing::init_tracing()?;

    let ctx = build_context(&cli).await?;
    let ready_timeout = cli.ready_timeout();

    match cli.command.clone().unwrap_or(Commands::Serve { json: false }) {
        Commands::Serve { json } => ServeCommand { ctx, json }.execute().await,
        Commands::Send {
            prompt,
            session,
            new,
            json,
        } => {
            let cmd = SendCommand {
                ctx,
                prompt,
                session,
                new_session: new,
                json,
                ready_timeout,
            };
            cmd.execute().await
        }
        Commands::Status { json } => {
            StatusCommand {
                ctx,
                ready_timeout,
                json,
            }
            .execute()
            .await
        }
        Commands::Settings { action } => {
            SettingsCommand {
                action,
                ctx,
                ready_timeout,
            }
            .execute()
            .await
        }
        Commands::Session { session_command } => {
            SessionCommand {
                command: session_command,
                ctx,
            }
            .execute()
            .await
        }
    }
}
