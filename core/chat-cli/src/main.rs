//! redis-chat: terminal group chat over a Redis REST store.
//!
//! ## Subcommands
//!
//! - `chat`: interactive session (default)
//! - `history`: print recent messages and exit
//! - `send`: post one message and exit

mod console;
mod logging;
mod render;
mod repl;

use chat_core::{config, ChatEngine};
use clap::{Parser, Subcommand};
use console::Console;
use render::Renderer;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "redis-chat")]
#[command(about = "Terminal group chat backed by a Redis REST store")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.redis-chat/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Username to chat as; prompted for when omitted in interactive mode
    #[arg(short, long, global = true)]
    username: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the chat interactively
    Chat,

    /// Print the most recent messages visible to --username
    History,

    /// Send a single message as --username
    Send {
        /// Message text; include /silent to address only mentioned users
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "redis-chat failed");
        eprintln!("redis-chat: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = config::load(cli.config)?;
    let mut engine = ChatEngine::new(config)?;
    tracing::info!(url = %engine.config().store.url, "Store configured");

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let stop = Arc::new(AtomicBool::new(false));
            signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))
                .map_err(|err| format!("Failed to install interrupt handler: {}", err))?;
            repl::run(engine, cli.username, stop)
        }
        Commands::History => {
            let username = require_username(cli.username)?;
            engine.register(&username)?;
            repl::print_history(&engine, &Console::new(Renderer::detect(), false));
            Ok(())
        }
        Commands::Send { text } => {
            let username = require_username(cli.username)?;
            engine.register(&username)?;
            let console = Console::new(Renderer::detect(), false);
            let renderer = console.renderer();
            match engine.send_message(&text.join(" ")) {
                Ok(message) if message.silent => {
                    console.println(renderer.success("Silent message sent"));
                    Ok(())
                }
                Ok(_) => {
                    console.println(renderer.success("Message sent"));
                    Ok(())
                }
                Err(err) => {
                    console.println(renderer.failure("Failed to send message"));
                    Err(err.into())
                }
            }
        }
    }
}

fn require_username(username: Option<String>) -> Result<String, String> {
    username.ok_or_else(|| "--username is required for this command".to_string())
}
