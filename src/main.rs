use anyhow::Result;
use clap::Parser;
use log::{error, info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use privchat::chat::{ChatClient, Command, ConnectionManager, Endpoint, HttpChatApi, UiEvent};
use privchat::config::{self, Overrides};
use privchat::utils;

/// Command line arguments for privchat
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "privchat: a terminal client for private one-to-one chat.",
    long_about = "privchat connects to a chat server over a WebSocket and its REST API.\n\n\
    Type a line to send it to the open dialog. Commands:\n\
    /select <user id>   open a dialog\n\
    /file <path>        upload and send a file\n\
    /typing, /stop      send typing notices\n\
    /users              list users\n\
    /quit               exit"
)]
struct Args {
    /// Server host and port, e.g. chat.example.com:443
    #[arg(long, value_name = "HOST")]
    server: Option<String>,

    /// Use wss:// and https://
    #[arg(long)]
    secure: bool,

    /// Session cookie value used to authenticate
    #[arg(long, value_name = "ID")]
    session: Option<String>,

    /// Store the effective settings in the config file
    #[arg(long)]
    save: bool,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: LevelFilter,
}

fn print_event(event: UiEvent) {
    match event {
        UiEvent::Notice(notice) => println!("* {}", notice),
        UiEvent::Connection(state) => println!("* {}", state),
        UiEvent::Dialogs(dialogs) => {
            println!("--- dialogs ---");
            for dialog in dialogs {
                println!(
                    "{} {} [{}] {}{} {}",
                    if dialog.highlighted { ">" } else { " " },
                    dialog.title,
                    dialog.id,
                    if dialog.online { "(online) " } else { "" },
                    if dialog.unread > 0 { format!("({} unread)", dialog.unread) } else { String::new() },
                    dialog.subtitle,
                );
            }
        }
        UiEvent::Messages { dialog_id, messages } => {
            println!("--- {} ---", dialog_id);
            for message in messages.iter().rev().take(20).rev() {
                let arrow = if message.is_inbound() { "<" } else { ">" };
                println!(
                    "{} {} {} [{:?}]",
                    message.timestamp.format("%H:%M"),
                    arrow,
                    message.body.preview(),
                    message.status
                );
            }
        }
        UiEvent::Typing(peers) if !peers.is_empty() => println!("* typing: {}", peers.join(", ")),
        UiEvent::Typing(_) => {}
        UiEvent::Users(users) => {
            println!("--- users ---");
            for user in users {
                println!("  {:>6}  {}", user.pk, user.username);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    utils::setup_logging(args.log_file.as_ref().and_then(|p| p.to_str()), args.log_level)?;
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);

    if let Some(path) = &args.config {
        config::set_config_path_override(path.clone())?;
    }
    let overrides = Overrides {
        server: args.server.clone(),
        secure: args.secure.then_some(true),
        session: args.session.clone(),
    };
    let config = config::load_config(&overrides)?;
    if args.save {
        if let Err(e) = config::save_config(&config) {
            eprintln!("Warning: Failed to save config: {}", e);
        }
    }

    let session = config.session();
    if session.is_none() {
        eprintln!("Warning: no session id configured, the server will likely refuse the connection");
    }
    println!("Connecting to {}... please wait...\n", config.server);

    let endpoint = Endpoint::new(&config.server, config.secure).with_session(session.clone());
    let connection = ConnectionManager::new(endpoint).spawn();
    let api = HttpChatApi::new(&HttpChatApi::origin(&config.server, config.secure), session.as_deref())?;

    let (mut client, mut ui_rx) = ChatClient::with_timeouts(
        connection,
        Arc::new(api),
        config.typing_timeout(),
        config.typing_throttle(),
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            print_event(event);
        }
    });

    // Blocking stdin reader feeding the control loop
    let (command_tx, command_rx) = mpsc::channel::<Command>(100);
    std::thread::spawn(move || loop {
        match utils::read_line() {
            Ok(Some(line)) => {
                if let Some(command) = utils::parse_command(&line) {
                    let quit = command == Command::Quit;
                    if command_tx.blocking_send(command).is_err() || quit {
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }
    });

    client.bootstrap().await;
    client.run(command_rx).await;
    client.shutdown().await;

    if let Err(e) = printer.await {
        error!("Output task failed: {}", e);
    }
    info!("privchat exited");
    Ok(())
}
