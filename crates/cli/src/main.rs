use clap::{Parser, Subcommand};
use std::io::Write;
use std::time::Duration;

use pulsar::config;
use pulsar::controller::{ChatController, ChatError};
use pulsar::reveal::{RenderContent, TypingReveal, TYPING_INDICATOR_MS, TYPING_TICK_MS};
use pulsar::rpc::FrappeClient;
use pulsar::session::{Role, SessionList};
use pulsar::suggest;

#[derive(Parser)]
#[command(name = "pulsar")]
#[command(about = "Pulsar AI terminal chat client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// List saved chats for the configured owner.
    Sessions {
        /// Config file path (default: PULSAR_CONFIG_PATH or ~/.pulsar/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Chat with the assistant (interactive).
    Chat {
        /// Config file path (default: PULSAR_CONFIG_PATH or ~/.pulsar/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Existing chat id to open on start.
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        /// Print replies at once instead of animating them.
        #[arg(long)]
        no_animation: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("pulsar {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Sessions { config }) => {
            if let Err(e) = run_sessions(config).await {
                log::error!("sessions failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat {
            config,
            session,
            no_animation,
        }) => {
            if let Err(e) = run_chat(config, session, !no_animation).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn build_controller(
    config_path: Option<std::path::PathBuf>,
) -> anyhow::Result<(ChatController<FrappeClient>, String)> {
    let (config, _path) = config::load_config(config_path)?;
    let auth = config::resolve_api_auth(&config);
    let owner = config::resolve_owner(&config);
    let client = FrappeClient::new(
        config.backend.base_url.clone(),
        config.backend.method_root.clone(),
        auth,
    );
    Ok((ChatController::new(client), owner))
}

async fn run_sessions(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (ctrl, owner) = build_controller(config_path)?;
    ctrl.refresh_sessions(&owner).await?;
    print_session_list(&ctrl.sessions().await);
    Ok(())
}

fn print_session_list(list: &SessionList) {
    if list.is_empty() {
        println!("no saved chats");
        return;
    }
    for (i, entry) in list.entries().iter().enumerate() {
        let marker = if list.active() == Some(entry.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{} {:>2}. {}  ({})", marker, i + 1, entry.title, entry.id);
    }
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    session: Option<String>,
    animate: bool,
) -> anyhow::Result<()> {
    use std::io::{self, BufRead};

    let (ctrl, owner) = build_controller(config_path)?;
    let origin = ctrl.backend().base_url().to_string();

    if let Err(e) = ctrl.refresh_sessions(&owner).await {
        log::warn!("could not load saved chats: {}", e);
    }
    if let Some(id) = session {
        ctrl.select_session(&id).await?;
    }

    print_transcript(&ctrl, &origin).await;
    println!("(/new /sessions /open <n> /delete <n> /suggest <text> /exit)");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(cmd) = input.strip_prefix('/') {
            let (name, rest) = cmd.split_once(' ').unwrap_or((cmd, ""));
            match name {
                "exit" | "quit" => break,
                "new" => {
                    ctrl.start_new_session().await;
                    print_transcript(&ctrl, &origin).await;
                }
                "sessions" => print_session_list(&ctrl.sessions().await),
                "open" => match resolve_target(&ctrl.sessions().await, rest.trim()) {
                    Some(id) => match ctrl.select_session(&id).await {
                        Ok(()) => print_transcript(&ctrl, &origin).await,
                        Err(e) => eprintln!("! {}", e),
                    },
                    None => eprintln!("! unknown chat: {}", rest.trim()),
                },
                "delete" => match resolve_target(&ctrl.sessions().await, rest.trim()) {
                    Some(id) => {
                        if confirm_delete(&stdin, &mut stdout)? {
                            match ctrl.delete_session(&id).await {
                                Ok(()) => {
                                    println!("chat deleted");
                                    if ctrl.is_new().await {
                                        print_transcript(&ctrl, &origin).await;
                                    }
                                }
                                Err(e) => eprintln!("! {}", e),
                            }
                        }
                    }
                    None => eprintln!("! unknown chat: {}", rest.trim()),
                },
                "suggest" => {
                    let hits = suggest::matches(rest);
                    if hits.is_empty() {
                        println!("no suggestions");
                    } else {
                        for s in hits {
                            println!("  {}", s);
                        }
                    }
                }
                _ => println!("(/new /sessions /open <n> /delete <n> /suggest <text> /exit)"),
            }
            continue;
        }

        match ctrl.submit_question(input).await {
            Ok(turn) => render_reply(&turn.reply, &origin, animate).await,
            Err(ChatError::SessionGone) => {}
            Err(e) => eprintln!("! {}", e),
        }
    }

    Ok(())
}

fn confirm_delete(stdin: &std::io::Stdin, stdout: &mut std::io::Stdout) -> anyhow::Result<bool> {
    use std::io::BufRead;
    write!(stdout, "This chat will be softly deleted. Are you sure? [y/N] ")?;
    stdout.flush()?;
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Accepts a 1-based list position or a raw chat id.
fn resolve_target(list: &SessionList, arg: &str) -> Option<String> {
    if arg.is_empty() {
        return None;
    }
    if let Ok(n) = arg.parse::<usize>() {
        if n >= 1 && n <= list.len() {
            return Some(list.entries()[n - 1].id.clone());
        }
        return None;
    }
    list.entries()
        .iter()
        .find(|e| e.id == arg)
        .map(|e| e.id.clone())
}

async fn print_transcript<B: pulsar::rpc::AiBackend>(ctrl: &ChatController<B>, origin: &str) {
    println!();
    for msg in ctrl.transcript().await {
        match msg.role {
            Role::User => println!("You: {}", msg.content),
            Role::Assistant => match RenderContent::from_reply(&msg.content, origin) {
                RenderContent::FileLink { url, .. } => {
                    println!("Pulsar AI: 📁 Download your file: {}", url)
                }
                RenderContent::Text(text) => println!("Pulsar AI: {}", text),
            },
        }
    }
    println!();
}

/// Show the reply. The transcript is already updated by the time this runs;
/// the animation is cosmetic.
async fn render_reply(reply: &str, origin: &str, animate: bool) {
    match RenderContent::from_reply(reply, origin) {
        RenderContent::FileLink { url, .. } => {
            println!("< 📁 Download your file: {}", url);
        }
        RenderContent::Text(text) => {
            if !animate {
                println!("< {}", text.trim());
                return;
            }
            let mut stdout = std::io::stdout();
            let _ = write!(stdout, "· · ·");
            let _ = stdout.flush();
            tokio::time::sleep(Duration::from_millis(TYPING_INDICATOR_MS)).await;
            let _ = write!(stdout, "\r     \r< ");
            for chunk in TypingReveal::new(text.trim()) {
                let _ = write!(stdout, "{}", chunk);
                let _ = stdout.flush();
                tokio::time::sleep(Duration::from_millis(TYPING_TICK_MS)).await;
            }
            println!();
        }
    }
}
