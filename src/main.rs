use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use threadline::config::AppConfig;
use threadline::orchestrator::{Orchestrator, ViewPhase, ViewState};
use threadline::platform::github::{DiscussionLocation, GitHubPlatform};
use threadline::push::discover_socket_url;
use threadline::push::websocket::WebSocketConnector;
use threadline::server::{create_router, AppState};
use threadline::shutdown::{graceful_shutdown, wait_for_shutdown};
use threadline::store::{FileTokenStore, TokenStore};

#[derive(Parser)]
#[command(name = "threadline", about = "Live, threaded discussion feed for GitHub pull requests")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the discussion of a pull request
    Show { url: String },
    /// Print the discussion and keep it live until interrupted
    Watch { url: String },
    /// Post a message to a channel (Main by default)
    Send {
        url: String,
        #[arg(long)]
        channel: Option<String>,
        text: String,
    },
    /// Delete one of your messages
    Delete {
        url: String,
        #[arg(long)]
        channel: Option<String>,
        id: String,
    },
    /// Serve the authorize-redirect endpoint
    ServeAuth,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::ServeAuth => serve_auth(&config).await,
        Command::Show { url } => {
            let Some(orchestrator) = connect(&config, &url)? else {
                return Ok(());
            };
            start(&orchestrator).await?;
            print_state(&orchestrator.state());
            Ok(())
        }
        Command::Watch { url } => watch(&config, &url).await,
        Command::Send { url, channel, text } => {
            let Some(orchestrator) = connect(&config, &url)? else {
                return Ok(());
            };
            start(&orchestrator).await?;
            if let Some(channel) = channel {
                orchestrator.select_channel(&channel);
            }
            orchestrator.send_message(&text).await?;
            print_state(&orchestrator.state());
            Ok(())
        }
        Command::Delete { url, channel, id } => {
            let Some(orchestrator) = connect(&config, &url)? else {
                return Ok(());
            };
            start(&orchestrator).await?;
            if let Some(channel) = channel {
                orchestrator.select_channel(&channel);
            }
            orchestrator.delete_message(&id).await?;
            print_state(&orchestrator.state());
            Ok(())
        }
    }
}

/// Build an orchestrator for a page URL. `None` when the URL is not a pull
/// request page.
fn connect(config: &AppConfig, url: &str) -> anyhow::Result<Option<Orchestrator>> {
    let Some(location) = DiscussionLocation::from_page(url, &config.github.web_host) else {
        tracing::info!(url = url, "Not a pull request page, nothing to do");
        return Ok(None);
    };

    let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(&config.store.path));
    let platform = GitHubPlatform::new(&config.github, store)?;
    Ok(Some(Orchestrator::new(Arc::new(platform), Some(location), None)))
}

async fn start(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    if let Err(e) = orchestrator.start().await {
        if e.is_authorization() {
            anyhow::bail!("not signed in: store a token under `token` in the token store ({e})");
        }
        return Err(e.into());
    }
    Ok(())
}

async fn watch(config: &AppConfig, url: &str) -> anyhow::Result<()> {
    let Some(orchestrator) = connect(config, url)? else {
        return Ok(());
    };

    let socket_url = match &config.push.url {
        Some(url) => Some(url.clone()),
        None => match discover_socket_url(&reqwest::Client::new(), url).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "Push endpoint discovery failed, continuing without live updates");
                None
            }
        },
    };

    orchestrator
        .enable_live_updates(
            Arc::new(WebSocketConnector),
            config.push.refresh_policy,
            socket_url,
        )
        .await;

    let mut updates = orchestrator.subscribe();
    start(&orchestrator).await?;
    print_state(&orchestrator.state());
    updates.borrow_and_update();

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                print_state(&state);
            }
        }
    }

    graceful_shutdown(&orchestrator).await;
    Ok(())
}

async fn serve_auth(config: &AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting authorize-redirect server"
    );

    let state = Arc::new(AppState::new(config.oauth.clone()));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    Ok(())
}

fn print_state(state: &ViewState) {
    match state.phase() {
        ViewPhase::Loading => println!("Loading..."),
        ViewPhase::Unauthenticated => println!("Not signed in."),
        ViewPhase::AuthenticatedWithoutDiscussion => println!("No discussion on this page."),
        ViewPhase::Ready {
            discussion,
            selected_channel,
            ..
        } => {
            println!("{} (#{})", discussion.title, discussion.id);
            for channel in &discussion.channels {
                let marker = if Some(channel.key.as_str()) == selected_channel {
                    "*"
                } else {
                    " "
                };
                println!();
                println!("{marker} [{}] {}", channel.key, channel.title);
                for comment in &channel.comments {
                    let reply = match &comment.in_reply_to_id {
                        Some(parent) => format!(" ↳{parent}"),
                        None => String::new(),
                    };
                    let deletable = if comment.can_delete { " (yours)" } else { "" };
                    println!(
                        "    {} {} @{}{}{}: {}",
                        comment.id,
                        comment.created_at.format("%Y-%m-%d %H:%M"),
                        comment.author.login,
                        reply,
                        deletable,
                        comment.body_text.replace('\n', "\n      "),
                    );
                }
            }
        }
    }
}
