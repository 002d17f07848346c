use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vitrine_api::{ApiConfig, ResourceRepository, RestRepository};
use vitrine_core::prelude::*;
use vitrine_persist::{favorites_in, mark_favorites, FavoriteStore, LocalFavoriteSet, SqliteFavorites};
use vitrine_store::{Rejected, ResourceStateMachine, SubmitOutcome, Ticket};

#[derive(Parser, Debug)]
#[command(name = "vitrinectl", version, about = "Vitrine CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Resource kind to operate on
    #[arg(long = "kind", value_enum, global = true, default_value_t = Kind::Ad)]
    kind: Kind,

    /// Signed-in user id (omit to act signed out)
    #[arg(long = "user", env = "VITRINE_USER", global = true)]
    user: Option<String>,

    /// Session role: guest, member or privileged
    #[arg(long = "role", env = "VITRINE_ROLE", global = true, default_value = "member")]
    role: Role,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Kind { Ad, Review }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List resources
    Ls {
        /// Only those owned by --user
        #[arg(long = "mine", action = ArgAction::SetTrue)]
        mine: bool,
        /// Only locally marked favorites
        #[arg(long = "favorites", action = ArgAction::SetTrue)]
        favorites: bool,
    },
    /// Show one resource
    Show { id: String },
    /// Create a resource from field assignments
    Create {
        /// Field assignment, e.g. --set titre=Promo
        #[arg(long = "set", value_parser = parse_kv)]
        set: Vec<(String, String)>,
    },
    /// Load a resource, apply field assignments and save it
    Edit {
        id: String,
        #[arg(long = "set", value_parser = parse_kv)]
        set: Vec<(String, String)>,
    },
    /// Delete a resource
    Rm { id: String },
    /// Local favorites
    Fav {
        #[command(subcommand)]
        command: FavCommands,
    },
}

#[derive(Subcommand, Debug)]
enum FavCommands {
    Add { id: String },
    Rm { id: String },
    Ls,
}

fn init_tracing() {
    let env = std::env::var("VITRINE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VITRINE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid VITRINE_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_kv(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected field=value, got {:?}", s)),
    }
}

fn session_for(cli: &Cli) -> SessionContext {
    match &cli.user {
        Some(user) => SessionContext::signed_in(Session::new(user.as_str(), cli.role)),
        None => SessionContext::new(),
    }
}

/// Rejections carry their own user-facing wording.
fn rejected(e: Rejected) -> anyhow::Error {
    match e {
        Rejected::Restricted(denied) => anyhow!(denied.user_message()),
        other => anyhow!(other),
    }
}

/// Cancelled on Ctrl-C; in-flight calls are dropped with it.
fn screen_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling in-flight requests");
            on_signal.cancel();
        }
    });
    token
}

fn print_item<R: Resource>(output: Output, item: &R, favorite: bool) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(item)?),
        Output::Human => {
            let id = item.id().map(|i| i.to_string()).unwrap_or_else(|| "-".into());
            let star = if favorite { "★" } else { " " };
            println!("{} {} • {}", star, id, item.label());
            if let Value::Object(fields) = serde_json::to_value(item)? {
                for (k, v) in fields {
                    let shown = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    println!("    {}: {}", k, shown);
                }
            }
        }
    }
    Ok(())
}

async fn finish<R: Resource>(
    output: Output,
    machine: &mut ResourceStateMachine<R>,
    ticket: Ticket,
) -> Result<()> {
    let req = ticket.request_id();
    let SubmitOutcome { ok, message } = ticket.outcome().await;
    machine.settle().await;
    let id = machine
        .submission()
        .data()
        .and_then(|s| s.resource())
        .and_then(|r| r.id())
        .map(|i| i.to_string());
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&json!({ "ok": ok, "message": message, "id": id }))?),
        Output::Human if ok => println!("ok{}", id.map(|i| format!(" • {}", i)).unwrap_or_default()),
        Output::Human => {}
    }
    if !ok {
        bail!("request {} failed: {}", req, message.unwrap_or_default());
    }
    Ok(())
}

fn apply_sets<D: Draft>(draft: &mut D, sets: &[(String, String)]) -> Result<()> {
    for (k, v) in sets {
        draft.set(k, v)?;
    }
    Ok(())
}

async fn run<R: Resource>(cli: &Cli) -> Result<()> {
    let session = session_for(cli);
    let config = ApiConfig::from_env();
    info!(kind = R::KIND, base_url = %config.base_url, role = %session.role(), "vitrinectl: start");
    let repo: Arc<dyn ResourceRepository<R>> = Arc::new(RestRepository::<R>::new(&config)?);
    let token = screen_token();
    let mut machine = ResourceStateMachine::new(repo, session).with_parent(&token);

    match &cli.command {
        Commands::Ls { mine, favorites } => {
            machine.load();
            machine.settle().await;
            let items = match machine.list() {
                UiState::Success(items) => items.clone(),
                UiState::Error(msg) => bail!("listing {} failed: {}", R::ENDPOINT, msg),
                _ => bail!("interrupted"),
            };
            let items = if *mine {
                if machine.session().user_id().is_none() {
                    warn!("--mine without --user lists nothing");
                }
                machine.owned()
            } else {
                items
            };
            let store = SqliteFavorites::open_default()?;
            let favs = LocalFavoriteSet::load::<R>(&store)?;
            let items = if *favorites { favorites_in(&items, &favs) } else { items };
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&items)?),
                Output::Human => {
                    for m in mark_favorites(&items, &favs) {
                        let id = m.item.id().map(|i| i.to_string()).unwrap_or_else(|| "-".into());
                        println!("{} {} • {}", if m.favorite { "★" } else { " " }, id, m.item.label());
                    }
                }
            }
        }
        Commands::Show { id } => {
            machine.load_one(ResourceId::new(id.as_str()));
            machine.settle().await;
            match machine.current() {
                UiState::Success(item) => {
                    let favs = LocalFavoriteSet::load::<R>(&SqliteFavorites::open_default()?)?;
                    let favorite = item.id().map_or(false, |i| favs.contains(i));
                    print_item(cli.output, item, favorite)?;
                }
                UiState::Error(msg) => bail!("{} {}: {}", R::KIND, id, msg),
                _ => bail!("interrupted"),
            }
        }
        Commands::Create { set } => {
            machine.authorize_form().map_err(|d| anyhow!(d.user_message()))?;
            let mut draft = R::Draft::default();
            apply_sets(&mut draft, set)?;
            let ticket = machine.create(&draft).map_err(rejected)?;
            finish(cli.output, &mut machine, ticket).await?;
        }
        Commands::Edit { id, set } => {
            machine.authorize_form().map_err(|d| anyhow!(d.user_message()))?;
            machine.load_one(ResourceId::new(id.as_str()));
            machine.settle().await;
            if let Some(msg) = machine.current().error() {
                bail!("{} {}: {}", R::KIND, id, msg);
            }
            let mut draft = machine.edit_draft();
            apply_sets(&mut draft, set)?;
            let ticket = machine.submit(&draft).map_err(rejected)?;
            finish(cli.output, &mut machine, ticket).await?;
        }
        Commands::Rm { id } => {
            let ticket = machine.delete(Some(&ResourceId::new(id.as_str()))).map_err(rejected)?;
            finish(cli.output, &mut machine, ticket).await?;
        }
        Commands::Fav { command } => {
            let store = SqliteFavorites::open_default().context("opening favorites")?;
            match command {
                FavCommands::Add { id } => {
                    store.add(R::KIND, &ResourceId::new(id.as_str()))?;
                }
                FavCommands::Rm { id } => {
                    store.remove(R::KIND, &ResourceId::new(id.as_str()))?;
                }
                FavCommands::Ls => {
                    let favs = LocalFavoriteSet::load::<R>(&store)?;
                    let mut ids: Vec<_> = favs.get_all().iter().map(|i| i.to_string()).collect();
                    ids.sort();
                    match cli.output {
                        Output::Json => println!("{}", serde_json::to_string_pretty(&ids)?),
                        Output::Human => ids.iter().for_each(|i| println!("{}", i)),
                    }
                }
            }
        }
    }
    machine.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    match cli.kind {
        Kind::Ad => run::<Advertisement>(&cli).await,
        Kind::Review => run::<Review>(&cli).await,
    }
}
