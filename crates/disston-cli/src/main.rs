//! Disston CLI - command-line access to the Disston City SC site API.
//!
//! Reads print the cached result as JSON once it settles; admin commands
//! run the optimistic mutations and print the reconciled list.

use std::io;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use disston_core::api::client::DEFAULT_MATCH_LIMIT;
use disston_core::models::LeagueType;
use disston_core::{ClientConfig, Club, QueryHandle};

const USAGE: &str = "\
Usage: disston <command> [args]

Commands:
  roster                          Current roster
  active                          Active players
  requests                        Pending player requests
  posts                           Blog posts
  leagues [suncoast|mexican|active]
  standings <league-id>
  matches [upcoming|recent] [limit]
  matches league <league-id>
  matches team <team-id>
  match <match-id>
  approve <player-id>             Approve a player request
  reject <player-id>              Reject a player request
  approve-post <post-id>
  delete-post <post-id>";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    if command == "-h" || command == "--help" {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = ClientConfig::load()?;
    info!(base_url = %config.base_url, "Disston CLI starting");
    let club = Club::from_config(&config)?;

    run(&club, command, &args[1..]).await
}

async fn run(club: &Club, command: &str, rest: &[String]) -> Result<()> {
    match command {
        "roster" => print_settled(club.roster()).await,
        "active" => print_settled(club.active_players()).await,
        "requests" => print_settled(club.player_requests()).await,
        "posts" => print_settled(club.blog_posts()).await,
        "leagues" => match rest.first().map(String::as_str) {
            None => print_settled(club.leagues()).await,
            Some("active") => print_settled(club.active_leagues()).await,
            Some(kind) => {
                let league_type = LeagueType::parse(kind)
                    .ok_or_else(|| anyhow!("Unknown league type: {}", kind))?;
                print_settled(club.leagues_by_type(league_type)).await
            }
        },
        "standings" => print_settled(club.league_standings(arg(rest, 0, "league-id")?)).await,
        "matches" => match rest.first().map(String::as_str) {
            None => print_settled(club.matches()).await,
            Some("upcoming") => print_settled(club.upcoming_matches(parse_limit(rest.get(1))?)).await,
            Some("recent") => print_settled(club.recent_matches(parse_limit(rest.get(1))?)).await,
            Some("league") => print_settled(club.matches_by_league(arg(rest, 1, "league-id")?)).await,
            Some("team") => print_settled(club.matches_by_team(arg(rest, 1, "team-id")?)).await,
            Some(other) => bail!("Unknown matches filter: {}\n\n{}", other, USAGE),
        },
        "match" => print_settled(club.match_detail(arg(rest, 0, "match-id")?)).await,
        "approve" => {
            let id = arg(rest, 0, "player-id")?;
            let requests = club.player_requests();
            mutate_and_print(requests, club.approve_player(id), "approve player").await
        }
        "reject" => {
            let id = arg(rest, 0, "player-id")?;
            let requests = club.player_requests();
            mutate_and_print(requests, club.reject_player(id), "reject player").await
        }
        "approve-post" => {
            let id = arg(rest, 0, "post-id")?;
            let posts = club.blog_posts();
            mutate_and_print(posts, club.approve_blog_post(id), "approve blog post").await
        }
        "delete-post" => {
            let id = arg(rest, 0, "post-id")?;
            let posts = club.blog_posts();
            mutate_and_print(posts, club.delete_blog_post(id), "delete blog post").await
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

fn arg<'a>(rest: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    rest.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing <{}>\n\n{}", name, USAGE))
}

fn parse_limit(raw: Option<&String>) -> Result<u32> {
    match raw {
        None => Ok(DEFAULT_MATCH_LIMIT),
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid limit: {}", raw)),
    }
}

/// Wait for the query to settle and print its data as JSON.
async fn print_settled<T>(mut handle: QueryHandle<T>) -> Result<()>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    let entry = handle.settled().await;
    if let Some(err) = &entry.error {
        return Err(anyhow::Error::new(err.clone()).context(format!("Failed to load {}", handle.key())));
    }
    let data = entry
        .data()
        .ok_or_else(|| anyhow!("No data for {}", handle.key()))?;
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Load the list the mutation touches (so there is something to update
/// optimistically), run the mutation, then print the reconciled list.
async fn mutate_and_print<T, F>(mut handle: QueryHandle<T>, mutation: F, what: &str) -> Result<()>
where
    T: Serialize + Clone + Send + Sync + 'static,
    F: std::future::Future<Output = Result<(), disston_core::ApiError>>,
{
    handle.settled().await;
    mutation
        .await
        .with_context(|| format!("Failed to {}", what))?;
    eprintln!("Done: {}", what);
    print_settled(handle).await
}
