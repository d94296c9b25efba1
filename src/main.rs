mod attachment;
mod client;
mod config;
mod conversation;
mod error;
mod logging;
mod messages;
mod pipeline;
mod protocol;
mod segments;
mod session;
mod stream;
#[cfg(test)]
mod test_support;
mod ui;

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use crate::attachment::PendingUpload;
use crate::client::ApiClient;
use crate::config::{Cli, Command, Config, DietsCommand};
use crate::conversation::TurnState;
use crate::pipeline::ChatSession;
use crate::protocol::{Diet, UserData};
use crate::session::SessionManager;

type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> AppResult<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli);
    logging::init(&config)?;

    info!(api_url = %config.api_url, "starting dietmate");
    let client = ApiClient::new(&config.api_url)?;

    match cli.command {
        None | Some(Command::Chat) => {
            let chat = ChatSession::new(SessionManager::new(client));
            ui::run_tui(chat)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Ask { prompt, file }) => {
            ask(client, &prompt.join(" "), file.as_deref()).await
        }
        Some(Command::Diets { action }) => diets(client, action).await,
    }
}

async fn ask(client: ApiClient, prompt: &str, file: Option<&Path>) -> AppResult<ExitCode> {
    let attachment = match file {
        Some(path) => Some(PendingUpload::load(path).await?),
        None => None,
    };

    let mut chat = ChatSession::new(SessionManager::new(client));
    let mut stdout = io::stdout();
    let mut printed = 0;

    let state = chat
        .send_turn_observed(prompt, attachment, |turn| {
            // Content only grows while streaming; print the new tail.
            if turn.is_in_progress() || !turn.is_error() {
                if let Some(tail) = turn.content().get(printed..) {
                    let _ = write!(stdout, "{}", tail);
                    let _ = stdout.flush();
                    printed = turn.content().len();
                }
            }
        })
        .await?;

    match state {
        TurnState::Errored => {
            let message = chat
                .log()
                .last()
                .map(|turn| turn.content().to_string())
                .unwrap_or_default();
            if printed > 0 {
                println!();
            }
            eprintln!("Error: {}", message);
            Ok(ExitCode::FAILURE)
        }
        _ => {
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn diets(client: ApiClient, action: DietsCommand) -> AppResult<ExitCode> {
    match action {
        DietsCommand::List => {
            let diets = client.list_diets().await?;
            if diets.is_empty() {
                println!("No diets available.");
            }
            for diet in &diets {
                println!("{:>4}  {:<24} {:>8.2}", diet.id, diet.name, diet.price);
            }
        }
        DietsCommand::Show { id } => match client.get_diet(id).await? {
            Some(diet) => print_diet(&diet),
            None => {
                eprintln!("Diet {} not found", id);
                return Ok(ExitCode::FAILURE);
            }
        },
        DietsCommand::Buy { id, name, email } => {
            let response = client.purchase(id, UserData { name, email }).await?;
            println!("{}", response.message);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_diet(diet: &Diet) {
    println!("{} (#{})", diet.name, diet.id);
    println!("Price: {:.2}", diet.price);
    println!();
    println!("{}", diet.description);
}
