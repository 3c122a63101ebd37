use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use bookchat_core::{
    accept_selection, Book, Chapter, ChatApiClient, ChatSession, ChatTurn, Config, SendOutcome,
    DEFAULT_HISTORY_LIMIT,
};
use clap::{Parser, Subcommand};
use colored::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod reader;
mod tui;
mod ui;

use app::App;
use handler::handle_event;

const DEFAULT_LOG_FILTER: &str = "bookchat=info,bookchat_core=info";

#[derive(Parser)]
#[command(name = "bookchat")]
#[command(version, about = "Read a Markdown book in the terminal and ask questions about it")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the reader with the chat widget (default)
    Read {
        /// Directory of Markdown chapters
        #[arg(short, long)]
        book: Option<PathBuf>,
    },
    /// Ask a single question and print the answer
    Ask {
        /// Your question
        question: String,
        /// Scope the answer to this passage
        #[arg(short, long)]
        selected: Option<String>,
    },
    /// Show past questions stored by the chat service
    History {
        /// Defaults to this machine's saved id
        #[arg(short, long)]
        user_id: Option<String>,
        /// Maximum number of turns
        #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
    /// Rate an answer from 1 to 5
    Feedback {
        chat_id: String,
        rating: u8,
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Check that the chat service is up
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load()?;
    let command = cli.command.unwrap_or(Commands::Read { book: None });

    if matches!(command, Commands::Read { .. }) {
        init_file_logging()?;
    } else {
        init_stderr_logging();
    }

    let client = ChatApiClient::new(&config.api_base_url());
    match command {
        Commands::Read { book } => run_reader(&config, book).await,
        Commands::Ask { question, selected } => {
            let selected = check_ask(&config, &question, selected.as_deref())?;
            ask(&client, &question, selected.as_deref()).await
        }
        Commands::History { user_id, limit } => {
            let user_id = match user_id {
                Some(id) => id,
                None => config.ensure_user_id()?,
            };
            history(&client, &user_id, limit).await
        }
        Commands::Feedback {
            chat_id,
            rating,
            comment,
        } => feedback(&client, &chat_id, rating, comment.as_deref()).await,
        Commands::Health => health(&client).await,
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// The TUI owns the terminal, so logs go to a file in the cache dir
fn init_file_logging() -> Result<()> {
    let dir = dirs::cache_dir()
        .ok_or_else(|| anyhow!("Could not find cache directory"))?
        .join("bookchat");
    std::fs::create_dir_all(&dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("bookchat.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

fn load_book(config: &Config, book_arg: Option<PathBuf>) -> Result<Book> {
    let dir = book_arg.or_else(|| config.book_dir.clone());
    match dir {
        Some(dir) => Book::load_from_dir(&dir)
            .with_context(|| format!("Could not open the book at {}", dir.display())),
        None if Path::new("docs").is_dir() => {
            Book::load_from_dir(Path::new("docs")).context("Could not open the book in ./docs")
        }
        None => Ok(welcome_book()),
    }
}

fn welcome_book() -> Book {
    let text = "# Welcome to bookchat\n\n\
        No book was given. Start with `bookchat read --book <dir>` where <dir> holds \
        Markdown chapters, or set \"book_dir\" in the config file.\n\n\
        The chat widget works without a book: press c to open it, i to type a \
        question and Enter to send.\n\n\
        Select text in the reader with the mouse, or press v and j/k then y, to ask \
        about a passage. The answer will be based on the selected text.";
    Book::from_chapters(vec![Chapter {
        title: "Welcome".to_string(),
        path: PathBuf::from("welcome.md"),
        lines: text.lines().map(str::to_string).collect(),
    }])
}

async fn run_reader(config: &Config, book_arg: Option<PathBuf>) -> Result<()> {
    let book = load_book(config, book_arg)?;
    info!(
        api = %config.api_base_url(),
        chapters = book.len(),
        "starting reader"
    );

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let mut app = App::new(book, config);

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handle_event(&mut app, event).await?,
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    result
}

/// Hold a one-shot question to the same limits as the chat widget
fn check_ask(config: &Config, question: &str, selected: Option<&str>) -> Result<Option<String>> {
    let length = question.chars().count();
    if length > config.max_question_length {
        return Err(anyhow!(
            "Question is {} characters long, the limit is {}",
            length,
            config.max_question_length
        ));
    }

    match selected {
        None => Ok(None),
        Some(text) => accept_selection(text, config.max_selection_length)
            .map(Some)
            .ok_or_else(|| {
                anyhow!(
                    "Selected text must be non-empty and under {} characters",
                    config.max_selection_length
                )
            }),
    }
}

async fn ask(client: &ChatApiClient, question: &str, selected: Option<&str>) -> Result<()> {
    let mut session = ChatSession::new();
    if let Some(text) = selected {
        println!("{} {}", "Scoped to:".dimmed(), text.italic());
    }

    let outcome = session.send_message(client, question, selected).await?;

    match outcome {
        SendOutcome::Answered => {
            if let Some(turn) = session.last_answered() {
                print_turn(turn);
            }
            Ok(())
        }
        SendOutcome::Failed | SendOutcome::Abandoned => {
            let message = session.error().unwrap_or("Failed to send message");
            Err(anyhow!("{}", message))
        }
    }
}

async fn history(client: &ChatApiClient, user_id: &str, limit: usize) -> Result<()> {
    let turns = client.get_history(user_id, limit).await?;
    if turns.is_empty() {
        println!("{}", "No history yet".dimmed());
        return Ok(());
    }

    println!(
        "{} {}\n",
        turns.len().to_string().bold().green(),
        "past questions:".bold()
    );
    for turn in &turns {
        print_turn(turn);
    }
    Ok(())
}

async fn feedback(
    client: &ChatApiClient,
    chat_id: &str,
    rating: u8,
    comment: Option<&str>,
) -> Result<()> {
    client.submit_feedback(chat_id, rating, comment).await?;
    println!("{} {}/5 for {}", "Rated".green(), rating, chat_id.bold());
    Ok(())
}

async fn health(client: &ChatApiClient) -> Result<()> {
    let status = client.check_health().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn print_turn(turn: &ChatTurn) {
    println!("{} {}", "Q:".bold().cyan(), turn.question);
    if turn.retrieval_mode == bookchat_core::RetrievalMode::Selected {
        println!("{}", "Answer based on selected text".magenta());
    }
    println!("{} {}", "A:".bold().yellow(), turn.answer);
    if !turn.sources.is_empty() {
        println!("{}", "Sources:".bold());
        for source in &turn.sources {
            println!("  - {}", ui::format_source(source).dimmed());
        }
    }
    if let Some(chat_id) = &turn.chat_id {
        println!("{}", format!("chat id {}  {}", chat_id, turn.timestamp).dimmed());
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_arg_wins_over_config() {
        let configured = tempfile::tempdir().unwrap();
        std::fs::write(configured.path().join("a.md"), "# From config\n").unwrap();
        let given = tempfile::tempdir().unwrap();
        std::fs::write(given.path().join("a.md"), "# From flag\n").unwrap();

        let mut config = Config::new();
        config.book_dir = Some(configured.path().to_path_buf());

        let book = load_book(&config, Some(given.path().to_path_buf())).unwrap();
        assert_eq!(book.chapters()[0].title, "From flag");

        let book = load_book(&config, None).unwrap();
        assert_eq!(book.chapters()[0].title, "From config");
    }

    #[test]
    fn test_missing_book_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = load_book(&Config::new(), Some(missing)).unwrap_err();
        assert!(err.to_string().starts_with("Could not open the book at"));
    }

    #[test]
    fn test_ask_trims_selected_text() {
        let selected = check_ask(&Config::new(), "What is IK?", Some("  joint angles \n")).unwrap();
        assert_eq!(selected.as_deref(), Some("joint angles"));
        assert_eq!(check_ask(&Config::new(), "What is IK?", None).unwrap(), None);
    }

    #[test]
    fn test_ask_rejects_blank_selected_text() {
        let err = check_ask(&Config::new(), "What is IK?", Some("   ")).unwrap_err();
        assert!(err.to_string().starts_with("Selected text must be non-empty"));
    }

    #[test]
    fn test_ask_rejects_oversized_input() {
        let config = Config::new();

        let long_selection = "a".repeat(config.max_selection_length);
        assert!(check_ask(&config, "Why?", Some(&long_selection)).is_err());

        let long_question = "q".repeat(config.max_question_length + 1);
        let err = check_ask(&config, &long_question, None).unwrap_err();
        assert!(err.to_string().contains("the limit is 500"));

        let longest_question = "q".repeat(config.max_question_length);
        assert!(check_ask(&config, &longest_question, None).is_ok());
    }

    #[test]
    fn test_welcome_book_has_one_chapter() {
        let book = welcome_book();
        assert_eq!(book.len(), 1);
        assert_eq!(book.chapters()[0].title, "Welcome");
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["bookchat", "ask", "What is IK?", "--selected", "joint angles"])
            .unwrap();
        match cli.command {
            Some(Commands::Ask { question, selected }) => {
                assert_eq!(question, "What is IK?");
                assert_eq!(selected.as_deref(), Some("joint angles"));
            }
            _ => panic!("expected ask"),
        }

        let cli = Cli::try_parse_from(["bookchat"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["bookchat", "history"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::History { user_id: None, limit: 10 })
        ));
    }
}
