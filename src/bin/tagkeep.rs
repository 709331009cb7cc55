//! Tagkeep CLI: manage a tagged text collection stored in SQLite.
//!
//! Usage:
//!   tagkeep texts [--search "штир сов"]
//!   tagkeep tag <text> <tag-name>
//!   tagkeep export [--out file.json]
//!   tagkeep import <file.json>

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tagkeep::{
    DisabledClassifier, Source, SqlitePersistence, TagkeepApi, TagkeepConfig, TagkeepError, TextId,
    UserId,
};

#[derive(Parser)]
#[command(
    name = "tagkeep",
    version,
    about = "Tagged text collection with AI and manual tags"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Account whose collection is used
    #[arg(long, global = true, default_value = "local")]
    user: String,
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List texts, newest first
    Texts {
        /// Only texts whose tags match every term
        #[arg(long, short)]
        search: Option<String>,
    },
    /// List tags with their usage
    Tags,
    /// Add a text
    AddText {
        content: String,
    },
    /// Create a tag
    CreateTag {
        name: String,
    },
    /// Rename a tag
    RenameTag {
        /// Current tag name
        old: String,
        /// New tag name
        new: String,
    },
    /// Assign a tag to a text manually
    Tag {
        /// Text id or unique id prefix
        text: String,
        /// Tag name
        tag: String,
    },
    /// Remove a tag from a text
    Untag {
        /// Text id or unique id prefix
        text: String,
        /// Tag name
        tag: String,
    },
    /// Delete a text and its tags
    DeleteText {
        /// Text id or unique id prefix
        text: String,
    },
    /// Delete a tag from every text
    DeleteTag {
        name: String,
    },
    /// Create the configured default tags
    SeedTags,
    /// Export the collection as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Import a JSON export
    Import {
        #[arg(required = true)]
        file: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_api(cli: &Cli) -> Result<TagkeepApi, String> {
    let mut config = match &cli.config {
        Some(path) => TagkeepConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {}", path.display(), e))?,
        None => TagkeepConfig::default(),
    };
    // No classification service is reachable from the CLI
    config.engine.classify_on_create = false;

    let db_path = cli.db.clone().unwrap_or_else(|| config.database_path());
    let persistence = SqlitePersistence::open(&db_path)
        .map_err(|e| format!("Failed to open database: {}", e))?;
    TagkeepApi::open(
        UserId::from_string(cli.user.clone()),
        Arc::new(persistence),
        Arc::new(DisabledClassifier),
        &config,
    )
    .await
    .map_err(|e| format!("Failed to load collection: {}", e))
}

/// Resolve a full text id or a unique prefix of one
fn resolve_text(api: &TagkeepApi, raw: &str) -> Result<TextId, String> {
    let view = api.texts("");
    let matches: Vec<&TextId> = view
        .texts
        .iter()
        .map(|v| &v.text.id)
        .filter(|id| id.as_str() == raw || id.as_str().starts_with(raw))
        .collect();
    match matches.as_slice() {
        [id] => Ok((*id).clone()),
        [] => Err(format!("text '{}' not found", raw)),
        _ => Err(format!("text id prefix '{}' is ambiguous", raw)),
    }
}

fn report(result: Result<String, TagkeepError>) -> i32 {
    match result {
        Ok(message) => {
            println!("{}", message);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_texts(api: &TagkeepApi, search: Option<&str>) -> i32 {
    let view = api.texts(search.unwrap_or(""));
    if view.is_empty() {
        println!("No texts found.");
        return 0;
    }
    for entry in &view.texts {
        let tags: Vec<String> = entry
            .tags
            .iter()
            .map(|b| match b.source {
                Source::Manual => b.tag.name.clone(),
                Source::Ai => format!("{}~{:.2}", b.tag.name, b.confidence),
            })
            .collect();
        let short_id: String = entry.text.id.as_str().chars().take(8).collect();
        println!(
            "{}  {}  [{}]",
            short_id,
            entry.text.created_at.format("%Y-%m-%d"),
            tags.join(", ")
        );
        println!("    {}", entry.text.content);
    }
    0
}

async fn cmd_tags(api: &TagkeepApi) -> i32 {
    let tags = api.tags();
    if tags.is_empty() {
        println!("No tags defined.");
        return 0;
    }
    println!("{:<36}  {:<24}  {:>5}", "ID", "NAME", "USES");
    println!("{}", "-".repeat(69));
    for tag in tags {
        match api.tag_usage(&tag.id).await {
            Ok(uses) => println!("{:<36}  {:<24}  {:>5}", tag.id, tag.name, uses),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }
    0
}

async fn cmd_tag(api: &TagkeepApi, text: &str, tag: &str, assign: bool) -> i32 {
    let text_id = match resolve_text(api, text) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let Some(found) = api.find_tag(tag) else {
        eprintln!("Error: tag '{}' not found", tag);
        return 1;
    };
    let result = if assign {
        api.add_manual_tag(&text_id, &found.id).await
    } else {
        api.remove_tag(&text_id, &found.id).await
    };
    report(result.map(|m| {
        if m.is_noop() {
            "Nothing to change".to_string()
        } else if assign {
            format!("Tagged with '{}'", found.name)
        } else {
            format!("Removed '{}'", found.name)
        }
    }))
}

async fn cmd_export(api: &TagkeepApi, account: &str, out: Option<&PathBuf>) -> i32 {
    let json = match api.export_json(account).await {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match out {
        Some(path) => match std::fs::write(path, json) {
            Ok(()) => {
                println!("Exported to {}", path.display());
                0
            }
            Err(e) => {
                eprintln!("Error: cannot write '{}': {}", path.display(), e);
                1
            }
        },
        None => {
            println!("{}", json);
            0
        }
    }
}

async fn cmd_import(api: &TagkeepApi, file: &PathBuf) -> i32 {
    let raw = match std::fs::read_to_string(file) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", file.display(), e);
            return 1;
        }
    };
    match api.import_json(&raw).await {
        Ok(report) => {
            println!(
                "Imported {} texts ({} tags created, {} ai / {} manual assignments)",
                report.texts_imported,
                report.tags_created,
                report.ai_assignments,
                report.manual_assignments
            );
            for issue in &report.errors {
                eprintln!("  entry {}: {}", issue.index, issue.message);
            }
            for issue in &report.glossary_errors {
                eprintln!("  glossary entry {}: {}", issue.index, issue.message);
            }
            if let Some(e) = &report.resync_error {
                eprintln!("Warning: reload after import failed: {}", e);
            }
            if report.errors.is_empty() && report.glossary_errors.is_empty() {
                0
            } else {
                2
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let api = match open_api(&cli).await {
        Ok(api) => api,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match &cli.command {
        Commands::Texts { search } => cmd_texts(&api, search.as_deref()),
        Commands::Tags => cmd_tags(&api).await,
        Commands::AddText { content } => report(
            api.add_text(content)
                .await
                .map(|added| format!("Added text {}", added.text.id)),
        ),
        Commands::CreateTag { name } => report(
            api.create_tag(name)
                .await
                .map(|tag| format!("Created tag '{}' ({})", tag.name, tag.id)),
        ),
        Commands::RenameTag { old, new } => match api.find_tag(old) {
            Some(tag) => report(
                api.rename_tag(&tag.id, new)
                    .await
                    .map(|_| format!("Renamed tag '{}' to '{}'", tag.name, new.trim())),
            ),
            None => {
                eprintln!("Error: tag '{}' not found", old);
                1
            }
        },
        Commands::Tag { text, tag } => cmd_tag(&api, text, tag, true).await,
        Commands::Untag { text, tag } => cmd_tag(&api, text, tag, false).await,
        Commands::DeleteText { text } => match resolve_text(&api, text) {
            Ok(id) => report(
                api.delete_text(&id)
                    .await
                    .map(|_| format!("Deleted text {}", id)),
            ),
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Commands::DeleteTag { name } => match api.find_tag(name) {
            Some(tag) => report(
                api.delete_tag(&tag.id)
                    .await
                    .map(|_| format!("Deleted tag '{}'", tag.name)),
            ),
            None => {
                eprintln!("Error: tag '{}' not found", name);
                1
            }
        },
        Commands::SeedTags => report(
            api.seed_default_tags()
                .await
                .map(|created| format!("Created {} default tags", created.len())),
        ),
        Commands::Export { out } => cmd_export(&api, &cli.user, out.as_ref()).await,
        Commands::Import { file } => cmd_import(&api, file).await,
    };
    std::process::exit(code);
}
