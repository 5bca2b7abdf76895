use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use clap::Parser;
use docscope::{
    ChunkingConfig,
    CollectionStore,
    ConfigDb,
    DataDir,
    Error,
    Result,
    Settings,
    provider,
    rebuild::{CancelToken, RebuildReport, Rebuilder},
    scope::Scope,
    search::{self, SearchEngine},
    settings,
    store::{CollectionState, Manifest},
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, SettingsAction, SourceAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSCOPE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Source { action } => match action {
            SourceAction::Add { path, scope } => {
                source_add(&config_db, &path, scope)?;
            }
            SourceAction::Remove { path } => {
                source_remove(&config_db, &path)?;
            }
            SourceAction::List { json } => {
                source_list(&config_db, json)?;
            }
        },
        Command::Search(args) => {
            let settings = Settings::load(&config_db)?;
            let store = CollectionStore::open(&data_dir.collections_dir()?)?;
            let engine = SearchEngine::new(
                store.clone(),
                provider::build_provider(&settings)?,
            )
            .with_max_distance(settings.max_distance);

            let results = engine.search(&args.query, args.scope, args.count)?;
            if args.json {
                search::format_json(&results, &args.query, args.scope)?;
            } else {
                search::format_human(&results);
            }
            store.close()?;
        }
        Command::Rebuild(args) => {
            let settings = Settings::load(&config_db)?;
            let store = CollectionStore::open(&data_dir.collections_dir()?)?;
            let batcher = provider::build_batcher(
                provider::build_provider(&settings)?,
                &settings,
            )?;
            let chunking = ChunkingConfig {
                max_passage_chars: settings.max_passage_chars,
            };

            let report = Rebuilder::new(store.clone(), batcher, chunking)
                .with_sources_from(&config_db)?
                .rebuild(args.scope, &CancelToken::new())?;
            print_report(&report, args.json)?;
            store.close()?;
        }
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, args.json)?;
        }
        Command::Backup(args) => {
            let dest = match args.dest {
                Some(dest) => dest,
                None => {
                    data_dir.backups_dir()?.join(timestamp().to_string())
                }
            };
            let store = CollectionStore::open(&data_dir.collections_dir()?)?;
            let written = store.backup(&dest)?;
            println!(
                "Backed up {} collection(s) to {}",
                written.len(),
                dest.display()
            );
            store.close()?;
        }
        Command::Restore(args) => {
            if !args.src.is_dir() {
                return Err(Error::NotFound {
                    kind: "backup directory",
                    name: args.src.display().to_string(),
                });
            }
            let store = CollectionStore::open(&data_dir.collections_dir()?)?;
            let restored = store.restore(&args.src)?;
            if restored.is_empty() {
                println!(
                    "No collection files found in {}",
                    args.src.display()
                );
            } else {
                for scope in &restored {
                    println!("Restored '{scope}'");
                }
            }
            store.close()?;
        }
        Command::Settings { action } => match action {
            SettingsAction::Show { json } => {
                let settings = Settings::load(&config_db)?;
                if json {
                    println!("{}", serde_json::to_string(&settings)?);
                } else {
                    print_settings(&settings);
                }
            }
            SettingsAction::Set { key, value } => {
                settings::validate(&key, &value)?;
                config_db.set_setting(&key, value.trim())?;
                println!("Set {key} = {}", value.trim());
            }
            SettingsAction::Clear { key } => {
                if !config_db.remove_setting(&key)? {
                    return Err(Error::NotFound {
                        kind: "setting",
                        name: key,
                    });
                }
                println!("Cleared {key}");
            }
        },
        Command::Completions(_) => {}
    }

    Ok(())
}

fn source_add(config_db: &ConfigDb, path: &Path, scope: Scope) -> Result<()> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "source does not exist: {}",
            path.display()
        )));
    }

    let abs_path = path.canonicalize().map_err(|e| {
        Error::Config(format!("cannot resolve path {}: {e}", path.display()))
    })?;

    config_db.add_source(&abs_path, scope)?;
    println!("Added source {} -> '{scope}'", abs_path.display());
    Ok(())
}

fn source_remove(config_db: &ConfigDb, path: &Path) -> Result<()> {
    // Sources are stored canonicalized; fall back to the literal path for
    // locations that no longer exist.
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !config_db.remove_source(&key)? {
        return Err(Error::NotFound {
            kind: "source",
            name: path.display().to_string(),
        });
    }
    println!("Removed source {}", key.display());
    Ok(())
}

#[derive(Serialize)]
struct SourceEntry {
    path: String,
    scope: Scope,
}

fn source_list(config_db: &ConfigDb, json: bool) -> Result<()> {
    let sources = config_db.list_sources()?;

    if json {
        let entries: Vec<SourceEntry> = sources
            .iter()
            .map(|(path, scope)| SourceEntry {
                path: path.display().to_string(),
                scope: *scope,
            })
            .collect();
        println!("{}", serde_json::to_string(&entries)?);
    } else if sources.is_empty() {
        println!("No sources registered.");
    } else {
        for (path, scope) in &sources {
            println!("{scope}\t{}", path.display());
        }
    }
    Ok(())
}

fn print_report(report: &RebuildReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    for scope in &report.scopes {
        println!(
            "{}: {} document(s), {} skipped, {} passage(s), generation {}",
            scope.scope,
            scope.documents_processed,
            scope.documents_skipped,
            scope.passages_indexed,
            scope.generation
        );
    }
    for error in &report.errors {
        eprintln!("  skipped {}: {}", error.document_id, error.reason);
    }
    println!(
        "Rebuilt {} document(s) into {} passage(s), {} skipped",
        report.documents_processed,
        report.passages_indexed,
        report.documents_skipped
    );
    Ok(())
}

#[derive(Serialize)]
struct ScopeStatus {
    scope: Scope,
    state: CollectionState,
    sources: usize,
    manifest: Option<Manifest>,
}

#[derive(Serialize)]
struct Status {
    data_dir: String,
    model_id: String,
    scopes: Vec<ScopeStatus>,
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    json: bool,
) -> Result<()> {
    let settings = Settings::load(config_db)?;
    let provider = provider::build_provider(&settings)?;
    let store = CollectionStore::open(&data_dir.collections_dir()?)?;

    let mut scopes = Vec::new();
    for scope in Scope::ALL {
        scopes.push(ScopeStatus {
            scope,
            state: store.state(scope),
            sources: config_db.sources_for(scope)?.len(),
            manifest: store.manifest(scope),
        });
    }
    let status = Status {
        data_dir: data_dir.root().display().to_string(),
        model_id: provider.model_id().to_string(),
        scopes,
    };

    if json {
        println!("{}", serde_json::to_string(&status)?);
    } else {
        println!("Data directory: {}", status.data_dir);
        println!("Embedding model: {}", status.model_id);
        for s in &status.scopes {
            match &s.manifest {
                Some(m) => println!(
                    "  {}: {} ({} document(s), {} passage(s), {}, \
                     {} source(s))",
                    s.scope,
                    s.state,
                    m.document_count,
                    m.passage_count,
                    m.model_id.as_deref().unwrap_or("empty"),
                    s.sources
                ),
                None => println!(
                    "  {}: {} ({} source(s))",
                    s.scope, s.state, s.sources
                ),
            }
        }
    }
    store.close()
}

fn print_settings(settings: &Settings) {
    println!("provider: {}", settings.provider);
    println!("model: {}", settings.model);
    println!("endpoint: {}", settings.endpoint);
    println!("timeout_ms: {}", settings.timeout_ms);
    println!("batch_size: {}", settings.batch_size);
    println!("max_in_flight: {}", settings.max_in_flight);
    println!("max_passage_chars: {}", settings.max_passage_chars);
    println!("dimension: {}", settings.dimension);
    match settings.max_distance {
        Some(d) => println!("max_distance: {d}"),
        None => println!("max_distance: (unset)"),
    }
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
