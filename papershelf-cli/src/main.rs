use clap::{Parser, Subcommand, ValueEnum};
use papershelf::watcher::{self, LibraryWatcher};
use papershelf::{migration, Config, Flag, Library, MetadataPatch, OpContext, ReadingState, Store};
use std::path::PathBuf;
use std::process;

/// papershelf: track metadata and reading state for a PDF/EPUB library
#[derive(Parser)]
#[command(name = "papershelf", version, about)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/papershelf/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum ListKind {
    Favorites,
    ToRead,
    Unread,
    Reading,
    Read,
    Recent,
}

#[derive(Subcommand)]
enum Command {
    /// Show the metadata record of a file
    Show { path: PathBuf },

    /// Edit metadata fields (e.g. --field title="Deep Learning")
    Edit {
        path: PathBuf,
        #[arg(long = "field", value_parser = parse_key_value, required = true)]
        fields: Vec<(String, String)>,
    },

    /// Record that a file was opened and refresh the recently-opened folder
    Open { path: PathBuf },

    /// Toggle the favorite flag
    Favorite {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Toggle the to-read flag
    ToRead {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Cycle the reading state, or set it with --set
    State {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, value_parser = ["unread", "reading", "read"])]
        set: Option<String>,
    },

    /// Clear favorite and/or to-read flags (both when neither is given)
    Unmark {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        favorite: bool,
        #[arg(long)]
        to_read: bool,
    },

    /// List records
    List {
        which: ListKind,
        /// Only for `recent`
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Rename or move a file or directory, keeping its metadata
    Mv { from: PathBuf, to: PathBuf },

    /// Rebuild every virtual folder
    Sync,

    /// Follow renames made by other programs until interrupted
    Watch,

    /// Show configuration, database and migration status
    Status,

    /// Write the default config and create the database
    Init,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_or_default(cli.config.as_deref())?;
    let db_path = config.database_path();

    // Inspect before opening: opening applies the migrations.
    let pending: Vec<String> = migration::inspect(&db_path)?
        .iter()
        .map(|m| m.describe())
        .collect();
    let store = Store::open(&db_path)?;
    let ctx = OpContext::background();
    let library = Library::new(&store, config.virtual_folders()).with_context(ctx.clone());

    match cli.command {
        Command::Show { path } => {
            let key = papershelf::canonical_path(&path);
            let record = store.get(&ctx, &key)?;
            print_output(&serde_json::to_value(record)?, &cli.format)?;
        }

        Command::Edit { path, fields } => {
            let patch: MetadataPatch = serde_json::from_value(fields_to_value(&fields))?;
            let record = library.edit(&path, &patch)?;
            print_output(&serde_json::to_value(record)?, &cli.format)?;
        }

        Command::Open { path } => {
            let key = library.record_opened(&path)?;
            print_output(&serde_json::json!({ "ok": true, "opened": key }), &cli.format)?;
        }

        Command::Favorite { paths } => toggle(&library, &paths, Flag::Favorite, &cli.format)?,
        Command::ToRead { paths } => toggle(&library, &paths, Flag::ToRead, &cli.format)?,

        Command::State { paths, set } => match set {
            Some(state) => {
                let state = ReadingState::normalize(&state);
                let updated = library.set_reading_state(paths.as_slice(), state)?;
                print_output(
                    &serde_json::json!({ "ok": true, "state": state, "updated": updated }),
                    &cli.format,
                )?;
            }
            None => {
                let counts: serde_json::Map<String, serde_json::Value> = library
                    .cycle_reading_state(paths.as_slice())?
                    .into_iter()
                    .map(|(state, n)| (state.to_string(), n.into()))
                    .collect();
                print_output(&serde_json::Value::Object(counts), &cli.format)?;
            }
        },

        Command::Unmark {
            paths,
            favorite,
            to_read,
        } => {
            let both = !favorite && !to_read;
            let changed = library.unmark(paths.as_slice(), favorite || both, to_read || both)?;
            print_output(&serde_json::json!({ "ok": true, "changed": changed }), &cli.format)?;
        }

        Command::List { which, limit } => {
            let records = match which {
                ListKind::Favorites => store.list_favorites(&ctx)?,
                ListKind::ToRead => store.list_to_read(&ctx)?,
                ListKind::Unread => store.list_by_reading_state(&ctx, ReadingState::Unread)?,
                ListKind::Reading => store.list_by_reading_state(&ctx, ReadingState::Reading)?,
                ListKind::Read => store.list_by_reading_state(&ctx, ReadingState::Read)?,
                ListKind::Recent => store.list_recently_opened(&ctx, limit)?,
            };
            print_output(&serde_json::to_value(records)?, &cli.format)?;
        }

        Command::Mv { from, to } => {
            let moved = library.rename(&from, &to)?;
            print_output(&serde_json::json!({ "ok": true, "moved": moved }), &cli.format)?;
        }

        Command::Sync => {
            let reports = library.sync_folders()?;
            let out: Vec<_> = config
                .virtual_folders()
                .into_iter()
                .zip(reports)
                .map(|(folder, report)| serde_json::json!({ "folder": folder, "report": report }))
                .collect();
            print_output(&serde_json::Value::Array(out), &cli.format)?;
        }

        Command::Watch => {
            let ignore: Vec<PathBuf> = library.folders().iter().map(|f| f.dir.clone()).collect();
            let library_watcher = LibraryWatcher::start(&config.library_dir(), &ignore)?;
            for event in library_watcher.event_rx.iter() {
                if let Err(e) = watcher::apply_event(&library, &event) {
                    log::warn!("Failed to apply {event:?}: {e}");
                }
            }
        }

        Command::Init => {
            std::fs::create_dir_all(config.library_dir())?;
            let reports = library.sync_folders()?;
            print_output(
                &serde_json::json!({
                    "ok": true,
                    "library_dir": config.library_dir(),
                    "database": db_path,
                    "folders": reports.len(),
                }),
                &cli.format,
            )?;
        }

        Command::Status => {
            print_output(
                &serde_json::json!({
                    "library_dir": config.library_dir(),
                    "database": db_path,
                    "records": store.count(&ctx)?,
                    "migrations_applied": store.applied_migrations(&ctx)?.len(),
                    "migrations_pending_at_open": pending,
                    "folders": config.virtual_folders(),
                }),
                &cli.format,
            )?;
        }
    }

    Ok(())
}

fn toggle(
    library: &Library<'_>,
    paths: &[PathBuf],
    flag: Flag,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = library.toggle_flag(paths, flag)?;
    print_output(
        &serde_json::json!({ "flag": flag.label(), "on": summary.on, "off": summary.off }),
        format,
    )
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// Flag fields take JSON booleans; everything else is kept as text so values
/// like `year=2017` stay strings.
fn fields_to_value(fields: &[(String, String)]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        let json_val = match key.as_str() {
            "favorite" | "to_read" => serde_json::from_str(val)
                .unwrap_or_else(|_| serde_json::Value::String(val.clone())),
            _ => serde_json::Value::String(val.clone()),
        };
        map.insert(key.clone(), json_val);
    }
    serde_json::Value::Object(map)
}
