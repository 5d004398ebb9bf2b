use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;
use womb::check::check;
use womb::config::{Backend, ConfigError, default_config_yaml, expand_tilde, load_settings};
use womb::lineage::depth;
use womb::relation::ActiveEntities;
use womb::store::{JsonDirStore, KvStore, MemoryStore, SqliteStore};
use womb::version::Redo;
use womb::{EntityType, SaveType, StoreError, Workbench};

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        let code = match &value {
            StoreError::Io(_) => "io_error",
            StoreError::Sqlite(_) => "sqlite_error",
            StoreError::Json(_) => "json_error",
            StoreError::Corrupt { .. } => "corrupt_store",
            StoreError::DraftHistory => "draft_history",
        };
        Self::new(code, value.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::new("config_error", value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "womb")]
#[command(about = "Branching story versions and a per-entity continuity ledger")]
struct Cli {
    /// Use ~/.womb instead of .womb in the working directory.
    #[arg(long, global = true)]
    global: bool,
    /// Store location; overrides --global.
    #[arg(long, global = true)]
    root: Option<String>,
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init,
    Save(SaveArgs),
    Undo(StoryArg),
    Redo(StoryArg),
    Select(SelectArgs),
    Show(ShowArgs),
    Log(StoryArg),
    Stories,
    #[command(subcommand)]
    History(HistoryCommand),
    DeleteStory(DeleteStoryArgs),
    Check,
}

#[derive(Args, Debug)]
struct StoryArg {
    #[arg(long)]
    story: String,
}

#[derive(Args, Debug)]
struct SaveArgs {
    /// Existing story to save into; a new story is created when omitted or unknown.
    #[arg(long)]
    story: Option<String>,
    #[arg(long = "type", default_value = "manual")]
    save_type: String,
    /// Active entity as `<mommy|nerd|lore>:<id>`; repeatable.
    #[arg(long = "entity")]
    entities: Vec<String>,
    /// Read content from a file instead of stdin.
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SelectArgs {
    #[arg(long)]
    story: String,
    #[arg(long)]
    version: String,
}

#[derive(Args, Debug)]
struct ShowArgs {
    #[arg(long)]
    story: String,
    /// Defaults to the current version.
    #[arg(long)]
    version: Option<String>,
}

#[derive(Args, Debug)]
struct DeleteStoryArgs {
    #[arg(long)]
    story: String,
    #[arg(long)]
    yes: bool,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    Add(HistoryAddArgs),
    Update(HistoryUpdateArgs),
    Delete(HistoryDeleteArgs),
    Toggle(HistoryToggleArgs),
    List(HistoryListArgs),
}

#[derive(Args, Debug)]
struct HistoryAddArgs {
    #[arg(long)]
    entity: String,
    #[arg(long)]
    story: Option<String>,
    content: String,
}

#[derive(Args, Debug)]
struct HistoryUpdateArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    story: Option<String>,
    content: String,
}

#[derive(Args, Debug)]
struct HistoryDeleteArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    yes: bool,
}

#[derive(Args, Debug)]
struct HistoryToggleArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    story: Option<String>,
}

#[derive(Args, Debug)]
struct HistoryListArgs {
    #[arg(long)]
    entity: String,
    #[arg(long)]
    story: Option<String>,
}

#[derive(Debug, Clone)]
struct RepoPaths {
    root: PathBuf,
    sqlite: PathBuf,
    files: PathBuf,
    repo_config: PathBuf,
    user_config: PathBuf,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    let paths = repo_paths(&cwd, cli.global, cli.root.as_deref())?;

    if let Command::Init = cli.command {
        return cmd_init(&cwd, &paths);
    }

    require_initialized(&paths)?;
    let settings = load_settings(&cwd, Some(&paths.repo_config), Some(&paths.user_config))?;
    let output = match settings.backend {
        Backend::Sqlite => {
            let store = SqliteStore::open(&path_string(&paths.sqlite))?;
            dispatch(Workbench::new(store, settings), cli.command)?
        }
        Backend::Files => {
            let store = JsonDirStore::open(&paths.files)?;
            dispatch(Workbench::new(store, settings), cli.command)?
        }
        Backend::Memory => {
            tracing::warn!("memory backend keeps nothing between invocations");
            dispatch(Workbench::new(MemoryStore::default(), settings), cli.command)?
        }
    };
    print_json(&output)
}

fn init_tracing(verbose: bool) {
    let directive = if verbose { "womb=debug" } else { "womb=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn dispatch<S: KvStore>(mut workbench: Workbench<S>, command: Command) -> Result<Value, CliError> {
    match command {
        Command::Init => Err(CliError::new("internal_error", "init is handled before dispatch")),
        Command::Save(args) => cmd_save(&mut workbench, args),
        Command::Undo(args) => cmd_undo(&mut workbench, &args.story),
        Command::Redo(args) => cmd_redo(&mut workbench, &args.story),
        Command::Select(args) => cmd_select(&mut workbench, args),
        Command::Show(args) => cmd_show(&workbench, args),
        Command::Log(args) => cmd_log(&workbench, &args.story),
        Command::Stories => cmd_stories(&workbench),
        Command::History(command) => cmd_history(&mut workbench, command),
        Command::DeleteStory(args) => cmd_delete_story(&mut workbench, args),
        Command::Check => cmd_check(&workbench),
    }
}

fn cmd_init(cwd: &Path, paths: &RepoPaths) -> Result<(), CliError> {
    fs::create_dir_all(&paths.root).map_err(|err| CliError::io("mkdir_error", err))?;
    write_default_config(paths)?;
    let settings = load_settings(cwd, Some(&paths.repo_config), Some(&paths.user_config))?;
    match settings.backend {
        Backend::Sqlite => {
            SqliteStore::open(&path_string(&paths.sqlite))?;
        }
        Backend::Files => {
            JsonDirStore::open(&paths.files)?;
        }
        Backend::Memory => {}
    }

    print_json(&json!({
        "status": "ok",
        "root": path_string(&paths.root),
        "backend": settings.backend.as_str(),
        "config": path_string(&paths.repo_config),
    }))
}

fn cmd_save<S: KvStore>(workbench: &mut Workbench<S>, args: SaveArgs) -> Result<Value, CliError> {
    let save_type = SaveType::parse(&args.save_type).ok_or_else(|| {
        CliError::new(
            "invalid_save_type",
            format!(
                "unknown save type `{}`; expected manual, generate_pre or generate_post",
                args.save_type
            ),
        )
    })?;
    let content = match &args.file {
        Some(path) => fs::read_to_string(path).map_err(|err| CliError::io("read_error", err))?,
        None => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .map_err(|err| CliError::io("stdin_error", err))?;
            input
        }
    };

    let active = if args.entities.is_empty() {
        match args.story.as_deref() {
            Some(story_id) => workbench.active_entities(story_id)?,
            None => ActiveEntities::default(),
        }
    } else {
        parse_entities(&args.entities)?
    };

    let outcome = workbench.save(args.story.as_deref(), &content, save_type, &active)?;
    Ok(json!({
        "status": "ok",
        "story_id": outcome.story.id,
        "title": outcome.story.title,
        "version_id": outcome.version.id,
        "parent_id": outcome.version.parent_id,
        "created_version": outcome.created_version,
        "created_story": outcome.created_story,
        "versions": outcome.story.versions.len(),
    }))
}

fn cmd_undo<S: KvStore>(workbench: &mut Workbench<S>, story_id: &str) -> Result<Value, CliError> {
    let restored = workbench.undo(story_id)?;
    Ok(json!({
        "story_id": story_id,
        "moved": restored.is_some(),
        "restored": restored,
    }))
}

fn cmd_redo<S: KvStore>(workbench: &mut Workbench<S>, story_id: &str) -> Result<Value, CliError> {
    let payload = match workbench.redo(story_id)? {
        Redo::Nothing => json!({
            "story_id": story_id,
            "status": "nothing",
        }),
        Redo::Moved(restored) => json!({
            "story_id": story_id,
            "status": "moved",
            "restored": restored,
        }),
        Redo::Choose(candidates) => json!({
            "story_id": story_id,
            "status": "choose",
            "candidates": candidates,
        }),
    };
    Ok(payload)
}

fn cmd_select<S: KvStore>(
    workbench: &mut Workbench<S>,
    args: SelectArgs,
) -> Result<Value, CliError> {
    let restored = workbench.select_branch(&args.story, &args.version)?;
    Ok(json!({
        "story_id": args.story,
        "moved": restored.is_some(),
        "restored": restored,
    }))
}

fn cmd_show<S: KvStore>(workbench: &Workbench<S>, args: ShowArgs) -> Result<Value, CliError> {
    let Some(story) = workbench.story(&args.story)? else {
        return Err(story_not_found(&args.story));
    };
    let version_id = match args.version {
        Some(version_id) => Some(version_id),
        None => story.current_version().map(|version| version.id.clone()),
    };
    let content = match version_id.as_deref() {
        Some(version_id) => match workbench.version_content(&story.id, version_id)? {
            Some(content) => Some(content),
            None => {
                return Err(CliError::new(
                    "version_not_found",
                    format!("version `{version_id}` not found"),
                ));
            }
        },
        None => None,
    };
    let navigation = workbench.navigation(&story.id)?;
    Ok(json!({
        "story_id": story.id,
        "title": story.title,
        "version_id": version_id,
        "content": content,
        "navigation": navigation,
        "active_entities": workbench.active_entities(&story.id)?,
    }))
}

fn cmd_log<S: KvStore>(workbench: &Workbench<S>, story_id: &str) -> Result<Value, CliError> {
    let Some(story) = workbench.story(story_id)? else {
        return Err(story_not_found(story_id));
    };
    let lineage = workbench.lineage(story_id)?;
    let versions: Vec<Value> = story
        .versions
        .iter()
        .map(|version| {
            json!({
                "id": version.id,
                "parent_id": version.parent_id,
                "saved_at": version.saved_at,
                "save_type": version.save_type,
                "depth": depth(&version.id, &story.versions),
                "current": story.current_version_id.as_deref() == Some(version.id.as_str()),
                "in_lineage": lineage.contains(&version.id),
                "history_generated": version.history_generated(),
            })
        })
        .collect();
    Ok(json!({
        "story_id": story.id,
        "current_version_id": story.current_version_id,
        "versions": versions,
    }))
}

fn cmd_stories<S: KvStore>(workbench: &Workbench<S>) -> Result<Value, CliError> {
    let stories: Vec<Value> = workbench
        .stories()?
        .into_iter()
        .map(|story| {
            json!({
                "id": story.id,
                "title": story.title,
                "current_version_id": story.current_version_id,
                "versions": story.versions.len(),
                "created_at": story.created_at,
                "updated_at": story.updated_at,
            })
        })
        .collect();
    Ok(json!({ "stories": stories }))
}

fn cmd_history<S: KvStore>(
    workbench: &mut Workbench<S>,
    command: HistoryCommand,
) -> Result<Value, CliError> {
    match command {
        HistoryCommand::Add(args) => {
            let id = workbench.add_history(args.story.as_deref(), &args.entity, &args.content)?;
            Ok(json!({
                "status": "ok",
                "history_id": id,
            }))
        }
        HistoryCommand::Update(args) => {
            let id = workbench.update_history(args.story.as_deref(), &args.id, &args.content)?;
            match id {
                Some(id) => Ok(json!({
                    "status": "ok",
                    "replaced": args.id,
                    "history_id": id,
                })),
                None => Err(history_not_found(&args.id)),
            }
        }
        HistoryCommand::Delete(args) => {
            if !args.yes {
                return Err(CliError::new(
                    "confirmation_required",
                    "deleting a history entry is permanent; pass --yes",
                ));
            }
            let removed = workbench.delete_history(&args.id)?;
            Ok(json!({
                "history_id": args.id,
                "deleted": removed,
            }))
        }
        HistoryCommand::Toggle(args) => {
            let invalidated = workbench.toggle_invalidation(args.story.as_deref(), &args.id)?;
            Ok(json!({
                "history_id": args.id,
                "invalidated": invalidated,
            }))
        }
        HistoryCommand::List(args) => {
            let entries: Vec<Value> = workbench
                .visible_history(args.story.as_deref(), &args.entity)?
                .into_iter()
                .map(|entry| {
                    json!({
                        "id": entry.record.id,
                        "content": entry.record.content,
                        "version_id": entry.record.version_id.to_string(),
                        "created_at": entry.record.created_at,
                        "struck": entry.struck,
                    })
                })
                .collect();
            Ok(json!({
                "entity_id": args.entity,
                "story_id": args.story,
                "entries": entries,
            }))
        }
    }
}

fn cmd_delete_story<S: KvStore>(
    workbench: &mut Workbench<S>,
    args: DeleteStoryArgs,
) -> Result<Value, CliError> {
    if !args.yes {
        return Err(CliError::new(
            "confirmation_required",
            "deleting a story removes its versions, relations and history; pass --yes",
        ));
    }
    let deleted = workbench.delete_story(&args.story)?;
    Ok(json!({
        "story_id": args.story,
        "deleted": deleted,
    }))
}

fn cmd_check<S: KvStore>(workbench: &Workbench<S>) -> Result<Value, CliError> {
    let issues = check(workbench.repository())?;
    Ok(json!({
        "ok": issues.is_empty(),
        "issues": issues,
    }))
}

fn parse_entities(raw: &[String]) -> Result<ActiveEntities, CliError> {
    let mut active = ActiveEntities::default();
    for item in raw {
        let parsed = item
            .split_once(':')
            .and_then(|(kind, id)| EntityType::parse(kind).map(|kind| (kind, id.trim())))
            .filter(|(_, id)| !id.is_empty());
        let Some((kind, id)) = parsed else {
            return Err(CliError::new(
                "invalid_entity",
                format!("expected `<mommy|nerd|lore>:<id>`, got `{item}`"),
            ));
        };
        active.push(kind, id);
    }
    Ok(active)
}

fn story_not_found(story_id: &str) -> CliError {
    CliError::new("story_not_found", format!("story `{story_id}` not found"))
}

fn history_not_found(history_id: &str) -> CliError {
    CliError::new(
        "history_not_found",
        format!("history entry `{history_id}` not found"),
    )
}

fn repo_paths(cwd: &Path, global: bool, root: Option<&str>) -> Result<RepoPaths, CliError> {
    let home = home_dir()?;
    let root = match root {
        Some(raw) => {
            let expanded = expand_tilde(raw, &home);
            if expanded.is_absolute() {
                expanded
            } else {
                cwd.join(expanded)
            }
        }
        None if global => home.join(".womb"),
        None => cwd.join(".womb"),
    };

    Ok(RepoPaths {
        sqlite: root.join("store.sqlite"),
        files: root.join("kv"),
        repo_config: root.join("config.yml"),
        user_config: home.join(".womb").join("config.yml"),
        root,
    })
}

fn require_initialized(paths: &RepoPaths) -> Result<(), CliError> {
    if !paths.root.exists() || !paths.repo_config.exists() {
        return Err(CliError::new(
            "not_initialized",
            "store is not initialized; run `womb init`",
        ));
    }
    Ok(())
}

fn write_default_config(paths: &RepoPaths) -> Result<(), CliError> {
    if paths.repo_config.exists() {
        return Ok(());
    }
    if let Some(parent) = paths.repo_config.parent() {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    fs::write(&paths.repo_config, default_config_yaml())
        .map_err(|err| CliError::io("write_error", err))
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new("home_error", "HOME environment variable is not set"))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
