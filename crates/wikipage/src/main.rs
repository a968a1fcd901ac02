use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::debug;
use wikipage_core::config::{WikiConfig, load_config};
use wikipage_core::context::WikiContext;
use wikipage_core::form::FormData;
use wikipage_core::identity::ConfigIdentities;
use wikipage_core::logging::{LoggingOptions, init_logging};
use wikipage_core::markup::{OutputFormat, PassthroughEngine};
use wikipage_core::mode::Mode;
use wikipage_core::notify::{NoticeQueue, SpoolMailer};
use wikipage_core::page::{
    DELETE_PAGE_NAME, Page, ResolvedPage, Response, SpecialPages, current_page, get_page,
};
use wikipage_core::perms::{Actor, TablePermissions};
use wikipage_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, ensure_runtime_ready,
    init_layout, inspect_runtime, normalize_for_display, resolve_paths,
};
use wikipage_core::store::{PageStore, SaveOutcome, SqlitePageStore};
use wikipage_core::url::WikiUrls;
use wikipage_core::view::PlainView;

#[derive(Debug, Parser)]
#[command(
    name = "wikipage",
    version,
    about = "Serve, edit and delete wiki pages from the command line"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "ID", help = "Act as this user (anonymous when omitted)")]
    user: Option<String>,
    #[arg(long, global = true, value_name = "AGENT", help = "User agent used for robot detection")]
    user_agent: Option<String>,
    #[arg(short, long, global = true, help = "Log at debug level")]
    verbose: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    user: Option<String>,
    user_agent: Option<String>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            user: cli.user.clone(),
            user_agent: cli.user_agent.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    #[command(about = "Render a page in one of its modes")]
    Show(ShowArgs),
    #[command(about = "List the modes the acting user may use on a page")]
    Allows(PageArgs),
    #[command(about = "Create a page or save a new version of it")]
    Edit(EditArgs),
    History(PageArgs),
    Diff(DiffArgs),
    #[command(about = "Confirm, then delete a page or one of its versions")]
    Delete(DeleteArgs),
    Lock(PageArgs),
    Unlock(PageArgs),
    #[command(about = "Print the markup processor configuration as JSON")]
    Processor(ProcessorArgs),
    Pages(PagesArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .wikipage/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct PageArgs {
    #[arg(value_name = "PAGE", help = "Page name (home page when omitted)")]
    page: Option<String>,
}

#[derive(Debug, Args)]
struct ShowArgs {
    page: Option<String>,
    #[arg(long, default_value = "display")]
    mode: Mode,
    #[arg(long)]
    version: Option<String>,
    #[arg(long)]
    referrer: Option<String>,
    #[arg(long, value_name = "VERSION", help = "Diff base version")]
    v1: Option<String>,
    #[arg(long, default_value = "plain")]
    output: OutputFormat,
}

#[derive(Debug, Args)]
struct EditArgs {
    page: String,
    #[arg(long, conflicts_with = "file")]
    text: Option<String>,
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,
    #[arg(long, default_value = "")]
    changelog: String,
}

#[derive(Debug, Args)]
struct DiffArgs {
    page: String,
    #[arg(long, help = "Version to diff (live when omitted)")]
    version: Option<String>,
    #[arg(long, help = "Base version (previous when omitted)")]
    against: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    page: String,
    #[arg(long, help = "Delete only this version")]
    version: Option<String>,
    #[arg(long, help = "Perform the deletion instead of printing the confirmation")]
    yes: bool,
}

#[derive(Debug, Args)]
struct ProcessorArgs {
    page: Option<String>,
    #[arg(long, default_value = "xhtml")]
    output: OutputFormat,
}

#[derive(Debug, Args)]
struct PagesArgs {
    #[arg(long, help = "Print JSON summaries instead of names")]
    summary: bool,
}

/// Services backing one command invocation.
struct Session {
    paths: ResolvedPaths,
    config: WikiConfig,
    perms: TablePermissions,
    store: SqlitePageStore,
    identity: ConfigIdentities,
    notices: NoticeQueue,
    mailer: SpoolMailer,
    urls: WikiUrls,
    actor: Actor,
}

impl Session {
    fn open(runtime: &RuntimeOptions, paths: ResolvedPaths, config: WikiConfig) -> Result<Self> {
        let status = inspect_runtime(&paths)?;
        ensure_runtime_ready(&paths, &status)?;
        for warning in &status.warnings {
            debug!(warning = %warning, "runtime warning");
        }

        let perms = TablePermissions::from_config(&config)?;
        let store = SqlitePageStore::open(&paths.db_path)?;
        let identity = ConfigIdentities::from_config(&config);
        let urls = WikiUrls::new(&config.wiki.base_url())?;
        let sender = format!("{}@localhost", config.wiki.app_name().to_ascii_lowercase());
        let mailer = SpoolMailer::new(&paths.outbox_dir, sender);
        let actor = Actor::from_request(
            runtime.user.as_deref(),
            runtime.user_agent.as_deref(),
            &config,
        );
        debug!(user = ?actor.user, admin = actor.is_admin, robot = actor.is_robot, "acting user");

        Ok(Self {
            paths,
            config,
            perms,
            store,
            identity,
            notices: NoticeQueue::default(),
            mailer,
            urls,
            actor,
        })
    }

    fn context(&self, output: OutputFormat) -> WikiContext<'_> {
        WikiContext {
            config: &self.config,
            actor: self.actor.clone(),
            perms: &self.perms,
            store: &self.store,
            identity: &self.identity,
            view: &PlainView,
            markup: &PassthroughEngine,
            notifier: &self.notices,
            mailer: &self.mailer,
            urls: &self.urls,
            specials: SpecialPages::builtin(),
            output,
        }
    }

    fn print_notices(&self) {
        for notice in self.notices.drain() {
            eprintln!("[{}] {}", notice.level.as_str(), notice.text);
        }
    }

    fn finish(&self, runtime: &RuntimeOptions) {
        self.print_notices();
        if runtime.diagnostics {
            println!("\n[diagnostics]\n{}", self.paths.diagnostics());
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    let Some(command) = cli.command else {
        let mut command = Cli::command();
        command.print_help()?;
        println!();
        return Ok(());
    };

    let paths = resolve_runtime_paths(&runtime)?;
    let config = load_config(&paths.config_path)?;
    init_logging(&LoggingOptions::from_config(&config.logging, cli.verbose)?)?;

    match command {
        Commands::Init(args) => run_init(&runtime, &paths, args),
        Commands::Show(args) => run_show(&Session::open(&runtime, paths, config)?, &runtime, args),
        Commands::Allows(args) => run_allows(&Session::open(&runtime, paths, config)?, &runtime, args),
        Commands::Edit(args) => run_edit(&Session::open(&runtime, paths, config)?, &runtime, args),
        Commands::History(args) => {
            run_history(&Session::open(&runtime, paths, config)?, &runtime, args)
        }
        Commands::Diff(args) => run_diff(&Session::open(&runtime, paths, config)?, &runtime, args),
        Commands::Delete(args) => {
            run_delete(&Session::open(&runtime, paths, config)?, &runtime, args)
        }
        Commands::Lock(args) => {
            run_lock(&Session::open(&runtime, paths, config)?, &runtime, args, true)
        }
        Commands::Unlock(args) => {
            run_lock(&Session::open(&runtime, paths, config)?, &runtime, args, false)
        }
        Commands::Processor(args) => {
            run_processor(&Session::open(&runtime, paths, config)?, &runtime, args)
        }
        Commands::Pages(args) => run_pages(&Session::open(&runtime, paths, config)?, &runtime, args),
    }
}

fn run_init(runtime: &RuntimeOptions, paths: &ResolvedPaths, args: InitArgs) -> Result<()> {
    let report = init_layout(
        paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    SqlitePageStore::open(&paths.db_path)?;

    println!("Initialized wikipage runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("outbox_dir: {}", normalize_for_display(&paths.outbox_dir));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_show(session: &Session, runtime: &RuntimeOptions, args: ShowArgs) -> Result<()> {
    let ctx = session.context(args.output);
    let mut form = FormData::new();
    for (key, value) in [
        ("page", args.page),
        ("version", args.version),
        ("referrer", args.referrer),
        ("v1", args.v1),
    ] {
        if let Some(value) = value {
            form.set(key, value);
        }
    }

    let resolved = current_page(&ctx, &form)?;
    let page = resolved.as_page();
    debug!(page = page.name(), kind = resolved.kind_name(), mode = %args.mode, "showing page");
    let response = match page.pre_display(&ctx, args.mode, &form)? {
        Some(response) => response,
        None => {
            ensure_allowed(&ctx, page, args.mode)?;
            page.render(&ctx, args.mode, &form)?
        }
    };
    print_response(&response);
    session.finish(runtime);
    Ok(())
}

fn run_allows(session: &Session, runtime: &RuntimeOptions, args: PageArgs) -> Result<()> {
    let ctx = session.context(OutputFormat::Plain);
    let resolved = get_page(&ctx, args.page.as_deref().unwrap_or_default(), None, None)?;
    let page = resolved.as_page();
    let permissions = page.permissions(&ctx)?;

    println!("page: {}", page.name());
    println!("kind: {}", resolved.kind_name());
    println!("valid: {}", format_flag(page.is_valid()));
    println!("user: {}", ctx.actor.user.as_deref().unwrap_or("<anonymous>"));
    println!("admin: {}", format_flag(ctx.actor.is_admin));
    println!("robot: {}", format_flag(ctx.actor.is_robot));
    println!("permissions: {}", permissions.bits);
    println!(
        "permissions.source: {}",
        serde_json::to_value(permissions.source)?
            .as_str()
            .unwrap_or_default()
    );
    for mode in Mode::ALL {
        println!("mode.{mode}: {}", format_flag(page.allows(&ctx, mode)?));
    }
    session.finish(runtime);
    Ok(())
}

fn run_edit(session: &Session, runtime: &RuntimeOptions, args: EditArgs) -> Result<()> {
    let text = match (&args.text, &args.file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("edit requires --text or --file"),
    };
    let ctx = session.context(OutputFormat::Plain);
    let resolved = get_page(&ctx, &args.page, None, None)?;
    let (page, mode): (&dyn Page, Mode) = match &resolved {
        ResolvedPage::Create(page) => (page as &dyn Page, Mode::Create),
        ResolvedPage::Live(page) if page.is_valid() => (page as &dyn Page, Mode::Edit),
        ResolvedPage::Live(page) => bail!("{} may not create {}", actor_label(&ctx), page.name()),
        other => bail!("{} cannot be edited", other.as_page().name()),
    };
    ensure_allowed(&ctx, page, mode)?;

    let outcome = page.update_text(&ctx, &text, &args.changelog)?;
    let status = match &outcome {
        SaveOutcome::Created { .. } => "created",
        SaveOutcome::Updated { .. } => "updated",
        SaveOutcome::Unchanged { .. } => "unchanged",
    };
    println!("page: {}", page.name());
    println!("status: {status}");
    println!("version: {}", outcome.version());
    session.finish(runtime);
    Ok(())
}

fn run_history(session: &Session, runtime: &RuntimeOptions, args: PageArgs) -> Result<()> {
    let ctx = session.context(OutputFormat::Plain);
    let resolved = get_page(&ctx, args.page.as_deref().unwrap_or_default(), None, None)?;
    let page = resolved.as_page();
    ensure_allowed(&ctx, page, Mode::History)?;

    println!("page: {}", page.name());
    println!("current: {}", page.version()?);
    let history = page.history(&ctx)?;
    println!("history.count: {}", history.len());
    for entry in history {
        println!(
            "history.version: {} author={} timestamp={} changelog={}",
            entry.version,
            entry.author.as_deref().unwrap_or("Guest"),
            entry.timestamp,
            entry.changelog.as_deref().unwrap_or_default()
        );
    }
    session.finish(runtime);
    Ok(())
}

fn run_diff(session: &Session, runtime: &RuntimeOptions, args: DiffArgs) -> Result<()> {
    let ctx = session.context(OutputFormat::Plain);
    let resolved = get_page(&ctx, &args.page, args.version.as_deref(), None)?;
    let page = resolved.as_page();
    ensure_allowed(&ctx, page, Mode::Diff)?;
    print!("{}", page.diff(&ctx, args.against.as_deref())?);
    session.finish(runtime);
    Ok(())
}

fn run_delete(session: &Session, runtime: &RuntimeOptions, args: DeleteArgs) -> Result<()> {
    let ctx = session.context(OutputFormat::Plain);
    let resolved = get_page(&ctx, DELETE_PAGE_NAME, None, Some(&args.page))?;
    let page = resolved.as_page();
    let mut form = FormData::new()
        .with("page", DELETE_PAGE_NAME)
        .with("referrer", args.page.as_str());
    if let Some(version) = &args.version {
        form.set("version", version.as_str());
    }

    let response = if args.yes {
        form.set("actionID", "special");
        page.handle_action(&ctx, &form)?
    } else {
        match page.pre_display(&ctx, Mode::Display, &form)? {
            Some(response) => response,
            None => page.display(&ctx, &form)?,
        }
    };
    print_response(&response);
    session.finish(runtime);
    Ok(())
}

fn run_lock(session: &Session, runtime: &RuntimeOptions, args: PageArgs, lock: bool) -> Result<()> {
    let ctx = session.context(OutputFormat::Plain);
    let resolved = get_page(&ctx, args.page.as_deref().unwrap_or_default(), None, None)?;
    let page = resolved.as_page();
    let mode = if lock { Mode::Lock } else { Mode::Unlock };
    ensure_allowed(&ctx, page, mode)?;
    if lock {
        page.lock(&ctx)?;
    } else {
        page.unlock(&ctx)?;
    }
    println!("page: {}", page.name());
    println!("locked: {}", format_flag(lock));
    session.finish(runtime);
    Ok(())
}

fn run_processor(session: &Session, runtime: &RuntimeOptions, args: ProcessorArgs) -> Result<()> {
    let ctx = session.context(args.output);
    let resolved = get_page(&ctx, args.page.as_deref().unwrap_or_default(), None, None)?;
    let processor = resolved.as_page().processor(&ctx, args.output)?;
    println!("{}", serde_json::to_string_pretty(&processor)?);
    session.finish(runtime);
    Ok(())
}

fn run_pages(session: &Session, runtime: &RuntimeOptions, args: PagesArgs) -> Result<()> {
    let ctx = session.context(OutputFormat::Plain);
    let names = session.store.page_names()?;
    if args.summary {
        let mut summaries = Vec::with_capacity(names.len());
        for name in &names {
            let resolved = get_page(&ctx, name, None, None)?;
            summaries.push(resolved.as_page().to_summary(&ctx)?);
        }
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        println!("pages.count: {}", names.len());
        for name in names {
            println!("pages.name: {name}");
        }
    }
    session.finish(runtime);
    Ok(())
}

fn ensure_allowed(ctx: &WikiContext<'_>, page: &dyn Page, mode: Mode) -> Result<()> {
    if page.allows(ctx, mode)? {
        return Ok(());
    }
    bail!("{} may not use {mode} on {}", actor_label(ctx), page.name());
}

fn actor_label(ctx: &WikiContext<'_>) -> String {
    match ctx.actor.user.as_deref() {
        Some(user) => format!("user `{user}`"),
        None => "anonymous user".to_string(),
    }
}

fn print_response(response: &Response) {
    match response {
        Response::Content(body) => {
            print!("{body}");
            if !body.ends_with('\n') {
                println!();
            }
        }
        Response::Redirect(url) => println!("redirect: {url}"),
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
