// ─────────────────────────────────────────────────────────────────────────────
//  bt  —  gn/ninja build wrapper
//
//  Keeps the compile accelerator and the macOS SDK installed and verified,
//  regenerates the output directory only when its args changed, then hands
//  off to ninja.
//
//  USAGE
//  ─────
//    bt build                      build the default target
//    bt build app:dist -j 64       explicit target and parallelism
//    bt build --no-accel -- -k 0   local compile, extra ninja args
//    bt gen --force                rerun gn gen
//    bt sdk --list                 known / installed SDK versions
//    bt accel login                interactive accelerator login
//    bt show args                  desired args.gn content
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use buildtools_core::{
    Accelerator, ArchiveInstaller, BuildRequest, CacheStore, Config, Downloader,
    Environment, Executor, HttpTransfer, Outcome, Pipeline, Result, Sdk, Stage, SystemRunner,
    ToolsError,
};
use buildtools_core::resolver::Resolution;

// ─────────────────────────────────────────────────────────────────────────────
//  CLI definition (clap derive)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "bt",
    version = env!("CARGO_PKG_VERSION"),
    about   = "gn/ninja build wrapper with accelerator and SDK management",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Config file  (default: $BT_CONFIG, ./buildtools.toml, ~/.buildtools/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Suppress status output
    #[arg(long, global = true)]
    quiet: bool,

    /// Print every external command
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Regenerate if needed, then build a target
    Build(BuildArgs),
    /// Run gn gen for the output directory
    Gen {
        /// Regenerate even when args.gn is unchanged
        #[arg(long)]
        force: bool,
    },
    /// Resolve and install the platform SDK
    Sdk {
        /// Install this version instead of the detected one
        #[arg(long)]
        version: Option<String>,

        /// List known and installed versions
        #[arg(long)]
        list: bool,
    },
    /// Manage the compile accelerator client
    Accel(AccelArgs),
    /// Print resolved settings
    Show {
        #[arg(value_enum)]
        what: ShowWhat,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// ninja target  (default: `default_target` from the config)
    target: Option<String>,

    /// Parallel jobs  (cluster mode defaults to accelerator.jobs)
    #[arg(long, short = 'j')]
    jobs: Option<u32>,

    /// Build without the accelerator
    #[arg(long)]
    no_accel: bool,

    /// Regenerate even when args.gn is unchanged
    #[arg(long)]
    force_gen: bool,

    /// Extra arguments passed to ninja after `--`
    #[arg(last = true)]
    extra: Vec<String>,
}

#[derive(Args)]
struct AccelArgs {
    #[command(subcommand)]
    command: AccelCmd,
}

#[derive(Subcommand)]
enum AccelCmd {
    /// Download the client bundle for this platform
    Install,
    /// Log in to the accelerator service
    Login,
    /// Show install and login state
    Status,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ShowWhat {
    /// Checkout root
    Root,
    /// Output directory
    Out,
    /// Desired args.gn content
    Args,
    /// Environment passed to the build executor
    Env,
}

// ─────────────────────────────────────────────────────────────────────────────
//  Shared state
// ─────────────────────────────────────────────────────────────────────────────

struct Ctx {
    cfg:    Config,
    env:    Environment,
    store:  CacheStore,
    runner: SystemRunner,
    quiet:  bool,
}

impl Ctx {
    fn load(cli: &Cli) -> Result<Self> {
        let path = Config::discover(cli.config.as_deref())?;
        log::debug!("using config {}", path.display());
        let cfg = Config::load(&path)?;
        let runner = SystemRunner;
        let env = Environment::detect(&runner)?;
        let store = CacheStore::new(cfg.third_party_root(), &env);
        Ok(Self { cfg, env, store, runner, quiet: cli.quiet })
    }

    fn accelerator(&self) -> Accelerator<'_> {
        Accelerator::new(&self.cfg.accelerator, &self.env, &self.store, &self.runner)
    }

    fn sdk(&self) -> Sdk<'_> {
        Sdk::new(&self.cfg.sdk, &self.env, &self.store, self.cfg.source_root())
    }

    fn status(&self, line: String) {
        if !self.quiet {
            println!("{}", line);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    init_logging(cli.verbose, cli.quiet);

    let result = Ctx::load(&cli).and_then(|ctx| match cli.command {
        Cmd::Build(args)              => cmd_build(&ctx, args),
        Cmd::Gen { force }            => cmd_gen(&ctx, force),
        Cmd::Sdk { version, list }    => cmd_sdk(&ctx, version.as_deref(), list),
        Cmd::Accel(args)              => cmd_accel(&ctx, args.command),
        Cmd::Show { what }            => cmd_show(&ctx, what),
    });

    if let Err(e) = result {
        render_error(&e);
        std::process::exit(e.exit_code());
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else if quiet {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    };
    env_logger::builder()
        .format_timestamp(None)
        .format_level(true)
        .format_target(false)
        .filter_level(level)
        .init();
}

// ─────────────────────────────────────────────────────────────────────────────
//  Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_build(ctx: &Ctx, args: BuildArgs) -> Result<()> {
    let accel = ctx.accelerator();
    let sdk = ctx.sdk();
    let use_accel = accel.enabled() && !args.no_accel;

    if use_accel {
        ensure_accelerator(ctx, &accel)?;
    }
    if sdk.applies() {
        ensure_sdk(ctx, &sdk, None)?;
    }

    let mut exec = Executor::new(&ctx.cfg, &ctx.runner).with_sdk(&sdk);
    if use_accel {
        exec = exec.with_accelerator(&accel);
    }

    let req = BuildRequest {
        target:    args.target,
        jobs:      args.jobs,
        force_gen: args.force_gen,
        extra:     args.extra,
    };
    let target = req.target.clone().unwrap_or_else(|| ctx.cfg.default_target.clone());

    ctx.status(format!(
        "{} {} {} {}",
        "Building".cyan().bold(),
        target.bold(),
        format!("[out: {}]", ctx.cfg.out).dimmed(),
        format!("[accelerator: {}]", if use_accel { mode_name(&accel) } else { "off" }).dimmed(),
    ));
    if !ctx.quiet {
        println!("{}", "─".repeat(60).dimmed());
    }

    let t0 = Instant::now();
    exec.build(&req)?;
    ctx.status(format!("{} built in {:.2}s", "✓".green().bold(), t0.elapsed().as_secs_f64()));
    Ok(())
}

fn cmd_gen(ctx: &Ctx, force: bool) -> Result<()> {
    let accel = ctx.accelerator();
    let sdk = ctx.sdk();
    let exec = Executor::new(&ctx.cfg, &ctx.runner)
        .with_accelerator(&accel)
        .with_sdk(&sdk);

    if exec.generate(force)? {
        ctx.status(format!("{} generated {}", "✓".green().bold(), ctx.cfg.out_dir().display()));
    } else {
        ctx.status(format!("{} {} is up to date", "✓".green().bold(), ctx.cfg.out_dir().display()));
    }
    Ok(())
}

fn cmd_sdk(ctx: &Ctx, version: Option<&str>, list: bool) -> Result<()> {
    let sdk = ctx.sdk();

    if list {
        let installed = sdk.installed_versions();
        let active = sdk.installed_version();
        println!("{:<12} {}", "VERSION", "STATE");
        println!("{}", "─".repeat(30).dimmed());
        for v in sdk.known_versions() {
            let state = if active.as_deref() == Some(v.as_str()) {
                "active".green().to_string()
            } else if installed.contains(&v) {
                "installed".to_string()
            } else {
                "—".dimmed().to_string()
            };
            println!("{:<12} {}", v, state);
        }
        return Ok(());
    }

    if !sdk.applies() {
        return Err(ToolsError::Other(format!(
            "no SDK to manage on {} (macOS only, needs [[sdk.versions]])", ctx.env.platform_key()
        )));
    }
    ensure_sdk(ctx, &sdk, version)
}

fn cmd_accel(ctx: &Ctx, cmd: AccelCmd) -> Result<()> {
    let accel = ctx.accelerator();
    if !accel.enabled() {
        return Err(ToolsError::Config("accelerator.mode is 'none'".into()));
    }

    match cmd {
        AccelCmd::Install => ensure_accelerator(ctx, &accel),
        AccelCmd::Login => {
            accel.login()?;
            ctx.status(format!("{} accelerator login recorded", "✓".green().bold()));
            Ok(())
        }
        AccelCmd::Status => {
            let installed = accel.is_installed(&ctx.store)?;
            println!("  {} {}", "mode:     ".dimmed(), mode_name(&accel));
            println!("  {} {}", "client:   ".dimmed(), accel.client_dir().display());
            println!("  {} {}", "installed:".dimmed(), yes_no(installed));
            if installed {
                println!("  {} {}", "logged in:".dimmed(), yes_no(accel.is_authenticated()?));
            }
            Ok(())
        }
    }
}

fn cmd_show(ctx: &Ctx, what: ShowWhat) -> Result<()> {
    let accel = ctx.accelerator();
    let sdk = ctx.sdk();
    let exec = Executor::new(&ctx.cfg, &ctx.runner)
        .with_accelerator(&accel)
        .with_sdk(&sdk);

    match what {
        ShowWhat::Root => println!("{}", ctx.cfg.root.display()),
        ShowWhat::Out  => println!("{}", ctx.cfg.out_dir().display()),
        ShowWhat::Args => println!("{}", exec.desired_args().text),
        ShowWhat::Env  => {
            for (k, v) in exec.build_env() {
                println!("{}={}", k, v);
            }
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_accelerator(ctx: &Ctx, accel: &Accelerator<'_>) -> Result<()> {
    let downloader = Downloader::new(HttpTransfer);
    let installer = ArchiveInstaller::new(&ctx.runner);
    let pipeline = Pipeline::new(&ctx.store, &downloader, &installer);

    match accel.ensure_installed(&pipeline, &progress(ctx.quiet))? {
        Outcome::AlreadyInstalled => log::debug!("accelerator client is current"),
        Outcome::Installed(dir) => ctx.status(format!(
            "{} accelerator client installed  {}", "✓".green().bold(), dir.display().to_string().dimmed()
        )),
    }
    Ok(())
}

fn ensure_sdk(ctx: &Ctx, sdk: &Sdk<'_>, requested: Option<&str>) -> Result<()> {
    let resolution = sdk.resolve(requested)?;
    if let Resolution::Detected { .. } | Resolution::Requested { .. } = resolution {
        log::debug!("SDK {}", buildtools_core::sdk::describe(&resolution, &ctx.cfg.source_root()));
    }

    let downloader = Downloader::new(HttpTransfer);
    let installer = ArchiveInstaller::new(&ctx.runner);
    let pipeline = Pipeline::new(&ctx.store, &downloader, &installer);

    match sdk.ensure_installed(&pipeline, resolution.version(), &progress(ctx.quiet))? {
        Outcome::AlreadyInstalled => log::debug!("SDK {} is current", resolution.version()),
        Outcome::Installed(_) => ctx.status(format!(
            "{} SDK {}",
            "✓".green().bold(),
            buildtools_core::sdk::describe(&resolution, &ctx.cfg.source_root()),
        )),
    }
    Ok(())
}

fn progress(quiet: bool) -> impl Fn(Stage<'_>) {
    move |stage: Stage<'_>| {
        if quiet {
            return;
        }
        match stage {
            Stage::Downloading { name, url } =>
                println!("{} downloading {}  {}", "→".cyan(), name, url.dimmed()),
            Stage::Extracting { name } =>
                println!("{} extracting {}", "→".cyan(), name),
        }
    }
}

fn mode_name(accel: &Accelerator<'_>) -> &'static str {
    use buildtools_core::AcceleratorMode;
    match accel.mode() {
        AcceleratorMode::None      => "none",
        AcceleratorMode::CacheOnly => "cache-only",
        AcceleratorMode::Cluster   => "cluster",
    }
}

fn yes_no(b: bool) -> colored::ColoredString {
    if b { "yes".green() } else { "no".yellow() }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Error rendering
// ─────────────────────────────────────────────────────────────────────────────

fn render_error(e: &ToolsError) {
    match e {
        ToolsError::ChecksumMismatch { path, expected, computed } => {
            eprintln!("{} checksum mismatch for {}", "✗".red().bold(), path.display());
            eprintln!("  {} {}", "expected:".dimmed(), expected);
            eprintln!("  {} {}", "computed:".dimmed(), computed.red());
        }
        ToolsError::ExtractionFailure { archive, scratch, reason } => {
            eprintln!("{} could not extract {}", "✗".red().bold(), archive.display());
            eprintln!("  {}", reason);
            eprintln!("  {} {}", "partial output kept in".dimmed(), scratch.display());
        }
        ToolsError::ToolNotFound(tool) => {
            eprintln!("{} '{}' not found in PATH", "✗".red().bold(), tool);
        }
        _ => eprintln!("{} {}", "✗".red().bold(), e),
    }
}
