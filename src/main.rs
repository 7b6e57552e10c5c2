use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use cached_externals::config::{
    ConfigError, DEFAULT_CONFIG_FILE, ExternalModules, FleetSettings, ModuleFilter, ModuleSpec,
    Settings, Target,
};
use cached_externals::exec::{ExecutionContext, Host, LocalShell, SshFleet};
use cached_externals::scm::ScmRegistry;
use cached_externals::setup::{Externals, SetupError, SetupReport};
use cached_externals::types::ModulePath;

#[derive(Parser)]
#[command(
    name = "cached-externals",
    version,
    about = "Check out external modules into a shared revision cache and link them into a release"
)]
struct Cli {
    #[command(flatten)]
    target: TargetArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Set up the externals of the local project tree instead of remote hosts
    #[arg(long, global = true)]
    local: bool,

    /// Project root containing config/externals.yml
    #[arg(long, global = true, default_value = ".")]
    project_root: PathBuf,

    /// Module definitions file, relative to the project root
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Shared directory holding the checkout cache (default for --local: <project_root>/../shared)
    #[arg(long, global = true)]
    shared_path: Option<PathBuf>,

    /// Release directory on the remote hosts to link modules into
    #[arg(long, global = true)]
    release_path: Option<PathBuf>,

    /// Remote host (`host` or `user@host`); repeat for several
    #[arg(long = "host", global = true)]
    hosts: Vec<Host>,

    /// Extra ssh option passed as `-o <option>`; repeatable
    #[arg(long = "ssh-option", global = true)]
    ssh_options: Vec<String>,

    /// Only process modules matching these comma-separated patterns (overrides ONLY_MODS)
    #[arg(long, global = true)]
    only: Option<String>,

    /// Skip modules matching these comma-separated patterns (overrides EXCEPT_MODS)
    #[arg(long, global = true)]
    except: Option<String>,

    /// Continue with the remaining modules after a failure
    #[arg(long, global = true)]
    keep_going: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check out and link every external module
    ///
    /// Run it from the deploy after the new release is in place and before
    /// the release is finalized, so the links exist when the release goes live.
    Setup,

    /// List the external modules without touching any repository
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Check the module definitions and the tools they need
    Doctor,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Setup => cmd_setup(&cli.target),
        Commands::List { json } => cmd_list(&cli.target, json),
        Commands::Doctor => cmd_doctor(&cli.target),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_setup(args: &TargetArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settings = build_settings(args)?;
    let modules = load_modules(args, settings.config_path())?;

    if modules.is_empty() {
        println!("No externals to set up");
        return Ok(());
    }

    let registry = ScmRegistry::default().with_project_root(settings.project_root());
    let report = match settings.target() {
        Target::Local => {
            let shell = LocalShell::in_dir(settings.project_root());
            run_setup(&settings, &registry, &shell, &modules)?
        }
        Target::Fleet(fleet) => {
            let ssh = SshFleet::new(fleet.hosts.clone()).with_options(fleet.ssh_options.clone());
            run_setup(&settings, &registry, &ssh, &modules)?
        }
    };

    println!("{}", report.summary());

    if !report.is_success() {
        let failed: BTreeSet<&ModulePath> =
            report.failures.iter().filter_map(SetupError::module).collect();
        for failure in &report.failures {
            eprintln!("  {}", failure);
        }
        return Err(format!("{} of {} modules failed", failed.len(), report.modules).into());
    }

    Ok(())
}

fn run_setup(
    settings: &Settings,
    registry: &ScmRegistry,
    context: &dyn ExecutionContext,
    modules: &ExternalModules,
) -> Result<SetupReport, SetupError> {
    Externals::new(settings, registry, context)
        .run_with_progress(modules, |module| println!("configuring {}", module))
}

#[derive(Serialize)]
struct ListEntry<'a> {
    path: &'a ModulePath,
    #[serde(flatten)]
    spec: ModuleSpec,
}

fn cmd_list(args: &TargetArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let modules = load_modules(args, &config_path(args))?;

    if json {
        let entries: Vec<ListEntry> = modules
            .iter()
            .map(|(path, spec)| ListEntry {
                path,
                spec: redact(spec),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if modules.is_empty() {
        println!("No externals defined");
        return Ok(());
    }

    println!("{:<40} {:<12} {:<20}", "PATH", "TYPE", "REVISION");
    println!("{}", "-".repeat(72));

    for (path, spec) in modules.iter() {
        println!(
            "{:<40} {:<12} {:<20}",
            path.as_str(),
            spec.backend.as_str(),
            spec.revision
        );
    }

    Ok(())
}

fn cmd_doctor(args: &TargetArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("cached-externals system check\n");

    let path = config_path(args);
    let modules = match ExternalModules::load(&path) {
        Ok(modules) => {
            println!(
                "[{}] Config: {} ({} modules)",
                if path.exists() { "OK" } else { "INFO" },
                path.display(),
                modules.len()
            );
            modules
        }
        Err(e) => {
            println!("[FAIL] Config: {}", e);
            std::process::exit(1);
        }
    };

    let registry = ScmRegistry::default().with_project_root(&args.project_root);
    let mut ok = true;
    let mut tools = BTreeSet::new();
    for (module, spec) in modules.iter() {
        match registry.build(spec) {
            Ok(_) => {
                tools.insert(tool_for(spec));
            }
            Err(e) => {
                ok = false;
                println!("[FAIL] {}: {}", module, e);
            }
        }
    }

    for tool in tools.into_iter().flatten() {
        let found = tool_available(tool, "--version");
        ok &= found;
        println!(
            "[{}] {}: {}",
            if found { "OK" } else { "FAIL" },
            tool,
            if found { "available" } else { "not found" }
        );
    }

    if !args.local {
        let found = tool_available("ssh", "-V");
        ok &= found;
        println!(
            "[{}] ssh: {}",
            if found { "OK" } else { "FAIL" },
            if found { "available" } else { "not found" }
        );
    }

    if !ok {
        std::process::exit(1);
    }

    Ok(())
}

fn build_settings(args: &TargetArgs) -> Result<Settings, ConfigError> {
    let settings = if args.local {
        let settings = Settings::local(&args.project_root)?;
        match &args.shared_path {
            Some(path) => settings.with_shared_root(path),
            None => settings,
        }
    } else {
        let required = |value: &Option<PathBuf>, flag: &str| {
            value.clone().ok_or_else(|| {
                ConfigError::Settings(format!("{} is required unless --local is given", flag))
            })
        };
        let fleet = FleetSettings {
            hosts: args.hosts.clone(),
            shared_path: required(&args.shared_path, "--shared-path")?,
            release_path: required(&args.release_path, "--release-path")?,
            ssh_options: args.ssh_options.clone(),
        };
        Settings::fleet(&args.project_root, fleet)?
    };

    let settings = match &args.config {
        Some(path) => settings.with_config_path(path),
        None => settings,
    };
    Ok(settings.with_keep_going(args.keep_going))
}

fn config_path(args: &TargetArgs) -> PathBuf {
    args.project_root.join(
        args.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
    )
}

fn load_modules(
    args: &TargetArgs,
    path: &std::path::Path,
) -> Result<ExternalModules, ConfigError> {
    let filter = ModuleFilter::with_env_fallback(args.only.as_deref(), args.except.as_deref())?;
    Ok(filter.apply(ExternalModules::load(path)?))
}

/// The command-line tool a backend shells out to.
fn tool_for(spec: &ModuleSpec) -> Option<&'static str> {
    match spec.backend.as_str() {
        "git" => Some("git"),
        "subversion" | "svn" => Some("svn"),
        _ => None,
    }
}

fn tool_available(program: &str, version_flag: &str) -> bool {
    std::process::Command::new(program)
        .arg(version_flag)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Hide credentials before printing a definition.
fn redact(spec: &ModuleSpec) -> ModuleSpec {
    let mut spec = spec.clone();
    for (key, value) in spec.options.iter_mut() {
        if key.as_str().contains("password") {
            *value = "********".into();
        }
    }
    spec
}
