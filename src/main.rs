// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pkgcore::cache::builder::build_cache;
use pkgcore::cache::image;
use pkgcore::upgrade::{self, PackageRequest};
use pkgcore::{
    CacheLock, CoreConfig, DebVersioning, DefaultPolicy, DepCache, Diagnostics, IndexSource,
    PackageCache, Policy, ProblemResolver, ResolutionPlan, VersioningSystem,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pkgcore")]
#[command(author, version, about = "Package cache and dependency resolver", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Index source file (JSON); may be given several times
    #[arg(short, long = "index", global = true)]
    indexes: Vec<PathBuf>,

    /// Installed-package status source (JSON)
    #[arg(short, long, global = true)]
    status: Option<PathBuf>,

    /// Cache image to reuse or write
    #[arg(long, global = true)]
    image: Option<PathBuf>,

    /// Cache write lock (default: next to the image)
    #[arg(long, global = true)]
    lock: Option<PathBuf>,

    /// Ignore an existing cache image
    #[arg(long, global = true)]
    rebuild: bool,

    /// Do not treat Recommends as required
    #[arg(long, global = true)]
    no_install_recommends: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages (name, name:arch or name=version)
    Install { packages: Vec<String> },
    /// Remove packages
    Remove {
        packages: Vec<String>,
        /// Remove configuration files too
        #[arg(long)]
        purge: bool,
    },
    /// Upgrade installed packages without installing or removing others
    Upgrade,
    /// Upgrade installed packages, installing and removing as needed
    DistUpgrade,
    /// Repair broken installed packages
    FixBroken,
    /// Remove automatically installed packages nothing needs
    Autoremove,
    /// Show versions, priorities and dependencies of a package
    Show { package: String },
    /// Print cache statistics
    Stats,
}

fn load_sources(cli: &Cli) -> Result<Vec<IndexSource>> {
    let mut sources = Vec::new();
    for path in &cli.indexes {
        sources.push(IndexSource::load(path).with_context(|| format!("loading {}", path.display()))?);
    }
    if let Some(path) = &cli.status {
        let mut status =
            IndexSource::load(path).with_context(|| format!("loading {}", path.display()))?;
        status.file.status = true;
        sources.push(status);
    }
    Ok(sources)
}

fn open_cache(
    cli: &Cli,
    config: &CoreConfig,
    vs: Arc<dyn VersioningSystem>,
    diag: &mut Diagnostics,
) -> Result<PackageCache> {
    let sources = load_sources(cli)?;
    let native = config.native_arch();
    let image_path = cli.image.clone().or_else(|| config.cache.image_path.clone());

    let Some(image_path) = image_path else {
        return Ok(build_cache(native, vs, &sources, diag)?);
    };
    let lock_path = cli
        .lock
        .clone()
        .or_else(|| config.cache.lock_path.clone())
        .unwrap_or_else(|| image_path.with_extension("lock"));
    let lock = CacheLock::acquire(&lock_path)?;

    if cli.rebuild {
        let cache = build_cache(native, vs, &sources, diag)?;
        image::save(&cache, &image_path, &lock)?;
        return Ok(cache);
    }
    let build_vs = vs.clone();
    Ok(image::load_or_build(&image_path, vs, &lock, || {
        build_cache(native, build_vs, &sources, diag)
    })?)
}

fn print_messages(diag: &mut Diagnostics) {
    for message in diag.drain() {
        eprintln!("{}", message);
    }
}

fn print_plan(plan: &ResolutionPlan) {
    if plan.actions.is_empty() {
        println!("Nothing to do.");
        return;
    }
    for action in &plan.actions {
        println!("  {}", action);
    }
    println!("{}.", plan.summary());
    println!("Need to get {} B of archives.", plan.download_size);
    if plan.disk_usage >= 0 {
        println!("After this operation, {} B of additional disk space will be used.", plan.disk_usage);
    } else {
        println!("After this operation, {} B disk space will be freed.", -plan.disk_usage);
    }
}

fn show(cache: &PackageCache, depcache: &DepCache<'_>, policy: &dyn Policy, spec: &str) -> Result<()> {
    let pkg = PackageRequest::parse(spec)?.find(cache)?;
    println!("{}:", cache.full_name(pkg));
    let name = |v: Option<pkgcore::VerId>| v.map_or("(none)", |v| cache.ver_str(v));
    println!("  Installed: {}", name(cache.current_ver(pkg)));
    println!("  Candidate: {}", name(depcache.candidate_ver(pkg)));
    println!("  Version table:");
    for ver in cache.versions(pkg) {
        let marker = if Some(ver) == cache.current_ver(pkg) { "***" } else { "   " };
        println!("   {} {} {}", marker, cache.ver_str(ver), policy.priority(cache, ver));
        for vf in cache.ver_files(ver) {
            let file = cache.ver_file(vf).file();
            println!("        {} {}", cache.file(file).priority(), cache.file_name(file));
        }
        for group in cache.or_groups(ver) {
            println!("        {}", cache.describe_group(&group));
        }
    }
    let providers = cache.providers(pkg);
    if !providers.is_empty() {
        let names: Vec<String> = providers.iter().map(|&p| cache.full_name(p)).collect();
        println!("  Provided by: {}", names.join(", "));
    }
    Ok(())
}

fn stats(cache: &PackageCache, depcache: &DepCache<'_>) {
    println!("Total package names: {}", cache.package_count());
    println!("Total versions: {}", cache.version_count());
    println!("Total dependencies: {}", cache.dependency_count());
    println!("Total provides mappings: {}", cache.provides_count());
    println!("Total package files: {}", cache.file_count());
    println!("Total version files: {}", cache.ver_file_count());
    println!("Broken packages: {}", depcache.broken_count());
    println!("Packages needing attention: {}", depcache.bad_count());
}

fn run(cli: &Cli, config: &CoreConfig, diag: &mut Diagnostics) -> Result<()> {
    let vs: Arc<dyn VersioningSystem> = Arc::new(DebVersioning::new());
    let cache = open_cache(cli, config, vs, diag)?;
    let policy = DefaultPolicy::from_config(config)?;
    let mut depcache = DepCache::new(&cache, &policy);
    depcache.set_max_auto_install_depth(config.resolver.max_auto_install_depth);
    if cli.no_install_recommends {
        depcache.set_install_recommends(false);
    }

    match &cli.command {
        Commands::Install { packages } => {
            let mut requested = Vec::new();
            for spec in packages {
                let request = PackageRequest::parse(spec)?;
                requested.push(upgrade::install_by_name(&mut depcache, &request, diag)?);
            }
            let mut resolver = ProblemResolver::from_config(&mut depcache, &config.resolver);
            for pkg in requested {
                resolver.protect(pkg);
            }
            resolver.resolve(true, diag)?;
        }
        Commands::Remove { packages, purge } => {
            let mut targets = Vec::new();
            for spec in packages {
                targets.push(PackageRequest::parse(spec)?.find(&cache)?);
            }
            let mut resolver = ProblemResolver::from_config(&mut depcache, &config.resolver);
            for pkg in targets {
                resolver.remove(pkg, *purge);
            }
            resolver.resolve(true, diag)?;
        }
        Commands::Upgrade => upgrade::all_upgrade(&mut depcache, diag)?,
        Commands::DistUpgrade => upgrade::dist_upgrade(&mut depcache, &config.resolver, diag)?,
        Commands::FixBroken => upgrade::fix_broken(&mut depcache, &config.resolver, diag)?,
        Commands::Autoremove => {
            let removed = upgrade::auto_remove(&mut depcache);
            info!("{} packages are no longer needed", removed.len());
        }
        Commands::Show { package } => return show(&cache, &depcache, &policy, package),
        Commands::Stats => {
            stats(&cache, &depcache);
            return Ok(());
        }
    }

    print_plan(&ResolutionPlan::from_depcache(&depcache));
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    match path {
        Some(path) => Ok(CoreConfig::load(path)?),
        None => Ok(CoreConfig::default()),
    }
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let mut diag = Diagnostics::new();

    let result = run(&cli, &config, &mut diag);
    print_messages(&mut diag);
    result
}
