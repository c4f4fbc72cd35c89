// ============================================================================
// main.rs — `kl`, the demo front-end binary
// ============================================================================
//
// Wires the library's pieces together into something runnable: parses CLI
// options, loads a `project.toml` manifest (`loader`), applies CLI variable
// overrides, registers the toy `demo_rule` rule, and drives `scheduler::run`
// over the selected targets. None of this is "the build system" — it's the
// thinnest front-end that exercises the real one end to end, the same way a
// real toolchain front-end would sit on top of the library crate instead of
// inside it.
// ============================================================================

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use kiln::config_file::{self, ConfigEntry};
use kiln::context::{Context, RunPhase};
use kiln::demo_rule::{DemoCleanRule, DemoRule};
use kiln::diagnostics::Diagnostics;
use kiln::keys;
use kiln::loader::{self, ProjectManifest};
use kiln::options::{BuildOptions, Command};
use kiln::overrides;
use kiln::rule::Action;
use kiln::scheduler;
use kiln::target::{ExecuteEnv, Target};
use kiln::variable::{OverrideQualifier, Visibility};
use kiln::Failed;

fn main() -> ExitCode {
    let options = BuildOptions::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(options.default_log_filter())).init();

    let command = options.command.unwrap_or(Command::Update {
        targets: Vec::new(),
        overrides: Vec::new(),
        dry_run: false,
        keep_going: false,
        jobs: None,
        no_diag_buffer: false,
    });

    let result = match command {
        Command::Update { targets, overrides, dry_run, keep_going, jobs, no_diag_buffer } => {
            run_update(&options.config, options.config_build.as_deref(), &targets, &overrides, dry_run, keep_going, jobs, no_diag_buffer)
        }
        Command::Clean { targets } => run_clean(&options.config, &targets),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Builds a fresh `Context`, loads `manifest_path` into it and registers the
/// demo rules. Shared by both `update` and `clean` since cleaning needs the
/// same graph update needs, just a different operation and rule pair.
fn load_context(manifest_path: &Path) -> Result<(Context, Vec<Arc<Target>>), Failed> {
    let ctx = Context::new();
    let _load = ctx.phase.lock(RunPhase::Load);

    let manifest: ProjectManifest = loader::read_manifest(manifest_path)?;
    let out_root = manifest_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let targets = loader::load_project(&ctx, out_root, &manifest)?;

    ctx.rules.register(Action::perform_update(), "target", Arc::new(DemoRule));
    ctx.rules.register(Action::perform_clean(), "target", Arc::new(DemoCleanRule));

    ctx.bump_load_generation();
    Ok((ctx, targets))
}

/// Registers one parsed CLI override against the variable pool its
/// qualifier names: `Global` on the process-wide pool, `Project`/`Scope` on
/// the (single, in this demo) project's root scope. The variable must
/// already be declared in that pool — the manifest's own assignments run
/// first during `load_project`, so this only rejects overrides naming a
/// variable nobody ever declared.
fn apply_override(ctx: &Context, root_out: &Path, parsed: &overrides::ParsedOverride) -> Result<(), Failed> {
    let ov = parsed.to_override(0);
    match &parsed.qualifier {
        OverrideQualifier::Global => {
            let mut vars = ctx.global_vars.lock().unwrap();
            vars.declare(&parsed.name, None, Visibility::Global, true, true)?;
            vars.add_override(&parsed.name, ov.kind, ov.qualifier, ov.value)?;
        }
        OverrideQualifier::Project | OverrideQualifier::Scope(_) => {
            let scope = ctx.scopes.find_out(root_out).ok_or_else(|| Failed::graph("no root scope to apply override against"))?;
            let mut vars = scope.vars.lock().unwrap();
            let visibility = if matches!(parsed.qualifier, OverrideQualifier::Project) { Visibility::Project } else { Visibility::Scope };
            vars.declare(&parsed.name, None, visibility, true, true)?;
            vars.add_override(&parsed.name, ov.kind, ov.qualifier, ov.value)?;
        }
    }
    Ok(())
}

/// Resolves a CLI target argument against the manifest's loaded targets.
/// A bare name (no `{`) matches by target name; a full `type{name[.ext]}`
/// key string goes through the same grammar `format_key`/`parse_key` use
/// elsewhere, resolved against the project's root out directory if it
/// doesn't carry its own.
fn resolve_target<'a>(arg: &str, root_out: &Path, candidates: &'a [Arc<Target>]) -> Option<&'a Arc<Target>> {
    if !arg.contains('{') {
        return candidates.iter().find(|t| t.name() == arg);
    }
    let mut key = keys::parse_key(arg).ok()?;
    if key.out_dir.as_os_str().is_empty() {
        key.out_dir = root_out.to_path_buf();
    }
    candidates.iter().find(|t| t.key() == key)
}

#[allow(clippy::too_many_arguments)]
fn run_update(
    manifest_path: &Path,
    config_build_path: Option<&Path>,
    target_args: &[String],
    override_args: &[String],
    dry_run: bool,
    keep_going: bool,
    jobs: Option<usize>,
    no_diag_buffer: bool,
) -> Result<bool, Failed> {
    let (ctx, targets) = load_context(manifest_path)?;
    let root_out = manifest_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    for raw in override_args {
        let parsed = overrides::parse_override(raw).map_err(|e| Failed::config(e.to_string()))?;
        apply_override(&ctx, &root_out, &parsed)?;
    }

    let selected = select_targets(target_args, &root_out, &targets)?;
    if selected.is_empty() {
        info!("no targets to update");
        return Ok(true);
    }

    let jobs = jobs.unwrap_or_else(num_cpus::get);
    let diag = Diagnostics::new(jobs, no_diag_buffer);
    let env = ExecuteEnv { dry_run };

    info!("updating {} target(s) with {jobs} job(s)", selected.len());
    let result = scheduler::run(&ctx, Action::perform_update(), &selected, jobs, env, keep_going, &diag);

    for (target, err) in &result.failed {
        error!("'{}' failed: {err}", target.name());
    }
    if let Some(err) = &result.post_hoc_failure {
        error!("post-hoc prerequisite pass failed: {err}");
    }
    info!("{} succeeded, {} failed", result.succeeded.len(), result.failed.len());

    if !dry_run {
        persist_config(&ctx, &root_out, manifest_path, config_build_path)?;
    }

    Ok(result.success())
}

fn run_clean(manifest_path: &Path, target_args: &[String]) -> Result<bool, Failed> {
    let (ctx, targets) = load_context(manifest_path)?;
    let root_out = manifest_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    let selected = select_targets(target_args, &root_out, &targets)?;
    if selected.is_empty() {
        info!("no targets to clean");
        return Ok(true);
    }

    let diag = Diagnostics::new(1, false);
    let env = ExecuteEnv { dry_run: false };
    let result = scheduler::run(&ctx, Action::perform_clean(), &selected, 1, env, true, &diag);

    for (target, err) in &result.failed {
        error!("'{}' failed to clean: {err}", target.name());
    }
    if let Some(err) = &result.post_hoc_failure {
        error!("post-hoc prerequisite pass failed: {err}");
    }
    Ok(result.success())
}

fn select_targets(target_args: &[String], root_out: &Path, targets: &[Arc<Target>]) -> Result<Vec<Arc<Target>>, Failed> {
    if target_args.is_empty() {
        return Ok(targets.to_vec());
    }
    let mut selected = Vec::with_capacity(target_args.len());
    for arg in target_args {
        let t = resolve_target(arg, root_out, targets).ok_or_else(|| Failed::config(format!("no such target '{arg}'")))?;
        selected.push(t.clone());
    }
    Ok(selected)
}

/// Dumps every project-visibility variable from the root scope's pool into
/// `config.build` (or the caller's override path), so a later invocation
/// without any `-o` overrides still sees last run's configuration.
fn persist_config(ctx: &Context, root_out: &Path, manifest_path: &Path, config_build_path: Option<&Path>) -> Result<(), Failed> {
    let path = config_build_path.map(PathBuf::from).unwrap_or_else(|| {
        manifest_path.parent().map(|p| p.join("config.build")).unwrap_or_else(|| PathBuf::from("config.build"))
    });

    let mut entries = Vec::new();
    if let Some(scope) = ctx.scopes.find_out(root_out) {
        let vars = scope.vars.lock().unwrap();
        for (name, var, value) in vars.iter() {
            if var.visibility == Visibility::Project && !value.is_null() {
                entries.push(ConfigEntry { name: name.to_string(), value: value.extract_names() });
            }
        }
    }
    config_file::write(&path, &entries).map_err(Failed::from)
}
