// ============================================================================
// tests/integration.rs — end-to-end scenarios over the demo front-end pieces
// ============================================================================
//
// These drive the same path `kl` does (read a manifest, load it into a
// `Context`, register the demo rules, run the scheduler) without going
// through the binary, so they exercise the library the way an embedding
// front-end would.
// ============================================================================

use std::fs;
use std::sync::Arc;

use kiln::context::{Context, RunPhase};
use kiln::demo_rule::{DemoCleanRule, DemoRule};
use kiln::diagnostics::Diagnostics;
use kiln::keys;
use kiln::loader::{self, ProjectManifest};
use kiln::overrides;
use kiln::rule::Action;
use kiln::scheduler;
use kiln::target::{DeclLevel, ExecuteEnv, TargetKey, TargetState};
use kiln::variable::{OverrideQualifier, Visibility};

fn new_ctx_with_demo_rules() -> Context {
    let ctx = Context::new();
    ctx.rules.register(Action::perform_update(), "target", Arc::new(DemoRule));
    ctx.rules.register(Action::perform_clean(), "target", Arc::new(DemoCleanRule));
    ctx
}

fn load(ctx: &Context, out_root: std::path::PathBuf, manifest: &str) -> Vec<Arc<kiln::target::Target>> {
    let manifest: ProjectManifest = toml::from_str(manifest).unwrap();
    let _load = ctx.phase.lock(RunPhase::Load);
    loader::load_project(ctx, out_root, &manifest).unwrap()
}

#[test]
fn empty_update_with_no_targets_succeeds() {
    let ctx = new_ctx_with_demo_rules();
    let dir = tempfile::tempdir().unwrap();
    let targets = load(
        &ctx,
        dir.path().to_path_buf(),
        r#"
            [project]
            name = "empty"
        "#,
    );
    assert!(targets.is_empty());

    let diag = Diagnostics::new(1, false);
    let env = ExecuteEnv { dry_run: false };
    let result = scheduler::run(&ctx, Action::perform_update(), &targets, 1, env, true, &diag);
    assert!(result.success());
}

#[test]
fn single_file_compile_builds_exe_from_source() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.c"), "int main() {}").unwrap();

    let manifest = r#"
        [project]
        name = "hello"

        [[target]]
        type = "file"
        name = "hello.c"

        [[target]]
        type = "exe"
        name = "hello"
        prerequisites = ["file{hello.c}"]
    "#;

    let ctx = new_ctx_with_demo_rules();
    let targets = load(&ctx, dir.path().to_path_buf(), manifest);
    let exe = targets.iter().find(|t| t.type_name() == "exe").unwrap().clone();

    // `hello.c`'s own out_dir is the tempdir, and its src_dir is left
    // unset, so the leaf recipe's `source_path` fallback looks for it
    // directly under out_dir — which is where it was just written.
    let leaf_key = TargetKey::new("file", dir.path().to_path_buf(), "hello.c");
    let leaf = ctx.targets.find(&leaf_key).unwrap();
    assert_eq!(leaf.decl_level(), DeclLevel::Real);

    let diag = Diagnostics::new(1, false);
    let env = ExecuteEnv { dry_run: false };
    let result = scheduler::run(&ctx, Action::perform_update(), &[exe.clone()], 1, env, true, &diag);

    assert!(result.success(), "failed: {:?}", result.failed.iter().map(|(_, e)| e.to_string()).collect::<Vec<_>>());
    assert!(dir.path().join("hello").is_file());
}

#[test]
fn override_propagation_replaces_project_variable() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = r#"
        [project]
        name = "proj"

        [variables]
        "cxx.std" = "17"
    "#;
    let ctx = new_ctx_with_demo_rules();
    let _targets = load(&ctx, dir.path().to_path_buf(), manifest);

    let parsed = overrides::parse_override("%cxx.std=20").unwrap();
    assert_eq!(parsed.qualifier, OverrideQualifier::Project);

    let scope = ctx.scopes.find_out(dir.path()).unwrap();
    {
        let mut vars = scope.vars.lock().unwrap();
        let ov = parsed.to_override(0);
        vars.declare("cxx.std", None, Visibility::Project, true, true).unwrap();
        vars.add_override("cxx.std", ov.kind, ov.qualifier, ov.value).unwrap();
    }

    let vars = scope.vars.lock().unwrap();
    let (effective, _) = vars.lookup_override("cxx.std", dir.path(), "cxx.std").unwrap();
    assert_eq!(effective.as_strings().map(|s| s.join(" ")), Some("20".to_string()));
}

#[test]
fn keep_going_runs_independent_targets_after_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    // "missing.c" is never written to disk, so the source-check recipe for
    // its target fails; "present.c" exists and should still succeed.
    fs::write(dir.path().join("present.c"), "int x;").unwrap();

    let manifest = r#"
        [project]
        name = "proj"

        [[target]]
        type = "file"
        name = "missing.c"

        [[target]]
        type = "file"
        name = "present.c"
    "#;
    let ctx = new_ctx_with_demo_rules();
    let targets = load(&ctx, dir.path().to_path_buf(), manifest);

    let diag = Diagnostics::new(2, false);
    let env = ExecuteEnv { dry_run: false };
    let result = scheduler::run(&ctx, Action::perform_update(), &targets, 2, env, true, &diag);

    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.succeeded.len(), 1);
    assert_eq!(result.failed[0].0.name(), "missing.c");
    assert_eq!(result.succeeded[0].name(), "present.c");
}

#[test]
fn ambiguous_key_parse_round_trips_through_format_and_parse() {
    // A name ending in a literal dot, with no true extension, needs an odd
    // run of escaping dots (§6) to round-trip unambiguously.
    let key = TargetKey::new("file", "/out/lib", "foo.").with_ext(kiln::target::Extension::None);
    let s = keys::format_key(&key);
    let parsed = keys::parse_key(&s).unwrap();
    assert_eq!(parsed.name, "foo.");
    assert_eq!(parsed.ext, kiln::target::Extension::None);
    assert_eq!(parsed.type_name, "file");
}

#[test]
fn config_build_round_trips_persisted_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.build");
    let entries = vec![
        kiln::config_file::ConfigEntry { name: "cxx.std".into(), value: vec![kiln::value::Name::new("20")] },
        kiln::config_file::ConfigEntry { name: "install.root".into(), value: vec![kiln::value::Name::new("/usr/local")] },
    ];
    kiln::config_file::write(&path, &entries).unwrap();
    let read_back = kiln::config_file::read(&path).unwrap();
    assert_eq!(read_back, entries);
}

#[test]
fn clean_removes_what_update_produced() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.c"), "int main() {}").unwrap();

    let manifest = r#"
        [project]
        name = "hello"

        [[target]]
        type = "file"
        name = "hello.c"

        [[target]]
        type = "exe"
        name = "hello"
        prerequisites = ["file{hello.c}"]
    "#;

    let update_ctx = new_ctx_with_demo_rules();
    let targets = load(&update_ctx, dir.path().to_path_buf(), manifest);
    let exe = targets.iter().find(|t| t.type_name() == "exe").unwrap().clone();
    let env = ExecuteEnv { dry_run: false };
    let diag = Diagnostics::new(1, false);
    let update_result = scheduler::run(&update_ctx, Action::perform_update(), &[exe], 1, env.clone(), true, &diag);
    assert!(update_result.success());
    assert!(dir.path().join("hello").is_file());

    let clean_ctx = new_ctx_with_demo_rules();
    let targets = load(&clean_ctx, dir.path().to_path_buf(), manifest);
    let exe = targets.iter().find(|t| t.type_name() == "exe").unwrap().clone();
    let clean_result = scheduler::run(&clean_ctx, Action::perform_clean(), &[exe], 1, env, true, &diag);
    assert!(clean_result.success());
    assert!(!dir.path().join("hello").is_file());
}

#[test]
fn dry_run_reports_change_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.c"), "int main() {}").unwrap();
    let manifest = r#"
        [project]
        name = "hello"

        [[target]]
        type = "file"
        name = "hello.c"

        [[target]]
        type = "exe"
        name = "hello"
        prerequisites = ["file{hello.c}"]
    "#;
    let ctx = new_ctx_with_demo_rules();
    let targets = load(&ctx, dir.path().to_path_buf(), manifest);
    let exe = targets.iter().find(|t| t.type_name() == "exe").unwrap().clone();

    let state = kiln::engine::execute_sync(&ctx, Action::perform_update(), &exe, &ExecuteEnv { dry_run: true }).unwrap();
    assert_eq!(state, TargetState::Changed);
    assert!(!dir.path().join("hello").is_file());
}
