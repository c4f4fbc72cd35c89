// ============================================================================
// demo_rule.rs — the one toy rule the demo front-end registers
// ============================================================================
//
// Concrete compilation rules (a real "how do I turn a .c into a .o" table)
// are out of scope for the core: that lives in whatever language-specific
// front-end embeds this engine. `DemoRule` (update) and `DemoCleanRule`
// (clean) are the stand-ins every integration test and the `kl` binary
// register instead, each registered once for the base "target" type so it
// matches anything without a more specific rule.
//
// A target with no static prerequisites is treated as a source file: its
// recipe just checks the file exists on disk and never "builds" it. A
// target with prerequisites is treated as something this toy rule knows how
// to produce: it writes a small generated file listing its prerequisites'
// output paths, skipping the write (and reporting `Unchanged`) when the
// command line hasn't changed since the depdb's last record, the same way a
// real compiler recipe would skip recompiling on an unchanged command line.
// ============================================================================

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};

use crate::context::Context;
use crate::depdb::{self, DepDb, DepDbWriter};
use crate::diagnostics::Failed;
use crate::engine::match_sync_locked;
use crate::rule::{Action, Rule};
use crate::target::{DeclLevel, Extension, ExecuteEnv, PrerequisiteTarget, Recipe, Target, TargetState};

pub struct DemoRule;

impl DemoRule {
    fn output_file_name(target: &Target) -> String {
        match target.extension() {
            Extension::Some(ext) => format!("{}.{ext}", target.name()),
            _ => target.name().to_string(),
        }
    }
}

impl Rule for DemoRule {
    fn name(&self) -> &str {
        "demo"
    }

    fn match_rule(&self, _action: Action, _target: &Arc<Target>, _ctx: &Context) -> bool {
        true
    }

    fn apply(&self, action: Action, target: &Arc<Target>, ctx: &Context) -> Result<(Recipe, Vec<PrerequisiteTarget>), Failed> {
        let static_prereqs = target.prerequisites.lock().unwrap().clone();

        let mut prereq_targets = Vec::with_capacity(static_prereqs.len());
        for p in &static_prereqs {
            let prereq = match ctx.targets.find(&p.key) {
                Some(t) => t,
                None => ctx.targets.insert(p.key.clone(), DeclLevel::PrerequisiteOnly).map_err(|e| Failed::graph(e.to_string()))?,
            };
            match_sync_locked(ctx, action, &prereq)?;
            prereq_targets.push(PrerequisiteTarget { target: prereq, adhoc: false, include: p.include });
        }

        if prereq_targets.is_empty() {
            let recipe: Recipe = Arc::new(|t: &Arc<Target>, _env: &ExecuteEnv| {
                let path = source_path(t);
                if path.is_file() {
                    debug!("source '{}' found at {}", t.name(), path.display());
                    Ok(TargetState::Unchanged)
                } else {
                    Err(Failed::graph(format!("missing source '{}' at {}", t.name(), path.display())))
                }
            });
            return Ok((recipe, prereq_targets));
        }

        let out_path = target.out_dir().join(Self::output_file_name(target));
        let depdb_path = PathBuf::from(format!("{}.d", out_path.display()));
        let mut argv = vec!["demo-build".to_string(), target.type_name().to_string(), target.name().to_string()];
        for p in &prereq_targets {
            argv.push(p.target.out_dir().join(Self::output_file_name(&p.target)).display().to_string());
        }
        let command_hash = depdb::hash_command(&argv);

        let recipe: Recipe = Arc::new(move |t: &Arc<Target>, env: &ExecuteEnv| {
            let prior = DepDb::read(&depdb_path).map_err(Failed::from)?;
            let up_to_date = out_path.is_file() && prior.as_ref().is_some_and(|db| db.closed && db.last_hash() == Some(command_hash.as_str()));
            if up_to_date {
                debug!("'{}' up to date, command hash unchanged", t.name());
                return Ok(TargetState::Unchanged);
            }

            if env.dry_run {
                info!("(dry run) would update '{}'", t.name());
                return Ok(TargetState::Changed);
            }

            info!("updating '{}'", t.name());
            let body = argv.join(" ");
            fs::create_dir_all(out_path.parent().unwrap_or(&out_path)).map_err(Failed::from)?;
            fs::write(&out_path, body).map_err(Failed::from)?;

            let mut writer = DepDbWriter::create(&depdb_path).map_err(Failed::from)?;
            writer.write_hash(&command_hash).map_err(Failed::from)?;
            writer.close().map_err(Failed::from)?;

            Ok(TargetState::Changed)
        });

        Ok((recipe, prereq_targets))
    }
}

fn source_path(target: &Target) -> PathBuf {
    let name = DemoRule::output_file_name(target);
    if target.src_dir().as_os_str().is_empty() {
        target.out_dir().join(name)
    } else {
        target.src_dir().join(name)
    }
}

/// The `clean` counterpart to `DemoRule`: removes a generated target's own
/// output and depdb, then (per the `Last` execution mode the `clean`
/// operation is registered with) lets the engine recurse into
/// prerequisites only after this target's own files are gone. Source
/// targets with no prerequisites have nothing to remove.
pub struct DemoCleanRule;

impl Rule for DemoCleanRule {
    fn name(&self) -> &str {
        "demo-clean"
    }

    fn match_rule(&self, _action: Action, _target: &Arc<Target>, _ctx: &Context) -> bool {
        true
    }

    fn apply(&self, action: Action, target: &Arc<Target>, ctx: &Context) -> Result<(Recipe, Vec<PrerequisiteTarget>), Failed> {
        let static_prereqs = target.prerequisites.lock().unwrap().clone();
        let mut prereq_targets = Vec::with_capacity(static_prereqs.len());
        for p in &static_prereqs {
            let prereq = match ctx.targets.find(&p.key) {
                Some(t) => t,
                None => ctx.targets.insert(p.key.clone(), DeclLevel::PrerequisiteOnly).map_err(|e| Failed::graph(e.to_string()))?,
            };
            match_sync_locked(ctx, action, &prereq)?;
            prereq_targets.push(PrerequisiteTarget { target: prereq, adhoc: false, include: p.include });
        }

        if prereq_targets.is_empty() {
            let recipe: Recipe = Arc::new(|_t: &Arc<Target>, _env: &ExecuteEnv| Ok(TargetState::Unchanged));
            return Ok((recipe, prereq_targets));
        }

        let out_path = target.out_dir().join(Self::dummy(target));
        let depdb_path = PathBuf::from(format!("{}.d", out_path.display()));

        let recipe: Recipe = Arc::new(move |t: &Arc<Target>, env: &ExecuteEnv| {
            if !out_path.is_file() && !depdb_path.is_file() {
                return Ok(TargetState::Unchanged);
            }
            if env.dry_run {
                info!("(dry run) would remove '{}'", t.name());
                return Ok(TargetState::Changed);
            }
            info!("removing '{}'", t.name());
            if out_path.is_file() {
                fs::remove_file(&out_path).map_err(Failed::from)?;
            }
            if depdb_path.is_file() {
                fs::remove_file(&depdb_path).map_err(Failed::from)?;
            }
            Ok(TargetState::Changed)
        });

        Ok((recipe, prereq_targets))
    }
}

impl DemoCleanRule {
    fn dummy(target: &Target) -> String {
        DemoRule::output_file_name(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::execute_sync;
    use crate::target::TargetKey;
    use tempfile::tempdir;

    fn ctx_with_rule() -> Context {
        let ctx = Context::new_for_test();
        ctx.rules.register(Action::perform_update(), "target", Arc::new(DemoRule));
        ctx
    }

    #[test]
    fn missing_leaf_source_is_an_error() {
        let ctx = ctx_with_rule();
        let t = ctx.targets.insert(TargetKey::new("file", "/nonexistent", "a.c"), DeclLevel::Real).unwrap();
        let env = ExecuteEnv { dry_run: false };
        assert!(execute_sync(&ctx, Action::perform_update(), &t, &env).is_err());
    }

    #[test]
    fn builds_then_skips_on_unchanged_command() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("hello.c");
        fs::write(&src, "int main() {}").unwrap();

        let ctx = ctx_with_rule();
        let leaf = ctx
            .targets
            .insert(TargetKey::new("file", dir.path().to_path_buf(), "hello.c").with_src_dir(dir.path().to_path_buf()), DeclLevel::Real)
            .unwrap();
        let _ = leaf;

        let exe = ctx.targets.insert(TargetKey::new("exe", dir.path().to_path_buf(), "hello"), DeclLevel::Real).unwrap();
        exe.prerequisites.lock().unwrap().push(crate::target::Prerequisite {
            key: TargetKey::new("file", dir.path().to_path_buf(), "hello.c").with_src_dir(dir.path().to_path_buf()),
            include: crate::target::IncludeMode::True,
        });

        let env = ExecuteEnv { dry_run: false };
        let first = execute_sync(&ctx, Action::perform_update(), &exe, &env).unwrap();
        assert_eq!(first, TargetState::Changed);
        assert!(dir.path().join("hello").is_file());

        let ctx2 = ctx_with_rule();
        let exe2 = ctx2.targets.insert(TargetKey::new("exe", dir.path().to_path_buf(), "hello"), DeclLevel::Real).unwrap();
        exe2.prerequisites.lock().unwrap().push(crate::target::Prerequisite {
            key: TargetKey::new("file", dir.path().to_path_buf(), "hello.c").with_src_dir(dir.path().to_path_buf()),
            include: crate::target::IncludeMode::True,
        });
        let second = execute_sync(&ctx2, Action::perform_update(), &exe2, &env).unwrap();
        assert_eq!(second, TargetState::Unchanged);
    }

    #[test]
    fn dry_run_never_writes_output() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("hello.c");
        fs::write(&src, "int main() {}").unwrap();

        let ctx = ctx_with_rule();
        let exe = ctx.targets.insert(TargetKey::new("exe", dir.path().to_path_buf(), "hello"), DeclLevel::Real).unwrap();
        exe.prerequisites.lock().unwrap().push(crate::target::Prerequisite {
            key: TargetKey::new("file", dir.path().to_path_buf(), "hello.c").with_src_dir(dir.path().to_path_buf()),
            include: crate::target::IncludeMode::True,
        });

        let env = ExecuteEnv { dry_run: true };
        let state = execute_sync(&ctx, Action::perform_update(), &exe, &env).unwrap();
        assert_eq!(state, TargetState::Changed);
        assert!(!dir.path().join("hello").is_file());
    }

    #[test]
    fn clean_removes_generated_output_and_depdb() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("hello.c");
        fs::write(&src, "int main() {}").unwrap();

        let update_ctx = ctx_with_rule();
        let exe = update_ctx.targets.insert(TargetKey::new("exe", dir.path().to_path_buf(), "hello"), DeclLevel::Real).unwrap();
        exe.prerequisites.lock().unwrap().push(crate::target::Prerequisite {
            key: TargetKey::new("file", dir.path().to_path_buf(), "hello.c").with_src_dir(dir.path().to_path_buf()),
            include: crate::target::IncludeMode::True,
        });
        let env = ExecuteEnv { dry_run: false };
        execute_sync(&update_ctx, Action::perform_update(), &exe, &env).unwrap();
        assert!(dir.path().join("hello").is_file());
        assert!(dir.path().join("hello.d").is_file());

        let clean_ctx = Context::new_for_test();
        clean_ctx.rules.register(Action::perform_clean(), "target", Arc::new(DemoCleanRule));
        let exe2 = clean_ctx.targets.insert(TargetKey::new("exe", dir.path().to_path_buf(), "hello"), DeclLevel::Real).unwrap();
        exe2.prerequisites.lock().unwrap().push(crate::target::Prerequisite {
            key: TargetKey::new("file", dir.path().to_path_buf(), "hello.c").with_src_dir(dir.path().to_path_buf()),
            include: crate::target::IncludeMode::True,
        });
        let state = execute_sync(&clean_ctx, Action::perform_clean(), &exe2, &env).unwrap();
        assert_eq!(state, TargetState::Changed);
        assert!(!dir.path().join("hello").is_file());
        assert!(!dir.path().join("hello.d").is_file());
    }
}
