// ============================================================================
// loader.rs — demo project loader (stand-in for a real buildfile parser)
// ============================================================================
//
// The core (value/variable/scope/target/rule/engine/scheduler/dyndep/search/
// depdb) never reads a project file itself — a real front-end would bring its
// own buildfile language. This module is the minimal TOML stand-in the demo
// binary and the integration tests use to get scopes, targets and variables
// into a `Context` without writing a parser: a project name/version, a flat
// list of targets (type, name, optional extension, prerequisites named by
// target-key string, and a per-target variable block), plus a project-level
// variable block. No toolchain discovery, no compilation rules: see
// `demo_rule` for the one toy rule exercising the engine end to end.
//
// project.toml:
//
//   [project]
//   name = "hello"
//   version = "0.1.0"
//
//   [variables]
//   "cxx.std" = "20"
//
//   [[target]]
//   type = "exe"
//   name = "hello"
//   prerequisites = ["file{hello.c}"]
//
//   [target.variables]
//   "cxx.coptions" = "-Wall -O2"
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::context::Context;
use crate::diagnostics::Failed;
use crate::keys;
use crate::target::{DeclLevel, Extension, Prerequisite, Target, TargetKey};
use crate::value::Name;
use crate::variable::Visibility;

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectManifest {
    pub project: ProjectHeader,
    #[serde(default)]
    pub variables: std::collections::HashMap<String, String>,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetManifest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectHeader {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetManifest {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Parses `path` as a project manifest. A missing or malformed file is a
/// `Failed::Config`, not an I/O passthrough, since the demo front-end treats
/// it as user input rather than an internal error.
pub fn read_manifest(path: &Path) -> Result<ProjectManifest, Failed> {
    let text = fs::read_to_string(path).map_err(|e| Failed::config(format!("reading {}: {e}", path.display())))?;
    toml::from_str(&text).map_err(|e| Failed::config(format!("parsing {}: {e}", path.display())))
}

fn names_from_str(s: &str) -> Vec<Name> {
    s.split_whitespace().map(Name::new).collect()
}

/// Loads `manifest` into `ctx`: registers the root out scope, declares and
/// assigns project-level variables, and inserts one target per manifest
/// entry (with its own variables and static prerequisites). Returns the
/// inserted targets in manifest order. Must run during the load phase.
pub fn load_project(ctx: &Context, out_root: PathBuf, manifest: &ProjectManifest) -> Result<Vec<Arc<Target>>, Failed> {
    let root = ctx.scopes.insert_out(out_root.clone(), true);
    root.add_subproject(manifest.project.name.clone(), out_root.clone());

    {
        let mut vars = root.vars.lock().unwrap();
        for (name, value) in &manifest.variables {
            vars.declare(name, None, Visibility::Project, true, true)?;
            vars.assign(name, names_from_str(value), true)?;
        }
    }

    let mut targets = Vec::new();
    for tm in &manifest.targets {
        let ext = match &tm.extension {
            Some(e) => Extension::Some(e.clone()),
            None => Extension::Unspecified,
        };
        let key = TargetKey::new(tm.type_name.clone(), out_root.clone(), tm.name.clone()).with_ext(ext);
        let target = ctx.targets.insert(key, DeclLevel::Real).map_err(|e| Failed::graph(e.to_string()))?;

        {
            let mut vars = target.vars.lock().unwrap();
            for (name, value) in &tm.variables {
                vars.declare(name, None, Visibility::Target, true, true)?;
                vars.assign(name, names_from_str(value), true)?;
            }
        }

        {
            let mut prereqs = target.prerequisites.lock().unwrap();
            for raw in &tm.prerequisites {
                let key = keys::parse_key(raw).map_err(|e| Failed::config(e.to_string()))?;
                prereqs.push(Prerequisite { key, include: crate::target::IncludeMode::True });
            }
        }

        targets.push(target);
    }

    Ok(targets)
}
