// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selecting the active plan.
//!
//! Plans are usually named after branches, so that a feature branch can relax
//! thresholds without touching the main plan. The active plan is picked from,
//! in order:
//!
//! 1. an explicitly requested plan,
//! 2. the `STOCHASTICS_PLAN` environment variable,
//! 3. the branch checked out in the enclosing git repository,
//! 4. the root plan, `default`.

use crate::config::PlanId;
use camino::Utf8Path;
use regex::Regex;
use std::{fs, sync::LazyLock};
use tracing::{debug, warn};

/// The environment variable consulted for the active plan.
pub const PLAN_ENV: &str = "STOCHASTICS_PLAN";

static HEAD_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ref: refs/heads/([\w\d_\-+./]+)\s*$").expect("HEAD ref regex is valid")
});

/// Reads the branch checked out in the git repository enclosing `start_dir`.
///
/// Walks up from `start_dir` to the first directory containing `.git`. Returns
/// `None`, with a warning, if there is no repository, `HEAD` can't be read, or
/// `HEAD` doesn't point to a branch.
pub fn read_git_branch(start_dir: &Utf8Path) -> Option<String> {
    let Some(repo_root) = start_dir
        .ancestors()
        .find(|dir| dir.join(".git").exists())
    else {
        warn!("no git repository found above {start_dir}");
        return None;
    };

    let head_path = repo_root.join(".git").join("HEAD");
    let head = match fs::read_to_string(&head_path) {
        Ok(head) => head,
        Err(error) => {
            warn!("failed to read {head_path}: {error}");
            return None;
        }
    };

    match HEAD_REF.captures(head.trim_end()) {
        Some(captures) => {
            let branch = captures[1].to_owned();
            debug!("current git branch: {branch}");
            Some(branch)
        }
        None if head.trim().is_empty() => {
            warn!("{head_path} is empty");
            None
        }
        None => {
            warn!("{head_path} does not point to a branch (detached HEAD?)");
            None
        }
    }
}

/// Selects the active plan, reading `STOCHASTICS_PLAN` from the environment.
pub fn select_plan(explicit: Option<&str>, start_dir: &Utf8Path) -> PlanId {
    let from_env = std::env::var(PLAN_ENV).ok();
    select_plan_with_env(explicit, from_env.as_deref(), start_dir)
}

/// Selects the active plan, with the environment value passed in.
pub fn select_plan_with_env(
    explicit: Option<&str>,
    from_env: Option<&str>,
    start_dir: &Utf8Path,
) -> PlanId {
    let non_empty = |plan: &&str| !plan.trim().is_empty();
    if let Some(plan) = explicit.filter(non_empty) {
        debug!("using requested plan `{plan}`");
        return PlanId::new(plan);
    }
    if let Some(plan) = from_env.filter(non_empty) {
        debug!("using plan `{plan}` from {PLAN_ENV}");
        return PlanId::new(plan);
    }
    match read_git_branch(start_dir) {
        Some(branch) => PlanId::new(branch),
        None => PlanId::default_plan(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use camino_tempfile::Utf8TempDir;
    use test_case::test_case;

    fn repo_with_head(head: &str) -> Utf8TempDir {
        let dir = camino_tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(dir.path().join(".git")).expect("create .git");
        fs::write(dir.path().join(".git/HEAD"), head).expect("write HEAD");
        dir
    }

    #[test_case("ref: refs/heads/main\n" => Some("main".to_owned()); "main")]
    #[test_case("ref: refs/heads/feature/retry-net_v2+x\n" => Some("feature/retry-net_v2+x".to_owned()); "nested branch")]
    #[test_case("4b825dc642cb6eb9a060e54bf8d69288fbee4904\n" => None; "detached head")]
    #[test_case("" => None; "empty head")]
    fn branch_from_head(head: &str) -> Option<String> {
        let dir = repo_with_head(head);
        read_git_branch(dir.path())
    }

    #[test]
    fn walks_up_to_repository_root() {
        let dir = repo_with_head("ref: refs/heads/release\n");
        let nested: Utf8PathBuf = dir.path().join("crates/inner/src");
        fs::create_dir_all(&nested).expect("create nested dirs");
        assert_eq!(read_git_branch(&nested).as_deref(), Some("release"));
    }

    #[test]
    fn unreadable_head_is_ignored() {
        let dir = camino_tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(dir.path().join(".git")).expect("create .git");
        assert_eq!(read_git_branch(dir.path()), None);
    }

    #[test]
    fn plan_precedence() {
        let dir = repo_with_head("ref: refs/heads/feature\n");
        let root = dir.path();

        assert_eq!(
            select_plan_with_env(Some("ci"), Some("nightly"), root).as_str(),
            "ci"
        );
        assert_eq!(
            select_plan_with_env(None, Some("nightly"), root).as_str(),
            "nightly"
        );
        assert_eq!(select_plan_with_env(Some(""), Some(" "), root).as_str(), "feature");
        assert_eq!(select_plan_with_env(None, None, root).as_str(), "feature");

        let detached = repo_with_head("4b825dc642cb6eb9a060e54bf8d69288fbee4904\n");
        assert!(select_plan_with_env(None, None, detached.path()).is_root());
    }
}
