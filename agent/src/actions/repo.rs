//! `clone_repo`: check out the target repository into the workspace.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::actions::{ActionHandler, Dispatch, HandlerContext, required_str};
use crate::core::types::{ActionResult, Params};
use crate::io::git::{RepoCloner, repo_dir_name};

pub struct CloneRepo<C> {
    cloner: C,
    workspace_dir: PathBuf,
}

impl<C: RepoCloner> CloneRepo<C> {
    pub fn new(cloner: C, workspace_dir: &Path) -> Self {
        Self {
            cloner,
            workspace_dir: workspace_dir.to_path_buf(),
        }
    }
}

impl<C: RepoCloner> ActionHandler for CloneRepo<C> {
    #[instrument(skip_all)]
    fn handle(&self, params: &Params, _ctx: &HandlerContext<'_>) -> Result<Dispatch> {
        let url = required_str(params, "url")?;
        let dest = self.workspace_dir.join(repo_dir_name(url)?);
        if dest.exists() {
            info!(dest = %dest.display(), "removing previous checkout");
            fs::remove_dir_all(&dest).with_context(|| format!("remove {}", dest.display()))?;
        }
        fs::create_dir_all(&self.workspace_dir)
            .with_context(|| format!("create workspace {}", self.workspace_dir.display()))?;

        self.cloner.clone_repo(url, &dest)?;
        Ok(ActionResult::ok()
            .with("repo_path", dest.display().to_string())
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{params_of, with_test_context};
    use serde_json::json;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingCloner {
        calls: RefCell<Vec<String>>,
    }

    impl RepoCloner for RecordingCloner {
        fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
            assert!(!dest.exists(), "destination should be cleared first");
            fs::create_dir_all(dest)?;
            fs::write(dest.join("README.md"), "fresh")?;
            self.calls.borrow_mut().push(url.to_string());
            Ok(())
        }
    }

    fn clone(handler: &CloneRepo<&RecordingCloner>, params: &Params) -> Result<Dispatch> {
        with_test_context(|ctx| handler.handle(params, ctx))
    }

    #[test]
    fn clones_into_last_url_segment() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let cloner = RecordingCloner::default();
        let handler = CloneRepo::new(&cloner, workspace.path());

        let dispatch = clone(
            &handler,
            &params_of(json!({"url": "https://example.com/org/repo"})),
        )
        .expect("clone");
        let repo_path = dispatch.result.field_str("repo_path").expect("repo_path");
        assert!(repo_path.ends_with("repo"));
        assert_eq!(Path::new(repo_path), workspace.path().join("repo"));
        assert_eq!(*cloner.calls.borrow(), vec!["https://example.com/org/repo"]);
    }

    #[test]
    fn replaces_existing_checkout() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let stale = workspace.path().join("repo");
        fs::create_dir_all(&stale).expect("mkdir");
        fs::write(stale.join("stale.txt"), "old").expect("write");

        let cloner = RecordingCloner::default();
        let handler = CloneRepo::new(&cloner, workspace.path());
        clone(
            &handler,
            &params_of(json!({"url": "https://example.com/org/repo"})),
        )
        .expect("clone");

        assert!(!stale.join("stale.txt").exists());
        assert!(stale.join("README.md").is_file());
    }

    #[test]
    fn missing_url_is_an_error() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let cloner = RecordingCloner::default();
        let handler = CloneRepo::new(&cloner, workspace.path());

        let err = clone(&handler, &Params::new()).unwrap_err();
        assert!(err.to_string().contains("missing param 'url'"));
        assert!(cloner.calls.borrow().is_empty());
    }
}
