use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::exec::Executor;
use crate::output::Reporter;

/// Branches tried after the requested one, in order.
const COMMON_BRANCHES: [&str; 4] = ["main", "master", "develop", "dev"];

/// Fetches application source: shallow git clones with a branch-fallback
/// ladder, or recursive copies of local directories.
pub struct SourceFetcher {
    exec: Arc<Executor>,
    reporter: Arc<dyn Reporter>,
}

impl SourceFetcher {
    pub fn new(exec: Arc<Executor>, reporter: Arc<dyn Reporter>) -> Self {
        Self { exec, reporter }
    }

    /// Materialize `source` into `target`. Returns the branch actually used
    /// (for local copies, the requested branch unchanged).
    pub async fn fetch(&self, source: &str, branch: &str, target: &Path) -> Result<String> {
        if source.starts_with("http") || source.starts_with("git@") {
            self.clone_repository(source, branch, target).await
        } else {
            self.copy_local(source, target)?;
            Ok(branch.to_string())
        }
    }

    async fn clone_repository(&self, url: &str, branch: &str, target: &Path) -> Result<String> {
        self.reporter.info(&format!("Cloning repository: {}", url));

        if let Some(used) = self.try_clone_ladder(url, branch, target).await {
            return Ok(self.note_substitution(branch, used));
        }

        // SSH clones commonly fail on hosts without deploy keys; public
        // GitHub repos are reachable over HTTPS with the same path.
        if url.starts_with("git@github.com:") {
            let https_url = url.replace("git@github.com:", "https://github.com/");
            self.reporter
                .warning("SSH clone failed, retrying over HTTPS...");
            if let Some(used) = self.try_clone_ladder(&https_url, branch, target).await {
                return Ok(self.note_substitution(branch, used));
            }
        }

        bail!(
            "Failed to clone {}: no usable branch among '{}', {}",
            url,
            branch,
            COMMON_BRANCHES.join(", ")
        );
    }

    async fn try_clone_ladder(&self, url: &str, branch: &str, target: &Path) -> Option<String> {
        for candidate in branch_ladder(branch) {
            if target.exists() {
                fs::remove_dir_all(target).ok()?;
            }

            let clone = format!(
                "git clone --depth 1 --branch {} {} {}",
                candidate,
                url,
                target.display()
            );
            if self.exec.run_unchecked(&clone).await.is_some() && target.exists() {
                return Some(candidate);
            }
        }
        None
    }

    fn copy_local(&self, source: &str, target: &Path) -> Result<()> {
        let source = Path::new(source);
        if !source.exists() {
            bail!("Source directory does not exist: {}", source.display());
        }

        self.reporter
            .info(&format!("Copying from {}", source.display()));
        copy_dir_recursive(source, target)
            .with_context(|| format!("Failed to copy {}", source.display()))?;
        Ok(())
    }

    /// Update an existing checkout: fetch, then hard-reset to the first
    /// remote branch on the ladder that exists. Returns the branch used.
    pub async fn update(&self, app_dir: &Path, branch: &str) -> Result<String> {
        self.mark_git_safe(app_dir).await;

        self.exec
            .run(&format!("cd {} && git fetch origin", app_dir.display()))
            .await
            .context("git fetch failed")?;

        for candidate in branch_ladder(branch) {
            let exists = self
                .exec
                .run_unchecked(&format!(
                    "cd {} && git ls-remote --heads origin {}",
                    app_dir.display(),
                    candidate
                ))
                .await
                .map(|out| !out.is_empty())
                .unwrap_or(false);
            if !exists {
                continue;
            }

            if self
                .exec
                .run_unchecked(&format!(
                    "cd {} && git reset --hard origin/{}",
                    app_dir.display(),
                    candidate
                ))
                .await
                .is_some()
            {
                return Ok(self.note_substitution(branch, candidate));
            }
        }

        bail!(
            "No usable remote branch among '{}', {}",
            branch,
            COMMON_BRANCHES.join(", ")
        );
    }

    /// Register the directory with git's safe.directory list so operations
    /// under sudo/www-data ownership transitions keep working.
    pub async fn mark_git_safe(&self, dir: &Path) {
        let listed = self
            .exec
            .run_unchecked(&format!(
                "git config --global --get-all safe.directory | grep -x {}",
                dir.display()
            ))
            .await;
        if listed.map(|out| out.is_empty()).unwrap_or(true) {
            self.exec
                .run_unchecked(&format!(
                    "git config --global --add safe.directory {}",
                    dir.display()
                ))
                .await;
        }
    }

    fn note_substitution(&self, requested: &str, used: String) -> String {
        if used != requested {
            self.reporter.warning(&format!(
                "Branch '{}' not found, used '{}' instead",
                requested, used
            ));
        }
        used
    }
}

/// The ordered list of branches to attempt: the requested one first, then
/// the common defaults, deduplicated.
pub fn branch_ladder(preferred: &str) -> Vec<String> {
    let mut ladder = vec![preferred.to_string()];
    for branch in COMMON_BRANCHES {
        if branch != preferred {
            ladder.push(branch.to_string());
        }
    }
    ladder
}

pub fn copy_dir_recursive(source: &Path, target: &Path) -> std::io::Result<()> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            {
                let link = fs::read_link(entry.path())?;
                std::os::unix::fs::symlink(link, &dest)?;
            }
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Plain;
    use tempfile::TempDir;

    #[test]
    fn ladder_puts_requested_branch_first() {
        assert_eq!(
            branch_ladder("feature/x"),
            vec!["feature/x", "main", "master", "develop", "dev"]
        );
    }

    #[test]
    fn ladder_deduplicates_requested_branch() {
        assert_eq!(
            branch_ladder("master"),
            vec!["master", "main", "develop", "dev"]
        );
        assert_eq!(branch_ladder("main"), vec!["main", "master", "develop", "dev"]);
    }

    #[test]
    fn recursive_copy_preserves_tree() {
        let source = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("nested/deep")).unwrap();
        fs::write(source.path().join("index.html"), "<html></html>").unwrap();
        fs::write(source.path().join("nested/deep/file.txt"), "data").unwrap();

        let target = TempDir::new().unwrap();
        let dest = target.path().join("copy");
        copy_dir_recursive(source.path(), &dest).unwrap();

        assert_eq!(
            fs::read_to_string(dest.join("index.html")).unwrap(),
            "<html></html>"
        );
        assert_eq!(
            fs::read_to_string(dest.join("nested/deep/file.txt")).unwrap(),
            "data"
        );
    }

    #[tokio::test]
    async fn fetching_missing_local_path_fails() {
        let fetcher = SourceFetcher::new(Arc::new(Executor::new()), Arc::new(Plain));
        let target = TempDir::new().unwrap();
        let err = fetcher
            .fetch("/nonexistent/source/dir", "main", &target.path().join("out"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn fetching_local_path_copies_and_keeps_branch() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("index.html"), "<html></html>").unwrap();

        let fetcher = SourceFetcher::new(Arc::new(Executor::new()), Arc::new(Plain));
        let target = TempDir::new().unwrap();
        let dest = target.path().join("out");

        let used = fetcher
            .fetch(source.path().to_str().unwrap(), "main", &dest)
            .await
            .unwrap();
        assert_eq!(used, "main");
        assert!(dest.join("index.html").exists());
    }
}
