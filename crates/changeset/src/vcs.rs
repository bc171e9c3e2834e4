//! Version-control queries used by change detection
//!
//! [`GitCli`] shells out to `git` in the repository root. [`ChangedFilesList`]
//! serves a pre-computed file list, as produced by a code-review API.

use crate::error::{Error, ReferenceError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Abstraction over the version-control system
pub trait VersionControl {
    /// Repo-relative paths changed between `base` and `head`, `/` separated
    fn changed_files(&self, base: &str, head: &str) -> Result<Vec<String>>;

    /// Whether `base` and `head` share an ancestor
    ///
    /// Returns [`ReferenceError::Invalid`] when either reference does not
    /// resolve to a commit.
    fn has_common_history(&self, base: &str, head: &str) -> Result<bool>;
}

/// `git` command-line backend
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Locate the repository containing `path`
    pub fn discover(path: &Path) -> Result<Self> {
        let output = git_in(path, &["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(Error::Git {
                command: "rev-parse --show-toplevel".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Self::new(top))
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn git(&self, args: &[&str]) -> Result<Output> {
        git_in(&self.repo_root, args)
    }

    fn resolves(&self, reference: &str) -> Result<bool> {
        let spec = format!("{reference}^{{commit}}");
        let output = self.git(&["rev-parse", "--verify", "--quiet", &spec])?;
        Ok(output.status.success())
    }
}

fn git_in(dir: &Path, args: &[&str]) -> Result<Output> {
    log::trace!("git -C {} {}", dir.display(), args.join(" "));
    let output = Command::new("git").arg("-C").arg(dir).args(args).output()?;
    Ok(output)
}

impl VersionControl for GitCli {
    fn changed_files(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let output = self.git(&["diff", "--name-only", "--no-renames", "-z", base, head])?;
        if !output.status.success() {
            return Err(Error::Git {
                command: format!("diff {base} {head}"),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn has_common_history(&self, base: &str, head: &str) -> Result<bool> {
        for reference in [base, head] {
            if !self.resolves(reference)? {
                return Err(ReferenceError::Invalid {
                    reference: reference.to_string(),
                }
                .into());
            }
        }

        let output = self.git(&["merge-base", base, head])?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Error::Git {
                command: format!("merge-base {base} {head}"),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

/// File list read from disk, one repo-relative path per line
#[derive(Debug, Clone)]
pub struct ChangedFilesList {
    files: Vec<String>,
}

impl ChangedFilesList {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ChangedFilesList {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let files = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| line.replace('\\', "/"))
            .collect();
        Self { files }
    }
}

impl VersionControl for ChangedFilesList {
    fn changed_files(&self, _base: &str, _head: &str) -> Result<Vec<String>> {
        Ok(self.files.clone())
    }

    fn has_common_history(&self, _base: &str, _head: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_files_list_skips_blank_lines() {
        let list = ChangedFilesList::parse("toronto/network/main.tf\n\n  \ntoronto/dns/vars.tf\n");
        let files = list.changed_files("a", "b").unwrap();
        assert_eq!(files, vec!["toronto/network/main.tf", "toronto/dns/vars.tf"]);
        assert!(list.has_common_history("a", "b").unwrap());
    }

    #[test]
    fn test_changed_files_list_missing_file() {
        let err = ChangedFilesList::load(Path::new("/nonexistent/changes.txt")).unwrap_err();
        assert!(matches!(err, Error::ChangedFilesList { .. }));
    }

    #[cfg(unix)]
    mod git {
        use super::super::*;
        use std::fs;
        use tempfile::TempDir;

        fn run(dir: &Path, args: &[&str]) -> String {
            let output = Command::new("git")
                .arg("-C")
                .arg(dir)
                .args(["-c", "user.email=ci@example.com", "-c", "user.name=ci"])
                .args(args)
                .output()
                .unwrap();
            assert!(output.status.success(), "git {args:?} failed");
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }

        fn commit_file(dir: &Path, rel: &str, content: &str) -> String {
            let path = dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            run(dir, &["add", "."]);
            run(dir, &["commit", "-q", "-m", rel]);
            run(dir, &["rev-parse", "HEAD"])
        }

        fn repo() -> TempDir {
            let temp = TempDir::new().unwrap();
            run(temp.path(), &["init", "-q"]);
            temp
        }

        #[test]
        fn test_git_diff_between_commits() {
            let temp = repo();
            let base = commit_file(temp.path(), "toronto/network/main.tf", "a");
            commit_file(temp.path(), "toronto/dns/main.tf", "b");
            let head = commit_file(temp.path(), "toronto/network/vars.tf", "c");

            let git = GitCli::new(temp.path());
            assert!(git.has_common_history(&base, &head).unwrap());

            let mut files = git.changed_files(&base, &head).unwrap();
            files.sort();
            assert_eq!(files, vec!["toronto/dns/main.tf", "toronto/network/vars.tf"]);
        }

        #[test]
        fn test_git_invalid_reference() {
            let temp = repo();
            commit_file(temp.path(), "toronto/network/main.tf", "a");

            let git = GitCli::new(temp.path());
            let err = git.has_common_history("does-not-exist", "HEAD").unwrap_err();
            assert!(matches!(
                err,
                Error::Reference(ReferenceError::Invalid { ref reference }) if reference == "does-not-exist"
            ));
        }

        #[test]
        fn test_git_unrelated_histories() {
            let temp = repo();
            let first = commit_file(temp.path(), "a.tf", "a");
            run(temp.path(), &["checkout", "-q", "--orphan", "other"]);
            run(temp.path(), &["rm", "-rf", "-q", "."]);
            let second = commit_file(temp.path(), "b.tf", "b");

            let git = GitCli::new(temp.path());
            assert!(!git.has_common_history(&first, &second).unwrap());
        }

        #[test]
        fn test_discover_finds_toplevel() {
            let temp = repo();
            commit_file(temp.path(), "toronto/network/main.tf", "a");

            let git = GitCli::discover(&temp.path().join("toronto")).unwrap();
            assert_eq!(
                fs::canonicalize(git.repo_root()).unwrap(),
                fs::canonicalize(temp.path()).unwrap()
            );
        }
    }
}
