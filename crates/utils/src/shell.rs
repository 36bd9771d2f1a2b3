//! Locating the `git` executable.
//!
//! GUI launches often inherit a minimal PATH, so a miss on the process PATH
//! is retried after merging in the PATH a login shell would see.

use std::{
    collections::HashSet,
    env::{join_paths, split_paths},
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

pub const DEFAULT_GIT_EXECUTABLE: &str = "git";

/// Resolve the git binary, preferring an explicitly configured one.
pub async fn resolve_git_executable(configured: Option<&str>) -> Option<PathBuf> {
    match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(executable) => resolve_executable_path(executable).await,
        None => resolve_executable_path(DEFAULT_GIT_EXECUTABLE).await,
    }
}

/// Resolve an executable by name, falling back to a refreshed PATH if needed.
///
/// The search order is:
/// 1. Absolute paths that point at a file.
/// 2. The current process PATH via `which`.
/// 3. The login-shell PATH merged into the process PATH, then `which` again.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    if let Some(found) = which(executable).await {
        return Some(found);
    }

    if refresh_path().await
        && let Some(found) = which(executable).await
    {
        return Some(found);
    }

    tracing::debug!(executable, "Executable not found on PATH");
    None
}

/// Merge two PATH strings into a single, de-duplicated PATH.
///
/// Order of `primary` is kept and unseen entries of `secondary` are
/// appended. Empty components are dropped.
pub fn merge_paths(primary: impl AsRef<OsStr>, secondary: impl AsRef<OsStr>) -> OsString {
    let mut seen = HashSet::<PathBuf>::new();
    let mut merged = Vec::<PathBuf>::new();

    for p in split_paths(primary.as_ref()).chain(split_paths(secondary.as_ref())) {
        if !p.as_os_str().is_empty() && seen.insert(p.clone()) {
            merged.push(p);
        }
    }

    join_paths(merged).unwrap_or_default()
}

async fn refresh_path() -> bool {
    let Some(refreshed) = login_shell_path().await else {
        return false;
    };
    let existing = std::env::var_os("PATH").unwrap_or_default();
    let merged = merge_paths(&existing, OsString::from(&refreshed));
    if merged == existing {
        return false;
    }
    tracing::debug!(?existing, ?merged, "Refreshed PATH from login shell");
    // SAFETY: only touched from the executable lookup, before any git child
    // process is spawned with the inherited environment.
    unsafe {
        std::env::set_var("PATH", &merged);
    }
    true
}

async fn which(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(|result| result.ok())
}

#[derive(Debug, Clone, PartialEq)]
enum LoginShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Other(PathBuf),
}

impl LoginShell {
    fn from_path(path: &Path) -> Option<Self> {
        if !(path.is_absolute() && path.is_file()) {
            return None;
        }
        let path_buf = path.to_path_buf();
        Some(match path.file_name().and_then(OsStr::to_str) {
            Some("zsh") => LoginShell::Zsh(path_buf),
            Some("bash") => LoginShell::Bash(path_buf),
            _ => LoginShell::Other(path_buf),
        })
    }

    fn current() -> Option<Self> {
        std::env::var("SHELL")
            .ok()
            .and_then(|shell| Self::from_path(Path::new(&shell)))
            .or_else(|| Self::from_path(Path::new("/bin/sh")))
    }

    fn path(&self) -> &Path {
        match self {
            LoginShell::Zsh(p) | LoginShell::Bash(p) | LoginShell::Other(p) => p,
        }
    }

    fn supports_login_flag(&self) -> bool {
        matches!(self, LoginShell::Zsh(_) | LoginShell::Bash(_))
    }

    fn rc_file(&self) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let rc = match self {
            LoginShell::Zsh(_) => home.join(".zshrc"),
            LoginShell::Bash(_) => home.join(".bashrc"),
            LoginShell::Other(_) => return None,
        };
        rc.is_file().then_some(rc)
    }

    fn print_path_script(&self) -> String {
        let print = "printf '%s' \"$PATH\"";
        match self
            .rc_file()
            .and_then(|rc| shlex::try_quote(rc.to_string_lossy().as_ref()).ok().map(|q| q.into_owned()))
        {
            Some(rc) => format!("source {rc}; {print}"),
            None => print.to_string(),
        }
    }
}

#[cfg(not(windows))]
async fn login_shell_path() -> Option<String> {
    use std::{process::Stdio, time::Duration};

    use tokio::process::Command;

    const PATH_REFRESH_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

    let shell = LoginShell::current()?;
    let mut cmd = Command::new(shell.path());
    if shell.supports_login_flag() {
        cmd.arg("-l");
    }
    cmd.arg("-c")
        .arg(shell.print_path_script())
        .env("TERM", "dumb")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().ok()?;
    let output = match tokio::time::timeout(PATH_REFRESH_COMMAND_TIMEOUT, child.wait_with_output())
        .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            tracing::debug!(shell = %shell.path().display(), ?err, "Failed to read PATH from login shell");
            return None;
        }
        Err(_) => {
            tracing::warn!(
                shell = %shell.path().display(),
                timeout_secs = PATH_REFRESH_COMMAND_TIMEOUT.as_secs(),
                "Timed out reading PATH from login shell"
            );
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8(output.stdout).ok()?.trim().to_string();
    if path.is_empty() { None } else { Some(path) }
}

#[cfg(windows)]
async fn login_shell_path() -> Option<String> {
    None
}
