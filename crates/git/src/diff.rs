//! Turning `git diff`/`git log -p` output for one file into something a UI
//! can render: text hunks, an image pair, a submodule summary, or a plain
//! "binary file" marker.
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use regex::Regex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::{
    diff::{DiffHunk, RawDiff, parse_raw_diff},
    text::content_lines,
};

use crate::{
    GitService, GitServiceError,
    cli::RunOptions,
    status::{AppFileStatus, CommittedFileChange, FileChange, SubmoduleStatus, WorkingDirectoryFileChange},
};

const IMAGE_FILE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "gif", "ico", "webp", "bmp", "avif"];

static OLD_SUBMODULE_SHA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-Subproject commit ([^-]+)(-dirty)?$").expect("old submodule sha regex")
});

static NEW_SUBMODULE_SHA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+Subproject commit ([^-]+)(-dirty)?$").expect("new submodule sha regex")
});

/// Image contents ready for a `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Image {
    /// Base64 encoded bytes.
    pub contents: String,
    pub media_type: String,
    pub bytes: usize,
}

impl Image {
    pub fn new(raw: &[u8], media_type: &str) -> Self {
        Self {
            contents: BASE64.encode(raw),
            media_type: media_type.to_string(),
            bytes: raw.len(),
        }
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.contents)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct TextDiff {
    pub text: String,
    pub hunks: Vec<DiffHunk>,
    pub max_line_number: u32,
    pub has_hidden_bidi_chars: bool,
}

impl From<RawDiff> for TextDiff {
    fn from(diff: RawDiff) -> Self {
        Self {
            text: diff.contents,
            hunks: diff.hunks,
            max_line_number: diff.max_line_number,
            has_hidden_bidi_chars: diff.has_hidden_bidi_chars,
        }
    }
}

impl From<TextDiff> for RawDiff {
    fn from(diff: TextDiff) -> Self {
        RawDiff {
            header: String::new(),
            contents: diff.text,
            hunks: diff.hunks,
            is_binary: false,
            max_line_number: diff.max_line_number,
            has_hidden_bidi_chars: diff.has_hidden_bidi_chars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct SubmoduleDiff {
    pub full_path: PathBuf,
    pub path: String,
    pub url: Option<String>,
    pub status: SubmoduleStatus,
    pub old_sha: Option<String>,
    pub new_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diff {
    Text(TextDiff),
    Image {
        previous: Option<Image>,
        current: Option<Image>,
    },
    Submodule(SubmoduleDiff),
    Binary,
}

/// Lines of the old and new version of a file, used to expand hunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct FileContents {
    pub old_contents: Vec<String>,
    pub new_contents: Vec<String>,
}

pub fn media_type(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        _ => "text/plain",
    }
}

fn lowercase_extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn is_image_path(path: &str) -> bool {
    lowercase_extension(path).is_some_and(|ext| IMAGE_FILE_EXTENSIONS.contains(&ext.as_str()))
}

/// Parse `--patch-with-raw -z` output. The patch follows the last NUL.
pub fn diff_from_raw_diff_output(output: &str) -> Result<RawDiff, GitServiceError> {
    let patch = output.rsplit('\0').next().unwrap_or_default();
    Ok(parse_raw_diff(patch)?)
}

/// Old and new submodule commits from a `Subproject commit` diff.
pub fn submodule_shas(diff: &str) -> (Option<String>, Option<String>) {
    let first_match = |re: &Regex| {
        diff.lines()
            .find_map(|line| re.captures(line).map(|caps| caps[1].to_string()))
    };
    (
        first_match(&OLD_SUBMODULE_SHA_RE),
        first_match(&NEW_SUBMODULE_SHA_RE),
    )
}

fn working_directory_diff_args<'a>(
    file: &'a WorkingDirectoryFileChange,
    hide_whitespace: bool,
) -> (Vec<&'a str>, RunOptions) {
    let mut args = vec!["diff"];
    if hide_whitespace {
        args.push("-w");
    }
    args.extend(["--no-ext-diff", "--patch-with-raw", "-z", "--no-color"]);

    let mut options = RunOptions::default();
    let is_submodule = file.status.submodule_status().is_some();

    if !is_submodule && file.status.is_new() {
        // `--no-index` exits like diff(1): 1 means differences were found.
        options = options.allow_exit_code(1);
        args.extend(["--no-index", "--", "/dev/null", file.path.as_str()]);
    } else if matches!(file.status, AppFileStatus::Renamed { .. }) {
        args.extend(["--", file.path.as_str()]);
    } else {
        args.extend(["HEAD", "--", file.path.as_str()]);
    }
    (args, options)
}

impl GitService {
    /// Diff of a working directory file against `HEAD`, or against nothing
    /// when the file is new.
    pub async fn get_working_directory_diff(
        &self,
        repo: &Path,
        file: &WorkingDirectoryFileChange,
        hide_whitespace: bool,
    ) -> Result<Diff, GitServiceError> {
        let (args, options) = working_directory_diff_args(file, hide_whitespace);
        let result = self.git(repo, &args, options).await?;
        self.build_diff(repo, &FileChange::Working(file.clone()), &result.stdout, "HEAD")
            .await
    }

    /// Diff of a file in `commitish` against its first parent.
    pub async fn get_commit_diff(
        &self,
        repo: &Path,
        file: &CommittedFileChange,
        commitish: &str,
        hide_whitespace: bool,
    ) -> Result<Diff, GitServiceError> {
        let mut args = vec!["log", commitish];
        if hide_whitespace {
            args.push("-w");
        }
        args.extend([
            "-m",
            "-1",
            "--first-parent",
            "--patch-with-raw",
            "-z",
            "--no-color",
            "--",
            file.path.as_str(),
        ]);
        if let Some(old_path) = file.status.old_path() {
            args.push(old_path);
        }

        let result = self.git(repo, &args, RunOptions::default()).await?;
        self.build_diff(
            repo,
            &FileChange::Committed(file.clone()),
            &result.stdout,
            commitish,
        )
        .await
    }

    async fn build_diff(
        &self,
        repo: &Path,
        file: &FileChange,
        output: &str,
        oldest_commitish: &str,
    ) -> Result<Diff, GitServiceError> {
        if let Some(status) = file.status().submodule_status() {
            return self.build_submodule_diff(repo, file, output, status).await;
        }

        let raw = diff_from_raw_diff_output(output)?;
        if !raw.is_binary {
            return Ok(Diff::Text(raw.into()));
        }
        if !is_image_path(file.path()) {
            return Ok(Diff::Binary);
        }
        self.get_image_diff(repo, file, oldest_commitish).await
    }

    async fn build_submodule_diff(
        &self,
        repo: &Path,
        file: &FileChange,
        output: &str,
        status: SubmoduleStatus,
    ) -> Result<Diff, GitServiceError> {
        let path = file.path();
        let url = self
            .get_config_value(repo, &format!("submodule.{path}.url"))
            .await?;

        let (old_sha, new_sha) = if status.commit_changed
            || matches!(
                file.status(),
                AppFileStatus::New { .. } | AppFileStatus::Deleted { .. }
            ) {
            submodule_shas(output)
        } else {
            (None, None)
        };

        Ok(Diff::Submodule(SubmoduleDiff {
            full_path: repo.join(path),
            path: path.to_string(),
            url,
            status,
            old_sha,
            new_sha,
        }))
    }

    /// Raw blob contents at `commitish:path`.
    pub async fn get_blob_contents(
        &self,
        repo: &Path,
        commitish: &str,
        path: &str,
    ) -> Result<Vec<u8>, GitServiceError> {
        let spec = format!("{commitish}:{path}");
        let result = self
            .git(
                repo,
                &["show", &spec],
                RunOptions::default().with_binary_stdout(),
            )
            .await?;
        Ok(result.raw_stdout.unwrap_or_else(|| result.stdout.into_bytes()))
    }

    async fn get_blob_image(
        &self,
        repo: &Path,
        path: &str,
        commitish: &str,
    ) -> Result<Image, GitServiceError> {
        let contents = self.get_blob_contents(repo, commitish, path).await?;
        let extension = lowercase_extension(path).unwrap_or_default();
        Ok(Image::new(&contents, media_type(&extension)))
    }

    async fn get_working_directory_image(
        &self,
        repo: &Path,
        path: &str,
    ) -> Result<Image, GitServiceError> {
        let contents = tokio::fs::read(repo.join(path)).await?;
        let extension = lowercase_extension(path).unwrap_or_default();
        Ok(Image::new(&contents, media_type(&extension)))
    }

    async fn get_image_diff(
        &self,
        repo: &Path,
        file: &FileChange,
        oldest_commitish: &str,
    ) -> Result<Diff, GitServiceError> {
        let status = file.status();
        let old_path = file.old_path_or_default();

        let (previous, current) = match file {
            // Conflicted binaries have no single version worth showing.
            FileChange::Working(_) if status.is_conflicted() => (None, None),
            FileChange::Working(_) => {
                let current = async {
                    if status.is_deleted() {
                        return Ok(None);
                    }
                    self.get_working_directory_image(repo, file.path())
                        .await
                        .map(Some)
                };
                let previous = async {
                    if status.is_new() {
                        return Ok(None);
                    }
                    self.get_blob_image(repo, old_path, "HEAD").await.map(Some)
                };
                let (previous, current) = futures::future::try_join(previous, current).await?;
                (previous, current)
            }
            FileChange::Committed(change) => {
                let parent = format!("{oldest_commitish}^");
                let current = async {
                    if status.is_deleted() {
                        return Ok(None);
                    }
                    self.get_blob_image(repo, file.path(), oldest_commitish)
                        .await
                        .map(Some)
                };
                let previous = async {
                    if status.is_deleted() {
                        self.get_blob_image(repo, old_path, &change.parent_commitish)
                            .await
                            .map(Some)
                    } else if status.is_new() {
                        Ok(None)
                    } else {
                        self.get_blob_image(repo, old_path, &parent).await.map(Some)
                    }
                };
                let (previous, current) = futures::future::try_join(previous, current).await?;
                (previous, current)
            }
        };

        Ok(Diff::Image { previous, current })
    }

    /// Old (`HEAD` or the parent commit) and new contents of a changed text
    /// file, fetched concurrently. Missing versions read as empty.
    pub async fn get_file_contents(
        &self,
        repo: &Path,
        file: &FileChange,
    ) -> Result<FileContents, GitServiceError> {
        let status = file.status();
        let old = async {
            if status.is_new() {
                return Ok(Vec::new());
            }
            let commitish = match file {
                FileChange::Working(_) => "HEAD",
                FileChange::Committed(change) => change.parent_commitish.as_str(),
            };
            self.get_blob_contents(repo, commitish, file.old_path_or_default())
                .await
        };
        let new = async {
            if status.is_deleted() {
                return Ok(Vec::new());
            }
            match file {
                FileChange::Working(change) => tokio::fs::read(repo.join(&change.path))
                    .await
                    .map_err(GitServiceError::from),
                FileChange::Committed(change) => {
                    self.get_blob_contents(repo, &change.commit_sha, &change.path)
                        .await
                }
            }
        };
        let (old, new) = futures::future::try_join(old, new).await?;

        let lines = |bytes: Vec<u8>| -> Vec<String> {
            content_lines(&String::from_utf8_lossy(&bytes))
                .into_iter()
                .map(str::to_string)
                .collect()
        };
        Ok(FileContents {
            old_contents: lines(old),
            new_contents: lines(new),
        })
    }
}

#[cfg(test)]
mod tests {
    use utils::diff::DiffSelection;

    use super::*;

    #[test]
    fn raw_output_uses_last_nul_piece() {
        let output = ":100644 100644 aaa bbb M\0file.txt\0diff --git a/file.txt b/file.txt\nindex aaa..bbb 100644\n--- a/file.txt\n+++ b/file.txt\n@@ -1 +1 @@\n-old\n+new\n";
        let diff = diff_from_raw_diff_output(output).unwrap();
        assert_eq!(diff.hunks.len(), 1);
        assert!(!diff.is_binary);
    }

    #[test]
    fn image_detection_ignores_case() {
        assert!(is_image_path("assets/Logo.PNG"));
        assert!(is_image_path("photo.jpeg"));
        assert!(!is_image_path("archive.zip"));
        assert!(!is_image_path("Makefile"));
        assert_eq!(media_type("jpeg"), "image/jpg");
        assert_eq!(media_type("tiff"), "text/plain");
    }

    #[test]
    fn image_data_uri() {
        let image = Image::new(&[0x89, b'P', b'N', b'G'], "image/png");
        assert_eq!(image.bytes, 4);
        assert_eq!(image.data_uri(), "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn submodule_shas_from_diff() {
        let diff = "diff --git a/sub b/sub\n--- a/sub\n+++ b/sub\n@@ -1 +1 @@\n-Subproject commit 1111111\n+Subproject commit 2222222-dirty\n";
        assert_eq!(
            submodule_shas(diff),
            (Some("1111111".to_string()), Some("2222222".to_string()))
        );
    }

    #[test]
    fn new_files_diff_against_dev_null() {
        let file = WorkingDirectoryFileChange::new(
            "new.txt",
            AppFileStatus::Untracked {
                submodule_status: None,
            },
            DiffSelection::all(),
        );
        let (args, options) = working_directory_diff_args(&file, true);
        assert_eq!(
            args,
            vec![
                "diff",
                "-w",
                "--no-ext-diff",
                "--patch-with-raw",
                "-z",
                "--no-color",
                "--no-index",
                "--",
                "/dev/null",
                "new.txt"
            ]
        );
        assert!(options.success_exit_codes.contains(&1));
    }

    #[test]
    fn renamed_and_modified_files_diff_arguments() {
        let renamed = WorkingDirectoryFileChange::new(
            "b.txt",
            AppFileStatus::Renamed {
                old_path: "a.txt".into(),
                submodule_status: None,
            },
            DiffSelection::all(),
        );
        let (args, _) = working_directory_diff_args(&renamed, false);
        assert_eq!(&args[args.len() - 2..], &["--", "b.txt"]);

        let modified = WorkingDirectoryFileChange::new(
            "c.txt",
            AppFileStatus::Modified {
                submodule_status: None,
            },
            DiffSelection::all(),
        );
        let (args, options) = working_directory_diff_args(&modified, false);
        assert_eq!(&args[args.len() - 3..], &["HEAD", "--", "c.txt"]);
        assert!(!options.success_exit_codes.contains(&1));
    }
}
