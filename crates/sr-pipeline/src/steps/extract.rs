//! Unpack zip archives found in a directory.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;

use crate::context::StepContext;
use crate::step::{Step, StepOutput};

/// Extract every archive in `dir` whose file name matches a glob pattern.
///
/// Archives are unpacked into `dir` itself. No matching archive is not an
/// error. Entries whose path would escape `dir` abort the extraction.
#[derive(Debug)]
pub struct ExtractStep {
    name: String,
    dir: PathBuf,
    pattern: String,
}

impl ExtractStep {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            pattern: pattern.into(),
        }
    }

    fn matcher(&self) -> sr_core::Result<Regex> {
        glob_to_regex(&self.pattern)
    }
}

/// Translate a file-name glob (`*`, `?`) into an anchored regex.
pub(crate) fn glob_to_regex(glob: &str) -> sr_core::Result<Regex> {
    let mut re = String::with_capacity(glob.len() + 8);
    re.push('^');
    for c in glob.chars() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
        .map_err(|e| sr_core::Error::Validation(format!("invalid archive pattern '{glob}': {e}")))
}

#[async_trait]
impl Step for ExtractStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "extract"
    }

    fn validate(&self) -> sr_core::Result<()> {
        if self.pattern.is_empty() {
            return Err(sr_core::Error::Validation("archive pattern is empty".into()));
        }
        self.matcher().map(|_| ())
    }

    async fn execute(&self, ctx: &StepContext) -> sr_core::Result<StepOutput> {
        let dir = ctx.resolve(&self.dir);
        let matcher = self.matcher()?;

        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "Archive directory does not exist; nothing to extract");
            return Ok(StepOutput::unchanged("no archives"));
        }

        let mut archives = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_file() && matcher.is_match(&name) {
                archives.push(entry.path());
            }
        }
        archives.sort();

        if archives.is_empty() {
            tracing::info!(dir = %dir.display(), pattern = %self.pattern, "No archives matched");
            return Ok(StepOutput::unchanged("no archives"));
        }

        let mut total = 0usize;
        for archive in &archives {
            let archive_path = archive.clone();
            let target = dir.clone();
            let count = tokio::task::spawn_blocking(move || unpack(&archive_path, &target))
                .await
                .map_err(|e| sr_core::Error::Internal(format!("extract task failed: {e}")))??;
            tracing::info!(archive = %archive.display(), entries = count, "Extracted archive");
            total += count;
        }

        Ok(StepOutput::changed(format!(
            "Extracted {} archive(s), {total} entries",
            archives.len()
        )))
    }
}

/// Unpack `archive` into `target`, returning the number of entries written.
fn unpack(archive: &Path, target: &Path) -> sr_core::Result<usize> {
    let invalid = |e: zip::result::ZipError| {
        sr_core::Error::Validation(format!("cannot read archive {}: {e}", archive.display()))
    };

    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(invalid)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(invalid)?;
        let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            return Err(sr_core::Error::Validation(format!(
                "archive {} contains unsafe entry '{}'",
                archive.display(),
                entry.name()
            )));
        };
        let out_path = target.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
    }

    Ok(zip.len())
}
