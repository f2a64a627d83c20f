//! Literal find/replace edits on a file inside the working directory.

use std::path::PathBuf;

use async_trait::async_trait;
use sr_core::Replacement;

use crate::context::StepContext;
use crate::step::{Step, StepOutput};

/// Apply literal replacements to one file.
///
/// Re-running the step on an already patched file changes nothing: every
/// `find` must be non-empty and must not occur inside its own `replace`.
#[derive(Debug)]
pub struct PatchStep {
    name: String,
    file: PathBuf,
    replacements: Vec<Replacement>,
}

impl PatchStep {
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>, replacements: Vec<Replacement>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            replacements,
        }
    }
}

#[async_trait]
impl Step for PatchStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "patch"
    }

    fn validate(&self) -> sr_core::Result<()> {
        if self.replacements.is_empty() {
            return Err(sr_core::Error::Validation(format!(
                "patch of {} has no replacements",
                self.file.display()
            )));
        }
        for r in &self.replacements {
            if r.find.is_empty() {
                return Err(sr_core::Error::Validation("patch find text is empty".into()));
            }
            if r.replace.contains(&r.find) {
                return Err(sr_core::Error::Validation(format!(
                    "replacement for '{}' contains the text it replaces",
                    r.find
                )));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: &StepContext) -> sr_core::Result<StepOutput> {
        let path = ctx.resolve(&self.file);
        if !path.is_file() {
            return Err(sr_core::Error::Validation(format!(
                "file to patch not found: {}",
                path.display()
            )));
        }

        let original = tokio::fs::read_to_string(&path).await?;
        let mut patched = original.clone();
        let mut applied = 0usize;
        for r in &self.replacements {
            let count = patched.matches(r.find.as_str()).count();
            if count > 0 {
                patched = patched.replace(&r.find, &r.replace);
                applied += count;
            }
        }

        if applied == 0 {
            tracing::info!(file = %path.display(), "Nothing to patch");
            return Ok(StepOutput::unchanged(format!("{} already patched", path.display())));
        }

        tokio::fs::write(&path, patched).await?;
        tracing::info!(file = %path.display(), occurrences = applied, "Patched file");
        Ok(StepOutput::changed(format!(
            "Replaced {applied} occurrence(s) in {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIND: &str = r#"HubertModel.from_pretrained("facebook/hubert-large-ls960-ft")"#;
    const REPLACE: &str = r#"HubertModel.from_pretrained("/models/facebook/hubert-large-ls960-ft")"#;

    fn step() -> PatchStep {
        PatchStep::new(
            "patch-hubert",
            "extract_hubert.py",
            vec![Replacement::new(FIND, REPLACE)],
        )
    }

    #[tokio::test]
    async fn patch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("extract_hubert.py");
        std::fs::write(&file, format!("import x\nmodel = {FIND}\n")).unwrap();
        let ctx = StepContext::new(dir.path(), "out");
        let step = step();
        step.validate().unwrap();

        let first = step.execute(&ctx).await.unwrap();
        let after_first = std::fs::read_to_string(&file).unwrap();
        let second = step.execute(&ctx).await.unwrap();
        let after_second = std::fs::read_to_string(&file).unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(after_first, after_second);
        assert_eq!(after_first, format!("import x\nmodel = {REPLACE}\n"));
    }

    #[tokio::test]
    async fn absent_pattern_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("extract_hubert.py");
        std::fs::write(&file, "print('hello')\n").unwrap();

        let out = step().execute(&StepContext::new(dir.path(), "out")).await.unwrap();
        assert!(!out.changed);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "print('hello')\n");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = step().execute(&StepContext::new(dir.path(), "out")).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn self_containing_replacement_is_rejected() {
        let step = PatchStep::new("p", "f", vec![Replacement::new("torch", "torch_compat # torch")]);
        assert!(step.validate().is_err());

        let empty = PatchStep::new("p", "f", vec![Replacement::new("", "x")]);
        assert!(empty.validate().is_err());
    }
}
