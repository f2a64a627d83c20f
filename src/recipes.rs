//! Built-in job recipes.
//!
//! A recipe turns command-line arguments plus configuration into a
//! [`RunRequest`]: the ordered steps of the remote job, its named inputs and
//! the local output path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sr_core::config::Config;
use sr_core::{AssetSource, AssetSpec, JobDescription, Replacement, ResourceClass, StepAction};

use crate::driver::{NamedInput, RunRequest};

/// Directory the renderer repository is cloned into.
const PORTRAIT_REPO_DIR: &str = "Real3DPortrait";

/// Source file whose model paths are redirected to the provisioned copy.
const HUBERT_EXTRACTOR: &str = "data_gen/utils/process_audio/extract_hubert.py";

/// Model entry in `assets.models` the extractor loads.
const HUBERT_MODEL: &str = "hubert";

/// Arguments of the `portrait` command.
#[derive(Debug, Clone)]
pub struct PortraitArgs {
    pub src_img: PathBuf,
    pub drv_aud: PathBuf,
    pub drv_pose: PathBuf,
    pub bg_img: PathBuf,
    pub out_name: String,
    pub gpu: ResourceClass,
}

/// Arguments of the `subtitle` command.
#[derive(Debug, Clone)]
pub struct SubtitleArgs {
    pub input_video: PathBuf,
    pub output_video: PathBuf,
    pub gpu: ResourceClass,
    pub model: String,
}

/// Talking-portrait rendering: checkout, patch, install, fetch the models
/// and checkpoints, unpack, infer. The video comes back inline and lands in
/// `output/<out_name>`.
///
/// # Errors
///
/// Returns [`sr_core::Error::Configuration`] when the face-model or
/// checkpoint sources are not configured, or the `hubert` model entry is
/// missing or not a registry snapshot.
pub fn portrait(config: &Config, args: &PortraitArgs) -> sr_core::Result<RunRequest> {
    let recipe = &config.recipes.portrait;
    let out_name = plain_file_name(&args.out_name)?;

    let bfm_source = recipe.bfm_source.as_deref().ok_or_else(|| {
        sr_core::Error::Configuration("recipes.portrait.bfm_source is not set".into())
    })?;
    let checkpoints_source = recipe.checkpoints_source.as_deref().ok_or_else(|| {
        sr_core::Error::Configuration("recipes.portrait.checkpoints_source is not set".into())
    })?;

    let hubert_entry = config
        .assets
        .models
        .iter()
        .find(|m| m.name == HUBERT_MODEL)
        .ok_or_else(|| {
            sr_core::Error::Configuration(format!("assets.models has no '{HUBERT_MODEL}' entry"))
        })?;
    let hubert = hubert_entry.to_spec(&config.assets.cache_dir);
    let hubert_repo = match hubert.locator()? {
        AssetSource::Hub { repo, .. } => repo,
        AssetSource::Url(_) => {
            return Err(sr_core::Error::Configuration(format!(
                "assets.models '{HUBERT_MODEL}' must be a hub:// source"
            )))
        }
    };
    let local_model = hubert.destination.display().to_string();

    let repo = Path::new(PORTRAIT_REPO_DIR);
    let bfm_dir = repo.join("deep_3drecon/BFM");
    let ckpt_dir = repo.join("checkpoints");
    let artifact = repo.join(out_name);

    let replacements = ["HubertModel", "Wav2Vec2Processor"]
        .iter()
        .map(|class| {
            Replacement::new(
                format!("{class}.from_pretrained(\"{hubert_repo}\")"),
                format!("{class}.from_pretrained(\"{local_model}\")"),
            )
        })
        .collect();

    let inference_args = [
        "inference/real3d_infer.py",
        "--src_img",
        "{input:src_img}",
        "--drv_aud",
        "{input:drv_aud}",
        "--drv_pose",
        "{input:drv_pose}",
        "--bg_img",
        "{input:bg_img}",
        "--out_name",
        "{artifact}",
        "--out_mode",
        "concat_debug",
        "--low_memory_usage",
    ];

    let timeout = recipe.timeout_secs.unwrap_or(config.remote.timeout_secs);
    let job = JobDescription::new(&artifact)
        .step(
            "checkout",
            StepAction::Checkout {
                repository: recipe.repository.clone(),
                dest: repo.to_path_buf(),
                branch: recipe.branch.clone(),
            },
        )
        .step(
            "patch-hubert",
            StepAction::Patch {
                file: repo.join(HUBERT_EXTRACTOR),
                replacements,
            },
        )
        .step(
            "install-requirements",
            StepAction::Install {
                manifest: repo.join("requirements.txt"),
                command: config.tools.pip.clone(),
                args: vec![
                    "install".into(),
                    "-r".into(),
                    repo.join("requirements.txt").display().to_string(),
                ],
            },
        )
        .step("fetch-hubert", StepAction::FetchAsset { asset: hubert })
        .step(
            "fetch-bfm",
            StepAction::FetchAsset {
                asset: bundle_spec("bfm", bfm_source, &bfm_dir)?,
            },
        )
        .step(
            "fetch-checkpoints",
            StepAction::FetchAsset {
                asset: bundle_spec("checkpoints", checkpoints_source, &ckpt_dir)?,
            },
        )
        .step(
            "extract-checkpoints",
            StepAction::Extract {
                dir: ckpt_dir.clone(),
                pattern: "*.zip".into(),
            },
        )
        .step(
            "inference",
            StepAction::Compute {
                command: config.tools.python.clone(),
                args: inference_args.iter().map(|a| a.to_string()).collect(),
                dir: Some(repo.to_path_buf()),
            },
        )
        .with_timeout(Duration::from_secs(timeout))
        .with_image(config.remote.image.clone())
        .with_secrets(config.remote.secrets.clone());

    Ok(RunRequest {
        job,
        inputs: vec![
            NamedInput::new("src_img", &args.src_img),
            NamedInput::new("drv_aud", &args.drv_aud),
            NamedInput::new("drv_pose", &args.drv_pose),
            NamedInput::new("bg_img", &args.bg_img),
        ],
        resource_class: args.gpu.clone(),
        output: Path::new("output").join(out_name),
    })
}

/// Word-level subtitling of an uploaded video. The result is written into
/// the shared store by the job and downloaded to `output_video`.
pub fn subtitle(config: &Config, args: &SubtitleArgs) -> sr_core::Result<RunRequest> {
    let recipe = &config.recipes.subtitle;
    let file_name = args
        .output_video
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            sr_core::Error::Validation(format!(
                "output video {} has no file name",
                args.output_video.display()
            ))
        })?;
    if args.model.trim().is_empty() {
        return Err(sr_core::Error::Validation("model name cannot be empty".into()));
    }

    let artifact = Path::new("output").join(&file_name);
    let timeout = recipe.timeout_secs.unwrap_or(config.remote.timeout_secs);

    let mut job = JobDescription::new(&artifact)
        .step(
            "subtitle",
            StepAction::Compute {
                command: config.tools.python.clone(),
                args: vec![
                    recipe.script.clone(),
                    "--input".into(),
                    "{input:video}".into(),
                    "--output".into(),
                    "{artifact}".into(),
                    "--model".into(),
                    args.model.clone(),
                ],
                dir: None,
            },
        )
        .with_timeout(Duration::from_secs(timeout))
        .with_image(config.remote.image.clone())
        .with_secrets(config.remote.secrets.clone());
    let published = format!("outputs/{}/{file_name}", job.id);
    job = job.publish_to(published);

    Ok(RunRequest {
        job,
        inputs: vec![NamedInput::new("video", &args.input_video)],
        resource_class: args.gpu.clone(),
        output: args.output_video.clone(),
    })
}

/// Snapshot sources fill `dir`; single-file sources land inside it under
/// their URL's file name.
fn bundle_spec(name: &str, source: &str, dir: &Path) -> sr_core::Result<AssetSpec> {
    let destination = match source.parse::<AssetSource>()? {
        AssetSource::Hub { .. } => dir.to_path_buf(),
        AssetSource::Url(url) => {
            let path = url.split(['?', '#']).next().unwrap_or_default();
            let file_name = path.rsplit('/').next().unwrap_or_default();
            if file_name.is_empty() {
                return Err(sr_core::Error::Configuration(format!(
                    "cannot derive a file name from '{source}'"
                )));
            }
            dir.join(file_name)
        }
    };
    Ok(AssetSpec::new(name, source, destination))
}

/// Reject names that would escape the output directory.
fn plain_file_name(name: &str) -> sr_core::Result<&str> {
    let path = Path::new(name);
    match path.file_name() {
        Some(file) if file == path.as_os_str() => Ok(name),
        _ => Err(sr_core::Error::Validation(format!(
            "output name '{name}' must be a plain file name"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portrait_config() -> Config {
        let mut config = Config::default();
        config.assets.cache_dir = PathBuf::from("/models");
        config.recipes.portrait.bfm_source = Some("hub://stagerun/bfm".into());
        config.recipes.portrait.checkpoints_source =
            Some("https://assets.example.com/real3d/checkpoints.zip?dl=1".into());
        config
    }

    fn portrait_args() -> PortraitArgs {
        PortraitArgs {
            src_img: "data/raw/face.png".into(),
            drv_aud: "data/processed/audio.wav".into(),
            drv_pose: "data/processed/video.mp4".into(),
            bg_img: "data/raw/bg.png".into(),
            out_name: "output.mp4".into(),
            gpu: "H100".parse().unwrap(),
        }
    }

    #[test]
    fn portrait_steps_in_order() {
        let request = portrait(&portrait_config(), &portrait_args()).unwrap();
        let names: Vec<_> = request.job.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "checkout",
                "patch-hubert",
                "install-requirements",
                "fetch-hubert",
                "fetch-bfm",
                "fetch-checkpoints",
                "extract-checkpoints",
                "inference",
            ]
        );
        assert_eq!(request.job.artifact, PathBuf::from("Real3DPortrait/output.mp4"));
        assert_eq!(request.output, PathBuf::from("output/output.mp4"));
        assert_eq!(request.resource_class.as_str(), "H100");
        assert_eq!(request.inputs.len(), 4);
        assert_eq!(request.job.timeout_secs, 15 * 60);
    }

    #[test]
    fn portrait_patch_points_extractor_at_provisioned_model() {
        let request = portrait(&portrait_config(), &portrait_args()).unwrap();
        let StepAction::Patch { replacements, .. } = &request.job.steps[1].action else {
            panic!("second step is not a patch");
        };
        assert_eq!(
            replacements[0],
            Replacement::new(
                "HubertModel.from_pretrained(\"facebook/hubert-large-ls960-ft\")",
                "HubertModel.from_pretrained(\"/models/facebook/hubert-large-ls960-ft\")",
            )
        );
        assert!(replacements[1].find.starts_with("Wav2Vec2Processor"));
    }

    #[test]
    fn portrait_asset_destinations() {
        let request = portrait(&portrait_config(), &portrait_args()).unwrap();
        let destination = |i: usize| match &request.job.steps[i].action {
            StepAction::FetchAsset { asset } => asset.destination.clone(),
            other => panic!("unexpected action {other:?}"),
        };
        assert_eq!(destination(4), PathBuf::from("Real3DPortrait/deep_3drecon/BFM"));
        assert_eq!(
            destination(5),
            PathBuf::from("Real3DPortrait/checkpoints/checkpoints.zip")
        );
    }

    #[test]
    fn portrait_requires_bundle_sources() {
        let err = portrait(&Config::default(), &portrait_args()).unwrap_err();
        assert!(err.to_string().contains("bfm_source"));
    }

    #[test]
    fn portrait_rejects_nested_out_name() {
        let mut args = portrait_args();
        args.out_name = "../escape.mp4".into();
        assert!(portrait(&portrait_config(), &args).is_err());
    }

    #[test]
    fn recipe_timeout_overrides_remote_default() {
        let mut config = portrait_config();
        config.recipes.portrait.timeout_secs = Some(60);
        let request = portrait(&config, &portrait_args()).unwrap();
        assert_eq!(request.job.timeout_secs, 60);
    }

    #[test]
    fn subtitle_publishes_into_the_store() {
        let config = Config::default();
        let args = SubtitleArgs {
            input_video: "clip.mp4".into(),
            output_video: "out/with_subs.mp4".into(),
            gpu: "t4".parse().unwrap(),
            model: "base".into(),
        };
        let request = subtitle(&config, &args).unwrap();

        assert_eq!(request.job.artifact, PathBuf::from("output/with_subs.mp4"));
        assert_eq!(
            request.job.publish_to.as_deref(),
            Some(format!("outputs/{}/with_subs.mp4", request.job.id).as_str())
        );
        assert_eq!(request.output, PathBuf::from("out/with_subs.mp4"));
        assert_eq!(request.resource_class.as_str(), "T4");
        assert_eq!(request.job.timeout_secs, 1800);
        assert_eq!(request.inputs, vec![NamedInput::new("video", "clip.mp4")]);
    }

    #[test]
    fn bundle_spec_rejects_bare_host() {
        assert!(bundle_spec("x", "https://example.com/bundles/", Path::new("d")).is_err());
        assert!(bundle_spec("x", "ftp://example.com/a.zip", Path::new("d")).is_err());
    }
}
