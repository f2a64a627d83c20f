//! Job model: assets, steps, job descriptions, results and transfer records.
//!
//! Everything here is plain data. A [`JobDescription`] is serialized to JSON
//! when it crosses into the remote execution context, and the matching
//! [`JobResult`] is serialized on the way back.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::JobId;

/// Default remote job timeout: 15 minutes.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(15 * 60);

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// A named external asset required before computation can proceed.
///
/// Identity is `(name, source)`. The auth token never leaves the process: it
/// is skipped during serialization and re-supplied on the remote side from
/// its own environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub name: String,
    /// `hub://<repo>[@rev]` for registry snapshots, `http(s)://` for files.
    pub source: String,
    pub destination: PathBuf,
    #[serde(skip)]
    pub auth_token: Option<String>,
    /// Expected sha256 (hex) of a single-file asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl AssetSpec {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            destination: destination.into(),
            auth_token: None,
            sha256: None,
        }
    }

    /// Builder: attach a bearer token for the registry.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// Builder: require a checksum match.
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn identity(&self) -> (&str, &str) {
        (&self.name, &self.source)
    }

    /// Parse the source locator.
    pub fn locator(&self) -> Result<AssetSource> {
        self.source.parse()
    }
}

/// Where an asset comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// Snapshot of a model-registry repository.
    Hub { repo: String, revision: String },
    /// A single file reachable over HTTP(S).
    Url(String),
}

impl FromStr for AssetSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("hub://") {
            let (repo, revision) = match rest.split_once('@') {
                Some((repo, rev)) => (repo, rev),
                None => (rest, "main"),
            };
            if repo.is_empty() || !repo.contains('/') || revision.is_empty() {
                return Err(Error::Validation(format!(
                    "invalid registry locator '{s}': expected hub://<owner>/<repo>[@revision]"
                )));
            }
            return Ok(AssetSource::Hub {
                repo: repo.to_string(),
                revision: revision.to_string(),
            });
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(AssetSource::Url(s.to_string()));
        }
        Err(Error::Validation(format!(
            "unsupported asset source '{s}' (expected hub:// or http(s)://)"
        )))
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One literal text substitution applied by a patch step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub find: String,
    pub replace: String,
}

impl Replacement {
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
        }
    }
}

/// What a step does, together with its parameters.
///
/// Relative paths are resolved against the job's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Clone a git repository into `dest`.
    Checkout {
        repository: String,
        dest: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },
    /// Rewrite literal text inside `file`.
    Patch {
        file: PathBuf,
        replacements: Vec<Replacement>,
    },
    /// Run an installer when `manifest` exists.
    Install {
        manifest: PathBuf,
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Provision an external asset.
    FetchAsset { asset: AssetSpec },
    /// Unpack every archive in `dir` whose file name matches `pattern`.
    Extract { dir: PathBuf, pattern: String },
    /// Run the black-box computation, optionally from a subdirectory.
    Compute {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dir: Option<PathBuf>,
    },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Checkout { .. } => "checkout",
            StepAction::Patch { .. } => "patch",
            StepAction::Install { .. } => "install",
            StepAction::FetchAsset { .. } => "fetch_asset",
            StepAction::Extract { .. } => "extract",
            StepAction::Compute { .. } => "compute",
        }
    }
}

/// A named, ordered unit of work inside a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStep {
    pub name: String,
    #[serde(flatten)]
    pub action: StepAction,
}

impl JobStep {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }
}

// ---------------------------------------------------------------------------
// Job description
// ---------------------------------------------------------------------------

/// Compute tier a job runs on, e.g. `cpu`, `T4` or `H100`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceClass(String);

impl ResourceClass {
    pub fn cpu() -> Self {
        Self("cpu".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_gpu(&self) -> bool {
        self.0 != "cpu"
    }
}

impl Default for ResourceClass {
    fn default() -> Self {
        Self::cpu()
    }
}

impl FromStr for ResourceClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let label = s.trim();
        if label.is_empty() {
            return Err(Error::Validation("resource class cannot be empty".into()));
        }
        if label.eq_ignore_ascii_case("cpu") {
            return Ok(Self::cpu());
        }
        Ok(Self(label.to_ascii_uppercase()))
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job input already uploaded to the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRef {
    /// Name used by `{input:<name>}` placeholders.
    pub name: String,
    /// Path of the uploaded file inside the shared store.
    pub remote_path: String,
}

/// Everything the remote side needs to run one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    pub id: JobId,
    pub steps: Vec<JobStep>,
    #[serde(default)]
    pub inputs: Vec<InputRef>,
    #[serde(default)]
    pub resource_class: ResourceClass,
    pub timeout_secs: u64,
    /// Artifact location, relative to the working directory.
    pub artifact: PathBuf,
    /// When set, the artifact is written into the shared store at this path
    /// instead of being returned inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_to: Option<String>,
    /// Container image the backend should run the job in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Names of backend-side secrets exposed to the job as env vars.
    #[serde(default)]
    pub secrets: Vec<String>,
}

impl JobDescription {
    pub fn new(artifact: impl Into<PathBuf>) -> Self {
        Self {
            id: JobId::new(),
            steps: Vec::new(),
            inputs: Vec::new(),
            resource_class: ResourceClass::default(),
            timeout_secs: DEFAULT_JOB_TIMEOUT.as_secs(),
            artifact: artifact.into(),
            publish_to: None,
            image: None,
            secrets: Vec::new(),
        }
    }

    pub fn step(mut self, name: impl Into<String>, action: StepAction) -> Self {
        self.steps.push(JobStep::new(name, action));
        self
    }

    pub fn input(mut self, name: impl Into<String>, remote_path: impl Into<String>) -> Self {
        self.inputs.push(InputRef {
            name: name.into(),
            remote_path: remote_path.into(),
        });
        self
    }

    pub fn with_resource_class(mut self, class: ResourceClass) -> Self {
        self.resource_class = class;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn publish_to(mut self, remote_path: impl Into<String>) -> Self {
        self.publish_to = Some(remote_path.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("failed to encode job description: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("invalid job description: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Location of a finished artifact inside a local working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub size: u64,
}

/// The artifact a successful job hands back.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    /// The artifact bytes themselves.
    Inline {
        file_name: String,
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
    /// A file the job wrote into the shared store.
    Stored { remote_path: String, size: u64 },
}

impl Artifact {
    pub fn size(&self) -> u64 {
        match self {
            Artifact::Inline { bytes, .. } => bytes.len() as u64,
            Artifact::Stored { size, .. } => *size,
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Inline { file_name, bytes } => f
                .debug_struct("Inline")
                .field("file_name", file_name)
                .field("len", &bytes.len())
                .finish(),
            Artifact::Stored { remote_path, size } => f
                .debug_struct("Stored")
                .field("remote_path", remote_path)
                .field("size", size)
                .finish(),
        }
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// A step returned an error; later steps did not run.
    StepFailed { step: String },
    /// The job did not finish within its timeout.
    Timeout { after_secs: u64 },
    /// The gateway refused the submission.
    Rejected,
    /// The backend itself failed (transport, crash, bad payload).
    Backend,
}

/// Terminal state of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResult {
    Success { artifact: Artifact },
    Failure { kind: FailureKind, detail: String },
}

impl JobResult {
    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        JobResult::Failure {
            kind,
            detail: detail.into(),
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        JobResult::failure(
            FailureKind::Timeout {
                after_secs: after.as_secs(),
            },
            format!("no result within {after:?}"),
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success { .. })
    }

    /// Convert into the artifact or the matching [`Error`] variant.
    pub fn into_artifact(self, job: JobId) -> Result<Artifact> {
        match self {
            JobResult::Success { artifact } => Ok(artifact),
            JobResult::Failure {
                kind: FailureKind::Timeout { after_secs },
                ..
            } => Err(Error::RemoteTimeout {
                job: job.to_string(),
                after: Duration::from_secs(after_secs),
            }),
            JobResult::Failure {
                kind: FailureKind::StepFailed { step },
                detail,
            } => Err(Error::Step {
                step,
                message: detail,
            }),
            JobResult::Failure {
                kind: FailureKind::Rejected,
                detail,
            } => Err(Error::Remote(format!("submission rejected: {detail}"))),
            JobResult::Failure {
                kind: FailureKind::Backend,
                detail,
            } => Err(Error::Remote(detail)),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// Outcome of one completed upload or download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub direction: Direction,
    pub size: u64,
    pub completed_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn new(local_path: &Path, remote_path: &str, direction: Direction, size: u64) -> Self {
        Self {
            local_path: local_path.to_path_buf(),
            remote_path: remote_path.to_string(),
            direction,
            size,
            completed_at: Utc::now(),
        }
    }

    /// Check the transferred byte count against the expected one.
    pub fn verify(&self, expected: u64) -> Result<()> {
        if self.size != expected {
            let path = match self.direction {
                Direction::Upload => self.remote_path.clone(),
                Direction::Download => self.local_path.display().to_string(),
            };
            return Err(Error::transfer(
                path,
                format!("short transfer: {} of {} bytes", self.size, expected),
            ));
        }
        Ok(())
    }
}

/// Encode raw bytes the way inline artifacts are encoded on the wire.
pub fn encode_inline(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
