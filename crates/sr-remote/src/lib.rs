//! # sr-remote
//!
//! Submits jobs to a compute backend and waits for their result.
//!
//! - **[`ComputeBackend`]** -- where a job actually runs.
//! - **[`LocalBackend`]** -- in-process execution in a fresh temporary
//!   working directory.
//! - **[`HttpBackend`]** -- a remote job service with session
//!   authentication and log streaming.
//! - **[`RemoteExecutionGateway`]** -- bounded wait, duplicate rejection.
//! - **[`execute_job`]** -- the step-execution entry point used by both the
//!   local backend and the remote worker.

pub mod backend;
pub mod gateway;
pub mod http;
pub mod local;
pub mod session;
pub mod worker;

pub use backend::ComputeBackend;
pub use gateway::RemoteExecutionGateway;
pub use http::HttpBackend;
pub use local::LocalBackend;
pub use session::{Session, SessionStore};
pub use worker::{execute_job, JobEnvironment};
