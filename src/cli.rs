use clap::{Parser, Subcommand};
use sr_core::ResourceClass;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stagerun")]
#[command(author, version, about = "Staged remote execution of content-generation jobs")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a talking portrait video from an image, audio and pose video
    Portrait {
        /// Source face image
        #[arg(long)]
        src_img: PathBuf,

        /// Driving audio
        #[arg(long)]
        drv_aud: PathBuf,

        /// Driving pose video
        #[arg(long)]
        drv_pose: PathBuf,

        /// Background image
        #[arg(long)]
        bg_img: PathBuf,

        /// Name of the output video, written under output/
        #[arg(long, default_value = "output.mp4")]
        out_name: String,

        /// Compute tier to run on
        #[arg(long, default_value = "H100")]
        gpu: ResourceClass,
    },

    /// Burn word-by-word subtitles into a video
    Subtitle {
        /// Local video to subtitle
        #[arg(long)]
        input_video: PathBuf,

        /// Where to write the subtitled video
        #[arg(long, default_value = "output_with_word_subs.mp4")]
        output_video: PathBuf,

        /// Compute tier to run on
        #[arg(long, default_value = "T4")]
        gpu: ResourceClass,

        /// Speech-to-text model size (tiny, base, small, medium, large)
        #[arg(long, default_value = "base")]
        model: String,
    },

    /// Execute a job description in this process (remote entry point)
    Worker {
        /// Job description JSON
        #[arg(long)]
        job: PathBuf,

        /// Working directory for the job's steps
        #[arg(long)]
        workdir: PathBuf,

        /// Write the result JSON here instead of stdout
        #[arg(long)]
        result: Option<PathBuf>,
    },

    /// Pre-fetch configured model assets into the cache
    Provision {
        /// Only fetch these assets (by name); repeatable
        #[arg(long = "asset")]
        assets: Vec<String>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate,
}
