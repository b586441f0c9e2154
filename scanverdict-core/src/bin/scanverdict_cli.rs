//! ScanVerdict CLI - local harness for the intake pipeline
//!
//! Commands: config, validate, normalize, submit
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on rejection, 1 on usage or I/O failure

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use scanverdict_core::{
    CancelToken, LocalTransport, PipelineConfig, RawImage, Receiver, Submitter, UploadFile,
    VerdictPipeline,
    media::MediaType,
    telemetry::{init_tracing, DEFAULT_LOG_FILTER},
};

#[derive(Parser)]
#[command(name = "scanverdict-cli")]
#[command(about = "ScanVerdict CLI - ultrasound upload intake and verdict engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON pipeline config (defaults apply when absent)
    #[arg(short, long, default_value = "scanverdict.json")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,

    /// Run only the perceptual gate on an image
    Validate {
        /// Image file (JPG or PNG)
        file: PathBuf,
    },

    /// Write the canonical form of an image
    Normalize {
        /// Image file (JPG or PNG)
        file: PathBuf,

        /// Where to write the canonical JPEG
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Submit an image through the full submitter -> receiver path
    Submit {
        /// Image file (JPG or PNG)
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    init_tracing(DEFAULT_LOG_FILTER);
    let cli = Cli::parse();

    let config = match PipelineConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            print_json(&serde_json::json!({ "error": format!("Failed to load config: {}", e) }));
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Config => {
            print_json(&config);
            ExitCode::SUCCESS
        }

        Commands::Validate { file } => {
            let raw = match read_raw(&file) {
                Ok(r) => r,
                Err(code) => return code,
            };
            let pipeline = VerdictPipeline::new(config);
            match pipeline.validate_image(&raw) {
                Ok(outcome) => {
                    print_json(&outcome);
                    if outcome.accepted {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2)
                    }
                }
                Err(e) => {
                    print_json(&serde_json::json!({ "ok": false, "error": e.user_message() }));
                    ExitCode::from(2)
                }
            }
        }

        Commands::Normalize { file, output } => {
            let raw = match read_raw(&file) {
                Ok(r) => r,
                Err(code) => return code,
            };
            let pipeline = VerdictPipeline::new(config);
            let canonical = match pipeline.normalizer().normalize_raw(&raw) {
                Ok(c) => c,
                Err(e) => {
                    print_json(&serde_json::json!({ "success": false, "error": e.to_string() }));
                    return ExitCode::from(2);
                }
            };
            if let Err(e) = std::fs::write(&output, &canonical.bytes) {
                print_json(&serde_json::json!({ "success": false, "error": e.to_string() }));
                return ExitCode::FAILURE;
            }
            print_json(&serde_json::json!({
                "success": true,
                "output": output,
                "width": canonical.width(),
                "height": canonical.height(),
                "bytes": canonical.encoded_len(),
                "profileVersion": canonical.profile_version,
                "fingerprint": scanverdict_core::Fingerprint::of(&canonical.bytes),
            }));
            ExitCode::SUCCESS
        }

        Commands::Submit { file } => {
            let upload = match UploadFile::from_path(&file) {
                Ok(u) => u,
                Err(e) => {
                    print_json(&serde_json::json!({ "error": format!("Failed to read {}: {}", file.display(), e) }));
                    return ExitCode::FAILURE;
                }
            };

            let receiver = match Receiver::new(VerdictPipeline::new(config.clone())) {
                Ok(r) => Arc::new(r),
                Err(e) => {
                    print_json(&serde_json::json!({ "error": e.to_string() }));
                    return ExitCode::FAILURE;
                }
            };
            let submitter = match Submitter::new(config, Box::new(LocalTransport::new(receiver))) {
                Ok(s) => s,
                Err(e) => {
                    print_json(&serde_json::json!({ "error": e.to_string() }));
                    return ExitCode::FAILURE;
                }
            };

            match submitter.submit(upload, &CancelToken::new()) {
                Ok(verdict) => {
                    print_json(&verdict);
                    ExitCode::SUCCESS
                }
                Err(rejection) => {
                    print_json(&serde_json::json!({ "error": rejection.reason, "kind": rejection.kind }));
                    ExitCode::from(2)
                }
            }
        }
    }
}

fn read_raw(path: &Path) -> Result<RawImage, ExitCode> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(RawImage::new(bytes, MediaType::from_path(path))),
        Err(e) => {
            print_json(&serde_json::json!({ "error": format!("Failed to read {}: {}", path.display(), e) }));
            Err(ExitCode::FAILURE)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}
