//! `plinth build` command implementation.

use indexmap::IndexMap;
use plinth_core::bundler::manifest::ManifestEntry;
use plinth_core::bundler::PipelineStats;
use plinth_core::{BuildError, BuildOutput, Config, Mode};
use serde::Serialize;

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub config: Config,
    /// Write artifacts to the output directory.
    pub write: bool,
}

/// Build result for JSON output.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildResultJson {
    ok: bool,
    mode: Mode,
    output_dir: String,
    stats: PipelineStats,
    entrypoints: IndexMap<String, ManifestEntry>,
    artifacts: Vec<ArtifactJson>,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct ArtifactJson {
    name: String,
    size: usize,
}

#[derive(Serialize)]
struct BuildErrorJson {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<String>,
}

/// Build error result for JSON output.
#[derive(Serialize)]
struct BuildErrorResult {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<Mode>,
    error: BuildErrorJson,
}

/// Run the build command. Any failure exits with status 1.
pub fn run(action: BuildAction, json: bool) -> miette::Result<()> {
    let mut mode = None;
    let result = build(&action, &mut mode);

    match result {
        Ok((output, output_dir)) => {
            if json {
                let doc = BuildResultJson {
                    ok: true,
                    mode: output.mode,
                    output_dir,
                    stats: output.stats,
                    entrypoints: output.manifest.entrypoints.clone(),
                    artifacts: output
                        .artifacts
                        .iter()
                        .map(|a| ArtifactJson {
                            name: a.name.clone(),
                            size: a.bytes.len(),
                        })
                        .collect(),
                    warnings: output.warnings.clone(),
                };
                println!("{}", serde_json::to_string(&doc).unwrap_or_default());
            } else {
                print_summary(&output, &output_dir, action.write);
            }
            Ok(())
        }
        Err(e) => {
            if json {
                let doc = BuildErrorResult {
                    ok: false,
                    mode,
                    error: BuildErrorJson {
                        code: e.code(),
                        message: e.to_string(),
                        unit: e.unit(),
                        step: e.step(),
                    },
                };
                println!("{}", serde_json::to_string(&doc).unwrap_or_default());
            } else {
                eprintln!("error[{}]: {e}", e.code());
                if let Some(unit) = e.unit() {
                    eprintln!("  in: {unit}");
                }
                if let Some(step) = e.step() {
                    eprintln!("  at: {step}");
                }
            }
            std::process::exit(1);
        }
    }
}

fn build(action: &BuildAction, mode: &mut Option<Mode>) -> Result<(BuildOutput, String), BuildError> {
    let pipeline = super::load_pipeline(&action.config, None)?;
    *mode = Some(pipeline.mode());
    let output = pipeline.build()?;
    let out_dir = pipeline.output_dir();
    if action.write {
        output.write(&out_dir, pipeline.clean())?;
    }
    Ok((output, out_dir.display().to_string()))
}

fn print_summary(output: &BuildOutput, output_dir: &str, written: bool) {
    let stats = &output.stats;
    println!(
        "  {} build: {} modules, {} chunks, {} files ({}ms)",
        output.mode, stats.graph.modules, stats.chunks, stats.artifacts, stats.duration_ms
    );
    for artifact in &output.artifacts {
        let kb = artifact.bytes.len() as f64 / 1024.0;
        println!("    {:<48} {kb:>8.1}KB", artifact.name);
    }
    if stats.shaken > 0 {
        println!("  removed {} unused modules", stats.shaken);
    }
    if let Some(opt) = &stats.optimize {
        println!(
            "  optimized {} files: {:.1}KB -> {:.1}KB",
            opt.artifacts,
            opt.bytes_before as f64 / 1024.0,
            opt.bytes_after as f64 / 1024.0
        );
    }
    for warning in &output.warnings {
        eprintln!("  warning: {warning}");
    }
    if written {
        println!("  -> {output_dir}");
    }
}
