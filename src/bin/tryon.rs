// tryon - dress model photos in outfits with a remote image model

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tryon::config::TryOnConfig;
use tryon::imagent::{GeminiGenerator, ImageResource};
use tryon::orchestration::{GenerationResult, Progress, Session, SessionSnapshot};

#[derive(Parser, Debug)]
#[command(author, version, about = "Virtual try-on: render model photos wearing outfits", long_about = None)]
struct Args {
    /// Model photo (PNG or JPEG), repeatable
    #[arg(short, long = "model", required = true)]
    models: Vec<PathBuf>,

    /// Outfit described in text, repeatable
    #[arg(long = "outfit")]
    outfits: Vec<String>,

    /// Outfit image with an optional description: PATH[=DESCRIPTION]
    #[arg(long = "outfit-image", value_parser = parse_outfit_image)]
    outfit_images: Vec<(PathBuf, Option<String>)>,

    /// Output directory (defaults to the configured one)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Upscale result N (1-based), repeatable
    #[arg(long)]
    upscale: Vec<usize>,

    /// Regenerate result N with a new instruction: N=INSTRUCTION
    #[arg(long, value_parser = parse_variation)]
    vary: Vec<(usize, String)>,

    /// Config file (defaults to the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a JSON summary instead of text
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_outfit_image(value: &str) -> Result<(PathBuf, Option<String>), String> {
    match value.split_once('=') {
        Some((path, _)) if path.is_empty() => Err("missing image path".to_string()),
        Some((path, description)) => Ok((PathBuf::from(path), Some(description.to_string()))),
        None if value.is_empty() => Err("missing image path".to_string()),
        None => Ok((PathBuf::from(value), None)),
    }
}

fn parse_variation(value: &str) -> Result<(usize, String), String> {
    let (index, instruction) = value
        .split_once('=')
        .ok_or_else(|| format!("expected N=INSTRUCTION, got '{value}'"))?;
    let index: usize = index
        .trim()
        .parse()
        .map_err(|_| format!("invalid result number '{index}'"))?;
    if index == 0 {
        return Err("result numbers start at 1".to_string());
    }
    Ok((index, instruction.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tryon={log_level},imagent={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    let config = TryOnConfig::load(args.config.as_deref()).context("failed to load config")?;
    let out_dir = args.out.clone().unwrap_or_else(|| config.output.dir.clone());

    let gemini = config.gemini();
    if gemini.api_key.is_none() {
        tracing::warn!(
            env = %config.remote.api_key_env,
            "no API key configured, requests will likely be rejected"
        );
    }
    tracing::info!(model = %gemini.model, "using remote image model");

    let generator = Arc::new(GeminiGenerator::new(gemini)?);
    let session = Session::new(generator, config.session_settings());

    load_inputs(&session, &args)?;

    let printer = (!args.json).then(|| spawn_progress_printer(session.progress()));

    let run = session.request_generate().await;
    let run = match run {
        Ok(run) => run,
        Err(e) => {
            if let Some(printer) = printer {
                printer.abort();
            }
            return Err(e.into());
        }
    };
    tracing::info!(results = run.results.len(), "{}", run.message);

    let mut post_errors = Vec::new();

    let variations = args.vary.iter().map(|(n, instruction)| {
        let session = &session;
        async move { (*n, session.request_variation(n - 1, instruction).await) }
    });
    for (n, outcome) in join_all(variations).await {
        if let Err(e) = outcome {
            tracing::warn!(result = n, error = %e, "variation failed");
            post_errors.push(format!("variation of result {n}: {e}"));
        }
    }

    let upscales = args.upscale.iter().map(|n| {
        let session = &session;
        async move {
            let outcome = match n.checked_sub(1) {
                Some(index) => session.request_upscale(index).await.map_err(|e| e.to_string()),
                None => Err("result numbers start at 1".to_string()),
            };
            (*n, outcome)
        }
    });
    for (n, outcome) in join_all(upscales).await {
        if let Err(e) = outcome {
            tracing::warn!(result = n, error = %e, "upscale failed");
            post_errors.push(format!("upscale of result {n}: {e}"));
        }
    }

    if let Some(printer) = printer {
        printer.abort();
    }

    let snapshot = session.snapshot();
    let saved = save_results(&snapshot, &out_dir, &config.output.file_prefix)?;

    if args.json {
        print_json(&snapshot, &saved, &post_errors)?;
    } else {
        print_summary(&snapshot, &saved, &post_errors);
    }

    Ok(())
}

fn load_inputs(session: &Session, args: &Args) -> Result<()> {
    let mut models = Vec::with_capacity(args.models.len());
    for path in &args.models {
        let image = ImageResource::from_path(path)
            .with_context(|| format!("failed to read model image {}", path.display()))?;
        models.push(image);
    }
    let selection = session.select_model_images(models);
    tracing::debug!(accepted = selection.accepted, "model images selected");

    // the session starts with one empty outfit slot
    let mut slots = 0;
    let mut next_slot = || {
        let index = slots;
        if index > 0 {
            session.add_outfit();
        }
        slots += 1;
        index
    };

    for text in &args.outfits {
        session.set_outfit_text(next_slot(), text.as_str())?;
    }

    for (path, description) in &args.outfit_images {
        let image = ImageResource::from_path(path)
            .with_context(|| format!("failed to read outfit image {}", path.display()))?;
        let index = next_slot();
        session.select_outfit_image(index, Some(image))?;
        if let Some(description) = description {
            session.set_outfit_text(index, description.as_str())?;
        }
    }

    Ok(())
}

fn spawn_progress_printer(mut rx: watch::Receiver<Progress>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<(String, u8)> = None;

        while rx.changed().await.is_ok() {
            let progress = rx.borrow_and_update().clone();
            if progress.message.is_empty() {
                continue;
            }

            // one line per message change or per ten percent
            let bucket = progress.percent / 10;
            if last.as_ref() == Some(&(progress.message.clone(), bucket)) {
                continue;
            }

            if progress.active {
                eprintln!(
                    "[{:>3}%] {} (~{}s left)",
                    progress.percent,
                    progress.message,
                    progress.remaining_secs()
                );
            } else {
                eprintln!("[{:>3}%] {}", progress.percent, progress.message);
            }
            last = Some((progress.message, bucket));
        }
    })
}

fn save_results(snapshot: &SessionSnapshot, dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let results = snapshot.results();
    if results.is_empty() {
        return Ok(Vec::new());
    }

    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let total = results.len();
    let mut saved = Vec::with_capacity(total);
    for (position, result) in results.iter().enumerate() {
        let path = dir.join(result.download_name(prefix, position, total));
        let bytes = result
            .image
            .decode()
            .with_context(|| format!("result {} is not valid base64", position + 1))?;
        std::fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        tracing::debug!(path = %path.display(), "saved result");
        saved.push(path);
    }
    Ok(saved)
}

fn describe(result: &GenerationResult) -> String {
    let mut line = if result.instruction.is_empty() {
        "(outfit image)".to_string()
    } else {
        result.instruction.clone()
    };
    if result.variations > 0 {
        line.push_str(&format!(" [variation {}]", result.variations));
    }
    if result.upscaled {
        line.push_str(" [upscaled]");
    }
    line
}

fn print_summary(snapshot: &SessionSnapshot, saved: &[PathBuf], post_errors: &[String]) {
    if let Some(run) = &snapshot.run {
        println!("{}", run.message);
        for failure in &run.failures {
            println!("  job {} failed: {}", failure.job_index + 1, failure.reason);
        }
    }

    let results = snapshot.results();
    for (position, (result, path)) in results.iter().zip(saved).enumerate() {
        println!("{:>2}. {} -> {}", position + 1, describe(result), path.display());
    }

    for error in post_errors {
        println!("  {error}");
    }
}

fn print_json(snapshot: &SessionSnapshot, saved: &[PathBuf], post_errors: &[String]) -> Result<()> {
    let results = snapshot.results();
    let run = snapshot.run.as_ref();

    let summary = serde_json::json!({
        "status": run.map(|r| r.status),
        "message": run.map(|r| r.message.clone()),
        "jobs": run.map(|r| r.job_count),
        "skipped_models": run.map(|r| r.skipped_models),
        "results": results
            .iter()
            .zip(saved)
            .map(|(result, path)| serde_json::json!({
                "job": result.job_index + 1,
                "instruction": result.instruction,
                "upscaled": result.upscaled,
                "variations": result.variations,
                "path": path.display().to_string(),
            }))
            .collect::<Vec<_>>(),
        "failures": run
            .map(|r| {
                r.failures
                    .iter()
                    .map(|f| serde_json::json!({ "job": f.job_index + 1, "reason": f.reason.to_string() }))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default(),
        "errors": post_errors,
    });

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
