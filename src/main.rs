// llm-adapter - Provider-agnostic LLM execution engine
// One-shot CLI entry point

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use llm_adapter::config::{load_settings, Settings};
use llm_adapter::providers::factory::build_lineup;
use llm_adapter::providers::{Attachment, Provider};
use llm_adapter::tools::StaticRegistry;

#[derive(Parser, Debug)]
#[command(name = "llm-adapter")]
#[command(about = "Provider-agnostic LLM execution engine", version)]
struct Args {
    /// Prompt to send
    prompt: String,

    /// Attach a file (repeatable). Images are detected by extension.
    #[arg(short = 'f', long = "file")]
    files: Vec<PathBuf>,

    /// Use only this provider instead of the configured lineup
    #[arg(long)]
    provider: Option<String>,

    /// Override the model for every provider
    #[arg(long)]
    model: Option<String>,

    /// System prompt override
    #[arg(long)]
    system: Option<String>,

    /// Wait for the complete response instead of streaming
    #[arg(long = "no-stream")]
    no_stream: bool,

    /// Log provider selection and fallback hops
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut settings = load_settings()?;
    if let Some(provider) = &args.provider {
        restrict_lineup(&mut settings, provider);
    }

    let registry = Arc::new(StaticRegistry::new());
    let mut chain = build_lineup(&settings, registry, args.verbose)?;

    if let Some(model) = &args.model {
        chain.set_model(model);
    }
    if let Some(system) = &args.system {
        chain.set_system_prompt(system);
    }

    let attachments = load_attachments(&args.files)?;

    if args.no_stream {
        let answer = chain.generate(&args.prompt, &attachments).await?;
        println!("{}", answer);
        return Ok(());
    }

    let (tx, mut rx) = mpsc::channel::<String>(100);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(token) = rx.recv().await {
            let _ = write!(stdout, "{}", token);
            let _ = stdout.flush();
        }
    });

    let result = chain.generate_stream(&args.prompt, &attachments, tx).await;
    // Channel close flushes the printer
    let _ = printer.await;
    println!();
    result
}

/// Keep only the requested provider, preserving its settings
fn restrict_lineup(settings: &mut Settings, provider: &str) {
    let name = settings
        .lineup
        .iter()
        .find(|n| n.eq_ignore_ascii_case(provider))
        .cloned()
        .unwrap_or_else(|| provider.to_string());
    settings.lineup = vec![name];
}

fn load_attachments(files: &[PathBuf]) -> Result<Vec<Attachment>> {
    files.iter().map(|path| load_attachment(path)).collect()
}

fn load_attachment(path: &PathBuf) -> Result<Attachment> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    if let Some(mime_type) = image_mime(path) {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let mut attachment = Attachment::image(name, BASE64.encode(&bytes), mime_type);
        attachment.path = path.display().to_string();
        return Ok(attachment);
    }

    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut attachment = Attachment::text(name, data);
    attachment.path = path.display().to_string();
    Ok(attachment)
}

fn image_mime(path: &PathBuf) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
