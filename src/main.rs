use ai_manga_creator::api::elevenlabs::ElevenLabsClient;
use ai_manga_creator::api::fal::FalClient;
use ai_manga_creator::api::gemini::GeminiClient;
use ai_manga_creator::api::{TextGenerator, VideoGenerator};
use ai_manga_creator::characters::split_data_uri;
use ai_manga_creator::config::Config;
use ai_manga_creator::credentials::CredentialStore;
use ai_manga_creator::generator::{Services, Studio};
use ai_manga_creator::motion_poster::{MotionPosterCache, MotionPosterEnhancer};
use ai_manga_creator::narration::{AudioStore, NarrationComposer};
use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "ai-manga-creator", about = "Turn a prose chapter into illustrated manga strips")]
struct Cli {
    /// Path to config.json
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Storyboard, design, draw and narrate a chapter
    Generate {
        /// Chapter text file
        chapter: PathBuf,
        /// Reference image for a character: NAME=path/to/image.png (or a data URI)
        #[arg(long = "character", value_name = "NAME=IMAGE")]
        characters: Vec<String>,
        /// Echo the storyboard as it streams in
        #[arg(long)]
        stream: bool,
        /// How many times to resume after a failed panel
        #[arg(long, default_value_t = 0)]
        auto_retry: u32,
    },
    /// Manage the stored Gemini API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    Set { key: String },
    Clear,
    Show,
}

fn mime_from_extension(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

async fn load_reference(arg: &str) -> Result<(String, String, String)> {
    let (name, source) = arg
        .split_once('=')
        .with_context(|| format!("--character expects NAME=IMAGE, got {arg}"))?;
    if let Some((mime, data)) = split_data_uri(source) {
        return Ok((name.to_string(), mime, data));
    }
    let path = PathBuf::from(source);
    let bytes = fs::read(&path)
        .await
        .with_context(|| format!("Failed to read reference image {}", path.display()))?;
    Ok((
        name.to_string(),
        mime_from_extension(&path).to_string(),
        B64.encode(bytes),
    ))
}

fn build_services(cfg: &Config, gemini_key: &str) -> Result<Services> {
    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let gemini = Arc::new(GeminiClient::with_client(
        client.clone(),
        gemini_key,
        &cfg.text_model,
        &cfg.image_model,
    ));
    let text: Arc<dyn TextGenerator> = gemini.clone();

    let narration = match ElevenLabsClient::from_config(client.clone(), cfg) {
        Some(tts) => Some(NarrationComposer::new(
            Arc::clone(&text),
            Arc::new(tts),
            AudioStore::new(cfg.audio_folder()),
        )),
        None => {
            warn!("elevenlabs_api_key not set; strips will have no narration audio");
            None
        }
    };

    let motion = match cfg.fal_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => {
            let video: Arc<dyn VideoGenerator> = Arc::new(FalClient::new(client, key));
            Some(Arc::new(MotionPosterEnhancer::new(
                video,
                Arc::new(MotionPosterCache::new()),
            )))
        }
        None => {
            warn!("fal_api_key not set; motion posters disabled");
            None
        }
    };

    Ok(Services {
        text,
        image: gemini,
        narration,
        motion,
    })
}

async fn run_generate(
    cfg: Config,
    chapter: PathBuf,
    characters: Vec<String>,
    stream: bool,
    auto_retry: u32,
) -> Result<i32> {
    cfg.ensure_directories().await?;
    let store = CredentialStore::new(&cfg.credentials_file);
    let key = cfg.resolve_gemini_key(&store).await?;
    let mut studio = Studio::new(build_services(&cfg, &key)?);

    let text = fs::read_to_string(&chapter)
        .await
        .with_context(|| format!("Failed to read chapter {}", chapter.display()))?;

    if stream {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let echo = tokio::spawn(async move {
            let mut stderr = std::io::stderr();
            while let Some(fragment) = rx.recv().await {
                let _ = stderr.write_all(fragment.as_bytes());
                let _ = stderr.flush();
            }
            let _ = writeln!(stderr);
        });
        let submitted = studio.submit_chapter_streaming(&text, tx).await;
        echo.await.ok();
        submitted?;
    } else {
        studio.submit_chapter(&text).await?;
    }

    for arg in &characters {
        let (name, mime, data) = load_reference(arg).await?;
        if !studio.set_reference_image(&name, &mime, &data)? {
            warn!("No character named {} in the storyboard; reference ignored", name);
        }
    }

    let mut outcome = studio.generate().await;
    let mut retries_left = auto_retry;
    while outcome.is_err() && retries_left > 0 {
        let Some(ctx) = studio.retry_context() else {
            break;
        };
        warn!("{}; attempting {}", studio.error().unwrap_or("panel failed"), ctx.describe());
        retries_left -= 1;
        outcome = studio.retry().await;
    }

    studio.wait_for_motion_poster().await;

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let out_path = cfg.output_folder.join(format!("manga_{}.json", stamp));
    let json = serde_json::to_string_pretty(studio.generated_strips())?;
    fs::write(&out_path, json)
        .await
        .with_context(|| format!("Failed to write {}", out_path.display()))?;

    match outcome {
        Ok(()) => {
            info!("Wrote {}", out_path.display());
            Ok(0)
        }
        Err(e) => {
            let hint = studio
                .retry_context()
                .map(|ctx| format!(" ({} with --auto-retry)", ctx.describe()))
                .unwrap_or_default();
            eprintln!("[ERROR] {}{}", e, hint);
            eprintln!("[ERROR] Partial result written to {}", out_path.display());
            Ok(1)
        }
    }
}

async fn run_key(cfg: Config, action: KeyAction) -> Result<i32> {
    let store = CredentialStore::new(&cfg.credentials_file);
    match action {
        KeyAction::Set { key } => {
            if let Err(e) = store.accept_api_key(key.trim()).await {
                eprintln!("[ERROR] {}", e);
                return Ok(1);
            }
        }
        KeyAction::Clear => store.clear_api_key().await?,
        KeyAction::Show => match store.load_api_key().await? {
            Some(key) => {
                let tail: String = key.chars().skip(key.chars().count().saturating_sub(4)).collect();
                println!("stored key ending in ...{}", tail);
            }
            None => println!("no key stored in {}", store.path().display()),
        },
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config).await?;

    let code = match cli.command {
        Command::Generate {
            chapter,
            characters,
            stream,
            auto_retry,
        } => run_generate(cfg, chapter, characters, stream, auto_retry).await?,
        Command::Key { action } => run_key(cfg, action).await?,
    };
    std::process::exit(code);
}
