use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use dotenvy::dotenv;
use once_cell::sync::Lazy;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use avatar_studio::config::{logging_settings, CONFIG};
use avatar_studio::contamination::{detect_with, strip_all, TermCategory};
use avatar_studio::generation::{
    Dispatcher, DownscaleOptimizer, GenerationMode, GenerationOutcome, GenerationResult,
    Measurements, MotionSource, ReferenceImage, ReferenceRole, RequestBuilder, VideoSubMode,
};
use avatar_studio::providers::HttpGenerationBackend;
use avatar_studio::state::StudioSession;
use avatar_studio::storage::{
    fetch_reference, load_media_file, load_reference_file, HttpReferenceStore, ReferenceStore,
};
use avatar_studio::utils::logging::init_logging;

const STORAGE_PREFIX: &str = "storage:";

fn usage() -> &'static str {
    "Usage:\n  avatar-studio detect <prompt>\n  avatar-studio clean [--category <name,...>] <prompt>\n  avatar-studio providers\n  avatar-studio generate --prompt <text> [--mode image|video] [--sub-mode animate|avatar] [--provider <id>] [--aspect <ratio>] [--ref <role>=<path|storage:key>]... [--source <path|storage:key>] [--motion-preset <name>|--motion-clip <path>|--motion-url <url>] [--body-type <v>] [--age <n>] [--height <v>] [--bust <v>] [--waist <v>] [--hips <v>] [--strip-terms] [--output <path>]"
}

enum MotionArg {
    Preset(String),
    Clip(PathBuf),
    Url(String),
}

struct GenerateArgs {
    prompt: String,
    mode: GenerationMode,
    sub_mode: VideoSubMode,
    provider: Option<String>,
    aspect_ratio: Option<String>,
    references: Vec<(ReferenceRole, String)>,
    source: Option<String>,
    motion: Option<MotionArg>,
    measurements: Measurements,
    strip_terms: bool,
    output: Option<PathBuf>,
}

enum CliCommand {
    Detect(String),
    Clean {
        prompt: String,
        categories: Option<Vec<TermCategory>>,
    },
    Providers,
    Generate(Box<GenerateArgs>),
}

fn parse_category(value: &str) -> anyhow::Result<TermCategory> {
    let wanted = value.trim().to_lowercase();
    TermCategory::ALL
        .iter()
        .copied()
        .find(|category| category.as_str() == wanted)
        .ok_or_else(|| anyhow!("Unknown term category: {value}"))
}

fn next_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> anyhow::Result<&'a str> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing value for {flag}"))
}

fn parse_clean_args(args: &[String]) -> anyhow::Result<CliCommand> {
    let mut categories = None;
    let mut words = Vec::new();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--category" => {
                let value = next_value(args, &mut index, "--category")?;
                categories = Some(
                    value
                        .split(',')
                        .filter(|entry| !entry.trim().is_empty())
                        .map(parse_category)
                        .collect::<anyhow::Result<Vec<_>>>()?,
                );
            }
            other => words.push(other.to_string()),
        }
        index += 1;
    }
    Ok(CliCommand::Clean {
        prompt: words.join(" "),
        categories,
    })
}

fn parse_generate_args(args: &[String]) -> anyhow::Result<CliCommand> {
    let mut prompt = None;
    let mut mode = GenerationMode::Image;
    let mut sub_mode = VideoSubMode::Animate;
    let mut provider = None;
    let mut aspect_ratio = None;
    let mut references = Vec::new();
    let mut source = None;
    let mut motion = None;
    let mut measurements = Measurements::default();
    let mut strip_terms = false;
    let mut output = None;

    let mut index = 0;
    while index < args.len() {
        let flag = args[index].as_str();
        match flag {
            "--prompt" => prompt = Some(next_value(args, &mut index, flag)?.to_string()),
            "--mode" => {
                mode = match next_value(args, &mut index, flag)? {
                    "image" => GenerationMode::Image,
                    "video" => GenerationMode::Video,
                    other => bail!("Invalid --mode value: {other}"),
                }
            }
            "--sub-mode" => {
                sub_mode = match next_value(args, &mut index, flag)? {
                    "animate" => VideoSubMode::Animate,
                    "avatar" => VideoSubMode::Avatar,
                    other => bail!("Invalid --sub-mode value: {other}"),
                }
            }
            "--provider" => provider = Some(next_value(args, &mut index, flag)?.to_string()),
            "--aspect" => aspect_ratio = Some(next_value(args, &mut index, flag)?.to_string()),
            "--ref" => {
                let value = next_value(args, &mut index, flag)?;
                let (role, location) = value
                    .split_once('=')
                    .ok_or_else(|| anyhow!("--ref expects <role>=<path>, got {value}"))?;
                let role = ReferenceRole::parse(role)
                    .ok_or_else(|| anyhow!("Unknown reference role: {role}"))?;
                references.push((role, location.to_string()));
            }
            "--source" => source = Some(next_value(args, &mut index, flag)?.to_string()),
            "--motion-preset" => {
                motion = Some(MotionArg::Preset(next_value(args, &mut index, flag)?.to_string()))
            }
            "--motion-clip" => {
                motion = Some(MotionArg::Clip(PathBuf::from(next_value(
                    args, &mut index, flag,
                )?)))
            }
            "--motion-url" => {
                motion = Some(MotionArg::Url(next_value(args, &mut index, flag)?.to_string()))
            }
            "--body-type" => {
                measurements.body_type = Some(next_value(args, &mut index, flag)?.to_string())
            }
            "--age" => {
                let value = next_value(args, &mut index, flag)?;
                measurements.age = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| anyhow!("Invalid --age value: {value}"))?,
                );
            }
            "--height" => measurements.height = Some(next_value(args, &mut index, flag)?.to_string()),
            "--bust" => measurements.bust = Some(next_value(args, &mut index, flag)?.to_string()),
            "--waist" => measurements.waist = Some(next_value(args, &mut index, flag)?.to_string()),
            "--hips" => measurements.hips = Some(next_value(args, &mut index, flag)?.to_string()),
            "--strip-terms" => strip_terms = true,
            "--output" => output = Some(PathBuf::from(next_value(args, &mut index, flag)?)),
            other => bail!("Unknown generate argument: {other}\n{}", usage()),
        }
        index += 1;
    }

    Ok(CliCommand::Generate(Box::new(GenerateArgs {
        prompt: prompt.ok_or_else(|| anyhow!("--prompt is required"))?,
        mode,
        sub_mode,
        provider,
        aspect_ratio,
        references,
        source,
        motion,
        measurements,
        strip_terms,
        output,
    })))
}

fn parse_args(args: &[String]) -> anyhow::Result<CliCommand> {
    let rest = args.get(2..).unwrap_or_default();
    match args.get(1).map(String::as_str) {
        Some("detect") => Ok(CliCommand::Detect(rest.join(" "))),
        Some("clean") => parse_clean_args(rest),
        Some("providers") => Ok(CliCommand::Providers),
        Some("generate") => parse_generate_args(rest),
        _ => Err(anyhow!(usage())),
    }
}

async fn load_reference(
    store: &dyn ReferenceStore,
    location: &str,
    role: ReferenceRole,
) -> anyhow::Result<ReferenceImage> {
    let reference = match location.strip_prefix(STORAGE_PREFIX) {
        Some(key) => fetch_reference(store, key, role).await?,
        None => load_reference_file(&PathBuf::from(location), role).await?,
    };
    Ok(reference)
}

async fn resolve_motion(motion: MotionArg) -> anyhow::Result<MotionSource> {
    Ok(match motion {
        MotionArg::Preset(name) => MotionSource::Preset(name),
        MotionArg::Clip(path) => MotionSource::UploadedClip(load_media_file(&path).await?),
        MotionArg::Url(raw) => MotionSource::ExternalUrl(
            Url::parse(&raw).with_context(|| format!("Invalid --motion-url value: {raw}"))?,
        ),
    })
}

fn outcome_json(outcome: &GenerationOutcome) -> serde_json::Value {
    let result = match &outcome.result {
        Some(GenerationResult::Url(url)) => json!({ "url": url }),
        Some(GenerationResult::Binary(payload)) => {
            json!({ "mimeType": payload.mime_type, "bytes": payload.len() })
        }
        None => serde_json::Value::Null,
    };
    json!({
        "id": outcome.id,
        "state": outcome.terminal_state,
        "provider": outcome.provider_id,
        "mode": outcome.mode,
        "prompt": outcome.echoed_prompt,
        "timestamp": outcome.timestamp.to_rfc3339(),
        "result": result,
        "error": outcome.error_detail,
    })
}

async fn run_generate(args: GenerateArgs) -> anyhow::Result<()> {
    let session = StudioSession::new(
        args.provider
            .unwrap_or_else(|| CONFIG.default_provider.clone()),
        args.aspect_ratio
            .unwrap_or_else(|| CONFIG.default_aspect_ratio.clone()),
    );
    session.set_prompt(args.prompt);
    session.set_measurements(args.measurements);
    session.set_mode(args.mode, args.sub_mode);

    let store = HttpReferenceStore::new(CONFIG.storage_base_url.clone());
    {
        let _loading = session.begin_reference_load();
        for (role, location) in &args.references {
            let reference = load_reference(&store, location, *role)
                .await
                .with_context(|| format!("Failed to load reference {location}"))?;
            session.attach_reference(reference);
        }
        if let Some(location) = &args.source {
            let source = load_reference(&store, location, ReferenceRole::General)
                .await
                .with_context(|| format!("Failed to load source image {location}"))?;
            session.set_source_image(Some(source));
        }
    }
    if let Some(motion) = args.motion {
        session.set_motion(Some(resolve_motion(motion).await?));
    }

    let detected = session.detect_terms(&CONFIG.term_catalog);
    if !detected.is_empty() {
        if args.strip_terms {
            let cleaned = strip_all(&CONFIG.term_catalog, &session.prompt(), None);
            info!(
                "Stripped {} identity term(s) from prompt: {}",
                detected.len(),
                cleaned
            );
            session.set_prompt(cleaned);
        } else {
            for term in &detected {
                warn!(
                    "Prompt contains {} term '{}' that may conflict with the references",
                    term.category, term.term
                );
            }
        }
    }

    let optimizer = DownscaleOptimizer::new(CONFIG.image_max_dimension, CONFIG.image_jpeg_quality);
    let dispatcher = Dispatcher::new(
        Arc::new(HttpGenerationBackend::new(
            CONFIG.provider_base_url.clone(),
            CONFIG.provider_api_key.clone(),
        )),
        RequestBuilder::new(Arc::new(optimizer)),
        CONFIG.providers.clone(),
    );

    let outcome = dispatcher.generate(&session).await?;
    println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);

    if let (Some(path), Some(GenerationResult::Binary(payload))) = (&args.output, &outcome.result)
    {
        tokio::fs::write(path, &payload.bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved generated media to {}", path.display());
    }

    if !outcome.is_success() {
        bail!(
            "{}",
            outcome
                .error_detail
                .unwrap_or_else(|| "Generation failed".to_string())
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let (log_level, log_dir) = logging_settings();
    let _guards = init_logging(&log_level, &log_dir);
    Lazy::force(&CONFIG);

    let args: Vec<String> = std::env::args().collect();
    match parse_args(&args)? {
        CliCommand::Detect(prompt) => {
            let terms = detect_with(&CONFIG.term_catalog, &prompt);
            let report = json!({
                "catalogVersion": CONFIG.term_catalog.version,
                "terms": terms,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        CliCommand::Clean { prompt, categories } => {
            println!(
                "{}",
                strip_all(&CONFIG.term_catalog, &prompt, categories.as_deref())
            );
        }
        CliCommand::Providers => {
            println!("{}", serde_json::to_string_pretty(CONFIG.providers.list())?);
        }
        CliCommand::Generate(generate) => {
            info!("Starting generation with provider {:?}", generate.provider);
            run_generate(*generate).await?;
        }
    }
    Ok(())
}
