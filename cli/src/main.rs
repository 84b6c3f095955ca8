use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use clap_derive::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use chorus_audio::{AudioDeviceManager, DuplexAudio, DuplexAudioConfig, MemoryBackend};
use chorus_core::{
    AgentSchedule, AudioFactory, ChatClient, ConversationTracker, DecisionPolicy,
    OpenAiDecisionBackend, Orchestrator, OrchestratorConfig, PromptBuilder, ScriptedBackend,
    TrackerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a scheduled multi-character conversation", long_about = None)]
struct Args {
    /// TOML schedule of agent slots, in order.
    #[arg(long)]
    schedule: std::path::PathBuf,

    /// Directory of per-day context files folded into the prompts.
    #[arg(long)]
    context_dir: Option<std::path::PathBuf>,

    /// Use the real capture/playback devices instead of the in-memory
    /// backend. Requires the `backend-cpal` feature.
    #[arg(long)]
    live: bool,

    /// Skip the LLM decision policy; slots end on the turn ceiling only.
    #[arg(long)]
    no_decision: bool,

    /// Decision/opener model name.
    #[arg(long, env = "CHORUS_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    #[arg(long, short)]
    tracing: bool,
}

fn setup_tracing(verbose: bool) {
    let level = if verbose { Level::TRACE } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default subscriber failed");
}

fn audio_factory(live: bool) -> AudioFactory {
    if live {
        Box::new(|| {
            let devices = AudioDeviceManager::open()?;
            Ok(DuplexAudio::new(
                Box::new(devices),
                DuplexAudioConfig::default(),
            ))
        })
    } else {
        Box::new(|| {
            Ok(DuplexAudio::new(
                Box::new(MemoryBackend::new()),
                DuplexAudioConfig::default(),
            ))
        })
    }
}

fn chat_client(model: &str) -> Result<Option<ChatClient>> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(Some(ChatClient::new(&key)?.model(model))),
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    setup_tracing(args.tracing);

    let schedule = AgentSchedule::load(&args.schedule)?;
    info!(slots = schedule.agents.len(), "schedule loaded");

    let client = if args.no_decision {
        None
    } else {
        let client = chat_client(&args.model)?;
        if client.is_none() {
            warn!("OPENAI_API_KEY not set; slots will end on the turn ceiling only");
        }
        client
    };

    let tracker = Arc::new(match &client {
        Some(client) => ConversationTracker::with_decision(
            TrackerConfig::default(),
            DecisionPolicy::new(Arc::new(OpenAiDecisionBackend::new(client.clone()))),
        ),
        None => ConversationTracker::new(TrackerConfig::default()),
    });

    let mut prompts = PromptBuilder::new();
    if let Some(dir) = &args.context_dir {
        prompts = prompts.with_context_dir(dir);
    }
    if let Some(client) = client {
        prompts = prompts.with_opener(Arc::new(client));
    }

    if args.live {
        // Fail fast on missing devices instead of partway into a run.
        AudioDeviceManager::open().context("audio devices unavailable")?;
    }

    let orchestrator = Orchestrator::new(
        Arc::clone(&tracker),
        Arc::new(ScriptedBackend::rehearsal()),
        prompts,
        audio_factory(args.live),
    )
    .with_config(OrchestratorConfig::default());

    orchestrator.run(&schedule).await;

    println!();
    println!("Final conversation:");
    println!("{}", tracker.formatted_history());
    Ok(())
}
