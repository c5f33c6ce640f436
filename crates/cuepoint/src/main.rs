//! Cuepoint - studio automation runner

use automation_engine::{
    ActionBuilder, AutomationEngine, AutomationEvent, Condition, EngineConfig, LogLevel, Rule,
    Trigger,
};
use event_bus::persistence::{load_recording, save_recording};
use event_bus::{BusConfig, EventBus, LoggingMiddleware, TimingMiddleware};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use studio_events::EventType;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;

use controller::LoggingController;

/// Settings read from the environment
struct Settings {
    bus: BusConfig,
    engine: EngineConfig,
    recording: Option<PathBuf>,
    replay_speed: f64,
    record_to: Option<PathBuf>,
}

impl Settings {
    fn from_env() -> Self {
        let defaults = BusConfig::default();
        let bus = BusConfig {
            queue_capacity: env_or("CUEPOINT_QUEUE_CAPACITY", defaults.queue_capacity),
            workers: env_or("CUEPOINT_WORKERS", defaults.workers),
            ..defaults
        };

        Self {
            bus,
            engine: EngineConfig::default(),
            recording: std::env::var("CUEPOINT_RECORDING").ok().map(PathBuf::from),
            replay_speed: env_or("CUEPOINT_REPLAY_SPEED", 1.0),
            record_to: std::env::var("CUEPOINT_RECORD_TO").ok().map(PathBuf::from),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", key, value);
            default
        }),
        Err(_) => default,
    }
}

/// Rules installed at startup
fn demo_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "Muted mic goes to BRB",
            Trigger::delay_when(
                EventType::InputMuteStateChanged,
                Duration::from_secs(3),
                |event| event.payload().field("inputMuted") == Some(json!(true)),
            ),
            ActionBuilder::new()
                .scene("BRB")
                .text("Banner", "Back soon")
                .continue_on_error()
                .set_variable("brb", json!(true))
                .build(),
        )
        .with_description("Switch to the BRB scene three seconds after the mic is muted")
        .with_cooldown(Duration::from_secs(10)),
        Rule::new(
            "Record while streaming",
            Trigger::event_when(EventType::StreamStateChanged, |event| {
                event.payload().field("outputActive") == Some(json!(true))
            }),
            ActionBuilder::new()
                .start_recording()
                .log(LogLevel::Info, "Recording started with the stream")
                .build(),
        ),
        Rule::new(
            "Back from BRB",
            Trigger::event(EventType::InputMuteStateChanged),
            ActionBuilder::new()
                .scene("Live")
                .set_variable("brb", json!(false))
                .build(),
        )
        .with_condition(Condition::EventField {
            field: "inputMuted".into(),
            equals: json!(false),
        })
        .with_condition(Condition::Variable {
            name: "brb".into(),
            equals: json!(true),
        }),
        Rule::new(
            "Heartbeat",
            Trigger::periodic(Duration::from_secs(60)),
            ActionBuilder::new()
                .log(LogLevel::Info, "Automation heartbeat")
                .build(),
        ),
        Rule::new(
            "Late night wrap-up",
            Trigger::daily_at(23, 30),
            ActionBuilder::new()
                .text("Banner", "Thanks for watching")
                .wait(Duration::from_secs(30))
                .stop_streaming()
                .build(),
        ),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cuepoint=debug,automation_engine=debug,event_bus=debug,info".into()
            }),
        )
        .init();

    tracing::info!("Starting Cuepoint");
    let settings = Settings::from_env();

    let bus = Arc::new(EventBus::new(settings.bus.clone()));
    bus.use_middleware(Arc::new(LoggingMiddleware));
    bus.use_middleware(Arc::new(TimingMiddleware::new(
        settings.bus.slow_dispatch_threshold(),
    )));
    bus.start();

    let controller = Arc::new(LoggingController::new());
    let engine = Arc::new(AutomationEngine::new(
        Arc::clone(&bus),
        controller.clone(),
        settings.engine.clone(),
    ));
    engine.set_variable("brb", json!(false));
    for rule in demo_rules() {
        engine.add_rule(rule)?;
    }
    engine.start();

    let mut automation_events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = automation_events.recv().await {
            if let AutomationEvent::Failed { rule_id, error } = event {
                tracing::warn!("Rule {} failed: {}", rule_id, error);
            }
        }
    });

    if settings.record_to.is_some() {
        bus.start_recording();
    }

    if let Some(path) = &settings.recording {
        let recording = load_recording(path, bus.registry()).await?;
        tracing::info!(
            "Replaying {} event(s) spanning {:?} at {}x",
            recording.len(),
            recording.duration(),
            settings.replay_speed
        );
        let replay = bus.spawn_replay(recording, settings.replay_speed);
        tokio::spawn(async move {
            match replay.await {
                Ok(Ok(report)) => tracing::info!(
                    "Replay finished: {} emitted, {} dropped",
                    report.emitted,
                    report.dropped
                ),
                Ok(Err(e)) => tracing::error!("Replay failed: {}", e),
                Err(e) => tracing::error!("Replay task panicked: {}", e),
            }
        });
    }

    tracing::info!("Press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    if let Some(path) = &settings.record_to {
        let recording = bus.stop_recording()?;
        save_recording(path, &recording).await?;
        tracing::info!("Saved {} event(s) to {:?}", recording.len(), path);
    }

    engine.stop().await;
    bus.stop().await;

    let stats = engine.stats();
    tracing::info!(
        "Executed {} run(s) ({} failed, {} suppressed), {} controller request(s)",
        stats.total_executions,
        stats.failed_executions,
        stats.suppressed,
        controller.request_count()
    );
    Ok(())
}
