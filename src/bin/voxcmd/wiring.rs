use anyhow::{Context, Result};
use std::sync::Arc;
use voxcmd::actions::{register_conversation_actions, ActionRegistry};
use voxcmd::audio::{CaptureSource, CpalCapture, CpalPlayback, ScriptedSource, Segmenter};
use voxcmd::engines::{SilentSynthesizer, Synthesizer, Voices};
use voxcmd::external::{CommandBrain, CommandRecognizer, CommandSpec, CommandSynthesizer};
use voxcmd::{AppConfig, Collaborators, Language, Orchestrator, PipelineState};

pub(crate) fn capture_source(config: &AppConfig) -> Arc<dyn CaptureSource> {
    Arc::new(CpalCapture::new(
        config.input_device.clone(),
        config.sample_rate,
        config.channel_capacity,
    ))
}

pub(crate) fn live_segmenter(config: &AppConfig) -> Segmenter {
    Segmenter::new(
        capture_source(config),
        config.segmenter_config(),
        config.calibrator(),
    )
}

/// Segmenter for `--input-wav`: audio arrives as whole utterances, so the
/// source stays silent and the static threshold replaces calibration.
pub(crate) fn file_segmenter(config: &AppConfig) -> Segmenter {
    let calibrator = config.calibrator();
    let fallback = calibrator.fallback();
    Segmenter::new(
        Arc::new(ScriptedSource::new(config.sample_rate)),
        config.segmenter_config(),
        calibrator,
    )
    .with_calibration(fallback)
}

/// Assemble state, engines and the action catalog around `segmenter`.
pub(crate) fn build_orchestrator(config: &AppConfig, segmenter: Segmenter) -> Result<Orchestrator> {
    let recognizer_cmd = config
        .recognizer_cmd
        .as_deref()
        .context("--recognizer-cmd (or VOXCMD_RECOGNIZER_CMD) is required")?;
    let brain_cmd = config
        .brain_cmd
        .as_deref()
        .context("--brain-cmd (or VOXCMD_BRAIN_CMD) is required")?;

    let state = Arc::new(PipelineState::new(config.language).with_watchdog(config.watchdog()));
    let registry =
        Arc::new(register_conversation_actions(ActionRegistry::builder(), state.clone()).build());
    tracing::info!(actions = registry.len(), "action registry ready");

    let recognizer =
        CommandRecognizer::new(CommandSpec::parse(recognizer_cmd)?, config.engine_timeout());
    let brain = CommandBrain::new(
        CommandSpec::parse(brain_cmd)?,
        registry.clone(),
        config.engine_timeout(),
    );
    let voices = Voices::spawn(
        synthesizer(config.tts_en_cmd.as_deref(), Language::En, config)?,
        synthesizer(config.tts_uk_cmd.as_deref(), Language::Uk, config)?,
        config.synth_timeout(),
    )
    .context("failed to start synthesizer workers")?;
    let playback = Arc::new(CpalPlayback::new(
        config.output_device.clone(),
        config.playback_timeout(),
    ));

    let collaborators = Collaborators {
        recognizer: Arc::new(recognizer),
        brain: Arc::new(brain),
        registry,
        voices,
        playback,
    };
    Ok(Orchestrator::new(
        state,
        segmenter,
        collaborators,
        config.orchestrator_config(),
    ))
}

fn synthesizer(
    command: Option<&str>,
    language: Language,
    config: &AppConfig,
) -> Result<Box<dyn Synthesizer>> {
    match command {
        Some(line) => Ok(Box::new(CommandSynthesizer::new(
            CommandSpec::parse(line)?,
            language,
            config.tts_sample_rate,
            config.synth_timeout(),
        ))),
        None => {
            tracing::info!(%language, "no synthesizer command; replies stay silent");
            Ok(Box::new(SilentSynthesizer))
        }
    }
}
