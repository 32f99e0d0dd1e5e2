/// Analyze one video and record an alert when it shows an anomaly
///
/// Usage:
///   cargo run --release --example analyze_video <config.toml> <video> [location] [date] [time] [coords]
///   cargo run --release --features onnx,opencv --example analyze_video config.toml clip.mp4
///
/// Anchoring credentials are read from PINATA_API_KEY and
/// PINATA_SECRET_API_KEY. The evidence outcome is printed as JSON on stdout.
use anyhow::{bail, Context, Result};
use crime_detector::config::AnalyzerConfig;
use crime_detector::evidence::EvidencePipeline;
use crime_detector::evidence_pool::{EvidenceJob, EvidencePool};
use crime_detector::extractor::{FeatureExtractor, ProjectionExtractor};
use crime_detector::pipeline::AnalysisPipeline;
use crime_detector::{AlertMetadata, AutoDecoder, DecodeHint, JsonLinesAlertStore, PinataAnchor, SourceVideo};
use serde_json::json;
use sgattn::{AttentionScorer, Scorer};
use std::env;
use std::sync::Arc;

fn build_extractor(config: &AnalyzerConfig) -> Result<Arc<dyn FeatureExtractor>> {
    #[cfg(feature = "onnx")]
    if let Some(path) = &config.model.extractor_path {
        let extractor = crime_detector::extractor::OnnxFeatureExtractor::new(path)
            .with_context(|| format!("loading backbone {}", path.display()))?;
        return Ok(Arc::new(extractor));
    }

    #[cfg(not(feature = "onnx"))]
    if config.model.extractor_path.is_some() {
        log::warn!("extractor_path is set but this build has no `onnx` feature; using the projection backbone");
    }

    Ok(Arc::new(ProjectionExtractor::new(config.model.variant.spec(), 0)))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <config.toml> <video> [location] [date] [time] [coords]", args[0]);
    }
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();

    let config = AnalyzerConfig::from_file(&args[1]).with_context(|| format!("reading {}", args[1]))?;
    config.validate().context("invalid configuration")?;
    log::info!("Crime detector v{}", crime_detector::version());

    let weights_path = config
        .model
        .weights_path
        .as_ref()
        .context("[model] weights_path is required")?;
    let scorer: Arc<dyn Scorer> = Arc::new(
        AttentionScorer::from_file(weights_path, config.model.variant.spec(), config.model.fusion)
            .with_context(|| format!("loading weights {}", weights_path.display()))?,
    );
    let extractor = build_extractor(&config)?;
    let pipeline = AnalysisPipeline::new(&config, extractor, scorer)?;

    let anchor = PinataAnchor::from_env(&config.anchor).context("anchor service credentials")?;
    let store = JsonLinesAlertStore::open(&config.evidence.record_store)
        .with_context(|| format!("opening {}", config.evidence.record_store.display()))?;
    let evidence = Arc::new(
        EvidencePipeline::new(Arc::new(anchor), Arc::new(store))
            .with_anchor_retries(config.evidence.anchor_retries)
            .with_transient_cleanup(config.evidence.delete_transient),
    );
    let pool = EvidencePool::new(config.evidence.workers, config.evidence.queue_depth, evidence)?;

    let source = SourceVideo::from_file(&args[2]).with_context(|| format!("reading {}", args[2]))?;
    let hint = DecodeHint::from_path(&args[2]);
    let report = pipeline
        .analyze_bytes(&source.bytes, &hint, &AutoDecoder)
        .with_context(|| format!("analyzing {}", args[2]))?;

    let metadata = AlertMetadata {
        location: arg(3),
        date: arg(4),
        time: arg(5),
        coordinates: arg(6),
    };
    let ticket = pool.submit(EvidenceJob {
        decision: report.decision.clone(),
        source,
        metadata,
    })?;
    let outcome = ticket.wait()?;

    let output = json!({
        "video": args[2],
        "decision": report.decision,
        "timing": report.timing,
        "evidence": outcome,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
