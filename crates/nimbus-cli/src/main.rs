//! nimbus CLI

mod config;
mod inputs;
mod skymap;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nimbus_core::{Filter, LightCurveModel};
use nimbus_inference::{
    AppendFileSink, BandMode, ExtinctionCorrector, FailurePolicy, FieldLikelihoodBuilder,
    LikelihoodSink, TimeWindow, build_series, evaluate_batch,
};

use crate::config::{RunConfig, read_run_config};

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(about = "nimbus - kilonova likelihoods from survey magnitude limits")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Likelihood of every posterior sample for one survey field
    Field(FieldArgs),

    /// Print version information
    Version,
}

#[derive(clap::Args)]
struct FieldArgs {
    /// Survey field id
    #[arg(long)]
    field: i64,

    /// Observation log (CSV: field,jd,fid,status,scimaglim)
    #[arg(long)]
    data_file: PathBuf,

    /// Survey field table (CSV: field_ID,ebv,A_g,A_r,A_i,ipix)
    #[arg(long)]
    survey_file: PathBuf,

    /// Field localization (JSON: field probability and distance density)
    #[arg(long)]
    skymap_file: PathBuf,

    /// Parameter samples, one whitespace-separated vector per line
    #[arg(long)]
    sample_file: PathBuf,

    /// Start of the observation window (ISOT, UTC); reference time of the light curves
    #[arg(long)]
    t_start: String,

    /// End of the observation window (ISOT, UTC)
    #[arg(long)]
    t_end: String,

    /// Analyze a single band built from every valid epoch of the field
    #[arg(long)]
    single_band: bool,

    /// Output prefix; likelihoods are appended to `<output-str><field>.txt`
    #[arg(long)]
    output_str: String,

    /// Run configuration (YAML, or JSON with a .json extension)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads (0 = all cores). Overrides the config file.
    #[arg(long)]
    threads: Option<usize>,

    /// Per-sample failure handling: skip or abort. Overrides the config file.
    #[arg(long)]
    failure_policy: Option<FailurePolicy>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Field(args) => cmd_field(args),
        Commands::Version => {
            println!("nimbus {}", nimbus_core::VERSION);
            Ok(())
        }
    }
}

fn cmd_field(args: FieldArgs) -> Result<()> {
    let mut cfg = match &args.config {
        Some(path) => read_run_config(path)?,
        None => RunConfig::default(),
    };
    if let Some(threads) = args.threads {
        cfg.threads = threads;
    }
    if let Some(policy) = args.failure_policy {
        cfg.failure_policy = policy;
    }

    let survey = inputs::read_survey(&args.survey_file)?;
    let field = inputs::find_field(&survey, args.field)?;
    field.ensure_analyzable(cfg.extinction_threshold)?;
    tracing::info!(field = args.field, ebv = field.ebv, ipix = field.ipix, "survey file read");

    let t_start = inputs::isot_to_jd(&args.t_start).context("--t-start")?;
    let t_end = inputs::isot_to_jd(&args.t_end).context("--t-end")?;
    let window = TimeWindow::new(t_start, t_end)?;

    let observations = inputs::read_observations(&args.data_file)?;
    let mode = if args.single_band { BandMode::Single } else { BandMode::Multi };
    let corrector = ExtinctionCorrector::for_field(field);
    let series = build_series(&observations, args.field, window, mode, &corrector)?;
    for s in &series {
        tracing::info!(filter = %s.filter(), epochs = s.len(), "magnitude-limit series");
    }

    let localization =
        skymap::read_localization(&args.skymap_file, cfg.distance_bounds, &cfg.quadrature.inner)?;
    tracing::info!(field_probability = localization.field_probability(), "localization read");

    let mut builder = FieldLikelihoodBuilder::new(localization, window.start())
        .with_config(cfg.likelihood_config())
        .with_all_series(series);
    for filter in Filter::ALL {
        let model: Arc<dyn LightCurveModel> = Arc::from(cfg.light_curve.model_for(filter));
        builder = builder.with_light_curve(filter, model);
    }
    let likelihood = builder.build().context("failed to set up the field likelihood")?;
    tracing::info!(
        normalization_factors = likelihood.normalization().len(),
        "normalization computed"
    );

    let samples = inputs::read_samples(&args.sample_file)?;
    let batch = evaluate_batch(&likelihood, &samples, &cfg.batch_config())?;

    let failures = batch.failures();
    if !failures.is_empty() {
        tracing::warn!(
            failed = failures.len(),
            samples = batch.len(),
            "some samples failed and were written as nan"
        );
    }

    let mut sink = AppendFileSink::for_field(&args.output_str, args.field);
    sink.write_batch(&batch).with_context(|| format!("failed to write {}", sink.path().display()))?;
    tracing::info!(samples = batch.len(), output = %sink.path().display(), "likelihoods appended");
    Ok(())
}
