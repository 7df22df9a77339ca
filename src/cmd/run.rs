use crate::reports;
use clap::Args;
use optobot::config::{ExperimentConfig, MeasurementMode};
use optobot::measure::{requested_volumes, MeasurementSource};
use optobot::objective::SquaredDistance;
use optobot::operator::{AutoConfirm, ConsoleOperator, Operator};
use optobot::optimizer::{SearchSpace, StrategyKind};
use optobot::store::create_experiment_dir;
use optobot::{LoopBuildParams, OptResult, OptobotError};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ExperimentConfig,

    /// Target measurement, one value per measured parameter.
    #[arg(long, value_delimiter = ',', required = true)]
    pub target: Vec<f64>,

    /// Volume bounds per non-diluent liquid, `lo:hi,lo:hi,...`.
    #[arg(long, default_value = "0:30,0:30,0:30")]
    pub search_space: SearchSpace,

    #[arg(long, default_value_t = StrategyKind::Pso)]
    pub optimiser: StrategyKind,

    /// Total iterations of the experiment, including any already recorded.
    #[arg(short = 'i', long, default_value_t = 8)]
    pub iterations: usize,

    #[arg(short = 'S', long)]
    pub seed: Option<u64>,

    /// Where new experiment directories are created.
    #[arg(short, long, default_value = "experiments")]
    pub output: PathBuf,

    /// Continue the experiment stored in this directory.
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Confirm every step automatically and use the requested volumes as the
    /// measurement.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

pub fn run(args: &RunArgs, mut config: ExperimentConfig) -> OptResult<()> {
    if args.dry_run {
        config.measurement_mode = MeasurementMode::Automatic;
    } else if config.measurement_mode == MeasurementMode::Automatic {
        return Err(OptobotError::Config(
            "automatic measurement needs a camera pipeline, which the command line cannot \
             provide; use manual measurement, --dry-run, or the library API"
                .to_string(),
        ));
    }
    config.validate()?;
    args.search_space.validate_for(&config)?;
    config.check_capacity(args.iterations)?;

    if args.target.len() != config.num_measured_parameters() {
        return Err(OptobotError::Config(format!(
            "target has {} values, but {} parameters are measured",
            args.target.len(),
            config.num_measured_parameters()
        )));
    }

    // 1. Experiment directory
    let exp_dir = match &args.resume {
        Some(dir) => dir.clone(),
        None => create_experiment_dir(&args.output, &config.name)?,
    };

    // 2. Collaborators
    let (measurement, operator): (MeasurementSource, Box<dyn Operator>) = if args.dry_run {
        warn!("Dry run: steps are confirmed automatically, volumes stand in for measurements");
        (
            MeasurementSource::user_supplied(requested_volumes),
            Box::new(AutoConfirm) as Box<dyn Operator>,
        )
    } else {
        (
            MeasurementSource::Manual,
            Box::new(ConsoleOperator::new()) as Box<dyn Operator>,
        )
    };

    let mut exp = LoopBuildParams::builder()
        .config(config.clone())
        .exp_dir(exp_dir)
        .objective(Box::new(SquaredDistance::new(args.target.clone())?))
        .measurement(measurement)
        .operator(operator)
        .build()
        .build_loop()?;

    // 3. Search
    let remaining = args.iterations.saturating_sub(exp.iteration());
    let outcome = if remaining == 0 {
        info!(
            "All {} iterations are already recorded; nothing to run",
            args.iterations
        );
        None
    } else {
        let mut strategy = args.optimiser.build(args.seed);
        Some(exp.optimise(strategy.as_mut(), &args.search_space, remaining)?)
    };

    // 4. Report
    reports::print_summary(&config, exp.store(), outcome.as_ref());
    Ok(())
}
