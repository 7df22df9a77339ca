use crate::reports;
use clap::Args;
use optobot::config::ExperimentConfig;
use optobot::OptResult;

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub config: ExperimentConfig,

    #[arg(short = 'i', long, default_value_t = 8)]
    pub iterations: usize,
}

pub fn run(args: &PlanArgs, config: &ExperimentConfig) -> OptResult<()> {
    config.validate()?;
    config.check_capacity(args.iterations)?;

    println!("\n🗺️  === WELL PLAN: {} === 🗺️", config.name);
    reports::print_plan(config, args.iterations)
}
