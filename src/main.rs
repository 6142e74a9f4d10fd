use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::path::PathBuf;
use std::time::Instant;

use elevator_parking::config::{ForecastModel, PipelineConfig};
use elevator_parking::forecast::{build_forecaster, evaluate};
use elevator_parking::io;
use elevator_parking::metrics::METRICS;
use elevator_parking::models::TrafficState;
use elevator_parking::parallel::ParallelRunner;
use elevator_parking::pipeline::{ClassifierKind, InputFiles, PreparedData};
use elevator_parking::simulator::{Backtest, BacktestRun};
use elevator_parking::stress::{default_scenarios, STRESS_SEED};
use elevator_parking::time_operation;

#[derive(Parser, Debug)]
#[command(name = "elevator_parking")]
#[command(about = "Demand-driven elevator parking: traffic states, forecasts, parking plans and backtests", long_about = None)]
struct Cli {
    /// JSON pipeline configuration; defaults plus ELEVATOR_* overrides when absent
    #[arg(long, global = true, env = "ELEVATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for CSV/JSON outputs
    #[arg(long, global = true, default_value = "output")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct InputArgs {
    /// Hall-call CSV (required)
    #[arg(long)]
    hall_calls: PathBuf,
    #[arg(long)]
    car_calls: Option<PathBuf>,
    #[arg(long)]
    car_stops: Option<PathBuf>,
    #[arg(long)]
    departures: Option<PathBuf>,
    #[arg(long)]
    load_changes: Option<PathBuf>,
    #[arg(long)]
    maintenance: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ClassifierArg::Rules)]
    classifier: ClassifierArg,
}

impl InputArgs {
    fn files(&self) -> InputFiles {
        InputFiles {
            hall_calls: self.hall_calls.clone(),
            car_calls: self.car_calls.clone(),
            car_stops: self.car_stops.clone(),
            departures: self.departures.clone(),
            load_changes: self.load_changes.clone(),
            maintenance: self.maintenance.clone(),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ClassifierArg {
    Rules,
    Kmeans,
}

impl From<ClassifierArg> for ClassifierKind {
    fn from(arg: ClassifierArg) -> Self {
        match arg {
            ClassifierArg::Rules => ClassifierKind::Rules,
            ClassifierArg::Kmeans => ClassifierKind::KMeans,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModelArg {
    BaselineAr,
    BoostedTrees,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Label every bucket with a traffic state
    Classify {
        #[command(flatten)]
        inputs: InputArgs,
    },
    /// Fit a forecaster on the training window and score the validation window
    Forecast {
        #[command(flatten)]
        inputs: InputArgs,
        /// Overrides forecast.model from the configuration
        #[arg(long, value_enum)]
        model: Option<ModelArg>,
    },
    /// Parking plan for one traffic state and idle fleet
    Plan {
        #[command(flatten)]
        inputs: InputArgs,
        /// Traffic state label, e.g. "Morning Up-Peak" or morning_up_peak
        #[arg(long)]
        state: String,
        /// Idle cars as id:floor; defaults to every car at its last recorded stop
        #[arg(long, value_delimiter = ',')]
        idle: Vec<String>,
    },
    /// Replay the history under every parking policy
    Backtest {
        #[command(flatten)]
        inputs: InputArgs,
        /// Only replay the last N days
        #[arg(long)]
        last_days: Option<i64>,
    },
    /// Replay stress scenarios under every parking policy in parallel
    Stress {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long)]
        last_days: Option<i64>,
        /// Worker threads, defaults to the CPU count
        #[arg(long)]
        workers: Option<usize>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(p) => {
            let mut config = PipelineConfig::load(p)
                .with_context(|| format!("Failed to load configuration from {}", p.display()))?;
            config.apply_env().context("Invalid ELEVATOR_* override")?;
            Ok(config)
        }
        None => PipelineConfig::from_env().context("Invalid ELEVATOR_* override"),
    }
}

fn prepare(config: PipelineConfig, inputs: &InputArgs) -> Result<PreparedData> {
    PreparedData::load(config, &inputs.files())
        .with_context(|| format!("Failed to prepare events from {}", inputs.hall_calls.display()))
}

fn parse_idle(raw: &[String]) -> Result<Vec<(u32, i32)>> {
    raw.iter()
        .map(|entry| {
            let (id, floor) = entry
                .split_once(':')
                .with_context(|| format!("Idle car '{}' is not id:floor", entry))?;
            let id: u32 = id.trim().parse().with_context(|| format!("Bad car id in '{}'", entry))?;
            let floor: i32 = floor.trim().parse().with_context(|| format!("Bad floor in '{}'", entry))?;
            Ok((id, floor))
        })
        .collect()
}

fn record_epochs(runs: &[BacktestRun]) {
    let mut metrics = METRICS.lock();
    for run in runs {
        let planned = run.buckets.len() as u64;
        metrics.record_epochs(planned, run.summary.failed_epochs as u64);
    }
}

fn run_classify(cli: &Cli, inputs: &InputArgs) -> Result<()> {
    let data = prepare(load_config(cli.config.as_ref())?, inputs)?;
    let classifier = data.build_classifier(inputs.classifier.into());
    let timeline = time_operation!("classify", data.timeline(classifier.as_ref()));

    for state in TrafficState::ALL {
        let n = timeline.iter().filter(|(_, s)| *s == state).count();
        info!("{}: {} buckets", state, n);
    }
    let path = io::write_states(&cli.output_dir, &timeline)?;
    println!("States written to {}", path.display());
    Ok(())
}

fn run_forecast(cli: &Cli, inputs: &InputArgs, model: Option<ModelArg>) -> Result<()> {
    let mut config = load_config(cli.config.as_ref())?;
    if let Some(model) = model {
        config.forecast.model = match model {
            ModelArg::BaselineAr => ForecastModel::BaselineAr,
            ModelArg::BoostedTrees => ForecastModel::BoostedTrees,
        };
    }
    let data = prepare(config, inputs)?;
    let mut forecaster = build_forecaster(&data.config.forecast, &data.config.features);
    let (report, points) = time_operation!(
        "forecast",
        evaluate(
            forecaster.as_mut(),
            &data.features,
            data.config.forecast.train_fraction,
            data.bucket_minutes(),
        )
    )
    .context("Forecast evaluation failed")?;
    METRICS.lock().record_forecast_fallbacks(report.fallbacks as u64);

    println!(
        "{} (h={}): MAE {:.3}  RMSE {:.3}",
        report.model, report.horizon, report.mae, report.rmse
    );
    println!(
        "baseline only:      MAE {:.3}  RMSE {:.3}",
        report.baseline_mae, report.baseline_rmse
    );
    println!(
        "validation buckets: {} (from {}), fallbacks: {}",
        report.n_validation, report.validation_start, report.fallbacks
    );
    let (csv_path, json_path) = io::write_forecast(&cli.output_dir, &points, &report)?;
    println!("Forecasts written to {} and {}", csv_path.display(), json_path.display());
    Ok(())
}

fn run_plan(cli: &Cli, inputs: &InputArgs, state: &str, idle: &[String]) -> Result<()> {
    let state: TrafficState = state.parse().map_err(anyhow::Error::msg)?;
    let data = prepare(load_config(cli.config.as_ref())?, inputs)?;
    let idle = if idle.is_empty() {
        data.current_fleet()
    } else {
        parse_idle(idle)?
    };

    let classifier = data.build_classifier(inputs.classifier.into());
    let timeline = data.timeline(classifier.as_ref());
    let profile = data.profile(&timeline);
    let plan = time_operation!("plan", data.optimizer().plan(state, &idle, &profile))
        .with_context(|| format!("No parking plan for {}", state))?;

    println!("{}: targets {:?}, cost {:.4}", state, plan.targets, plan.cost);
    for a in &plan.assignments {
        println!("  car {} : {} -> {}", a.elevator_id, a.from_floor, a.target_floor);
    }
    let path = io::write_plan(&cli.output_dir, &plan)?;
    println!("Plan written to {}", path.display());
    Ok(())
}

fn run_backtest(cli: &Cli, inputs: &InputArgs, last_days: Option<i64>, workers: Option<usize>, stress: bool) -> Result<()> {
    let data = prepare(load_config(cli.config.as_ref())?, inputs)?;
    let classifier = data.build_classifier(inputs.classifier.into());
    let timeline = time_operation!("classify", data.timeline(classifier.as_ref()));
    let profile = data.profile(&timeline);
    let optimizer = data.optimizer();

    let forecasts = if data.config.simulation.use_forecast {
        let mut forecaster = build_forecaster(&data.config.forecast, &data.config.features);
        let split = (data.features.len() as f64 * data.config.forecast.train_fraction).floor() as usize;
        match forecaster.fit(&data.features[..split]) {
            Ok(()) => Some(time_operation!("forecast", data.rolling_forecasts(forecaster.as_ref()))),
            Err(e) => {
                warn!("Forecaster could not be fitted, replaying without forecasts: {}", e);
                None
            }
        }
    } else {
        None
    };

    let start = data.replay_start(last_days);
    let window = &data.features[start..];
    if window.is_empty() {
        bail!("No buckets in the replay window");
    }
    let mut backtest = Backtest::new(
        window,
        &data.events,
        classifier.as_ref(),
        &profile,
        &optimizer,
        data.sim_params(),
        data.bucket_minutes(),
    );
    if let Some(f) = &forecasts {
        backtest = backtest.with_forecasts(&f[start..]);
    }

    let runner = match workers {
        Some(n) => ParallelRunner::with_workers(n),
        None => ParallelRunner::new(),
    };
    let started = Instant::now();
    if stress {
        let runs = time_operation!(
            "stress",
            runner.run_scenarios(&backtest, &default_scenarios(), STRESS_SEED)
        );
        let runs_only: Vec<BacktestRun> = runs.iter().map(|r| r.run.clone()).collect();
        record_epochs(&runs_only);
        println!("{:<14} {:<14} {:>8} {:>9} {:>9} {:>9}", "scenario", "policy", "calls", "AWT", "P95", "long%");
        for r in &runs {
            let s = &r.run.summary;
            println!(
                "{:<14} {:<14} {:>8} {:>9.2} {:>9.2} {:>9.2}",
                r.scenario, s.policy, s.calls, s.awt_s, s.p95_wait_s, s.long_wait_rate * 100.0
            );
        }
        let path = io::write_stress(&cli.output_dir, &runs)?;
        println!("Stress summary written to {}", path.display());
    } else {
        let runs = time_operation!("backtest", runner.run_policies(&backtest));
        record_epochs(&runs);
        println!("{:<14} {:>8} {:>9} {:>9} {:>9} {:>9}", "policy", "calls", "AWT", "P95", "P99", "long%");
        for r in &runs {
            let s = &r.summary;
            println!(
                "{:<14} {:>8} {:>9.2} {:>9.2} {:>9.2} {:>9.2}",
                s.policy, s.calls, s.awt_s, s.p95_wait_s, s.p99_wait_s, s.long_wait_rate * 100.0
            );
        }
        let (summary, buckets) = io::write_backtest(&cli.output_dir, &runs)?;
        println!("Backtest written to {} and {}", summary.display(), buckets.display());
    }
    info!("Replays finished in {:.2?}", started.elapsed());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match &cli.command {
        Command::Classify { inputs } => run_classify(&cli, inputs)?,
        Command::Forecast { inputs, model } => run_forecast(&cli, inputs, *model)?,
        Command::Plan { inputs, state, idle } => run_plan(&cli, inputs, state, idle)?,
        Command::Backtest { inputs, last_days } => run_backtest(&cli, inputs, *last_days, None, false)?,
        Command::Stress {
            inputs,
            last_days,
            workers,
        } => run_backtest(&cli, inputs, *last_days, *workers, true)?,
    }

    METRICS.lock().print_summary();
    Ok(())
}
