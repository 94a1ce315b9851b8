use std::{error::Error, fs, path::Path, path::PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use sgm_tune::io::save_preview;
use sgm_tune::logger::{init_with_level, level_from_verbosity};
use sgm_tune::{
    compute_disparity, read_image, write_disparity, MaskPolicy, Metric, ParameterTuner, Scene,
    SearchSpace, StereoPair, StereoParams, Strategy, TunerConfig,
};

/// Tune and evaluate semi-global block matching on Middlebury-style scenes.
#[derive(Debug, Parser)]
#[command(name = "sgm-tune", author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyKind {
    Grid,
    Random,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search parameters for every scene under a dataset directory
    Tune {
        /// Dataset root, or a single scene directory
        #[arg(long, value_name = "DIR")]
        data: PathBuf,

        /// Search space JSON. Defaults to the built-in reference grid
        #[arg(long, value_name = "FILE")]
        grid: Option<PathBuf>,

        /// Tuner configuration JSON; command-line flags override it
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Error metric: "mae" or "rmse"
        #[arg(long, value_name = "METRIC")]
        metric: Option<Metric>,

        /// Masking of invalid reference samples: "unmasked" or "exclude-invalid"
        #[arg(long, value_name = "POLICY")]
        mask: Option<MaskPolicy>,

        #[arg(long, value_enum)]
        strategy: Option<StrategyKind>,

        /// Number of random draws (default 200)
        #[arg(long, value_name = "N")]
        trials: Option<usize>,

        /// Seed for random draws (default 0)
        #[arg(long, value_name = "SEED")]
        seed: Option<u64>,

        /// Run trials one after another. Each running trial holds several
        /// rows x cols x numDisparities cost volumes; use this on full-size scenes
        #[arg(long)]
        sequential: bool,

        /// Write each scene's report to DIR/<scene>.json
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Report the error of one configuration on one scene
    Eval {
        /// Scene directory
        #[arg(long, value_name = "DIR")]
        scene: PathBuf,

        /// Parameter JSON. Defaults are used if omitted
        #[arg(long, value_name = "FILE")]
        params: Option<PathBuf>,

        #[arg(long, value_name = "POLICY", default_value = "unmasked")]
        mask: MaskPolicy,
    },

    /// Compute a disparity map for an image pair
    Disparity {
        #[arg(long, value_name = "FILE")]
        left: PathBuf,

        #[arg(long, value_name = "FILE")]
        right: PathBuf,

        /// Parameter JSON. Defaults are used if omitted
        #[arg(long, value_name = "FILE")]
        params: Option<PathBuf>,

        /// Output PFM
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,

        /// Optional 8-bit PNG rendering of the map
        #[arg(long, value_name = "FILE")]
        preview: Option<PathBuf>,
    },
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn Error>> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let value = serde_json::from_str(&data)?;
    Ok(value)
}

/// A bare parameter object, or a saved tuning report whose best parameters are used.
fn load_params(path: Option<&Path>) -> Result<StereoParams, Box<dyn Error>> {
    let path = match path {
        Some(p) => p,
        None => return Ok(StereoParams::default()),
    };
    let mut value: serde_json::Value = load_json_file(path)?;
    if let Some(best) = value.get_mut("best_params") {
        value = best.take();
    }
    Ok(serde_json::from_value(value)?)
}

const DEFAULT_TRIALS: usize = 200;

/// Apply command-line strategy flags on top of the configured strategy.
/// `trials` and `seed` refine any random strategy, configured or selected.
fn resolve_strategy(
    configured: Strategy,
    kind: Option<StrategyKind>,
    trials: Option<usize>,
    seed: Option<u64>,
) -> Strategy {
    let base = match (kind, configured) {
        (Some(StrategyKind::Grid), _) => return Strategy::Grid,
        (Some(StrategyKind::Random), Strategy::Grid) => Strategy::Random {
            trials: DEFAULT_TRIALS,
            seed: 0,
        },
        (_, current) => current,
    };
    match base {
        Strategy::Random {
            trials: configured_trials,
            seed: configured_seed,
        } => Strategy::Random {
            trials: trials.unwrap_or(configured_trials),
            seed: seed.unwrap_or(configured_seed),
        },
        Strategy::Grid => Strategy::Grid,
    }
}

#[allow(clippy::too_many_arguments)]
fn run_tune(
    data: &Path,
    grid: Option<&Path>,
    config_path: Option<&Path>,
    metric: Option<Metric>,
    mask: Option<MaskPolicy>,
    strategy: Option<StrategyKind>,
    trials: Option<usize>,
    seed: Option<u64>,
    sequential: bool,
    out: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let mut config = match config_path {
        Some(p) => TunerConfig::from_json_file(p)?,
        None => TunerConfig::default(),
    };
    if let Some(metric) = metric {
        config.metric = metric;
    }
    if let Some(mask) = mask {
        config.mask = mask;
    }
    config.strategy = resolve_strategy(config.strategy, strategy, trials, seed);
    if sequential {
        config.parallel = false;
    }

    let space = match (grid, config.strategy) {
        (Some(p), _) => SearchSpace::from_json_file(p)?,
        (None, Strategy::Grid) => SearchSpace::reference_grid(),
        (None, Strategy::Random { .. }) => SearchSpace::reference_ranges(),
    };

    let scenes = Scene::discover(data)?;
    if scenes.is_empty() {
        return Err(format!("no scenes found under {}", data.display()).into());
    }
    if let Some(dir) = out {
        fs::create_dir_all(dir).map_err(|e| format!("failed to create {}: {}", dir.display(), e))?;
    }

    let tuner = ParameterTuner::new(config);
    for scene in &scenes {
        let loaded = scene.load()?;
        let (gt_left, gt_right) = (loaded.gt_left.data.view(), loaded.gt_right.data.view());

        let base = tuner.config().base;
        let baseline = match tuner.evaluate(&loaded.pair, gt_left.clone(), gt_right.clone(), &base) {
            Ok(e) => Some(e),
            Err(e) if e.is_trial_recoverable() => {
                warn!("{}: base parameters rejected: {}", scene.name, e);
                None
            }
            Err(e) => return Err(e.into()),
        };
        let report = tuner.tune(&loaded.pair, gt_left, gt_right, &space)?;

        match baseline {
            Some(b) => println!("{}: baseline {} {:.4}", scene.name, report.metric, b),
            None => println!("{}: baseline n/a", scene.name),
        }
        println!("{}: {}", scene.name, report);

        if let Some(dir) = out {
            let path = dir.join(format!("{}.json", scene.name));
            let json = serde_json::to_string_pretty(&report)?;
            fs::write(&path, json).map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
            info!("wrote {}", path.display());
        }
    }
    Ok(())
}

fn run_eval(scene: &Path, params: Option<&Path>, mask: MaskPolicy) -> Result<(), Box<dyn Error>> {
    let params = load_params(params)?;
    let loaded = Scene::new(scene).load()?;
    let disparity = mask.mask_estimate(
        compute_disparity(&loaded.pair, &params)?,
        params.unmatched_disparity(),
    );

    println!("{}", params);
    for metric in [Metric::Mae, Metric::Rmse] {
        let left = metric.evaluate(disparity.view(), loaded.gt_left.data.view(), mask)?;
        let right = metric.evaluate(disparity.view(), loaded.gt_right.data.view(), mask)?;
        println!(
            "{}: disp0 {:.4} disp1 {:.4} mean {:.4}",
            metric,
            left,
            right,
            (left + right) / 2.0
        );
    }
    Ok(())
}

fn run_disparity(
    left: &Path,
    right: &Path,
    params: Option<&Path>,
    out: &Path,
    preview: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let params = load_params(params)?;
    let pair = StereoPair::from_images(&read_image(left)?, &read_image(right)?)?;
    let disparity = compute_disparity(&pair, &params)?;
    write_disparity(out, &disparity)?;
    info!("wrote {}", out.display());

    if let Some(p) = preview {
        save_preview(p, &disparity, params.unmatched_disparity())?;
        info!("wrote {}", p.display());
    }
    Ok(())
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_with_level(level_from_verbosity(cli.verbose))?;

    match cli.command {
        Command::Tune {
            data,
            grid,
            config,
            metric,
            mask,
            strategy,
            trials,
            seed,
            sequential,
            out,
        } => run_tune(
            &data,
            grid.as_deref(),
            config.as_deref(),
            metric,
            mask,
            strategy,
            trials,
            seed,
            sequential,
            out.as_deref(),
        ),
        Command::Eval {
            scene,
            params,
            mask,
        } => run_eval(&scene, params.as_deref(), mask),
        Command::Disparity {
            left,
            right,
            params,
            out,
            preview,
        } => run_disparity(&left, &right, params.as_deref(), &out, preview.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn tune_flags_parse() {
        let cli = Cli::try_parse_from([
            "sgm-tune", "-vv", "tune", "--data", "scenes", "--metric", "mae", "--strategy",
            "random", "--trials", "5", "--seed", "7", "--sequential",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Tune {
                metric,
                strategy,
                trials,
                seed,
                sequential,
                ..
            } => {
                assert_eq!(metric, Some(Metric::Mae));
                assert_eq!(strategy, Some(StrategyKind::Random));
                assert_eq!((trials, seed, sequential), (Some(5), Some(7), true));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn trial_flags_refine_a_configured_random_strategy() {
        let configured = Strategy::Random { trials: 10, seed: 3 };
        assert_eq!(
            resolve_strategy(configured, None, Some(50), None),
            Strategy::Random { trials: 50, seed: 3 }
        );
        assert_eq!(
            resolve_strategy(configured, None, None, Some(8)),
            Strategy::Random { trials: 10, seed: 8 }
        );
        assert_eq!(
            resolve_strategy(Strategy::Grid, Some(StrategyKind::Random), None, Some(4)),
            Strategy::Random { trials: DEFAULT_TRIALS, seed: 4 }
        );
        assert_eq!(
            resolve_strategy(configured, Some(StrategyKind::Grid), Some(50), None),
            Strategy::Grid
        );
        assert_eq!(resolve_strategy(Strategy::Grid, None, Some(50), None), Strategy::Grid);
    }

    #[test]
    fn unknown_metric_is_rejected() {
        assert!(Cli::try_parse_from(["sgm-tune", "tune", "--data", "d", "--metric", "psnr"]).is_err());
    }

    #[test]
    fn params_load_from_a_saved_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.json");
        let json = r#"{"best_params": {"blockSize": 9, "mode": "HH"}, "best_error": 1.0}"#;
        fs::write(&path, json).unwrap();

        let params = load_params(Some(&path)).unwrap();
        assert_eq!(params.block_size, 9);
        assert_eq!(params.mode, sgm_tune::MatcherMode::Hh);
        assert_eq!(params.num_disparities, StereoParams::default().num_disparities);
    }

    #[test]
    fn missing_params_file_is_reported() {
        let err = load_params(Some(Path::new("/definitely/not/here.json"))).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
