//! Command-line entry point: dataset generation and model training.

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use goku_net::prelude::*;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SystemKind {
    Pendulum,
    VanDerPol,
}

#[derive(Parser)]
#[command(name = "goku_net", version, about = "Generative latent-ODE model training")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a synthetic trajectory dataset
    Generate(GenerateArgs),
    /// Train a GOKU model on a dataset
    Train(TrainArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Dynamical system to simulate
    #[arg(long, value_enum, default_value_t = SystemKind::Pendulum)]
    system: SystemKind,

    /// Number of trajectories
    #[arg(long, default_value_t = 128)]
    samples: usize,

    /// Time steps per trajectory
    #[arg(long, default_value_t = 200)]
    time_steps: usize,

    /// Time grid spacing
    #[arg(long, default_value_t = 0.05)]
    dt: f64,

    /// Observation dimension
    #[arg(long, default_value_t = 64)]
    obs_dim: usize,

    /// Observation noise standard deviation
    #[arg(long, default_value_t = 0.01)]
    noise_std: f64,

    /// RNG seed
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Output path
    #[arg(long, default_value = "data/dataset.json")]
    output: String,
}

#[derive(Args)]
struct TrainArgs {
    /// Dynamical system the model wraps
    #[arg(long, value_enum, default_value_t = SystemKind::Pendulum)]
    system: SystemKind,

    /// Dataset path (regenerated with defaults when missing)
    #[arg(long, default_value = "data/dataset.json")]
    data: String,

    /// Learning rate
    #[arg(long, default_value_t = 1e-3)]
    lr: f64,

    /// Decoupled weight decay
    #[arg(long, default_value_t = 1e-5)]
    weight_decay: f64,

    #[arg(long, default_value_t = 16)]
    batch_size: usize,

    /// Training window length in time steps
    #[arg(long, default_value_t = 50)]
    seq_len: usize,

    #[arg(long, default_value_t = 100)]
    epochs: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Request an accelerator (falls back to CPU on host-only builds)
    #[arg(long)]
    gpu: bool,

    /// Decode posterior means instead of sampling
    #[arg(long)]
    deterministic: bool,

    /// Global gradient-norm clip (0 disables)
    #[arg(long, default_value_t = 5.0)]
    grad_clip: f64,

    /// KL annealing start weight
    #[arg(long, default_value_t = 0.0)]
    anneal_start: f64,

    /// KL annealing end weight
    #[arg(long, default_value_t = 1.0)]
    anneal_end: f64,

    /// Annealing cycles over the run
    #[arg(long, default_value_t = 4)]
    anneal_cycles: usize,

    /// Ramp fraction of each annealing cycle
    #[arg(long, default_value_t = 0.9)]
    anneal_ratio: f64,

    /// Enable the progressive sequence-length curriculum
    #[arg(long)]
    progressive: bool,

    /// Epochs over which the curriculum ramps to seq_len
    #[arg(long, default_value_t = 200)]
    progressive_duration: usize,

    /// Curriculum starting sequence length
    #[arg(long, default_value_t = 10)]
    start_seq_len: usize,

    /// Held-out validation samples
    #[arg(long, default_value_t = 8)]
    validation_samples: usize,

    /// Encoder feature dimension
    #[arg(long, default_value_t = 16)]
    feature_dim: usize,

    /// Recurrent hidden size
    #[arg(long, default_value_t = 32)]
    rnn_hidden: usize,

    /// Latent dimension of the initial-state group
    #[arg(long, default_value_t = 4)]
    latent_z0_dim: usize,

    /// Latent dimension of the parameter group
    #[arg(long, default_value_t = 4)]
    latent_theta_dim: usize,

    /// Write a truth-vs-reconstruction rollout after training
    #[arg(long)]
    viz: bool,

    /// Rollout length in time steps
    #[arg(long, default_value_t = 100)]
    viz_len: usize,

    /// Rollout output path
    #[arg(long, default_value = "viz/rollout.json")]
    viz_path: String,

    /// Best-checkpoint path
    #[arg(long, default_value = "checkpoints/goku_best.json")]
    checkpoint: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Generate(args) => match args.system {
            SystemKind::Pendulum => generate(Pendulum, &args),
            SystemKind::VanDerPol => generate(VanDerPol, &args),
        },
        Command::Train(args) => match args.system {
            SystemKind::Pendulum => train(Pendulum, &args),
            SystemKind::VanDerPol => train(VanDerPol, &args),
        },
    }
}

fn generate<S: DynamicalSystem>(system: S, args: &GenerateArgs) -> Result<()> {
    let config = GenerateConfig {
        samples: args.samples,
        time_steps: args.time_steps,
        dt: args.dt,
        obs_dim: args.obs_dim,
        noise_std: args.noise_std,
        seed: args.seed,
    };
    let dataset = TrajectoryDataset::generate(&system, &config)?;
    dataset.save(&args.output)?;
    Ok(())
}

fn train<S: DynamicalSystem>(system: S, args: &TrainArgs) -> Result<()> {
    let dataset = TrajectoryDataset::load_or_generate(&args.data, &system, &GenerateConfig::default())?;

    let model_config = ModelConfig {
        obs_dim: dataset.obs_dim(),
        feature_dim: args.feature_dim,
        rnn_hidden: args.rnn_hidden,
        latent_z0_dim: args.latent_z0_dim,
        latent_theta_dim: args.latent_theta_dim,
        state_dim: system.state_dim(),
        param_dim: system.param_dim(),
        device: Device::from_accelerator_flag(args.gpu),
        ..ModelConfig::default()
    };
    let training_config = TrainingConfig {
        learning_rate: args.lr,
        weight_decay: args.weight_decay,
        batch_size: args.batch_size,
        seq_len: args.seq_len,
        epochs: args.epochs,
        seed: args.seed,
        variational: !args.deterministic,
        grad_clip: args.grad_clip,
        anneal_start: args.anneal_start,
        anneal_end: args.anneal_end,
        anneal_cycles: args.anneal_cycles,
        anneal_ratio: args.anneal_ratio,
        progressive: args.progressive,
        progressive_duration: args.progressive_duration,
        start_seq_len: args.start_seq_len,
        validation_samples: args.validation_samples,
        viz_len: args.viz_len,
        viz_output: args.viz,
        checkpoint_path: args.checkpoint.clone(),
    };

    let mut rng = ChaCha8Rng::seed_from_u64(training_config.seed);
    let model = GokuModel::new(model_config, system, &mut rng)?;
    let mut trainer = Trainer::new(model, training_config.clone())?;
    let history = trainer.train(&dataset)?;

    if let Some(last) = history.last() {
        info!(
            final_train_loss = last.train_loss,
            best_validation = trainer.best_validation(),
            "training finished"
        );
    }

    if training_config.viz_output {
        let rollout = trainer.rollout(&dataset, training_config.viz_len)?;
        let path = std::path::Path::new(&args.viz_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(writer, &rollout)?;
        info!(path = %path.display(), "rollout written");
    }

    Ok(())
}
