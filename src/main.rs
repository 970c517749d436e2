use femto_charnn::callbacks::{CheckpointSaver, MetricsRecorder, SampleLogger};
use femto_charnn::io::{make_dirs, read_text_prefix};
use femto_charnn::model::build_inference_model;
use femto_charnn::seed::DEFAULT_SEED_LENGTHS;
use femto_charnn::{
    fit, generate, generate_seed, BatchShape, BatchSource, Callback, GenerateConfig, HashedNGram,
    ModelConfig, Restore, SeedSource, SequenceBatcher, SequenceModel, StreamingBatcher,
    SymbolCodec, TextGenError, TrainConfig, TrainLogs, Validation, VOCAB_SIZE,
};

use clap::{Args, Parser, Subcommand};
use rand::thread_rng;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

// --- Configuration Structs ---

#[derive(Args, Debug, Clone)]
struct ModelArgs {
    #[clap(long, default_value = "4", help = "Number of previous characters the model conditions on")]
    order: usize,
    #[clap(long, default_value = "16384", help = "Rows of the hashed context table")]
    buckets: usize,
    #[clap(long, default_value = "0.01", help = "Additive smoothing of context counts")]
    smoothing: f32,
}

impl From<ModelArgs> for ModelConfig {
    fn from(args: ModelArgs) -> Self {
        Self {
            order: args.order,
            buckets: args.buckets,
            smoothing: args.smoothing,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct TrainArgs {
    #[clap(long, help = "Path to save or load model checkpoints")]
    checkpoint_path: PathBuf,
    #[clap(long, help = "Path of the text file to train on")]
    text_path: PathBuf,
    #[clap(
        long,
        value_name = "PATH",
        help = "Restore from the checkpoint path, or from PATH if given"
    )]
    restore: Option<Option<PathBuf>>,
    #[clap(long, default_value = "64", help = "Lanes per training batch")]
    batch_size: usize,
    #[clap(long, default_value = "64", help = "Sequence length of inputs and targets")]
    seq_len: usize,
    #[clap(long, default_value = "32", help = "Number of epochs to train")]
    num_epochs: usize,
    #[clap(long, default_value = "0.2", help = "Leading share of the text held out for validation")]
    validation_split: f64,
    #[clap(
        long,
        help = "Stream the text in chunks of this many bytes instead of loading it (disables validation)"
    )]
    stream_chunk_bytes: Option<usize>,
    #[clap(long, default_value = "512", help = "Characters sampled after every epoch")]
    sample_length: usize,
    #[clap(long, default_value = "10", help = "Sampling width after every epoch")]
    sample_top_n: usize,
    #[clap(long, default_value = "1024", help = "Characters sampled when training ends")]
    final_sample_length: usize,
    #[clap(long, default_value = "3", help = "Sampling width when training ends")]
    final_sample_top_n: usize,
}

impl From<TrainArgs> for TrainConfig {
    fn from(args: TrainArgs) -> Self {
        let restore = match args.restore {
            None => Restore::No,
            Some(None) => Restore::FromCheckpoint,
            Some(Some(path)) => Restore::From(path),
        };
        Self {
            text_path: args.text_path,
            checkpoint_path: args.checkpoint_path,
            restore,
            batch_size: args.batch_size,
            seq_len: args.seq_len,
            num_epochs: args.num_epochs,
            validation_split: args.validation_split,
            stream_chunk_bytes: args.stream_chunk_bytes,
            sample_length: args.sample_length,
            sample_top_n: args.sample_top_n,
            final_sample_length: args.final_sample_length,
            final_sample_top_n: args.final_sample_top_n,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct GenerateArgs {
    #[clap(long, help = "Path to load the model checkpoint from")]
    checkpoint_path: PathBuf,
    #[clap(
        long,
        required_unless_present = "seed",
        conflicts_with = "seed",
        help = "Text file to draw a random seed from"
    )]
    text_path: Option<PathBuf>,
    #[clap(long, help = "Seed character sequence")]
    seed: Option<String>,
    #[clap(long, default_value = "1024", help = "Number of characters to generate")]
    length: usize,
    #[clap(long, default_value = "3", help = "Number of top choices to sample from")]
    top_n: usize,
}

impl TryFrom<GenerateArgs> for GenerateConfig {
    type Error = TextGenError;

    fn try_from(args: GenerateArgs) -> Result<Self, Self::Error> {
        let seed = match (args.seed, args.text_path) {
            (Some(seed), _) => SeedSource::Literal(seed),
            (None, Some(path)) => SeedSource::TextFile(path),
            (None, None) => {
                return Err(TextGenError::Config("either --seed or --text-path is required".into()))
            }
        };
        Ok(Self {
            checkpoint_path: args.checkpoint_path,
            seed,
            length: args.length,
            top_n: args.top_n,
        })
    }
}

// --- CLI Commands ---

#[derive(Parser, Debug)]
#[clap(author, version, about = "Character-level recurrent text generation", long_about = None)]
struct Cli {
    #[clap(long, global = true, help = "Also write log output to this file")]
    log_path: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model on a text file
    Train {
        #[clap(flatten)]
        model_args: ModelArgs,
        #[clap(flatten)]
        train_args: TrainArgs,
    },
    /// Generate text from a trained model
    Generate {
        #[clap(flatten)]
        generate_args: GenerateArgs,
    },
}

// --- Custom Error Type ---

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    TextGen(#[from] TextGenError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("logger error: {0}")]
    Logger(#[from] log::SetLoggerError),
}

// --- Logging ---

/// Copies every log line to stderr and to a file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logger(log_path: Option<&Path>) -> Result<(), AppError> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_path {
        make_dirs(path, false, &[])?;
        let file = File::create(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    }
    builder.try_init()?;
    Ok(())
}

// --- Main Logic ---

fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_logger(cli.log_path.as_deref())?;

    match cli.command {
        Command::Train { model_args, train_args } => {
            run_training(model_args.into(), train_args.into(), cli.log_path.as_deref())?;
        }
        Command::Generate { generate_args } => {
            let text = run_generation(generate_args.try_into()?)?;
            println!("{}", text);
        }
    }

    Ok(())
}

// --- Training Logic ---

/// Splits `text` at character `floor(len * split)`: `(validation, training)`.
fn split_text(text: &str, split: f64) -> (&str, &str) {
    let num_chars = text.chars().count();
    let val_chars = (num_chars as f64 * split).floor() as usize;
    let at = text.char_indices().nth(val_chars).map_or(text.len(), |(i, _)| i);
    text.split_at(at)
}

fn load_or_build_model(model_config: ModelConfig, config: &TrainConfig) -> Result<HashedNGram, TextGenError> {
    let Some(path) = config.restore_path() else {
        return HashedNGram::new(model_config, config.batch_size, VOCAB_SIZE);
    };
    let model = HashedNGram::load(&path)?;
    if model.vocab_size() != VOCAB_SIZE {
        log::warn!(
            "restored model has vocabulary size {}, codec has {}",
            model.vocab_size(),
            VOCAB_SIZE
        );
    }
    if model.batch_size() != config.batch_size {
        log::warn!(
            "restored model has batch size {}, ignoring --batch-size {}",
            model.batch_size(),
            config.batch_size
        );
    }
    Ok(model)
}

/// Batch sources and seed text for one training run.
struct TrainingData {
    train: Box<dyn BatchSource>,
    steps_per_epoch: usize,
    held_out: Option<(SequenceBatcher, usize)>,
    seed_text: String,
}

fn load_training_data(config: &TrainConfig, shape: BatchShape) -> Result<TrainingData, TextGenError> {
    let codec = SymbolCodec::new();

    if let Some(chunk_bytes) = config.stream_chunk_bytes {
        let batcher = StreamingBatcher::open(&config.text_path, chunk_bytes, shape)?;
        let steps = batcher.batches_per_pass();
        if steps == 0 {
            return Err(TextGenError::InsufficientData {
                available: chunk_bytes.min(batcher.total_size() as usize),
                batch_size: shape.batch_size,
                seq_len: shape.seq_len,
                hint: "use a larger --stream-chunk-bytes or a smaller batch",
            });
        }
        log::info!(
            "streaming corpus: {} bytes in chunks of {}, {} batches per pass",
            batcher.total_size(),
            chunk_bytes,
            steps
        );
        return Ok(TrainingData {
            train: Box::new(batcher),
            steps_per_epoch: steps,
            held_out: None,
            seed_text: read_text_prefix(&config.text_path, chunk_bytes)?,
        });
    }

    let text = fs::read_to_string(&config.text_path)?;
    log::info!("corpus length: {} characters", text.chars().count());
    let (val_text, train_text) = split_text(&text, config.validation_split);

    let train = SequenceBatcher::new(codec.encode(train_text), shape)?;
    let steps = train.num_batches();
    let held_out = if val_text.is_empty() {
        None
    } else {
        match SequenceBatcher::new(codec.encode(val_text), shape) {
            Ok(val) => {
                let val_steps = val.num_batches();
                Some((val, val_steps))
            }
            Err(TextGenError::InsufficientData { available, .. }) => {
                log::warn!(
                    "validation text of {} characters is too short for one batch, training without validation",
                    available
                );
                None
            }
            Err(e) => return Err(e),
        }
    };
    log::info!(
        "{} training batches, {} validation batches per epoch",
        steps,
        held_out.as_ref().map_or(0, |(_, s)| *s)
    );
    Ok(TrainingData {
        train: Box::new(train),
        steps_per_epoch: steps,
        held_out,
        seed_text: text,
    })
}

fn run_training(
    model_config: ModelConfig,
    config: TrainConfig,
    log_path: Option<&Path>,
) -> Result<TrainLogs, TextGenError> {
    config.validate()?;
    model_config.validate()?;

    let mut model = load_or_build_model(model_config, &config)?;
    let shape = BatchShape::new(model.batch_size(), config.seq_len, VOCAB_SIZE).with_one_hot(false, true);

    // The corpus must be read before the checkpoint directory is cleared.
    let TrainingData {
        mut train,
        steps_per_epoch,
        mut held_out,
        seed_text,
    } = load_training_data(&config, shape)?;

    let restore_path = config.restore_path();
    let keep: Vec<&Path> = [Some(config.text_path.as_path()), log_path, restore_path.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    let checkpoint_dir = make_dirs(&config.checkpoint_path, true, &keep)?;
    model.save(&config.checkpoint_path)?;

    let mut validator = held_out
        .as_ref()
        .map(|_| model.rebuild(model.batch_size()))
        .transpose()?;
    let validation = match (held_out.as_mut(), validator.as_mut()) {
        (Some((source, steps)), Some(validator)) => Some(Validation {
            source,
            steps: *steps,
            model: validator,
        }),
        _ => None,
    };

    let mut sample_logger = SampleLogger::new(&model, seed_text, thread_rng())?
        .with_epoch_sample(config.sample_length, config.sample_top_n)
        .with_final_sample(config.final_sample_length, config.final_sample_top_n);
    let mut checkpoint_saver = CheckpointSaver::new(&config.checkpoint_path);
    let mut metrics = MetricsRecorder::new(checkpoint_dir.join("metrics.csv"));
    let callbacks: &mut [&mut dyn Callback<HashedNGram>] =
        &mut [&mut checkpoint_saver, &mut metrics, &mut sample_logger];

    let logs = fit(
        &mut model,
        &mut *train,
        steps_per_epoch,
        config.num_epochs,
        validation,
        callbacks,
    )?;
    if let Some(last) = logs.last() {
        log::info!("final loss {:.4} after {:.2?}", last.loss, logs.duration);
    }
    Ok(logs)
}

// --- Generation Logic ---

fn run_generation(config: GenerateConfig) -> Result<String, TextGenError> {
    config.validate()?;
    let mut rng = thread_rng();

    let model = HashedNGram::load(&config.checkpoint_path)?;
    let mut inference = build_inference_model(&model)?;
    log::info!("model loaded: {:?}", config.checkpoint_path);

    let seed = match &config.seed {
        SeedSource::Literal(seed) => seed.clone(),
        SeedSource::TextFile(path) => {
            let text = fs::read_to_string(path)?;
            let seed = generate_seed(&mut rng, &text, &DEFAULT_SEED_LENGTHS)?;
            log::info!("seed sequence generated from {:?}", path);
            seed
        }
    };

    generate(&mut inference, &SymbolCodec::new(), &mut rng, &seed, config.length, config.top_n)
}
