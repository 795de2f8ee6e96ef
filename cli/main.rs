use auspex::correlate::correlate_training_set;
use auspex::data::{self, FEATURE_NAMES};
use auspex::evaluate::{auc, confusion_at, roc_curve};
use auspex::explain::{Binner, LimeConfig, explain_batch, heatmap};
use auspex::model::{RunConfig, TrainedArtifact};
use auspex::network::{Network, RiskModel};
use auspex::prepare::{PrepareConfig, prepare};
use auspex::report;
use auspex::train::{TrainConfig, train};

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(
    name = "auspex",
    about = "Train and explain a cardiovascular-disease risk classifier",
    long_about = "A pipeline that fits a small feed-forward network to tabular clinical data, \
                 evaluates it (ROC/AUC, confusion matrix), and explains individual predictions \
                 with a LIME-style local surrogate."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: prepare, train, evaluate, interpret
    #[command(
        about = "Run the full pipeline (outputs: model.toml, roc.tsv, history.tsv, correlation.tsv, heatmap.tsv)"
    )]
    Run {
        /// Path to the clinical dataset (TSV, or CSV by extension)
        data: String,

        /// RNG seed; fixing it makes the whole run reproducible
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Fraction of records held out as the test partition
        #[arg(long, default_value = "0.2")]
        test_fraction: f64,

        /// Number of training epochs
        #[arg(long, default_value = "100")]
        epochs: usize,

        /// Mini-batch size
        #[arg(long, default_value = "32")]
        batch_size: usize,

        /// SGD learning rate
        #[arg(long, default_value = "0.01")]
        learning_rate: f64,

        /// Nesterov momentum coefficient
        #[arg(long, default_value = "0.9")]
        momentum: f64,

        /// Trailing fraction of training rows monitored as validation
        #[arg(long, default_value = "0.2")]
        validation_split: f64,

        /// Neighborhood size per explained instance
        #[arg(long, default_value = "5000")]
        lime_samples: usize,

        /// Features reported per explanation
        #[arg(long, default_value = "3")]
        top_k: usize,

        /// How many test rows to explain (the first N)
        #[arg(long, default_value = "5")]
        explain_rows: usize,

        /// Directory for output artifacts
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Explain test rows using a previously saved fit
    #[command(about = "Explain individual predictions from a saved model.toml")]
    Explain {
        /// Path to the clinical dataset the model was fitted on
        data: String,

        /// Path to the trained model file (.toml)
        #[arg(long)]
        model: String,

        /// Test-partition row indices to explain
        #[arg(long, value_delimiter = ',', required = true)]
        rows: Vec<usize>,

        /// Neighborhood size per explained instance
        #[arg(long, default_value = "5000")]
        lime_samples: usize,

        /// Features reported per explanation
        #[arg(long, default_value = "3")]
        top_k: usize,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            data,
            seed,
            test_fraction,
            epochs,
            batch_size,
            learning_rate,
            momentum,
            validation_split,
            lime_samples,
            top_k,
            explain_rows,
            out_dir,
        } => {
            let run_config = RunConfig {
                seed,
                test_fraction,
                train: TrainConfig {
                    epochs,
                    batch_size,
                    learning_rate,
                    momentum,
                    validation_split,
                },
            };
            let lime_config = LimeConfig {
                num_samples: lime_samples,
                top_k,
                ..LimeConfig::default()
            };
            run_command(&data, &run_config, &lime_config, explain_rows, &out_dir)
        }
        Commands::Explain {
            data,
            model,
            rows,
            lime_samples,
            top_k,
        } => {
            let lime_config = LimeConfig {
                num_samples: lime_samples,
                top_k,
                ..LimeConfig::default()
            };
            explain_command(&data, &model, &rows, &lime_config)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_command(
    data_path: &str,
    run_config: &RunConfig,
    lime_config: &LimeConfig,
    explain_rows: usize,
    out_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(run_config.seed);

    // Stage 1: data preparation.
    let clinical = data::load_clinical_data(data_path)?;
    println!(
        "Loaded {} records with {} features",
        clinical.num_records(),
        clinical.num_features()
    );
    let prepare_config = PrepareConfig {
        test_fraction: run_config.test_fraction,
    };
    let prepared = prepare(&clinical, &prepare_config, &mut rng)?;
    println!(
        "Prepared {} balanced training rows, {} test rows",
        prepared.y_train.len(),
        prepared.y_test.len()
    );

    // Stages 2 and 3: model definition and training.
    let mut network = Network::classifier(clinical.num_features(), &mut rng);
    println!(
        "Training network ({} epochs, batch size {})...",
        run_config.train.epochs, run_config.train.batch_size
    );
    let history = train(
        &mut network,
        prepared.x_train.view(),
        prepared.y_train.view(),
        &run_config.train,
        &mut rng,
    )?;

    // Stage 4: evaluation on the held-out test partition.
    let test_probs = network.predict_probabilities(prepared.x_test.view());
    let roc = roc_curve(prepared.y_test.view(), test_probs.view())?;
    let area = auc(&roc);
    let confusion = confusion_at(prepared.y_test.view(), test_probs.view(), 0.5)?;
    print!("{}", report::render_confusion(&confusion, area));

    // Stage 5a: global interpretation over the training set.
    let correlations =
        correlate_training_set(&prepared.x_train, prepared.y_train.view(), &FEATURE_NAMES)?;
    print!("{}", report::render_forest(&correlations));

    // Stage 5b: local interpretation of the first test rows.
    let binner = Binner::fit(prepared.x_train.view(), lime_config.bins, &FEATURE_NAMES)?;
    let rows: Vec<usize> = (0..explain_rows.min(prepared.y_test.len())).collect();
    let explanations = explain_batch(
        &network,
        &binner,
        prepared.x_test.view(),
        &rows,
        &FEATURE_NAMES,
        lime_config,
        run_config.seed,
    )?;
    for explanation in &explanations {
        print!("{}", report::render_explanation(explanation));
    }
    let map = heatmap(&explanations, &FEATURE_NAMES);

    // Persist the fit and the plotting artifacts.
    std::fs::create_dir_all(out_dir)?;
    let artifact = TrainedArtifact {
        config: run_config.clone(),
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        network,
        binner,
    };
    let model_path = out_dir.join("model.toml");
    artifact.save(model_path.to_str().ok_or("output path is not valid UTF-8")?)?;

    report::write_roc(&out_dir.join("roc.tsv"), &roc)?;
    report::write_history(&out_dir.join("history.tsv"), &history)?;
    report::write_correlations(&out_dir.join("correlation.tsv"), &correlations)?;
    report::write_heatmap(&out_dir.join("heatmap.tsv"), &map)?;
    println!("Artifacts written to {}", out_dir.display());

    Ok(())
}

fn explain_command(
    data_path: &str,
    model_path: &str,
    rows: &[usize],
    lime_config: &LimeConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let artifact = TrainedArtifact::load(model_path, &FEATURE_NAMES)?;

    // Re-run preparation under the stored seed so the test partition and its
    // scaling are identical to the run that produced the model.
    let mut rng = StdRng::seed_from_u64(artifact.config.seed);
    let clinical = data::load_clinical_data(data_path)?;
    let prepare_config = PrepareConfig {
        test_fraction: artifact.config.test_fraction,
    };
    let prepared = prepare(&clinical, &prepare_config, &mut rng)?;

    for &row in rows {
        if row >= prepared.y_test.len() {
            return Err(format!(
                "row {} is out of range: the test partition has {} rows",
                row,
                prepared.y_test.len()
            )
            .into());
        }
    }

    let explanations = explain_batch(
        &artifact.network,
        &artifact.binner,
        prepared.x_test.view(),
        rows,
        &FEATURE_NAMES,
        lime_config,
        artifact.config.seed,
    )?;
    for explanation in &explanations {
        print!("{}", report::render_explanation(explanation));
    }

    Ok(())
}
