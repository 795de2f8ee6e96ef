//! End-to-end pipeline tests on a synthetic clinical dataset whose label is
//! fully determined by systolic blood pressure (`cvd = 1` iff `sbp > 130`).

use auspex::correlate::correlate_training_set;
use auspex::data::{FEATURE_NAMES, load_clinical_data};
use auspex::evaluate::{auc, confusion_at, roc_curve};
use auspex::explain::{Binner, LimeConfig, explain_batch, explain_instance, heatmap};
use auspex::network::{Network, RiskModel};
use auspex::prepare::{PrepareConfig, prepare};
use auspex::train::{TrainConfig, train};

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::io::Write;
use tempfile::NamedTempFile;

/// 100 rows, 9 features, label perfectly determined by sbp > 130. Every
/// column varies so no partition can hit the constant-column error.
fn write_synthetic_dataset() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let mut header = FEATURE_NAMES.to_vec();
    header.push("cvd");
    writeln!(file, "{}", header.join("\t")).unwrap();

    for i in 0..100usize {
        let sbp = 111.0 + (i % 40) as f64; // 111..=150, half above 130
        let label = u8::from(sbp > 130.0);
        writeln!(
            file,
            "{}\t{}\t{}\t{}\t{}\t{}\t{:.1}\t{:.2}\t{}\t{}",
            i % 2,                        // htn
            (i / 2) % 2,                  // trt
            (i / 3) % 2,                  // smk
            (i / 5) % 2,                  // dm
            (i / 7) % 2,                  // gender
            35 + (i % 45),                // age
            18.5 + (i % 20) as f64 * 0.7, // bmi
            3.5 + (i % 15) as f64 * 0.3,  // tc
            sbp,
            label
        )
        .unwrap();
    }
    file.flush().unwrap();
    file
}

fn quick_train_config() -> TrainConfig {
    TrainConfig {
        epochs: 300,
        batch_size: 16,
        learning_rate: 0.05,
        momentum: 0.9,
        validation_split: 0.2,
    }
}

#[test]
fn partitions_are_disjoint_balanced_and_scaled() {
    let file = write_synthetic_dataset();
    let clinical = load_clinical_data(file.path().to_str().unwrap()).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let prepared = prepare(&clinical, &PrepareConfig::default(), &mut rng).unwrap();

    let positives = prepared.y_train.iter().filter(|&&v| v == 1.0).count();
    let negatives = prepared.y_train.iter().filter(|&&v| v == 0.0).count();
    assert_eq!(positives, negatives);

    for matrix in [&prepared.x_train, &prepared.x_test] {
        for column in matrix.columns() {
            let min = column.iter().copied().fold(f64::INFINITY, f64::min);
            let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            assert_eq!(min, 0.0);
            assert_eq!(max, 1.0);
        }
    }
}

#[test]
fn global_correlation_ranks_sbp_first() {
    let file = write_synthetic_dataset();
    let clinical = load_clinical_data(file.path().to_str().unwrap()).unwrap();
    let mut rng = StdRng::seed_from_u64(2);
    let prepared = prepare(&clinical, &PrepareConfig::default(), &mut rng).unwrap();

    let table =
        correlate_training_set(&prepared.x_train, prepared.y_train.view(), &FEATURE_NAMES)
            .unwrap();
    assert_eq!(table.entries[0].feature, "sbp");
    assert!(
        table.entries[0].r > 0.8,
        "sbp should correlate strongly with the label, got {}",
        table.entries[0].r
    );
}

#[test]
fn trained_model_discriminates_and_explainer_agrees() {
    let file = write_synthetic_dataset();
    let clinical = load_clinical_data(file.path().to_str().unwrap()).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let prepared = prepare(&clinical, &PrepareConfig::default(), &mut rng).unwrap();

    let mut network = Network::classifier(clinical.num_features(), &mut rng);
    train(
        &mut network,
        prepared.x_train.view(),
        prepared.y_train.view(),
        &quick_train_config(),
        &mut rng,
    )
    .unwrap();

    let probs = network.predict_probabilities(prepared.x_test.view());
    let roc = roc_curve(prepared.y_test.view(), probs.view()).unwrap();
    assert_eq!(roc.first().map(|p| (p.fpr, p.tpr)), Some((0.0, 0.0)));
    assert_eq!(roc.last().map(|p| (p.fpr, p.tpr)), Some((1.0, 1.0)));
    let area = auc(&roc);
    assert!(
        area > 0.8,
        "a single perfectly-predictive feature should yield high AUC, got {area}"
    );

    let confusion = confusion_at(prepared.y_test.view(), probs.view(), 0.5).unwrap();
    assert!(confusion.accuracy() > 0.7);

    // Local explanation of a high-sbp positive instance: sbp must be the
    // strongest selected feature, pushing the prediction up.
    let sbp_index = FEATURE_NAMES.iter().position(|&n| n == "sbp").unwrap();
    let target_row = (0..prepared.y_test.len())
        .find(|&i| prepared.y_test[i] == 1.0 && prepared.x_test[[i, sbp_index]] > 0.6)
        .expect("the synthetic test partition contains high-sbp positives");

    let binner = Binner::fit(prepared.x_train.view(), 2, &FEATURE_NAMES).unwrap();
    let mut lime_rng = StdRng::seed_from_u64(99);
    let explanation = explain_instance(
        &network,
        &binner,
        &FEATURE_NAMES,
        prepared.x_test.row(target_row),
        target_row,
        &LimeConfig {
            num_samples: 2000,
            ..LimeConfig::default()
        },
        &mut lime_rng,
    )
    .unwrap();

    assert!(explanation.features.len() <= 3);
    for fw in &explanation.features {
        assert!(FEATURE_NAMES.contains(&fw.feature.as_str()));
    }
    assert_eq!(explanation.features[0].feature, "sbp");
    assert!(
        explanation.features[0].weight > 0.0,
        "being in the high-sbp bin must raise the predicted risk"
    );
}

#[test]
fn batch_explanations_fill_a_heatmap() {
    let file = write_synthetic_dataset();
    let clinical = load_clinical_data(file.path().to_str().unwrap()).unwrap();
    let mut rng = StdRng::seed_from_u64(4);
    let prepared = prepare(&clinical, &PrepareConfig::default(), &mut rng).unwrap();

    let mut network = Network::classifier(clinical.num_features(), &mut rng);
    let config = TrainConfig {
        epochs: 30,
        ..quick_train_config()
    };
    train(
        &mut network,
        prepared.x_train.view(),
        prepared.y_train.view(),
        &config,
        &mut rng,
    )
    .unwrap();

    let binner = Binner::fit(prepared.x_train.view(), 2, &FEATURE_NAMES).unwrap();
    let rows = [0usize, 1, 2, 3];
    let explanations = explain_batch(
        &network,
        &binner,
        prepared.x_test.view(),
        &rows,
        &FEATURE_NAMES,
        &LimeConfig {
            num_samples: 1000,
            top_k: 3,
            ..LimeConfig::default()
        },
        4,
    )
    .unwrap();

    assert_eq!(explanations.len(), 4);
    let map = heatmap(&explanations, &FEATURE_NAMES);
    assert_eq!(map.weights.shape(), &[9, 4]);
    for col in map.weights.columns() {
        let selected = col.iter().filter(|v| !v.is_nan()).count();
        assert!(selected >= 1 && selected <= 3);
    }
}

#[test]
fn fixed_seed_reproduces_metrics_bit_for_bit() {
    let file = write_synthetic_dataset();
    let path = file.path().to_str().unwrap().to_string();

    let run = || {
        let clinical = load_clinical_data(&path).unwrap();
        let mut rng = StdRng::seed_from_u64(2024);
        let prepared = prepare(&clinical, &PrepareConfig::default(), &mut rng).unwrap();
        let mut network = Network::classifier(clinical.num_features(), &mut rng);
        let config = TrainConfig {
            epochs: 30,
            ..quick_train_config()
        };
        let history = train(
            &mut network,
            prepared.x_train.view(),
            prepared.y_train.view(),
            &config,
            &mut rng,
        )
        .unwrap();

        let probs = network.predict_probabilities(prepared.x_test.view());
        let roc = roc_curve(prepared.y_test.view(), probs.view()).unwrap();
        let confusion = confusion_at(prepared.y_test.view(), probs.view(), 0.5).unwrap();
        (
            auc(&roc),
            history.epochs.last().unwrap().loss,
            history.epochs.last().unwrap().val_loss,
            confusion.accuracy(),
        )
    };

    let (auc_a, loss_a, val_a, acc_a) = run();
    let (auc_b, loss_b, val_b, acc_b) = run();
    assert_eq!(auc_a.to_bits(), auc_b.to_bits());
    assert_eq!(loss_a.to_bits(), loss_b.to_bits());
    assert_eq!(val_a.to_bits(), val_b.to_bits());
    assert_eq!(acc_a.to_bits(), acc_b.to_bits());
}
