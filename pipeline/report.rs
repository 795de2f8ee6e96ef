//! # Presentation Artifacts
//!
//! Renders the pipeline's outputs: TSV files for downstream plotting (ROC
//! points, loss history, correlation table, explanation heatmap) and ASCII
//! charts plus a confusion-matrix summary for the terminal. These are
//! presentation artifacts, not machine-readable interfaces.

use crate::correlate::CorrelationTable;
use crate::evaluate::{ConfusionMatrix, RocPoint};
use crate::explain::{Explanation, ExplanationHeatmap};
use crate::train::TrainingHistory;
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

const BAR_WIDTH: usize = 30;

/// Writes ROC points as a two-column TSV.
pub fn write_roc(path: &Path, points: &[RocPoint]) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "fpr\ttpr")?;
    for point in points {
        writeln!(file, "{:.6}\t{:.6}", point.fpr, point.tpr)?;
    }
    Ok(())
}

/// Writes the per-epoch loss trajectory as a TSV.
pub fn write_history(path: &Path, history: &TrainingHistory) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "epoch\tloss\tval_loss")?;
    for (epoch, stats) in history.epochs.iter().enumerate() {
        writeln!(
            file,
            "{}\t{:.6}\t{:.6}",
            epoch + 1,
            stats.loss,
            stats.val_loss
        )?;
    }
    Ok(())
}

/// Writes the ranked correlation table as a TSV.
pub fn write_correlations(path: &Path, table: &CorrelationTable) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "feature\tr")?;
    for entry in &table.entries {
        writeln!(file, "{}\t{:.6}", entry.feature, entry.r)?;
    }
    Ok(())
}

/// Writes the features × instances explanation heatmap as a TSV; cells where
/// a feature was not selected are left blank.
pub fn write_heatmap(path: &Path, map: &ExplanationHeatmap) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    let header: Vec<String> = map.rows.iter().map(|r| format!("row_{r}")).collect();
    writeln!(file, "feature\t{}", header.join("\t"))?;
    for (fidx, feature) in map.features.iter().enumerate() {
        let mut line = feature.clone();
        for col in 0..map.rows.len() {
            let value = map.weights[[fidx, col]];
            if value.is_nan() {
                line.push('\t');
            } else {
                write!(line, "\t{value:.6}").expect("writing to a String cannot fail");
            }
        }
        writeln!(file, "{line}")?;
    }
    Ok(())
}

/// A diverging horizontal bar chart of feature/label correlations, strongest
/// first. Bars extend left for negative and right for positive correlation.
pub fn render_forest(table: &CorrelationTable) -> String {
    let mut out = String::new();
    out.push_str("Feature correlation with CVD label (Pearson r)\n");
    let name_width = table
        .entries
        .iter()
        .map(|e| e.feature.len())
        .max()
        .unwrap_or(0);

    for entry in &table.entries {
        let magnitude = (entry.r.abs() * BAR_WIDTH as f64).round() as usize;
        let magnitude = magnitude.min(BAR_WIDTH);
        let (left, right) = if entry.r < 0.0 {
            (
                format!("{:>width$}", "#".repeat(magnitude), width = BAR_WIDTH),
                " ".repeat(BAR_WIDTH),
            )
        } else {
            (
                " ".repeat(BAR_WIDTH),
                format!("{:<width$}", "#".repeat(magnitude), width = BAR_WIDTH),
            )
        };
        let _ = writeln!(
            out,
            "{:>name_width$}  {left}|{right}  {:+.3}",
            entry.feature, entry.r
        );
    }
    out
}

/// A signed bar chart of one explanation's selected features.
pub fn render_explanation(explanation: &Explanation) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Explanation for row {} (predicted probability {:.3}, local R\u{b2} {:.3})",
        explanation.row, explanation.prediction, explanation.r2
    );

    let max_weight = explanation
        .features
        .iter()
        .map(|f| f.weight.abs())
        .fold(0.0, f64::max)
        .max(f64::MIN_POSITIVE);
    let descriptor_width = explanation
        .features
        .iter()
        .map(|f| f.descriptor.len())
        .max()
        .unwrap_or(0);

    for fw in &explanation.features {
        let magnitude =
            ((fw.weight.abs() / max_weight) * BAR_WIDTH as f64).round() as usize;
        let bar = "#".repeat(magnitude.min(BAR_WIDTH));
        let direction = if fw.weight >= 0.0 { "supports" } else { "contradicts" };
        let _ = writeln!(
            out,
            "  {:<descriptor_width$}  {:+.4}  {bar} ({direction})",
            fw.descriptor, fw.weight
        );
    }
    out
}

/// The printed confusion-matrix summary for the terminal.
pub fn render_confusion(matrix: &ConfusionMatrix, auc: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Test-set performance (threshold {:.2})", matrix.threshold);
    let _ = writeln!(out, "                 predicted CVD   predicted healthy");
    let _ = writeln!(
        out,
        "  actual CVD     {:>13}   {:>17}",
        matrix.true_positives, matrix.false_negatives
    );
    let _ = writeln!(
        out,
        "  actual healthy {:>13}   {:>17}",
        matrix.false_positives, matrix.true_negatives
    );
    let _ = writeln!(out, "  accuracy    {:.3}", matrix.accuracy());
    let _ = writeln!(out, "  sensitivity {:.3}", matrix.sensitivity());
    let _ = writeln!(out, "  specificity {:.3}", matrix.specificity());
    let _ = writeln!(out, "  AUC         {:.3}", auc);
    out
}
