//! Chat-format conversion and train/validation split of a training corpus.

use crate::models::{ChatExample, PipelineError, Result, TrainingExample};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const TRAINING_SPLIT_FILE: &str = "training.jsonl";
pub const VALIDATION_SPLIT_FILE: &str = "validation.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitSummary {
    pub training: usize,
    pub validation: usize,
    pub training_path: PathBuf,
    pub validation_path: PathBuf,
}

/// Read `{system, user, assistant}` lines, skipping blank ones.
pub fn load_examples(path: &Path) -> Result<Vec<TrainingExample>> {
    let file = File::open(path).map_err(|e| PipelineError::io("opening training corpus", e))?;
    let mut examples = Vec::new();

    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PipelineError::io("reading training corpus", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let example: TrainingExample = serde_json::from_str(&line)
            .map_err(|e| PipelineError::ParseError(format!("Line {}: {}", line_num + 1, e)))?;
        examples.push(example);
    }
    Ok(examples)
}

/// Number of examples held out; rounds up like a `test_size` fraction.
fn validation_count(total: usize, ratio: f64) -> usize {
    ((total as f64 * ratio).ceil() as usize).min(total)
}

/// Convert `input` to `{"messages": [...]}` records and write a seeded
/// shuffle split into `output_dir`. The same input, ratio and seed always
/// give the same two files.
pub fn prepare_training_data(
    input: &Path,
    output_dir: &Path,
    validation_ratio: f64,
    seed: u64,
) -> Result<SplitSummary> {
    if !(0.0..1.0).contains(&validation_ratio) {
        return Err(PipelineError::InvalidInput(format!(
            "validation ratio must be in [0, 1), got {validation_ratio}"
        )));
    }

    info!(input = %input.display(), "Loading training corpus");
    let mut records: Vec<ChatExample> = load_examples(input)?
        .iter()
        .map(TrainingExample::to_messages)
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);

    let held_out = validation_count(records.len(), validation_ratio);
    let training = records.split_off(held_out);
    let validation = records;

    fs::create_dir_all(output_dir).map_err(|e| PipelineError::io("creating output dir", e))?;
    let training_path = output_dir.join(TRAINING_SPLIT_FILE);
    let validation_path = output_dir.join(VALIDATION_SPLIT_FILE);
    write_jsonl(&training_path, &training)?;
    write_jsonl(&validation_path, &validation)?;

    info!(
        training = training.len(),
        validation = validation.len(),
        dir = %output_dir.display(),
        "Training data prepared"
    );
    Ok(SplitSummary {
        training: training.len(),
        validation: validation.len(),
        training_path,
        validation_path,
    })
}

fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io("creating split file", e))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        let json = serde_json::to_string(record)
            .map_err(|e| PipelineError::Internal(format!("Failed to serialize record: {e}")))?;
        writeln!(writer, "{json}").map_err(|e| PipelineError::io("writing split file", e))?;
    }
    writer
        .flush()
        .map_err(|e| PipelineError::io("flushing split file", e))
}
