use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rehabdesk_agent::session::IntakeGate;
use rehabdesk_core::intake::{format_intake, IntakeRecord, Symptom};
use serde::Serialize;

use crate::commands::CommandResult;

const INCOMPLETE_EXIT_CODE: u8 = 2;

#[derive(Debug, Serialize)]
struct IntakeReport {
    intake_block: String,
    can_start: bool,
    missing_fields: Vec<&'static str>,
    red_flags: Vec<&'static str>,
    catalogue_hints: Vec<String>,
    note: Option<String>,
}

/// Reads an intake YAML file. `image_override` replaces the file's
/// `image_path` when given.
pub fn load_intake(path: &Path, image_override: Option<&Path>) -> Result<IntakeRecord> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read intake file `{}`", path.display()))?;
    let mut record: IntakeRecord = if raw.trim().is_empty() {
        IntakeRecord::default()
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse intake file `{}`", path.display()))?
    };

    if let Some(image) = image_override {
        record.image_path = Some(image.to_path_buf());
    }
    Ok(record)
}

pub fn run(path: &Path, json_output: bool) -> CommandResult {
    let record = match load_intake(path, None) {
        Ok(record) => record,
        Err(error) => {
            return CommandResult::failure("intake", "intake_load", format!("{error:#}"), 1);
        }
    };

    let gate = IntakeGate::evaluate(&record);
    let report = IntakeReport {
        intake_block: format_intake(&record),
        can_start: gate.can_start,
        missing_fields: gate.missing_fields,
        red_flags: record.red_flags().into_iter().map(Symptom::label).collect(),
        catalogue_hints: record.catalogue_hints(),
        note: gate.note,
    };
    let exit_code = if report.can_start { 0 } else { INCOMPLETE_EXIT_CODE };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"can_start\":{},\"error\":\"{}\"}}",
                report.can_start,
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        })
    } else {
        render_human(&report)
    };
    CommandResult { exit_code, output }
}

fn render_human(report: &IntakeReport) -> String {
    let status = match &report.note {
        Some(note) => note.clone(),
        None => "All required fields complete; the interview can start.".to_string(),
    };
    let mut output = format!("{}\n\n{status}", report.intake_block);
    for hint in &report.catalogue_hints {
        output.push_str(&format!("\nhint: {hint}"));
    }
    output
}
