//! Interactive repair of records the extraction pass left incomplete.
//!
//! Rows are read from the primary output in order. Complete rows pass through
//! untouched; for every `Undefined` line reference, description, miles or
//! chains value the operator is asked for a replacement, with the last value
//! seen for that field offered as the default. All rows are appended to the
//! corrected output. The primary output is only ever read.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::CorrectArgs;
use crate::commands::{CORRECTED_OUTPUT, PRIMARY_OUTPUT};
use crate::model::{Field, LineRefCode, RecordRow, UNDEFINED, YARDS_PER_CHAIN};
use crate::record::{TsvWriter, format_row, read_rows};

/// Source of operator answers.
pub trait Prompter {
    /// Shows context for the questions that follow.
    fn show(&mut self, text: &str) -> Result<()>;

    /// Asks one question. `None` means the input was closed.
    fn ask(&mut self, question: &str) -> Result<Option<String>>;
}

/// Prompts on stdout and reads answers line by line from stdin.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn show(&mut self, text: &str) -> Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "\n{text}").context("failed to write to stdout")?;
        stdout.flush().context("failed to flush stdout")
    }

    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        {
            let mut stdout = io::stdout().lock();
            write!(stdout, "\t{question}").context("failed to write to stdout")?;
            stdout.flush().context("failed to flush stdout")?;
        }

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed to read from stdin")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PromptState {
    OfferDefault(String),
    AwaitInput,
    Confirmed(String),
}

/// Last defined value seen per correctable field, in file order.
#[derive(Debug, Default)]
struct LastKnown {
    lineref: Option<LineRefCode>,
    description: Option<String>,
    miles: Option<u32>,
    chains: Option<u32>,
}

impl LastKnown {
    fn observe(&mut self, row: &RecordRow) {
        if let Field::Defined(code) = &row.lineref {
            self.lineref = Some(code.clone());
        }
        if let Field::Defined(description) = &row.description {
            self.description = Some(description.clone());
        }
        if let Field::Defined(miles) = row.miles {
            self.miles = Some(miles);
        }
        if let Field::Defined(chains) = row.chains {
            self.chains = Some(chains);
        }
    }
}

pub fn run(args: CorrectArgs) -> Result<()> {
    run_with(&args, &mut TerminalPrompter)
}

fn run_with(args: &CorrectArgs, prompter: &mut dyn Prompter) -> Result<()> {
    let input_path = args
        .input_path
        .clone()
        .unwrap_or_else(|| args.work_dir.join(PRIMARY_OUTPUT));
    let output_path = args
        .output_path
        .clone()
        .unwrap_or_else(|| args.work_dir.join(CORRECTED_OUTPUT));

    if input_path == output_path {
        bail!(
            "corrected output must differ from its input: {}",
            input_path.display()
        );
    }

    let rows = read_rows(&input_path)?;
    info!(
        input = %input_path.display(),
        rows = rows.len(),
        incomplete = rows.iter().filter(|row| row.has_undefined()).count(),
        "starting correction pass"
    );

    let corrected = correct_rows(rows, prompter, args.max_attempts)?;

    let mut writer = TsvWriter::append(&output_path)?;
    for row in &corrected {
        writer.write_line(&format_row(row))?;
    }
    writer.flush()?;

    info!(
        output = %output_path.display(),
        rows = corrected.len(),
        still_incomplete = corrected.iter().filter(|row| row.has_undefined()).count(),
        "correction pass completed"
    );
    Ok(())
}

fn correct_rows(
    rows: Vec<RecordRow>,
    prompter: &mut dyn Prompter,
    max_attempts: usize,
) -> Result<Vec<RecordRow>> {
    let mut last_known = LastKnown::default();
    let mut corrected = Vec::with_capacity(rows.len());

    for row in rows {
        let row = if row.has_undefined() {
            correct_row(row, &last_known, prompter, max_attempts)?
        } else {
            row
        };
        last_known.observe(&row);
        corrected.push(row);
    }

    Ok(corrected)
}

fn correct_row(
    mut row: RecordRow,
    last_known: &LastKnown,
    prompter: &mut dyn Prompter,
    max_attempts: usize,
) -> Result<RecordRow> {
    prompter.show(&format_row(&row))?;

    if !row.lineref.is_defined() {
        row.lineref = prompt_field(
            prompter,
            "line reference",
            last_known.lineref.as_ref().map(ToString::to_string),
            max_attempts,
            LineRefCode::parse,
        )?;
    }

    if !row.description.is_defined() {
        row.description = prompt_field(
            prompter,
            "description",
            last_known.description.clone(),
            max_attempts,
            parse_description,
        )?;
    }

    if !row.miles.is_defined() {
        row.miles = prompt_field(
            prompter,
            "miles",
            last_known.miles.map(|miles| miles.to_string()),
            max_attempts,
            parse_count,
        )?;
    }

    if !row.chains.is_defined() {
        row.chains = prompt_field(
            prompter,
            "chains",
            last_known.chains.map(|chains| chains.to_string()),
            max_attempts,
            parse_count,
        )?;
        row.yards = row
            .chains
            .defined()
            .map(|chains| u64::from(*chains) * YARDS_PER_CHAIN)
            .into();
    }

    if row.has_undefined() {
        warn!(file = %row.file, "record still incomplete after correction");
    } else {
        info!(file = %row.file, "record corrected");
    }
    Ok(row)
}

/// Runs the offer/enter/confirm loop for one field.
///
/// A declined default and an entry that fails `validate` each use up one
/// attempt. Once `max_attempts` are used the field stays `Undefined`.
fn prompt_field<T>(
    prompter: &mut dyn Prompter,
    name: &str,
    default: Option<String>,
    max_attempts: usize,
    validate: impl Fn(&str) -> Option<T>,
) -> Result<Field<T>> {
    let mut state = match default {
        Some(value) if validate(&value).is_some() => PromptState::OfferDefault(value),
        _ => PromptState::AwaitInput,
    };
    let mut attempts = 0;

    loop {
        if attempts >= max_attempts {
            warn!(field = name, attempts, "giving up, field left undefined");
            return Ok(Field::Undefined);
        }

        state = match state {
            PromptState::OfferDefault(value) => {
                let answer = ask(prompter, &format!("Use \"{value}\" for {name} (Y/N)? "))?;
                if answer.eq_ignore_ascii_case("y") {
                    PromptState::Confirmed(value)
                } else {
                    attempts += 1;
                    PromptState::AwaitInput
                }
            }
            PromptState::AwaitInput => {
                let answer = ask(prompter, &format!("Enter the value for {name}: "))?;
                if validate(&answer).is_some() {
                    PromptState::OfferDefault(answer)
                } else {
                    warn!(field = name, value = %answer, "rejected value");
                    attempts += 1;
                    PromptState::AwaitInput
                }
            }
            PromptState::Confirmed(value) => {
                return match validate(&value) {
                    Some(parsed) => Ok(Field::Defined(parsed)),
                    None => Ok(Field::Undefined),
                };
            }
        };
    }
}

fn ask(prompter: &mut dyn Prompter, question: &str) -> Result<String> {
    match prompter.ask(question)? {
        Some(answer) => Ok(sanitize(&answer)),
        None => bail!("input closed while correcting records"),
    }
}

/// Answers end up in a tab-separated file, so tabs and line breaks become
/// spaces.
fn sanitize(answer: &str) -> String {
    answer
        .split(['\t', '\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_description(value: &str) -> Option<String> {
    if value.is_empty() || value == UNDEFINED {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_count(value: &str) -> Option<u32> {
    value.parse().ok()
}
