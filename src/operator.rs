//! Terminal prompts for the person running `driftless apply`

use crate::ui;
use anyhow::{Context, Result};
use colored::Colorize;
use converge::{AgentReport, ConfirmCallback, Decision, Operator, PlanAction, Review};
use dialoguer::{Confirm, Input, Select};
use std::sync::Mutex;

/// Lines of agent output shown during review
const OUTPUT_TAIL: usize = 15;

/// Asks the operator on stdin/stdout.
///
/// Workers may call in concurrently; prompts are taken one at a time.
#[derive(Default)]
pub struct TerminalOperator {
    prompt_lock: Mutex<()>,
}

impl TerminalOperator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Operator for TerminalOperator {
    fn decide(&self, action: &PlanAction, prompt: &str) -> Result<Decision> {
        let _turn = self.prompt_lock.lock().unwrap_or_else(|e| e.into_inner());

        ui::section(&format!("{} {}", action.kind.as_str().to_uppercase(), action.address));
        println!("{prompt}");

        let choice = Select::new()
            .with_prompt("What now?")
            .items(&[
                "Done, mark implemented",
                "Mark partial",
                "Skip",
                "Escalate",
                "Quit",
            ])
            .default(0)
            .interact()
            .context("Failed to read decision")?;

        let decision = match choice {
            0 => {
                let files: String = Input::new()
                    .with_prompt("Files created or changed (comma separated)")
                    .allow_empty(true)
                    .interact_text()
                    .context("Failed to read file list")?;
                Decision::Implement {
                    files: split_list(&files),
                }
            }
            1 => {
                let reason: String = Input::new()
                    .with_prompt("What is missing?")
                    .interact_text()
                    .context("Failed to read reason")?;
                Decision::Partial { reason }
            }
            2 => Decision::Skip,
            3 => Decision::Escalate,
            _ => Decision::Quit,
        };
        Ok(decision)
    }

    fn review(&self, action: &PlanAction, report: &AgentReport) -> Result<Review> {
        let _turn = self.prompt_lock.lock().unwrap_or_else(|e| e.into_inner());

        ui::section(&format!("Review {} ({})", action.address, report.agent));
        if report.files.is_empty() {
            ui::dim("no files reported");
        }
        for file in &report.files {
            println!("  {} {file}", "~".yellow());
        }
        let lines: Vec<&str> = report.output.lines().collect();
        for line in &lines[lines.len().saturating_sub(OUTPUT_TAIL)..] {
            ui::dim(line);
        }

        let choice = Select::new()
            .with_prompt("Accept the agent's work?")
            .items(&["Accept", "Accept with edited file list", "Reject"])
            .default(0)
            .interact()
            .context("Failed to read review")?;

        let review = match choice {
            0 => Review::Accept,
            1 => {
                let files: String = Input::new()
                    .with_prompt("Files (comma separated)")
                    .with_initial_text(report.files.join(", "))
                    .allow_empty(true)
                    .interact_text()
                    .context("Failed to read file list")?;
                Review::Edit {
                    files: split_list(&files),
                }
            }
            _ => {
                let reason: String = Input::new()
                    .with_prompt("Why?")
                    .interact_text()
                    .context("Failed to read reason")?;
                Review::Reject { reason }
            }
        };
        Ok(review)
    }
}

/// Yes/no confirmation on the terminal, defaulting to no
pub struct TerminalConfirm;

impl ConfirmCallback for TerminalConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .context("Failed to read user input")
    }
}

/// Split a comma separated list, dropping blanks
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
