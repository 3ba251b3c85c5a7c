//! Completion markers for the attestation step sequence.
//!
//! Every step of the issuer records a marker once it completes, so a run
//! that fails halfway can be resumed without repeating remote calls. The
//! ledger is keyed by the run parameters; a run with different parameters
//! starts fresh. Deleting the ledger file forces a full re-run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::info;
use serde::{Deserialize, Serialize};

const LEDGER_FILE: &str = ".attest-steps.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    CreateNote,
    EnsureKey,
    CreateAttestor,
    AddKey,
    BuildPayload,
    Sign,
    Submit,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    key: String,
    completed: Vec<Step>,
    /// Resolved content digest; recorded so a resumed run signs the same
    /// artifact even if the tag has moved since.
    digest: Option<String>,
}

pub struct StepLedger {
    path: PathBuf,
    state: LedgerState,
}

impl StepLedger {
    pub fn open(workdir: &Path, key: &str) -> anyhow::Result<Self> {
        let path = workdir.join(LEDGER_FILE);
        let fresh = LedgerState {
            key: key.to_string(),
            ..LedgerState::default()
        };

        let state = if path.is_file() {
            let raw = fs::read_to_string(&path)
                .context(format!("Unable to read the step ledger {}", path.display()))?;
            match serde_json::from_str::<LedgerState>(&raw) {
                Ok(state) if state.key == key => {
                    info!(
                        "Resuming from {} ({} steps already complete)",
                        path.display(),
                        state.completed.len()
                    );
                    state
                }
                Ok(_) => {
                    info!("Run parameters changed, starting a fresh step ledger");
                    fresh
                }
                Err(_) => {
                    info!("Step ledger is unreadable, starting fresh");
                    fresh
                }
            }
        } else {
            fresh
        };

        Ok(Self { path, state })
    }

    pub fn pending(&self, step: Step) -> bool {
        !self.state.completed.contains(&step)
    }

    pub fn complete(&mut self, step: Step) -> anyhow::Result<()> {
        if self.pending(step) {
            self.state.completed.push(step);
        }
        self.save()
    }

    pub fn recorded_digest(&self) -> Option<String> {
        self.state.digest.clone()
    }

    pub fn record_digest(&mut self, digest: &str) -> anyhow::Result<()> {
        self.state.digest = Some(digest.to_string());
        self.save()
    }

    fn save(&self) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(&self.state)?;
        fs::write(&self.path, raw).context(format!(
            "Unable to write the step ledger {}",
            self.path.display()
        ))
    }
}
