//! Setup validation: three independent read-only probes aggregated into a
//! single pass/fail verdict.

use std::time::{SystemTime, UNIX_EPOCH};

use gcp_services::analysis::NoteStore;
use gcp_services::binauthz::BinAuthzClient;
use gcp_services::gke::GkeClient;
use log::{debug, info, warn};

use crate::config::Target;

/// Outcome of the three probes. The overall verdict is exactly the logical
/// AND of the three; a failed probe flips its flag and the remaining probes
/// still run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupReport {
    pub policy_reachable: bool,
    pub analysis_reachable: bool,
    pub cluster_flag_enabled: bool,
}

impl SetupReport {
    pub fn passed(&self) -> bool {
        self.policy_reachable && self.analysis_reachable && self.cluster_flag_enabled
    }
}

pub async fn check_setup(
    binauthz: &BinAuthzClient,
    notes: &impl NoteStore,
    gke: &GkeClient,
    target: &Target,
    cluster: &str,
) -> SetupReport {
    let policy_reachable = match binauthz.get_policy(&target.project).await {
        Ok(policy) => {
            debug!("Policy: {:?}", policy);
            true
        }
        Err(err) => {
            warn!("Failed to fetch the Binary Authorization policy: {}", err);
            false
        }
    };

    let analysis_reachable = probe_note_roundtrip(notes, &target.project).await;

    let cluster_flag_enabled = match gke
        .get_cluster(&target.project, &target.zone, cluster)
        .await
    {
        Ok(cluster) => cluster.binary_authorization_enabled(),
        Err(err) => {
            warn!("Failed to fetch cluster {}: {}", cluster, err);
            false
        }
    };

    SetupReport {
        policy_reachable,
        analysis_reachable,
        cluster_flag_enabled,
    }
}

/// Create a throwaway note and delete it again. Both calls must succeed for
/// the metadata service to count as reachable.
async fn probe_note_roundtrip(notes: &impl NoteStore, project: &str) -> bool {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let probe_id = format!("binauthz-probe-{}", suffix);

    if let Err(err) = notes.create_note(project, &probe_id, "setup probe").await {
        warn!("Container Analysis probe note creation failed: {}", err);
        return false;
    }
    if let Err(err) = notes.delete_note(project, &probe_id).await {
        warn!("Container Analysis probe note deletion failed: {}", err);
        return false;
    }
    true
}

pub fn print_report(report: &SetupReport, cluster: &str) {
    let mark = |ok| if ok { "OK" } else { "FAILED" };
    info!(
        "Binary Authorization policy reachable: {}",
        mark(report.policy_reachable)
    );
    info!(
        "Container Analysis note round-trip:    {}",
        mark(report.analysis_reachable)
    );
    info!(
        "Admission control enabled on {}: {}",
        cluster,
        mark(report.cluster_flag_enabled)
    );
    info!("Overall: {}", mark(report.passed()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcp_services::{ApiError, Result};
    use std::cell::RefCell;

    #[test]
    fn test_verdict_is_the_and_of_all_probes() {
        for bits in 0..8u8 {
            let report = SetupReport {
                policy_reachable: bits & 1 != 0,
                analysis_reachable: bits & 2 != 0,
                cluster_flag_enabled: bits & 4 != 0,
            };
            assert_eq!(report.passed(), bits == 7, "combination {:#05b}", bits);
        }
    }

    struct MockNotes {
        fail_create: bool,
        fail_delete: bool,
        deleted: RefCell<Vec<String>>,
    }

    impl MockNotes {
        fn new(fail_create: bool, fail_delete: bool) -> Self {
            Self {
                fail_create,
                fail_delete,
                deleted: RefCell::new(Vec::new()),
            }
        }

        fn fail(context: &str) -> ApiError {
            ApiError::Status {
                context: context.to_string(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "unavailable".to_string(),
            }
        }
    }

    impl NoteStore for MockNotes {
        async fn create_note(&self, _project: &str, _note_id: &str, _hint: &str) -> Result<()> {
            if self.fail_create {
                return Err(Self::fail("note"));
            }
            Ok(())
        }

        async fn delete_note(&self, _project: &str, note_id: &str) -> Result<()> {
            if self.fail_delete {
                return Err(Self::fail("deleting note"));
            }
            self.deleted.borrow_mut().push(note_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_probe_roundtrip_passes_and_cleans_up() {
        let notes = MockNotes::new(false, false);
        assert!(probe_note_roundtrip(&notes, "demo").await);
        assert_eq!(notes.deleted.borrow().len(), 1);
        assert!(notes.deleted.borrow()[0].starts_with("binauthz-probe-"));
    }

    #[tokio::test]
    async fn test_probe_fails_when_creation_fails() {
        let notes = MockNotes::new(true, false);
        assert!(!probe_note_roundtrip(&notes, "demo").await);
    }

    #[tokio::test]
    async fn test_probe_fails_when_deletion_fails() {
        let notes = MockNotes::new(false, true);
        assert!(!probe_note_roundtrip(&notes, "demo").await);
    }
}
