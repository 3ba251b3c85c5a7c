//! The attestation issuer: a strict sequence of named steps that registers
//! the attestation authority, signs the resolved image digest and submits
//! the signature as an attestation occurrence.
//!
//! Creation steps treat an already-existing resource (HTTP 409) as benign;
//! any other failure aborts. The absence of a registry digest is the hard
//! gate: nothing is signed or submitted without one. Completed steps are
//! checkpointed so an aborted run resumes instead of repeating remote calls.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use base64::prelude::*;
use gcp_services::analysis::{
    AttestationBlob, NoteStore, Occurrence, OccurrenceStore, Signature, note_name,
};
use gcp_services::binauthz::AttestorStore;
use gcp_services::payload::SigningPayload;
use gcp_services::registry::ImageRegistry;
use log::{info, warn};
use pgp_signer::Signer;

use crate::checkpoint::{Step, StepLedger};

const PUBLIC_KEY_FILE: &str = "attestor.pub";
const PAYLOAD_FILE: &str = "payload.json";
const SIGNATURE_FILE: &str = "payload.json.asc";

/// Parameters of one attestation run.
#[derive(Debug, Clone)]
pub struct AttestParams {
    pub project: String,
    pub image: String,
    pub tag: Option<String>,
    pub attestor_id: String,
    pub note_id: String,
    pub signer_identity: String,
    pub workdir: PathBuf,
}

impl AttestParams {
    // The signer identity is part of the key: a resumed run must never pair
    // a fingerprint with a signature produced by a different key.
    fn ledger_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.project,
            self.image,
            self.tag.as_deref().unwrap_or(""),
            self.attestor_id,
            self.note_id,
            self.signer_identity
        )
    }
}

pub async fn issue_attestation(
    notes: &impl NoteStore,
    attestors: &impl AttestorStore,
    occurrences: &impl OccurrenceStore,
    registry: &impl ImageRegistry,
    signer: &impl Signer,
    params: &AttestParams,
) -> anyhow::Result<()> {
    let mut ledger = StepLedger::open(&params.workdir, &params.ledger_key())?;
    let note_name = note_name(&params.project, &params.note_id);
    let public_key_path = params.workdir.join(PUBLIC_KEY_FILE);
    let payload_path = params.workdir.join(PAYLOAD_FILE);
    let signature_path = params.workdir.join(SIGNATURE_FILE);

    // Step 1: the note the attestor's authority record is bound to.
    if ledger.pending(Step::CreateNote) {
        let hint = format!("Attestor authority for {}", params.attestor_id);
        match notes.create_note(&params.project, &params.note_id, &hint).await {
            Ok(()) => info!("Created note {}", note_name),
            Err(err) if err.is_already_exists() => {
                info!("Note {} already exists, continuing", note_name)
            }
            Err(err) => return Err(err).context("Failed to create the attestation note"),
        }
        ledger.complete(Step::CreateNote)?;
    }

    // Step 2: local signing key, generated at most once per identity.
    if ledger.pending(Step::EnsureKey) {
        signer
            .ensure_key(&params.signer_identity)
            .context("Failed to ensure the signing key exists")?;
        signer
            .export_public_key(&params.signer_identity, &public_key_path)
            .context("Failed to export the public key")?;
        ledger.complete(Step::EnsureKey)?;
    }

    // Step 3: the attestor itself.
    if ledger.pending(Step::CreateAttestor) {
        match attestors
            .create_attestor(&params.project, &params.attestor_id, &note_name)
            .await
        {
            Ok(()) => info!("Created attestor {}", params.attestor_id),
            Err(err) if err.is_already_exists() => {
                info!("Attestor {} already exists, continuing", params.attestor_id)
            }
            Err(err) => return Err(err).context("Failed to create the attestor"),
        }
        ledger.complete(Step::CreateAttestor)?;
    }

    // Step 4: register the exported public key on the attestor.
    if ledger.pending(Step::AddKey) {
        let armored = fs::read_to_string(&public_key_path).context(format!(
            "Unable to read the exported public key {}; delete the step ledger to re-export it",
            public_key_path.display()
        ))?;
        let added = attestors
            .add_public_key(&params.project, &params.attestor_id, &armored)
            .await
            .context("Failed to add the public key to the attestor")?;
        if added {
            info!("Public key registered on {}", params.attestor_id);
        }
        ledger.complete(Step::AddKey)?;
    }

    // Step 5: tag to digest. The one hard gate of the sequence.
    let digest = match ledger.recorded_digest() {
        Some(digest) => digest,
        None => {
            let digest = registry
                .resolve_digest(&params.image, params.tag.as_deref())
                .await
                .context("Failed to list the registry tags")?
                .ok_or_else(|| {
                    anyhow!(
                        "No digest found for {}{} - push the image before attesting it",
                        params.image,
                        params
                            .tag
                            .as_deref()
                            .map(|t| format!(":{}", t))
                            .unwrap_or_default()
                    )
                })?;
            ledger.record_digest(&digest)?;
            digest
        }
    };
    let artifact = format!("{}@{}", params.image, digest);
    info!("Attesting artifact {}", artifact);

    // Step 6: the canonical signing payload for that digest.
    if ledger.pending(Step::BuildPayload) {
        let payload = SigningPayload::new(&params.image, &digest);
        fs::write(&payload_path, payload.to_bytes()?).context(format!(
            "Unable to write the signing payload {}",
            payload_path.display()
        ))?;
        ledger.complete(Step::BuildPayload)?;
    }

    // Step 7: detached signature over the payload.
    if ledger.pending(Step::Sign) {
        signer
            .sign_detached(&params.signer_identity, &payload_path, &signature_path)
            .context("Failed to sign the payload")?;
        info!("Signature written to {}", signature_path.display());
        ledger.complete(Step::Sign)?;
    }

    // Step 8: submit the attestation occurrence.
    if ledger.pending(Step::Submit) {
        let fingerprint = signer
            .fingerprint(&params.signer_identity)
            .context("Failed to read the signing key fingerprint")?;
        let payload_bytes = fs::read(&payload_path).context(format!(
            "Unable to read back the signing payload {}",
            payload_path.display()
        ))?;
        let signature_bytes = fs::read(&signature_path).context(format!(
            "Unable to read back the signature {}",
            signature_path.display()
        ))?;

        let occurrence = Occurrence {
            name: None,
            resource_uri: artifact.clone(),
            note_name: note_name.clone(),
            kind: "ATTESTATION".to_string(),
            attestation: AttestationBlob {
                serialized_payload: BASE64_STANDARD.encode(&payload_bytes),
                signatures: vec![Signature {
                    signature: BASE64_STANDARD.encode(&signature_bytes),
                    public_key_id: fingerprint,
                }],
            },
        };
        let created = occurrences
            .create_occurrence(&params.project, &occurrence)
            .await
            .context("Failed to submit the attestation")?;
        info!(
            "Attestation submitted as {}",
            created.name.as_deref().unwrap_or("<unnamed>")
        );
        ledger.complete(Step::Submit)?;
    }

    // Step 9: read the attestations back. Informational only.
    let found = occurrences
        .list_attestations(&params.project, &artifact, &note_name)
        .await
        .context("Failed to list attestations")?;
    if found.is_empty() {
        warn!("No attestations found for {}", artifact);
    } else {
        info!("{} attestation(s) for {}:", found.len(), artifact);
        for occurrence in &found {
            info!("{}", serde_json::to_string_pretty(occurrence)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcp_services::{ApiError, Result};
    use std::cell::{Cell, RefCell};
    use std::path::Path;

    #[derive(Clone, Copy)]
    enum CreateBehavior {
        Succeed,
        AlreadyExists,
        Unavailable,
    }

    fn behavior_result(behavior: CreateBehavior, context: &str) -> Result<()> {
        match behavior {
            CreateBehavior::Succeed => Ok(()),
            CreateBehavior::AlreadyExists => Err(ApiError::AlreadyExists {
                resource: context.to_string(),
            }),
            CreateBehavior::Unavailable => Err(ApiError::Status {
                context: context.to_string(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "unavailable".to_string(),
            }),
        }
    }

    struct MockNotes {
        behavior: CreateBehavior,
        create_calls: Cell<usize>,
    }

    impl MockNotes {
        fn new(behavior: CreateBehavior) -> Self {
            Self {
                behavior,
                create_calls: Cell::new(0),
            }
        }
    }

    impl NoteStore for MockNotes {
        async fn create_note(&self, _project: &str, note_id: &str, _hint: &str) -> Result<()> {
            self.create_calls.set(self.create_calls.get() + 1);
            behavior_result(self.behavior, note_id)
        }

        async fn delete_note(&self, _project: &str, _note_id: &str) -> Result<()> {
            Ok(())
        }
    }

    struct MockAttestors {
        behavior: CreateBehavior,
        keys: RefCell<Vec<String>>,
    }

    impl MockAttestors {
        fn new(behavior: CreateBehavior) -> Self {
            Self {
                behavior,
                keys: RefCell::new(Vec::new()),
            }
        }
    }

    impl AttestorStore for MockAttestors {
        async fn create_attestor(
            &self,
            _project: &str,
            attestor_id: &str,
            _note_name: &str,
        ) -> Result<()> {
            behavior_result(self.behavior, attestor_id)
        }

        async fn add_public_key(
            &self,
            _project: &str,
            _attestor_id: &str,
            armored_key: &str,
        ) -> Result<bool> {
            let mut keys = self.keys.borrow_mut();
            if keys.iter().any(|k| k == armored_key) {
                return Ok(false);
            }
            keys.push(armored_key.to_string());
            Ok(true)
        }
    }

    struct MockOccurrences {
        created: RefCell<Vec<Occurrence>>,
    }

    impl MockOccurrences {
        fn new() -> Self {
            Self {
                created: RefCell::new(Vec::new()),
            }
        }
    }

    impl OccurrenceStore for MockOccurrences {
        async fn create_occurrence(
            &self,
            _project: &str,
            occurrence: &Occurrence,
        ) -> Result<Occurrence> {
            let mut stored = occurrence.clone();
            stored.name = Some(format!(
                "projects/demo/occurrences/{}",
                self.created.borrow().len()
            ));
            self.created.borrow_mut().push(stored.clone());
            Ok(stored)
        }

        async fn list_attestations(
            &self,
            _project: &str,
            resource_uri: &str,
            note_name: &str,
        ) -> Result<Vec<Occurrence>> {
            Ok(self
                .created
                .borrow()
                .iter()
                .filter(|o| o.resource_uri == resource_uri && o.note_name == note_name)
                .cloned()
                .collect())
        }
    }

    struct MockRegistry {
        digest: Option<String>,
        calls: Cell<usize>,
    }

    impl MockRegistry {
        fn new(digest: Option<&str>) -> Self {
            Self {
                digest: digest.map(|d| d.to_string()),
                calls: Cell::new(0),
            }
        }
    }

    impl ImageRegistry for MockRegistry {
        async fn resolve_digest(&self, _image: &str, _tag: Option<&str>) -> Result<Option<String>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.digest.clone())
        }
    }

    struct MockSigner {
        key_exists: Cell<bool>,
        generated: Cell<usize>,
        exports: Cell<usize>,
        sign_calls: Cell<usize>,
        signed_by: RefCell<Vec<String>>,
    }

    impl MockSigner {
        fn new() -> Self {
            Self {
                key_exists: Cell::new(false),
                generated: Cell::new(0),
                exports: Cell::new(0),
                sign_calls: Cell::new(0),
                signed_by: RefCell::new(Vec::new()),
            }
        }
    }

    impl Signer for MockSigner {
        fn ensure_key(&self, _identity: &str) -> anyhow::Result<bool> {
            if self.key_exists.get() {
                return Ok(false);
            }
            self.key_exists.set(true);
            self.generated.set(self.generated.get() + 1);
            Ok(true)
        }

        fn fingerprint(&self, _identity: &str) -> anyhow::Result<String> {
            Ok("0638AADD940361EA2D7F14C58C124F0E663DA097".to_string())
        }

        fn export_public_key(&self, _identity: &str, destination: &Path) -> anyhow::Result<String> {
            self.exports.set(self.exports.get() + 1);
            let armor = "-----BEGIN PGP PUBLIC KEY BLOCK-----\nmock\n-----END PGP PUBLIC KEY BLOCK-----\n";
            fs::write(destination, armor)?;
            Ok(armor.to_string())
        }

        fn sign_detached(
            &self,
            identity: &str,
            _payload: &Path,
            signature_out: &Path,
        ) -> anyhow::Result<String> {
            self.sign_calls.set(self.sign_calls.get() + 1);
            self.signed_by.borrow_mut().push(identity.to_string());
            let armor = "-----BEGIN PGP SIGNATURE-----\nmock\n-----END PGP SIGNATURE-----\n";
            fs::write(signature_out, armor)?;
            Ok(armor.to_string())
        }
    }

    fn params(workdir: &Path) -> AttestParams {
        AttestParams {
            project: "p".to_string(),
            image: "gcr.io/p/nginx".to_string(),
            tag: None,
            attestor_id: "demo-attestor".to_string(),
            note_id: "demo-note".to_string(),
            signer_identity: "attestor@example.com".to_string(),
            workdir: workdir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_submission_references_the_exact_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notes = MockNotes::new(CreateBehavior::Succeed);
        let attestors = MockAttestors::new(CreateBehavior::Succeed);
        let occurrences = MockOccurrences::new();
        let registry = MockRegistry::new(Some("sha256:abcd1234"));
        let signer = MockSigner::new();

        issue_attestation(
            &notes,
            &attestors,
            &occurrences,
            &registry,
            &signer,
            &params(dir.path()),
        )
        .await
        .expect("issuer failed");

        let created = occurrences.created.borrow();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].resource_uri, "gcr.io/p/nginx@sha256:abcd1234");
        assert_eq!(
            created[0].note_name,
            "projects/p/notes/demo-note"
        );

        // The signed payload carries the same reference.
        let payload_bytes = BASE64_STANDARD
            .decode(&created[0].attestation.serialized_payload)
            .expect("payload is not base64");
        let payload: SigningPayload =
            serde_json::from_slice(&payload_bytes).expect("payload is not the signing format");
        assert_eq!(
            payload.critical.identity.docker_reference,
            "gcr.io/p/nginx@sha256:abcd1234"
        );
        assert_eq!(
            created[0].attestation.signatures[0].public_key_id,
            "0638AADD940361EA2D7F14C58C124F0E663DA097"
        );
    }

    #[tokio::test]
    async fn test_existing_note_and_attestor_are_benign() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notes = MockNotes::new(CreateBehavior::AlreadyExists);
        let attestors = MockAttestors::new(CreateBehavior::AlreadyExists);
        let occurrences = MockOccurrences::new();
        let registry = MockRegistry::new(Some("sha256:abcd1234"));
        let signer = MockSigner::new();

        issue_attestation(
            &notes,
            &attestors,
            &occurrences,
            &registry,
            &signer,
            &params(dir.path()),
        )
        .await
        .expect("issuer should continue past existing resources");

        assert_eq!(occurrences.created.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_non_conflict_note_failure_aborts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notes = MockNotes::new(CreateBehavior::Unavailable);
        let attestors = MockAttestors::new(CreateBehavior::Succeed);
        let occurrences = MockOccurrences::new();
        let registry = MockRegistry::new(Some("sha256:abcd1234"));
        let signer = MockSigner::new();

        let err = issue_attestation(
            &notes,
            &attestors,
            &occurrences,
            &registry,
            &signer,
            &params(dir.path()),
        )
        .await
        .expect_err("a transient failure must not be mistaken for idempotency");

        assert!(err.to_string().contains("attestation note"));
        assert_eq!(registry.calls.get(), 0);
        assert!(occurrences.created.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_missing_digest_aborts_before_signing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notes = MockNotes::new(CreateBehavior::Succeed);
        let attestors = MockAttestors::new(CreateBehavior::Succeed);
        let occurrences = MockOccurrences::new();
        let registry = MockRegistry::new(None);
        let signer = MockSigner::new();

        let err = issue_attestation(
            &notes,
            &attestors,
            &occurrences,
            &registry,
            &signer,
            &params(dir.path()),
        )
        .await
        .expect_err("an unpushed image must abort the run");

        assert!(err.to_string().contains("No digest found"));
        assert_eq!(signer.sign_calls.get(), 0);
        assert!(occurrences.created.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_skips_completed_steps_and_reuses_the_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notes = MockNotes::new(CreateBehavior::Succeed);
        let attestors = MockAttestors::new(CreateBehavior::Succeed);
        let occurrences = MockOccurrences::new();
        let registry = MockRegistry::new(Some("sha256:abcd1234"));
        let signer = MockSigner::new();
        let params = params(dir.path());

        issue_attestation(&notes, &attestors, &occurrences, &registry, &signer, &params)
            .await
            .expect("first run failed");
        issue_attestation(&notes, &attestors, &occurrences, &registry, &signer, &params)
            .await
            .expect("second run failed");

        // All steps were checkpointed, so the second run only re-verifies.
        assert_eq!(notes.create_calls.get(), 1);
        assert_eq!(registry.calls.get(), 1);
        assert_eq!(signer.generated.get(), 1);
        assert_eq!(signer.sign_calls.get(), 1);
        assert_eq!(occurrences.created.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_changing_the_signer_identity_restarts_the_sequence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notes = MockNotes::new(CreateBehavior::Succeed);
        let attestors = MockAttestors::new(CreateBehavior::Succeed);
        let occurrences = MockOccurrences::new();
        let registry = MockRegistry::new(Some("sha256:abcd1234"));
        let signer = MockSigner::new();
        let first = params(dir.path());

        issue_attestation(&notes, &attestors, &occurrences, &registry, &signer, &first)
            .await
            .expect("first run failed");

        // Same workdir, different key identity: the old ledger must not
        // carry over, or the new fingerprint would be paired with the old
        // signature.
        let mut second = params(dir.path());
        second.signer_identity = "release@example.com".to_string();
        issue_attestation(&notes, &attestors, &occurrences, &registry, &signer, &second)
            .await
            .expect("run with a new identity failed");

        assert_eq!(signer.sign_calls.get(), 2);
        assert_eq!(signer.exports.get(), 2);
        assert_eq!(
            *signer.signed_by.borrow(),
            vec!["attestor@example.com", "release@example.com"]
        );
        assert_eq!(occurrences.created.borrow().len(), 2);
    }

    #[tokio::test]
    async fn test_fresh_ledger_still_reuses_the_existing_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notes = MockNotes::new(CreateBehavior::Succeed);
        let attestors = MockAttestors::new(CreateBehavior::Succeed);
        let occurrences = MockOccurrences::new();
        let registry = MockRegistry::new(Some("sha256:abcd1234"));
        let signer = MockSigner::new();
        let params = params(dir.path());

        issue_attestation(&notes, &attestors, &occurrences, &registry, &signer, &params)
            .await
            .expect("first run failed");

        // Operator wiped the ledger: every step re-runs, but the key ensure
        // finds the existing key and the export file is simply overwritten.
        fs::remove_file(dir.path().join(".attest-steps.json")).expect("remove ledger");
        issue_attestation(&notes, &attestors, &occurrences, &registry, &signer, &params)
            .await
            .expect("re-run after ledger wipe failed");

        assert_eq!(signer.generated.get(), 1);
        assert_eq!(signer.exports.get(), 2);
        assert!(dir.path().join(PUBLIC_KEY_FILE).is_file());
        // The same key content is not registered twice.
        assert_eq!(attestors.keys.borrow().len(), 1);
    }
}
