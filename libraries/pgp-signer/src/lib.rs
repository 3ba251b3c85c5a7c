//! Detached PGP signing through the local GnuPG binary.
//!
//! Keys are addressed by an identity string (an email). Generation is
//! idempotent: an existing key for the identity is reused, so re-running a
//! signing workflow never creates a second key.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, anyhow};
use log::info;

/// Local signing operations, mockable for workflow tests.
pub trait Signer {
    /// Make sure a key exists for `identity`, generating one if absent.
    /// Returns `true` when a new key was generated.
    fn ensure_key(&self, identity: &str) -> anyhow::Result<bool>;

    /// The fingerprint of the identity's key, as a hex string.
    fn fingerprint(&self, identity: &str) -> anyhow::Result<String>;

    /// Export the armored public key to `destination` and return the armor.
    fn export_public_key(&self, identity: &str, destination: &Path) -> anyhow::Result<String>;

    /// Write an armored detached signature over `payload` to `signature_out`
    /// and return the armor.
    fn sign_detached(
        &self,
        identity: &str,
        payload: &Path,
        signature_out: &Path,
    ) -> anyhow::Result<String>;
}

pub struct GpgSigner {
    gpg: PathBuf,
    /// Alternate GNUPGHOME, mainly for tests.
    homedir: Option<PathBuf>,
}

impl Default for GpgSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl GpgSigner {
    pub fn new() -> Self {
        Self {
            gpg: PathBuf::from("gpg"),
            homedir: None,
        }
    }

    pub fn with_homedir(homedir: PathBuf) -> Self {
        Self {
            gpg: PathBuf::from("gpg"),
            homedir: Some(homedir),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.gpg);
        command.arg("--batch");
        if let Some(homedir) = &self.homedir {
            command.arg("--homedir").arg(homedir);
        }
        command
    }

    fn run(&self, mut command: Command, what: &str) -> anyhow::Result<Output> {
        let child = command
            .output()
            .context(format!("Error executing {} ({})", self.gpg.display(), what))?;

        if !child.status.success() {
            return Err(anyhow::format_err!(
                "{}\n{} did not exit with a successful exit status while {}",
                String::from_utf8(child.stderr)?,
                self.gpg.display(),
                what
            ));
        }
        Ok(child)
    }

    fn key_exists(&self, identity: &str) -> bool {
        let mut command = self.command();
        command
            .args(["--with-colons", "--list-secret-keys"])
            .arg(identity)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command.status().map(|s| s.success()).unwrap_or(false)
    }
}

impl Signer for GpgSigner {
    fn ensure_key(&self, identity: &str) -> anyhow::Result<bool> {
        if self.key_exists(identity) {
            info!("Reusing the existing signing key for {}", identity);
            return Ok(false);
        }

        info!("No key found for {}, generating one", identity);
        let mut command = self.command();
        command
            .arg("--gen-key")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command
            .spawn()
            .context(format!("Error executing {}", self.gpg.display()))?;

        let spec = format!(
            "Key-Type: RSA\n\
             Key-Length: 2048\n\
             Name-Real: Attestor key\n\
             Name-Email: {}\n\
             Expire-Date: 0\n\
             %no-protection\n\
             %commit\n",
            identity
        );
        child
            .stdin
            .take()
            .ok_or(anyhow!("Could not open gpg stdin"))?
            .write_all(spec.as_bytes())
            .context("Error writing the key spec to gpg")?;

        let output = child
            .wait_with_output()
            .context("Error waiting for gpg to generate the key")?;
        if !output.status.success() {
            return Err(anyhow::format_err!(
                "{}\nKey generation failed for {}",
                String::from_utf8(output.stderr)?,
                identity
            ));
        }
        Ok(true)
    }

    fn fingerprint(&self, identity: &str) -> anyhow::Result<String> {
        let mut command = self.command();
        command
            .args(["--with-colons", "--fingerprint"])
            .arg(identity);
        let output = self.run(command, "reading the key fingerprint")?;
        let stdout = String::from_utf8(output.stdout)?;
        parse_fingerprint(&stdout)
            .ok_or_else(|| anyhow!("No fingerprint found in gpg output for {}", identity))
    }

    fn export_public_key(&self, identity: &str, destination: &Path) -> anyhow::Result<String> {
        let mut command = self.command();
        command.args(["--armor", "--export"]).arg(identity);
        let output = self.run(command, "exporting the public key")?;
        let armor = String::from_utf8(output.stdout)?;
        if armor.trim().is_empty() {
            return Err(anyhow!("gpg exported an empty public key for {}", identity));
        }
        std::fs::write(destination, &armor).context(format!(
            "Error writing the exported public key to {}",
            destination.display()
        ))?;
        info!("Public key exported to {}", destination.display());
        Ok(armor)
    }

    fn sign_detached(
        &self,
        identity: &str,
        payload: &Path,
        signature_out: &Path,
    ) -> anyhow::Result<String> {
        let mut command = self.command();
        command
            .args(["--yes", "--armor", "--local-user"])
            .arg(identity)
            .arg("--output")
            .arg(signature_out)
            .arg("--detach-sign")
            .arg(payload);
        self.run(command, "producing the detached signature")?;
        std::fs::read_to_string(signature_out).context(format!(
            "Error reading the signature back from {}",
            signature_out.display()
        ))
    }
}

/// Extract the primary key fingerprint from `--with-colons` output.
///
/// The fingerprint record is `fpr:::::::::<HEX>:`; field 10 carries the hex.
fn parse_fingerprint(colons: &str) -> Option<String> {
    colons
        .lines()
        .find(|line| line.starts_with("fpr:"))
        .and_then(|line| line.split(':').nth(9))
        .filter(|hex| !hex.is_empty())
        .map(|hex| hex.to_string())
}
