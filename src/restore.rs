//! Restore collaborator: applying serialized documents to the kernel
//!
//! The compiler hands over a finished `iptables-restore` document; this
//! module pipes it to the family's restore program. `--noflush` keeps
//! rules installed by other tooling intact. Also hosts the conntrack
//! extension probe that gates the zone-split raw table.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::error::RestoreError;
use crate::iptables::parameters::AddressFamily;

/// Pipe `document` to the restore program for `family`
///
/// # Errors
///
/// Returns [`RestoreError::Spawn`] when the program cannot be started and
/// [`RestoreError::Failed`] with its exit code and stderr when it rejects
/// the document.
pub fn apply(document: &str, family: AddressFamily) -> Result<(), RestoreError> {
    let program = family.restore_program();
    debug!("Piping {} bytes to {program} --noflush", document.len());

    let mut child = Command::new(program)
        .arg("--noflush")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RestoreError::Spawn {
            program: program.into(),
            source,
        })?;

    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(document.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(RestoreError::Failed {
            program: program.into(),
            exit: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    info!("Applied ruleset via {program}");
    Ok(())
}

/// Probe whether the conntrack match extension is usable for `family`
///
/// Some environments (WSL2 among them) ship iptables without the conntrack
/// module. The zone-split rules are skipped there rather than failing the
/// whole installation.
#[must_use]
pub fn conntrack_available(family: AddressFamily) -> bool {
    Command::new(family.iptables_program())
        .args(["-m", "conntrack", "--help"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
