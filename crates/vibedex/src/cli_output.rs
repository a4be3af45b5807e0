//! Centralised helpers for user-facing CLI output written to stderr.
//!
//! Machine-readable results go to stdout as JSON; everything here is for the
//! human operator.

use std::io::Write as _;

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

pub fn notify_connected(address: &str) {
    stderr_writeln(&format!("VibeDex: wallet connected ({address})."));
}

pub fn notify_disconnected() {
    stderr_writeln("VibeDex: wallet disconnected.");
}

/// Show the remote pairing URI the human must open in their wallet.
pub fn show_pairing_uri(uri: &str) {
    stderr_writeln(&format!(
        "VibeDex pairing\n===============\nOpen this link (or scan it as a QR code) in your wallet to approve:\n{uri}\n\nWaiting for approval..."
    ));
}

/// The one user-visible notification per swap attempt, success or failure.
pub fn notify_swap(succeeded: bool, detail: &str) {
    if succeeded {
        stderr_writeln(&format!("VibeDex: swap submitted ({detail})."));
    } else {
        stderr_writeln(&format!("VibeDex: swap failed ({detail})."));
    }
}
