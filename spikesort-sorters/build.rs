//! Stamps `spikesort --version` with the commit, build time and profile
//!
//! A working tree with uncommitted changes gets a `-dirty` suffix on the
//! commit. Outside a git checkout the commit reads `unknown`.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn commit_id() -> String {
    let Some(hash) = git(&["rev-parse", "--short=8", "HEAD"]) else {
        return "unknown".to_string();
    };
    match git(&["status", "--porcelain", "--untracked-files=no"]) {
        Some(changes) if !changes.is_empty() => format!("{}-dirty", hash),
        _ => hash,
    }
}

fn main() {
    let stamps = [
        ("SPIKESORT_GIT_HASH", commit_id()),
        (
            "SPIKESORT_BUILD_TIMESTAMP",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        ),
        (
            "SPIKESORT_BUILD_PROFILE",
            std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string()),
        ),
    ];
    for (key, value) in stamps {
        println!("cargo:rustc-env={}={}", key, value);
    }
}
