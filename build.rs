use std::process::Command;

const SHA_VAR: &str = "PHASEOPT_GIT_SHA";

/// Trimmed stdout of a successful git command
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Some(text)
}

/// Short commit hash, suffixed with `-dirty` when tracked files have local changes
fn source_revision() -> Option<String> {
    let sha = git(&["rev-parse", "--short", "HEAD"]).filter(|sha| !sha.is_empty())?;
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).map_or(false, |status| !status.is_empty());
    Some(if dirty { format!("{}-dirty", sha) } else { sha })
}

fn main() {
    println!("cargo:rerun-if-env-changed={}", SHA_VAR);
    for path in [".git/HEAD", ".git/refs", ".git/index"] {
        println!("cargo:rerun-if-changed={}", path);
    }

    // a packaging pipeline may pin the revision explicitly
    let revision = std::env::var(SHA_VAR)
        .ok()
        .map(|sha| sha.trim().to_string())
        .filter(|sha| !sha.is_empty())
        .or_else(source_revision);

    if let Some(revision) = revision {
        println!("cargo:rustc-env={}={}", SHA_VAR, revision);
    }
}
