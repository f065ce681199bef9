use std::env;
use std::process::Command;

/// Resolve the commit `/health` reports. A packager can pin it with
/// `COVENANT_BUILD_COMMIT`; otherwise ask git, and fall back to "unknown"
/// for builds outside a checkout.
fn build_commit() -> String {
    if let Some(pinned) = env::var("COVENANT_BUILD_COMMIT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        return pinned;
    }

    Command::new("git")
        .args(["rev-parse", "--short=10", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|sha| sha.trim().to_string())
        .filter(|sha| !sha.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rustc-env=COVENANT_GIT_SHA={}", build_commit());
    println!("cargo:rerun-if-env-changed=COVENANT_BUILD_COMMIT");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
}
