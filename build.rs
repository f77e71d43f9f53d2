//! Embeds the build revision reported by `/health` and the startup log

use std::process::Command;

fn main() {
    // Packaged builds (no .git) pass the revision in explicitly
    let revision = std::env::var("EXPEDICAO_REVISION").ok().filter(|r| !r.is_empty()).unwrap_or_else(|| {
        match Command::new("git").args(["rev-parse", "--short", "HEAD"]).output() {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).trim().to_string(),
            _ => "unknown".to_string(),
        }
    });

    println!("cargo:rustc-env=GIT_HASH={revision}");
    println!("cargo:rerun-if-env-changed=EXPEDICAO_REVISION");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
