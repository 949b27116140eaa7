use std::process::Command;

fn main() {
    for (var, exported) in [("TARGET", "MOSPRIMS_BUILD_TARGET"), ("PROFILE", "MOSPRIMS_BUILD_PROFILE")] {
        if let Ok(value) = std::env::var(var) {
            println!("cargo:rustc-env={exported}={value}");
        }
        println!("cargo:rerun-if-env-changed={var}");
    }

    // Outside a git checkout (e.g. a packaged crate) the hash is simply absent.
    let hash = Command::new("git")
        .args(["rev-parse", "--short=12", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok());
    if let Some(hash) = hash {
        println!("cargo:rustc-env=MOSPRIMS_GIT_HASH={}", hash.trim());
    }
}
