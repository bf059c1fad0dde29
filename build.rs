fn main() {
    // CI sets FNUG_VERSION (e.g., "0.1.0-abc1234"); otherwise derive from git.
    if let Ok(version) = std::env::var("FNUG_VERSION") {
        println!("cargo:rustc-env=FNUG_VERSION={version}");
    } else {
        let hash = std::process::Command::new("git")
            .args(["rev-parse", "--short=7", "HEAD"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .unwrap_or_default()
            .trim()
            .to_string();

        let base = env!("CARGO_PKG_VERSION");
        if hash.is_empty() {
            println!("cargo:rustc-env=FNUG_VERSION={base}");
        } else {
            println!("cargo:rustc-env=FNUG_VERSION={base}-{hash}");
        }
    }
}
