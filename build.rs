fn main() {
    set_git_revision_hash();
}

/// Make the current git hash available to the build as the environment
/// variable `NETGAUGE_BUILD_GIT_HASH`, or `unknown` outside a checkout.
fn set_git_revision_hash() {
    use std::process::Command;

    println!("cargo:rerun-if-changed=.git/HEAD");

    let args = &["rev-parse", "--short=10", "HEAD"];
    let rev = Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|rev| !rev.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=NETGAUGE_BUILD_GIT_HASH={}", rev);
}
