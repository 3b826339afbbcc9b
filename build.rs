// Stamp `lottie-studio --version` with the short git hash when building from a checkout.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let Ok(output) = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
    else {
        return;
    };
    if !output.status.success() {
        return;
    }
    if let Ok(hash) = String::from_utf8(output.stdout) {
        println!("cargo:rustc-env=LOTTIE_STUDIO_GIT_HASH={}", hash.trim());
    }
}
