fn main() {
    // Load .env file for build-time environment variables
    if let Ok(path) = dotenvy::dotenv() {
        println!("cargo:rerun-if-changed={}", path.display());
    }

    // Pass Google OAuth credentials to the compiler
    if let Ok(val) = std::env::var("GOOGLE_CLIENT_ID") {
        println!("cargo:rustc-env=GOOGLE_CLIENT_ID={}", val);
    }
    if let Ok(val) = std::env::var("GOOGLE_CLIENT_SECRET") {
        println!("cargo:rustc-env=GOOGLE_CLIENT_SECRET={}", val);
    }

    tauri_build::build()
}
