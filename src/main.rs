use admission::{config::AdmissionConfig, init_admission, init_tracing};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    init_tracing();

    // Config file path from the command line or the default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/admission.yaml".to_string());

    let config = match AdmissionConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: admission [config_file]");
            process::exit(1);
        }
    };

    if let Err(e) = init_admission(config).await {
        eprintln!("Admission layer error: {}", e);
        process::exit(1);
    }
}
