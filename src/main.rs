use netinv_core::{AppContext, log_error, run_with_ctrl_c};

#[tokio::main]
async fn main() {
    if let Err(e) = netinv_core::logging::init_logging() {
        eprintln!("[WARN] Failed to initialize structured logging: {}", e);
    }

    let context = AppContext::from_env();
    if let Err(e) = run_with_ctrl_c(std::env::args(), &context).await {
        log_error!("{:#}", e);
        std::process::exit(1);
    }
}
