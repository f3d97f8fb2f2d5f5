use std::time::Duration;

/// Local time as `YYYYmmdd-HHMMSS`, for log file names.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Sleep without blocking the runtime.
pub async fn wait(duration: Duration) {
    tokio::time::sleep(duration).await;
}
