use std::time::Duration;

use standalone_service::{CancelToken, ServiceIdentity, StandaloneService};

/// Writes the current time to ./testing.txt every 10 seconds until asked to stop
fn write_timestamps(_args: Vec<String>, token: CancelToken) {
    loop {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        println!("{}", now);
        if let Err(e) = std::fs::write("./testing.txt", &now) {
            log::error!("Failed to write timestamp: {}", e);
        }
        if !token.sleep(Duration::from_secs(10)) {
            break;
        }
    }
}

fn main() {
    let identity = match ServiceIdentity::new("test-service", "Test standalone service", "...") {
        Ok(identity) => identity,
        Err(e) => {
            eprintln!("Invalid service identity: {}", e);
            std::process::exit(2);
        }
    };
    let service = StandaloneService::new(identity, write_timestamps);
    if let Err(e) = service.init_log() {
        eprintln!("{}", e);
    }
    log::debug!("Service dispatching now {:?}", std::env::args());
    if let Err(e) = service.main() {
        log::error!("Service failed: {}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
