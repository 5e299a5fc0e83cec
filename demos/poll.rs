use std::env;

use wemportal::{Config, Coordinator, Error, Mode};

#[tokio::main]
async fn main() -> wemportal::Result<()> {
    tracing_subscriber::fmt::init();

    let (Ok(username), Ok(password)) = (env::var("WEM_USERNAME"), env::var("WEM_PASSWORD")) else {
        eprintln!("usage: WEM_USERNAME=.. WEM_PASSWORD=.. [WEM_MODE=api|web|both] poll");
        std::process::exit(2);
    };
    let mut config = Config::new(username, password);
    if let Ok(mode) = env::var("WEM_MODE") {
        config.mode = mode.parse::<Mode>()?;
    }
    println!("Polling WEM Portal in {} mode...", config.mode.as_str());

    let mut coordinator = Coordinator::new(config)?;
    let interval = coordinator.update_interval();

    loop {
        match coordinator.refresh().await {
            Ok(snapshot) => {
                for device in snapshot.values() {
                    println!(
                        "device {} ({})",
                        device.id,
                        if device.is_connected() { "online" } else { "offline" }
                    );
                    for (key, record) in &device.records {
                        println!(
                            "  {key:<48} {:>10} {:<5} [{}]",
                            record.value.to_string(),
                            record.unit,
                            record.platform().as_str()
                        );
                    }
                }
            }
            Err(Error::CoolingDown(left)) => {
                eprintln!("Cooling down, {}s left", left.as_secs());
            }
            Err(e) => eprintln!("Refresh failed: {e}"),
        }
        tokio::time::sleep(interval).await;
    }
}
