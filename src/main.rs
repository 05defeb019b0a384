// Backend server polling the Seoul bus open API and serving live bus
// positions per route stop.

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use seoul_bus_board::config::{AppConfig, Cli};
use seoul_bus_board::server::{build_state, run_server};

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            eprintln!("\n💡 Troubleshooting:");
            eprintln!("   1. Pass --service-key or set BUS_SERVICE_KEY");
            eprintln!("   2. Pass at least one --route <BUS_ROUTE_ID>");
            eprintln!("   3. Check the config file at {:?}\n", AppConfig::default_path());
            std::process::exit(1);
        }
    };

    let state = match build_state(&config) {
        Ok(state) => state,
        Err(e) => {
            error!("❌ Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    actix_web::rt::System::new().block_on(run_server(config, state))
}
