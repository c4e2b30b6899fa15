/// CMS media service
///
/// Serves uploads, listings and stored files, and runs the background
/// consistency jobs.

use cms_media::{config::ServerConfig, context::AppContext, error::CmsResult, jobs, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> CmsResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cms_media=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Print banner
    print_banner();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
   _____ __  __  _____   __  __          _ _
  / ____|  \/  |/ ____| |  \/  |        | (_)
 | |    | \  / | (___   | \  / | ___  __| |_  __ _
 | |    | |\/| |\___ \  | |\/| |/ _ \/ _` | |/ _` |
 | |____| |  | |____) | | |  | |  __/ (_| | | (_| |
  \_____|_|  |_|_____/  |_|  |_|\___|\__,_|_|\__,_|

        Content-addressed media service v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
