//! Exchange a Kite request token for an access token

use anyhow::{bail, Context, Result};
use tracing::info;

use reversion_engine::config::Config;
use reversion_engine::zerodha::{ClientConfig, Credentials, ZerodhaClient};

pub fn run(config_path: String, request_token: String) -> Result<()> {
    let config = Config::load_or_default(&config_path)?;
    let kite = &config.feed.kite;
    if kite.api_key.is_empty() || kite.api_secret.is_empty() {
        bail!("Login needs KITE_API_KEY and KITE_API_SECRET");
    }

    let client = ZerodhaClient::with_config(
        Credentials::new(&kite.api_key, &kite.api_secret),
        ClientConfig::default().with_base_url(&kite.base_url),
    )?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let session = runtime
        .block_on(client.generate_session(request_token.trim()))
        .context("Kite rejected the request token")?;

    info!("Logged in as {}", session.user_id);
    println!("KITE_ACCESS_TOKEN={}", session.access_token);
    Ok(())
}
