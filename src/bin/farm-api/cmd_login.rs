#![cfg(feature = "bambu")]

use anyhow::{Context, Result};
use bambulabs::cloud::CloudClient;
use farm_api::Config;

pub async fn main(cfg: &Config, verification_code: Option<String>) -> Result<()> {
    let mut cloud = cfg.cloud.clone().context("no [cloud] account configured")?;
    if verification_code.is_some() {
        cloud.verification_code = verification_code;
        cloud.token = None;
    }

    let client = CloudClient::new()?;
    let token = cloud.access_token(&client).await?;
    let credentials = client.broker_credentials(&token).await?;

    println!("{}", credentials.username);
    Ok(())
}
