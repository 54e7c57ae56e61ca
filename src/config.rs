//! Code for the configuration of the application.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    noop,
    slicer::{self, AnySlicer},
    AnyMachine, Fleet,
};

/// The configuration of the application.
#[derive(Default, Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// The Bambu cloud account, required when any `bambu` machine is
    /// configured.
    pub cloud: Option<CloudConfig>,

    /// The slicer used by machines that slice; the no-op slicer if unset.
    pub slicer: Option<SlicerConfig>,

    /// Every machine to manage.
    #[serde(default)]
    pub machines: Vec<MachineConfig>,
}

/// The Bambu cloud account.
#[derive(Default, Clone, Deserialize, Serialize)]
pub struct CloudConfig {
    /// The account email.
    #[serde(default)]
    pub email: String,

    /// The account password.
    #[serde(default)]
    pub password: Option<String>,

    /// A one-time code emailed by the cloud; used instead of the password.
    #[serde(default)]
    pub verification_code: Option<String>,

    /// An access token from an earlier login, reused if still valid.
    #[serde(default)]
    pub token: Option<String>,

    /// Seconds to wait for the broker session.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Seconds an upload to a printer may take.
    #[serde(default)]
    pub upload_timeout_secs: Option<u64>,
}

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("CloudConfig")
            .field("email", &self.email)
            .field("password", &redacted(&self.password))
            .field("verification_code", &redacted(&self.verification_code))
            .field("token", &redacted(&self.token))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .finish()
    }
}

/// Which slicer to run.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlicerConfig {
    /// Use the Bambu Studio command line.
    BambuStudio {
        /// The `bambu-studio` executable.
        executable: PathBuf,
        /// The directory of per-model profiles.
        profiles: PathBuf,
        /// Seconds a slice may run.
        #[serde(default)]
        timeout_secs: Option<u64>,
    },

    /// Produce empty output without slicing.
    Noop,
}

impl SlicerConfig {
    /// Construct the configured slicer.
    pub fn load(&self) -> AnySlicer {
        match self {
            Self::BambuStudio {
                executable,
                profiles,
                timeout_secs,
            } => {
                let slicer = slicer::bambu_studio::Slicer::new(executable.clone(), profiles.clone());
                match timeout_secs {
                    Some(secs) => slicer.with_timeout(Duration::from_secs(*secs)).into(),
                    None => slicer.into(),
                }
            }
            Self::Noop => slicer::noop::Slicer::default().into(),
        }
    }
}

/// One configured machine; `type` picks the kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum MachineConfig {
    /// A Bambu Lab printer reached through the cloud.
    #[cfg(feature = "bambu")]
    Bambu(crate::bambu::Config),

    /// An ELEGOO printer polled on the LAN.
    #[cfg(feature = "elegoo")]
    Elegoo(crate::elegoo::Config),

    /// A machine that does nothing.
    Noop(noop::Config),
}

impl Config {
    /// Parse a configuration from a toml file.
    pub fn from_file(file: &Path) -> Result<Self> {
        let config = std::fs::read_to_string(file)
            .with_context(|| format!("Config file not found at {}", file.display()))?;
        Self::from_str(&config)
    }

    /// Parse a configuration from a toml string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(config: &str) -> Result<Self> {
        Ok(toml::from_str(config)?)
    }

    /// Take cloud credentials from outside the file, e.g. the environment.
    /// Values given here win over the file.
    pub fn override_cloud_credentials(&mut self, email: Option<String>, password: Option<String>) {
        if email.is_none() && password.is_none() {
            return;
        }

        let cloud = self.cloud.get_or_insert_with(CloudConfig::default);
        if let Some(email) = email {
            cloud.email = email;
        }
        if password.is_some() {
            cloud.password = password;
        }
    }

    /// The configured slicer.
    pub fn slicer(&self) -> AnySlicer {
        self.slicer
            .as_ref()
            .map(SlicerConfig::load)
            .unwrap_or_else(|| slicer::noop::Slicer::default().into())
    }

    /// Construct every configured machine. Cloud machines share one broker
    /// session, which is connected before this returns.
    pub async fn build_fleet(&self) -> Result<Fleet> {
        let slicer = self.slicer();
        #[cfg(feature = "bambu")]
        let pool = bambulabs::pool::ConnectionPool::new();

        let mut machines: Vec<AnyMachine> = Vec::with_capacity(self.machines.len());
        for config in &self.machines {
            let machine: AnyMachine = match config {
                #[cfg(feature = "bambu")]
                MachineConfig::Bambu(config) => {
                    let upload_timeout = self
                        .cloud
                        .as_ref()
                        .and_then(|cloud| cloud.upload_timeout_secs)
                        .map(Duration::from_secs)
                        .unwrap_or(bambulabs::upload::UPLOAD_TIMEOUT);
                    crate::bambu::Bambu::new(config, pool.clone(), slicer.clone())
                        .await
                        .with_context(|| format!("failed to set up bambu machine {}", config.serial))?
                        .with_upload_timeout(upload_timeout)
                        .into()
                }
                #[cfg(feature = "elegoo")]
                MachineConfig::Elegoo(config) => crate::elegoo::Elegoo::new(config)
                    .await
                    .with_context(|| format!("failed to set up elegoo machine at {}", config.ip))?
                    .into(),
                MachineConfig::Noop(config) => noop::Noop::new(config, slicer.clone()).into(),
            };
            machines.push(machine);
        }

        let fleet = Fleet::new(machines)?;

        #[cfg(feature = "bambu")]
        {
            if self.machines.iter().any(|config| matches!(config, MachineConfig::Bambu(_))) {
                let cloud = self
                    .cloud
                    .as_ref()
                    .context("bambu machines are configured without a [cloud] account")?;
                cloud.connect(&pool).await?;
            }
        }

        tracing::info!(machines = fleet.len(), "fleet ready");
        Ok(fleet)
    }
}

#[cfg(feature = "bambu")]
impl CloudConfig {
    /// Log in, or check the configured token, and return an access token.
    pub async fn access_token(&self, client: &bambulabs::cloud::CloudClient) -> crate::Result<String> {
        use bambulabs::cloud::Secret;

        if let Some(token) = &self.token {
            client.ensure_token_authorized(token).await?;
            tracing::debug!("reusing configured access token");
            return Ok(token.clone());
        }

        let secret = match (&self.verification_code, &self.password) {
            (Some(code), _) => Secret::VerificationCode(code.clone()),
            (None, Some(password)) => Secret::Password(password.clone()),
            (None, None) => {
                return Err(crate::Error::Authentication(
                    "no password, verification code or token configured".to_string(),
                ))
            }
        };

        tracing::info!(email = %self.email, "logging in to the bambu cloud");
        Ok(client.login(&self.email, &secret).await?)
    }

    /// Derive broker credentials and bring up the shared session.
    pub async fn connect(&self, pool: &bambulabs::pool::ConnectionPool) -> crate::Result<()> {
        let client = bambulabs::cloud::CloudClient::new()?;
        let token = self.access_token(&client).await?;
        let credentials = client.broker_credentials(&token).await?;
        let timeout = self
            .connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(bambulabs::pool::CONNECT_TIMEOUT);

        pool.connect(&credentials, timeout).await?;
        tracing::info!(username = %credentials.username, "connected to the bambu broker");
        Ok(())
    }
}
