//! Upload sliced archives to the printer's removable storage over FTP with
//! explicit TLS.

use std::{path::Path, process::Stdio, time::Duration};

use tokio::{io::AsyncWriteExt, process::Command};
use url::Url;

use crate::{Error, Result};

/// The FTP control port the printer listens on.
pub const FTP_PORT: u16 = 990;
/// The fixed FTP user.
pub const FTP_USER: &str = "bblp";
/// The default bound on a single upload.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// The name a sliced job is stored under on the device.
pub fn archive_name(file_name: &str) -> String {
    Path::new(file_name).with_extension("3mf").to_string_lossy().into_owned()
}

/// Where `remote_name` lives on the device, with the name percent-encoded.
pub fn upload_url(ip: &str, remote_name: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("ftp://{}:{}/", ip, FTP_PORT))?;
    url.path_segments_mut()
        .map_err(|_| Error::Upload(format!("cannot build an upload path on {}", ip)))?
        .pop_if_empty()
        .push(remote_name);
    Ok(url)
}

/// A curl config carrying the login, read from stdin so the access code
/// never shows up in the process list.
fn curl_config(access_code: &str) -> String {
    let login = format!("{}:{}", FTP_USER, access_code);
    format!("user = \"{}\"\n", login.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Upload `path` to the root of the device's storage as `remote_name`.
///
/// The transfer is killed if it has not finished within `timeout`.
pub async fn upload_file(
    ip: &str,
    access_code: &str,
    path: &Path,
    remote_name: &str,
    timeout: Duration,
) -> Result<()> {
    let local = path
        .to_str()
        .ok_or_else(|| Error::Upload(format!("invalid file path: {}", path.display())))?;
    let args: Vec<String> = vec![
        "--silent".to_string(),
        "--show-error".to_string(),
        "--ssl-reqd".to_string(),
        "--insecure".to_string(),
        "--ftp-pasv".to_string(),
        "--upload-file".to_string(),
        local.to_string(),
        upload_url(ip, remote_name)?.to_string(),
        "--config".to_string(),
        "-".to_string(),
    ];

    tracing::info!(ip, remote_name, "uploading file to device");
    let mut child = Command::new("curl")
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| Error::Upload(format!("failed to run curl: {}", err)))?;

    let config = curl_config(access_code);
    let transfer = async move {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(config.as_bytes()).await?;
        }
        child.wait_with_output().await
    };
    // On timeout the transfer future is dropped, which kills curl.
    let output = tokio::time::timeout(timeout, transfer)
        .await
        .map_err(|_| Error::Timeout(timeout, "file upload"))?
        .map_err(|err| Error::Upload(format!("failed to run curl: {}", err)))?;

    if !output.status.success() {
        return Err(Error::Upload(format!(
            "curl exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}
