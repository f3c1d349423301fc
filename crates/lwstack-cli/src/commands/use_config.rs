//! `use <host>`: write a config file pointing at a cluster.

use std::path::{Path, PathBuf};

use lwstack_core::api::tls::fetch_ca_pem;
use lwstack_core::config::addresses::DEFAULT_TLS_PORT;
use lwstack_core::config::{config_for_host, default_config_dir, write_config_file, CONFIG_FILE_NAME};
use tracing::{info, warn};

use crate::cli::UseArgs;
use crate::context::Context;
use crate::error::CliError;

const CA_FILE_NAME: &str = "ca.pem";

fn config_dir(user: bool) -> Result<PathBuf, CliError> {
    if user {
        return default_config_dir().ok_or_else(|| CliError::Other("no user config directory".to_string()));
    }
    Ok(std::env::current_dir()?)
}

async fn fetch_ca(host: &str, port: u16, dir: &Path, overwrite: bool) -> Result<PathBuf, CliError> {
    let path = dir.join(CA_FILE_NAME);
    if path.exists() && !overwrite {
        return Err(CliError::InvalidArgument(format!(
            "{} exists, use --overwrite to replace it",
            path.display()
        )));
    }
    let pem = fetch_ca_pem(host, port).await?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, pem).await?;
    info!(path = %path.display(), "stored CA certificate");
    Ok(path)
}

pub async fn run_use(ctx: &Context, args: UseArgs) -> Result<(), CliError> {
    let dir = config_dir(args.user)?;
    let insecure = ctx.config.insecure;

    let ca = match (args.fetch_ca, insecure) {
        (true, true) => {
            warn!("not fetching a CA certificate for an insecure connection");
            None
        }
        (true, false) => {
            let port = args.grpc_port.unwrap_or(DEFAULT_TLS_PORT);
            Some(fetch_ca(&args.host, port, &dir, args.overwrite).await?)
        }
        (false, _) => None,
    };

    let config = config_for_host(&args.host, insecure, args.grpc_port, ca);
    let path = dir.join(CONFIG_FILE_NAME);
    write_config_file(&path, &config, args.overwrite)?;
    info!(host = %args.host, path = %path.display(), "wrote config file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lwstack_core::config::ConfigFile;

    #[test]
    fn test_written_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = config_for_host("eu1.example.com", false, Some(443), None);
        write_config_file(&path, &config, false).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded.credentials_id.as_deref(), Some("eu1.example.com"));
        assert_eq!(
            loaded.identity_server_grpc_address.as_deref(),
            Some("eu1.example.com:443")
        );
        assert!(write_config_file(&path, &config, false).is_err());
    }
}
