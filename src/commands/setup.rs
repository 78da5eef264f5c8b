use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use super::load_storage_config;
use crate::cli::args::Args;
use crate::config::write_default_config;
use crate::storage::sheets::{Credentials, HttpSheetsConnector};
use crate::storage::StorageManager;

pub fn handle_init_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        println!("⚠️  {} already exists, use --force to overwrite", path.display());
        return Ok(false);
    }
    write_default_config(path)?;
    println!("✅ Wrote default storage configuration to {}", path.display());
    println!("   Set \"enabled\": true and point credentials_path at your Google key file");
    Ok(true)
}

pub fn handle_service_account_email(args: &Args) -> Result<bool> {
    let config = load_storage_config(args).into_config();
    let sheets = config.google_sheets.unwrap_or_default();

    match Credentials::from_file(&sheets.credentials_path) {
        Ok(credentials) => match credentials.client_email() {
            Some(email) => {
                println!("{}", email);
                println!("Share the spreadsheet with this address (Editor access)");
                Ok(true)
            }
            None => {
                println!(
                    "{} holds {} credentials, which have no service account email",
                    sheets.credentials_path.display(),
                    credentials.kind()
                );
                Ok(false)
            }
        },
        Err(e) => {
            println!("❌ {}", e);
            Ok(false)
        }
    }
}

pub async fn handle_rename_tab(args: &Args, from: &str, to: &str) -> Result<bool> {
    let manager = StorageManager::from_load(load_storage_config(args), Arc::new(HttpSheetsConnector));
    let renamed = manager.rename_tab(from, to).await;
    if renamed {
        println!("✅ Renamed tab '{}' to '{}'", from, to);
    } else {
        println!("❌ Could not rename tab '{}', see the log for details", from);
    }
    Ok(renamed)
}
