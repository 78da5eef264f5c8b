use anyhow::Result;
use std::sync::Arc;

use super::load_storage_config;
use crate::cli::args::Args;
use crate::config::ConfigOrigin;
use crate::storage::sheets::HttpSheetsConnector;
use crate::storage::StorageManager;

pub async fn handle_status(args: &Args) -> Result<bool> {
    let manager = StorageManager::from_load(load_storage_config(args), Arc::new(HttpSheetsConnector));
    let status = manager.config_status();

    match &status.origin {
        ConfigOrigin::File(path) => println!("Configuration: {}", path.display()),
        ConfigOrigin::Mapping => println!("Configuration: in-memory mapping"),
        ConfigOrigin::Provider(name) => println!("Configuration: provided by {}", name),
        ConfigOrigin::Direct => println!("Configuration: supplied directly"),
    }
    if let Some(reason) = &status.defaults_reason {
        println!("⚠️  Using defaults: {}", reason);
    }

    println!(
        "Storage enabled: {}",
        if manager.is_storage_enabled() { "yes" } else { "no" }
    );

    let credentials = manager.get_credentials_status().await;
    if credentials.is_empty() {
        println!("No storage providers configured");
    }
    for (provider, valid) in &credentials {
        println!("  {:<16} credentials {}", provider, if *valid { "✅ valid" } else { "❌ invalid" });
    }

    for provider in manager.config().unsupported_enabled_providers() {
        println!("  {:<16} ⚠️  enabled but not supported", provider);
    }

    if let Some(url) = manager.get_spreadsheet_url().await {
        println!("Spreadsheet: {}", url);
    }

    Ok(credentials.values().all(|valid| *valid))
}
