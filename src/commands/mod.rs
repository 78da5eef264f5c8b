pub mod setup;
pub mod status;
pub mod store;

pub use setup::{handle_init_config, handle_rename_tab, handle_service_account_email};
pub use status::handle_status;
pub use store::{handle_store, load_reviews};

use crate::cli::args::{Args, Command};
use crate::config::{load_config, ConfigLoad, FileConfigSource, StorageConfig};
use tracing::warn;

/// 命令路由器；返回 false 表示命令执行失败
pub async fn route_command(args: &Args) -> anyhow::Result<bool> {
    match &args.command {
        Command::Store { input, dry_run } => handle_store(args, input, *dry_run).await,
        Command::Status => handle_status(args).await,
        Command::RenameTab { from, to } => handle_rename_tab(args, from, to).await,
        Command::InitConfig { force } => handle_init_config(&args.config, *force),
        Command::ServiceAccountEmail => handle_service_account_email(args),
    }
}

/// 加载配置文件并应用环境变量覆盖
pub(crate) fn load_storage_config(args: &Args) -> ConfigLoad {
    let load = load_config(&FileConfigSource::new(&args.config));
    if let Some(reason) = load.reason() {
        warn!("Using default storage configuration: {}", reason);
    }
    load.map_config(StorageConfig::with_env_overrides)
}
