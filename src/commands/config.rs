// 配置命令

use crate::cli::ConfigAction;
use crate::config::{self, AppConfig};
use crate::error::AppResult;

/// 获取配置
pub fn get_config() -> AppConfig {
    config::get_config()
}

/// 重置配置
pub fn reset_config() -> AppResult<()> {
    let default_config = AppConfig::default();
    config::update_config(default_config)
}

/// `config` 命令
pub fn handle(action: ConfigAction) -> AppResult<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&get_config())?);
        }
        ConfigAction::Reset => {
            reset_config()?;
            println!("配置已恢复默认");
        }
    }
    Ok(())
}
