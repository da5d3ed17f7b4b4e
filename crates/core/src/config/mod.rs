pub mod models;

use std::path::Path;

use config::{builder::DefaultState, ConfigBuilder, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::errors::{GridError, GridResult};
pub use models::{ConfigValidator, DispatchConfig, LoadBalancingConfig, ServerConfig};

/// 驱动完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub load_balancing: LoadBalancingConfig,
}

impl AppConfig {
    /// 加载配置
    ///
    /// 指定路径时文件必须存在；未指定时按默认路径查找，
    /// 都不存在则使用内置默认值。
    pub fn load(config_path: Option<&str>) -> GridResult<Self> {
        let mut builder: ConfigBuilder<DefaultState> = config::Config::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(GridError::Configuration(format!("配置文件不存在: {path}")));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/grid-driver.toml", "grid-driver.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let config = builder
            .build()
            .map_err(|e| GridError::Configuration(format!("构建配置失败: {e}")))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| GridError::Configuration(format!("解析配置失败: {e}")))?;

        app_config.validate()?;
        Ok(app_config)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> GridResult<()> {
        self.server.validate()?;
        self.dispatch.validate()?;
        self.load_balancing.validate()?;
        Ok(())
    }
}
