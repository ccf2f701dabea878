//! 引擎配置（TOML）
//!
//! ```toml
//! [refresh]
//! dirty_limit = 100
//! batch_size  = 10
//!
//! [cube]
//! query_result_limit  = 10000
//! nodes_limit         = 100000
//! filling_nodes_limit = 10000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{OlapError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshConfig {
    /// 每轮 refresh_one 至多重算的脏分区数
    pub dirty_limit: usize,
    /// 手动刷新的默认批大小（分区数）
    pub batch_size:  usize,
}

impl Default for RefreshConfig {
    fn default() -> Self { Self { dirty_limit: 100, batch_size: 10 } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CubeConfig {
    /// 单次立方体查询允许的最大平面行数
    pub query_result_limit:  usize,
    /// 树节点（含插值节点）上限
    pub nodes_limit:         usize,
    /// 维度轴插值合成的占位成员上限
    pub filling_nodes_limit: usize,
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self { query_result_limit: 10_000, nodes_limit: 100_000, filling_nodes_limit: 10_000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub refresh: RefreshConfig,
    pub cube:    CubeConfig,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| OlapError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| OlapError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("refresh.dirty_limit", self.refresh.dirty_limit),
            ("refresh.batch_size", self.refresh.batch_size),
            ("cube.query_result_limit", self.cube.query_result_limit),
            ("cube.nodes_limit", self.cube.nodes_limit),
            ("cube.filling_nodes_limit", self.cube.filling_nodes_limit),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(OlapError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}
