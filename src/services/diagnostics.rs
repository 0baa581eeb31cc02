//! 诊断截图 - 业务能力层
//!
//! 出错时保存当前页面，截图失败只记日志，不影响流程

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::infrastructure::PageDriver;

#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 保存整页截图，返回文件路径
    pub async fn capture<D: PageDriver>(&self, driver: &D, name: &str) -> Option<PathBuf> {
        let path = self.dir.join(name);
        match driver.screenshot(&path, true).await {
            Ok(()) => {
                debug!("诊断截图已保存: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("⚠️ 诊断截图失败 ({}): {}", name, e);
                None
            }
        }
    }
}
