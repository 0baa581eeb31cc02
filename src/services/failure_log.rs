//! 失败订单记录 - 业务能力层
//!
//! 只负责"追加写 failed_orders.txt"，一行一个订单号

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::models::OrderId;

pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条失败记录
    pub async fn append(&self, order_id: &OrderId) -> Result<()> {
        debug!("写入失败记录: {} -> {}", order_id, self.path.display());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("无法创建目录: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("无法打开失败记录文件: {}", self.path.display()))?;

        file.write_all(format!("{}\n", order_id).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}
