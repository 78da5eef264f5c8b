use async_trait::async_trait;
use tracing::warn;

use crate::infrastructure::error::StorageError;
use crate::models::ReviewRecord;

pub mod google_sheets;

pub use google_sheets::GoogleSheetsStorage;

/// 存储后端 trait
///
/// 所有方法都不向外抛出预期内的失败：结果用布尔值表示，原因写入日志。
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// 提供商名称（与配置中的键一致）
    fn name(&self) -> &str;

    /// 建立并验证会话
    async fn connect(&mut self) -> bool;

    /// 释放会话；未连接时调用也安全
    async fn disconnect(&mut self);

    /// 本地凭据检查，不改变连接状态
    fn has_valid_credentials(&self) -> bool;

    /// 写入全部记录；仅当每条记录都已持久化时返回 true
    async fn store_reviews(&mut self, records: &[ReviewRecord]) -> bool;

    /// 读回已存储的记录
    async fn get_reviews(&self) -> Result<Vec<ReviewRecord>, StorageError>;

    /// 清空所有数据行（保留表头）
    async fn clear_data(&mut self) -> bool;

    /// 文档地址
    fn spreadsheet_url(&self) -> Option<String> {
        None
    }

    /// 本次运行新建的文档 ID
    fn created_document_id(&self) -> Option<String> {
        None
    }

    /// 重命名分区
    async fn rename_tab(&mut self, from: &str, to: &str) -> bool {
        warn!(backend = self.name(), from, to, "renaming tabs is not supported by this backend");
        false
    }
}
