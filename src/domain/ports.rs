use crate::domain::model::{DecompositionShape, FlatRecord};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 單筆輸入轉換成零或多筆輸出的純函式介面，由 `Stage` 包裝成串流
pub trait Transform: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// 必須一次產生完整結果；失敗時不可回傳部分記錄
    fn apply(&self, input: Self::Input) -> Result<Vec<Self::Output>>;
}

/// 下游的記錄消費者（序列化、寫檔等）
#[async_trait]
pub trait RecordSink: Send {
    async fn write_record(&mut self, record: &FlatRecord) -> Result<()>;

    /// 串流結束時呼叫，回傳輸出位置的描述
    async fn finish(&mut self) -> Result<String>;
}

pub trait ConfigProvider: Send + Sync {
    fn fields(&self) -> &[String];
    fn default_metric(&self) -> &str;
    fn shape(&self) -> DecompositionShape;
}
