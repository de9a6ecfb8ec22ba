use crate::core::flatten::FlattenerConfig;
use crate::core::stage::{channel, StageReceiver, StageSender, StreamOptions};
use crate::domain::model::{BreakdownTree, Decomposition, DecompositionShape, RawDecompositionResult};
use crate::utils::error::{FlattenError, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;

/// 解析一行 JSON 成為分解結果
pub fn parse_decomposition(
    line: &str,
    shape: DecompositionShape,
    default_metric: &str,
) -> Result<Decomposition> {
    match shape {
        DecompositionShape::Points => {
            let raw: RawDecompositionResult = serde_json::from_str(line)?;
            let point = raw.into_result(default_metric).map_err(FlattenError::malformed)?;
            Ok(Decomposition::Point(point))
        }
        DecompositionShape::Nested => {
            let tree: BreakdownTree = serde_json::from_str(line)?;
            Ok(Decomposition::Tree(tree))
        }
    }
}

/// 從 JSON lines 讀取分解結果，每行一筆，空白行略過。
/// 輸入形狀與簡寫指標名稱都取自扁平化設定，與 stage 保持一致。
pub struct JsonLinesSource<R> {
    reader: R,
    shape: DecompositionShape,
    default_metric: String,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, config: &FlattenerConfig) -> Self {
        Self {
            reader,
            shape: config.shape(),
            default_metric: config.default_metric().to_string(),
        }
    }

    /// 把所有行送進通道；解析錯誤會當作中止訊號往下游送，然後停止讀取。
    /// 回傳已送出的筆數，下游關閉時回傳 `DownstreamRejected`。
    pub async fn pump(self, tx: StageSender<Decomposition>) -> Result<usize> {
        let mut lines = self.reader.lines();
        let mut line_number = 0;
        let mut sent = 0;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(FlattenError::IoError(e))).await;
                    break;
                }
            };
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            let item = parse_decomposition(&line, self.shape, &self.default_metric).map_err(|e| {
                FlattenError::malformed(format!("line {}: {}", line_number, e))
            });
            let failed = item.is_err();

            if tx.send(item).await.is_err() {
                return Err(FlattenError::DownstreamRejected {
                    stage: "source".to_string(),
                });
            }
            if failed {
                tracing::warn!("⚠️ Stopped reading input at line {}", line_number);
                break;
            }
            sent += 1;
        }

        tracing::debug!("📥 Read {} decomposition results ({} lines)", sent, line_number);
        Ok(sent)
    }

    pub fn spawn(self, options: &StreamOptions) -> (StageReceiver<Decomposition>, JoinHandle<Result<usize>>) {
        let (tx, rx) = channel(options);
        let handle = tokio::spawn(self.pump(tx));
        (rx, handle)
    }
}

/// 從記憶體中的項目建立上游，供程式庫使用者與測試使用
pub fn spawn_iter_source<I>(
    items: I,
    options: &StreamOptions,
) -> (StageReceiver<Decomposition>, JoinHandle<Result<usize>>)
where
    I: IntoIterator<Item = Decomposition> + Send + 'static,
    I::IntoIter: Send,
{
    let (tx, rx) = channel(options);
    let handle = tokio::spawn(async move {
        let mut sent = 0;
        for item in items {
            if tx.send(Ok(item)).await.is_err() {
                return Err(FlattenError::DownstreamRejected {
                    stage: "source".to_string(),
                });
            }
            sent += 1;
        }
        Ok(sent)
    });
    (rx, handle)
}
