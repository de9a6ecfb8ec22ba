use crate::core::flatten::Flattener;
use crate::core::stage::{spawn_stage, StageReceiver, StreamOptions};
use crate::domain::model::Decomposition;
use crate::domain::ports::RecordSink;
use crate::utils::error::{FlattenError, Result};
use std::time::{Duration, Instant};

pub const FLATTEN_STAGE: &str = "flatten";

/// 一次執行的摘要
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub items_in: usize,
    pub records_out: usize,
    pub output: String,
    pub duration: Duration,
}

/// 管線宿主：上游 → 扁平化 stage → sink
pub struct FlattenEngine<S: RecordSink> {
    flattener: Flattener,
    options: StreamOptions,
    sink: S,
}

impl<S: RecordSink> FlattenEngine<S> {
    pub fn new(flattener: Flattener, options: StreamOptions, sink: S) -> Self {
        Self {
            flattener,
            options,
            sink,
        }
    }

    pub fn flattener(&self) -> &Flattener {
        &self.flattener
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// 執行到上游結束或第一個錯誤為止；錯誤只回報一次
    pub async fn run(&mut self, upstream: StageReceiver<Decomposition>) -> Result<RunSummary> {
        let start = Instant::now();
        tracing::info!(
            "🚀 Flattening decompositions over fields [{}]",
            self.flattener.config().fields().join(", ")
        );

        let (mut records, task) = spawn_stage(
            FLATTEN_STAGE,
            self.flattener.clone(),
            self.options,
            upstream,
        );

        let mut failure = None;
        while let Some(item) = records.recv().await {
            let written = match item {
                Ok(record) => self.sink.write_record(&record).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                failure = Some(e);
                break;
            }
        }
        // 關閉接收端讓 stage 立即停止
        drop(records);

        // stage 自身的錯誤是根因；通道上的只是中止標記
        let stats = match (task.join().await, failure) {
            (Err(e), _) if is_root_cause(&e) => return Err(report(e)),
            (_, Some(e)) | (Err(e), None) => return Err(report(e)),
            (Ok(stats), None) => stats,
        };

        let output = self.sink.finish().await?;
        let summary = RunSummary {
            items_in: stats.items_in,
            records_out: stats.records_out,
            output,
            duration: start.elapsed(),
        };
        tracing::info!(
            "✅ Flattened {} decomposition results into {} records in {:?}",
            summary.items_in,
            summary.records_out,
            summary.duration
        );
        Ok(summary)
    }
}

fn is_root_cause(error: &FlattenError) -> bool {
    !matches!(
        error,
        FlattenError::UpstreamAborted { .. } | FlattenError::DownstreamRejected { .. }
    )
}

fn report(error: FlattenError) -> FlattenError {
    tracing::error!("❌ Flattening aborted: {}", error);
    error
}
