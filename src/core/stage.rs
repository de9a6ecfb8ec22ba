use crate::domain::ports::Transform;
use crate::utils::error::{FlattenError, Result};
use crate::utils::validation::validate_positive_number;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 物件模式下的預設緩衝筆數
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// Stage 之間傳遞的項目；`Err` 代表上游中止
pub type StageSender<T> = mpsc::Sender<Result<T>>;
pub type StageReceiver<T> = mpsc::Receiver<Result<T>>;

/// 呼叫者提供的串流覆寫值，未指定的欄位採用預設
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOverrides {
    pub object_mode: Option<bool>,
    pub high_water_mark: Option<usize>,
}

/// 正規化後的串流設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub object_mode: bool,
    pub high_water_mark: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            object_mode: true,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

impl StreamOptions {
    pub fn from_overrides(overrides: &StreamOverrides) -> Result<Self> {
        let defaults = Self::default();
        let options = Self {
            object_mode: overrides.object_mode.unwrap_or(defaults.object_mode),
            high_water_mark: overrides
                .high_water_mark
                .unwrap_or(defaults.high_water_mark),
        };

        if !options.object_mode {
            return Err(FlattenError::InvalidConfigValueError {
                field: "stream.object_mode".to_string(),
                value: "false".to_string(),
                reason: "Stages carry structured records and only run in object mode".to_string(),
            });
        }
        validate_positive_number("stream.high_water_mark", options.high_water_mark, 1)?;

        Ok(options)
    }

    pub fn with_high_water_mark(high_water_mark: usize) -> Result<Self> {
        Self::from_overrides(&StreamOverrides {
            object_mode: None,
            high_water_mark: Some(high_water_mark),
        })
    }
}

/// 建立容量為 high water mark 的有界通道
pub fn channel<T>(options: &StreamOptions) -> (StageSender<T>, StageReceiver<T>) {
    mpsc::channel(options.high_water_mark)
}

/// 關閉會消耗 `Stage` 本身，因此只有開啟與失敗兩種可觀察的狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Open,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageStats {
    pub stage: String,
    pub items_in: usize,
    pub records_out: usize,
}

enum Next<I> {
    Upstream(Option<Result<I>>),
    DownstreamClosed,
}

/// 把逐筆的 `Transform` 包成單進單出的串流 stage。
///
/// 每筆輸入產生的記錄全部送出之後才會接受下一筆；下游滿載時在 `send`
/// 上等待，因此在途的記錄數量受限於單筆輸入的輸出量加上通道容量。
pub struct Stage<T: Transform> {
    name: String,
    transform: T,
    options: StreamOptions,
    downstream: StageSender<T::Output>,
    state: StageState,
    stats: StageStats,
}

impl<T: Transform> Stage<T> {
    pub fn new(
        name: impl Into<String>,
        transform: T,
        options: StreamOptions,
        downstream: StageSender<T::Output>,
    ) -> Self {
        let name = name.into();
        Self {
            stats: StageStats {
                stage: name.clone(),
                ..StageStats::default()
            },
            name,
            transform,
            options,
            downstream,
            state: StageState::Open,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn stats(&self) -> &StageStats {
        &self.stats
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// 處理一筆上游項目並把結果逐筆送往下游
    pub async fn process(&mut self, item: T::Input) -> Result<()> {
        if self.state != StageState::Open {
            return Err(FlattenError::StageClosed {
                stage: self.name.clone(),
            });
        }
        self.stats.items_in += 1;

        let records = match self.transform.apply(item) {
            Ok(records) => records,
            Err(e) => return Err(self.fail(e).await),
        };

        for record in records {
            if self.downstream.send(Ok(record)).await.is_err() {
                return Err(self.downstream_rejected());
            }
            self.stats.records_out += 1;
        }
        Ok(())
    }

    /// 上游中止：原因往下游轉送，本 stage 回報 `UpstreamAborted`
    pub async fn abort(&mut self, cause: FlattenError) -> FlattenError {
        self.state = StageState::Failed;
        let reason = cause.to_string();
        tracing::warn!("⛔ Stage '{}' aborted by upstream: {}", self.name, reason);
        let _ = self.downstream.send(Err(cause)).await;
        FlattenError::UpstreamAborted {
            stage: self.name.clone(),
            reason,
        }
    }

    /// 結束串流；丟棄 sender 即代表下游的 end-of-stream
    pub fn close(self) -> Result<StageStats> {
        if self.state == StageState::Failed {
            return Err(FlattenError::StageClosed { stage: self.name });
        }
        tracing::debug!(
            "🏁 Stage '{}' closed (items: {}, records: {})",
            self.name,
            self.stats.items_in,
            self.stats.records_out
        );
        Ok(self.stats)
    }

    /// 持續從上游讀取直到 end-of-stream、中止或下游關閉
    pub async fn run(mut self, mut upstream: StageReceiver<T::Input>) -> Result<StageStats> {
        tracing::debug!(
            "▶️ Stage '{}' started (high water mark: {})",
            self.name,
            self.options.high_water_mark
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = self.downstream.closed() => Next::DownstreamClosed,
                item = upstream.recv() => Next::Upstream(item),
            };

            match next {
                Next::DownstreamClosed => return Err(self.downstream_rejected()),
                Next::Upstream(Some(Ok(item))) => self.process(item).await?,
                Next::Upstream(Some(Err(cause))) => return Err(self.abort(cause).await),
                Next::Upstream(None) => break,
            }
        }

        self.close()
    }

    async fn fail(&mut self, error: FlattenError) -> FlattenError {
        self.state = StageState::Failed;
        tracing::error!("❌ Stage '{}' failed: {}", self.name, error);
        let marker = FlattenError::UpstreamAborted {
            stage: self.name.clone(),
            reason: error.to_string(),
        };
        let _ = self.downstream.send(Err(marker)).await;
        error
    }

    fn downstream_rejected(&mut self) -> FlattenError {
        self.state = StageState::Failed;
        tracing::warn!("🚫 Downstream of stage '{}' is closed", self.name);
        FlattenError::DownstreamRejected {
            stage: self.name.clone(),
        }
    }
}

/// 在背景任務執行中的 stage；`join` 是它的錯誤回報通道
pub struct StageTask {
    name: String,
    handle: JoinHandle<Result<StageStats>>,
}

impl StageTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn join(self) -> Result<StageStats> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(FlattenError::StageJoinError {
                stage: self.name,
                details: e.to_string(),
            }),
        }
    }
}

/// 在 tokio 任務中啟動 stage，回傳下游接收端與任務控制
pub fn spawn_stage<T: Transform>(
    name: impl Into<String>,
    transform: T,
    options: StreamOptions,
    upstream: StageReceiver<T::Input>,
) -> (StageReceiver<T::Output>, StageTask) {
    let name = name.into();
    let (tx, rx) = channel(&options);
    let stage = Stage::new(name.clone(), transform, options, tx);
    let handle = tokio::spawn(stage.run(upstream));
    (rx, StageTask { name, handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// 每個數字 n 產生 n 筆輸出，負數視為錯誤
    struct Repeat;

    impl Transform for Repeat {
        type Input = i64;
        type Output = (i64, i64);

        fn apply(&self, input: i64) -> Result<Vec<(i64, i64)>> {
            if input < 0 {
                return Err(FlattenError::malformed(format!("negative input {}", input)));
            }
            Ok((0..input).map(|i| (input, i)).collect())
        }
    }

    fn options(high_water_mark: usize) -> StreamOptions {
        StreamOptions::with_high_water_mark(high_water_mark).unwrap()
    }

    async fn drain<T>(rx: &mut StageReceiver<T>) -> (Vec<T>, Option<FlattenError>) {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                Ok(item) => items.push(item),
                Err(e) => return (items, Some(e)),
            }
        }
        (items, None)
    }

    #[test]
    fn test_stream_options_normalization() {
        let options = StreamOptions::from_overrides(&StreamOverrides::default()).unwrap();
        assert!(options.object_mode);
        assert_eq!(options.high_water_mark, DEFAULT_HIGH_WATER_MARK);

        let byte_mode = StreamOverrides {
            object_mode: Some(false),
            high_water_mark: None,
        };
        assert!(StreamOptions::from_overrides(&byte_mode).is_err());
        assert!(StreamOptions::with_high_water_mark(0).is_err());
    }

    #[tokio::test]
    async fn test_stage_preserves_order_and_ends_stream() {
        let (tx, rx) = channel(&options(4));
        let (mut out, task) = spawn_stage("repeat", Repeat, options(4), rx);

        for n in [2, 0, 3] {
            tx.send(Ok(n)).await.unwrap();
        }
        drop(tx);

        let (items, error) = drain(&mut out).await;
        assert!(error.is_none());
        assert_eq!(items, vec![(2, 0), (2, 1), (3, 0), (3, 1), (3, 2)]);

        let stats = task.join().await.unwrap();
        assert_eq!(stats.items_in, 3);
        assert_eq!(stats.records_out, 5);
    }

    #[tokio::test]
    async fn test_empty_upstream_yields_empty_downstream() {
        let (tx, rx) = channel::<i64>(&options(1));
        drop(tx);
        let (mut out, task) = spawn_stage("repeat", Repeat, options(1), rx);

        let (items, error) = drain(&mut out).await;
        assert!(items.is_empty());
        assert!(error.is_none());
        assert_eq!(task.join().await.unwrap().items_in, 0);
    }

    #[tokio::test]
    async fn test_transform_error_fails_stage_without_partial_output() {
        let (tx, rx) = channel(&options(8));
        let (mut out, task) = spawn_stage("repeat", Repeat, options(8), rx);

        tx.send(Ok(1)).await.unwrap();
        tx.send(Ok(-1)).await.unwrap();
        tx.send(Ok(5)).await.unwrap();
        drop(tx);

        let (items, error) = drain(&mut out).await;
        assert_eq!(items, vec![(1, 0)]);
        assert!(matches!(error, Some(FlattenError::UpstreamAborted { .. })));
        assert!(out.recv().await.is_none());

        let err = task.join().await.unwrap_err();
        assert!(matches!(err, FlattenError::MalformedInput { .. }));
    }

    #[tokio::test]
    async fn test_upstream_abort_is_forwarded() {
        let (tx, rx) = channel(&options(4));
        let (mut out, task) = spawn_stage("repeat", Repeat, options(4), rx);

        tx.send(Ok(1)).await.unwrap();
        tx.send(Err(FlattenError::malformed("bad line 2"))).await.unwrap();

        let (items, error) = drain(&mut out).await;
        assert_eq!(items.len(), 1);
        assert!(error.unwrap().to_string().contains("bad line 2"));

        let err = task.join().await.unwrap_err();
        assert!(matches!(err, FlattenError::UpstreamAborted { .. }));
    }

    #[tokio::test]
    async fn test_downstream_close_stops_stage() {
        let (tx, rx) = channel(&options(1));
        let (out, task) = spawn_stage("repeat", Repeat, options(1), rx);

        drop(out);
        // 上游沒有關閉，stage 必須自行察覺下游已離開
        let err = tokio::time::timeout(Duration::from_secs(1), task.join())
            .await
            .expect("stage did not stop after downstream closed")
            .unwrap_err();
        assert!(matches!(err, FlattenError::DownstreamRejected { .. }));
        drop(tx);
    }

    #[tokio::test]
    async fn test_backpressure_suspends_stage() {
        let (tx, rx) = channel(&options(1));
        let (mut out, task) = spawn_stage("repeat", Repeat, options(1), rx);

        tx.send(Ok(4)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 通道容量為 1，其餘記錄必須等待下游讀取
        assert_eq!(out.len(), 1);

        drop(tx);
        let (items, _) = drain(&mut out).await;
        assert_eq!(items.len(), 4);
        assert_eq!(task.join().await.unwrap().records_out, 4);
    }

    #[tokio::test]
    async fn test_close_ends_downstream_and_returns_stats() {
        let (tx, mut rx) = channel(&options(4));
        let mut stage = Stage::new("repeat", Repeat, options(4), tx);

        stage.process(2).await.unwrap();
        assert_eq!(stage.state(), StageState::Open);

        let stats = stage.close().unwrap();
        assert_eq!(stats.items_in, 1);
        assert_eq!(stats.records_out, 2);

        let (items, error) = drain(&mut rx).await;
        assert_eq!(items.len(), 2);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_process_after_failure_is_rejected() {
        let (tx, mut rx) = channel(&options(4));
        let mut stage = Stage::new("repeat", Repeat, options(4), tx);

        assert!(stage.process(-3).await.is_err());
        assert_eq!(stage.state(), StageState::Failed);
        assert!(matches!(
            stage.process(1).await,
            Err(FlattenError::StageClosed { .. })
        ));
        assert!(matches!(rx.recv().await, Some(Err(_))));
        assert!(stage.close().is_err());
    }

    #[tokio::test]
    async fn test_stages_chain() {
        struct Halve;

        impl Transform for Halve {
            type Input = (i64, i64);
            type Output = i64;

            fn apply(&self, input: (i64, i64)) -> Result<Vec<i64>> {
                Ok(vec![input.1 / 2])
            }
        }

        let (tx, rx) = channel(&options(2));
        let (middle, first) = spawn_stage("repeat", Repeat, options(2), rx);
        let (mut out, second) = spawn_stage("halve", Halve, options(2), middle);

        tx.send(Ok(4)).await.unwrap();
        drop(tx);

        let (items, error) = drain(&mut out).await;
        assert!(error.is_none());
        assert_eq!(items, vec![0, 0, 1, 1]);
        assert_eq!(first.join().await.unwrap().records_out, 4);
        assert_eq!(second.join().await.unwrap().items_in, 4);
    }
}
