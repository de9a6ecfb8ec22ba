use breakdown_flattener::config::{OutputFormat, RunConfig, STDIO};
use breakdown_flattener::core::stage::StageReceiver;
use breakdown_flattener::utils::error::ErrorSeverity;
use breakdown_flattener::utils::{logger, validation::Validate};
use breakdown_flattener::{
    CliConfig, CsvSink, Decomposition, FlattenEngine, FlattenError, Flattener, FlattenerConfig, JsonLinesSink,
    JsonLinesSource, RecordSink, RunSummary,
};
use clap::Parser;
use std::io::Write;
use tokio::io::{AsyncBufRead, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::debug!("CLI config: {:?}", cli);

    // 驗證配置
    let config = match cli.validate().and_then(|_| cli.resolve()) {
        Ok(config) => config,
        Err(e) => exit_with(e),
    };

    match run(&config).await {
        Ok(summary) => {
            tracing::info!("📁 Output written to: {}", summary.output);
            Ok(())
        }
        Err(e) => exit_with(e),
    }
}

async fn run(config: &RunConfig) -> breakdown_flattener::Result<RunSummary> {
    let flatten_config = FlattenerConfig::from_provider(config)?;

    let reader = open_input(&config.input).await?;
    let (upstream, source) = JsonLinesSource::new(reader, &flatten_config).spawn(&config.stream);
    let flattener = Flattener::new(flatten_config);

    let writer = open_output(&config.output)?;
    let summary = match config.format {
        OutputFormat::JsonLines => {
            let sink = JsonLinesSink::new(writer, config.output.clone());
            drive(flattener, config, sink, upstream).await?
        }
        OutputFormat::Csv => {
            let sink = CsvSink::new(writer, config.output.clone(), config.unset_placeholder.clone());
            drive(flattener, config, sink, upstream).await?
        }
    };

    // 來源的錯誤已經經由 stage 回報過，這裡只記錄
    match source.await {
        Ok(Ok(lines)) => tracing::debug!("Source finished after {} results", lines),
        Ok(Err(e)) => tracing::debug!("Source stopped early: {}", e),
        Err(e) => tracing::debug!("Source task failed: {}", e),
    }

    Ok(summary)
}

async fn drive<S: RecordSink>(
    flattener: Flattener,
    config: &RunConfig,
    sink: S,
    upstream: StageReceiver<Decomposition>,
) -> breakdown_flattener::Result<RunSummary> {
    let mut engine = FlattenEngine::new(flattener, config.stream, sink);
    engine.run(upstream).await
}

async fn open_input(path: &str) -> breakdown_flattener::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if path == STDIO {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path).await?;
    Ok(Box::new(BufReader::new(file)))
}

fn open_output(path: &str) -> breakdown_flattener::Result<Box<dyn Write + Send>> {
    if path == STDIO {
        return Ok(Box::new(std::io::stdout()));
    }
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    Ok(Box::new(std::io::BufWriter::new(file)))
}

fn exit_with(e: FlattenError) -> ! {
    tracing::error!(
        "❌ Flattening failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code)
}
