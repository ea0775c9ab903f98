use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use netdisk_transfer::{
    AppConfig, CandidateLink, ConfigReader, DefaultNetdiskFactory, ExpirationClass,
    JsonlPersister, NetdiskFactory, PanType, TempDirCleaner, TransferManager, TransferPolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "网盘分享链接批量转存工具", long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config/app.toml", global = true)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 批量转存分享链接
    #[command(name = "run")]
    Run {
        /// 候选链接 JSON 文件（CandidateLink 数组）
        #[arg(short, long)]
        input: PathBuf,
        /// 目标网盘（quark/baidu/aliyun/uc/xunlei 或编码）
        #[arg(short, long = "pan-type", default_value = "quark")]
        pan: PanType,
        /// 最多转存成功数，0 使用配置默认值
        #[arg(short = 'n', long = "max-count", default_value_t = 0)]
        max_transfer: usize,
        /// 最多返回条数，0 等于转存数
        #[arg(short = 'd', long, default_value_t = 0)]
        max_display: usize,
        /// 生成临时分享
        #[arg(long)]
        temporary: bool,
        /// 成功记录追加写入的 JSONL 文件
        #[arg(short, long = "save")]
        output: Option<PathBuf>,
    },
    /// 测试网盘凭证
    #[command(name = "test")]
    Test {
        /// 目标网盘，缺省时测试全部
        #[arg(short, long = "pan-type")]
        pan: Option<PanType>,
    },
    /// 删除并重建各网盘的临时转存目录
    #[command(name = "cleanup")]
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config).await;
    let store: Arc<dyn ConfigReader> = Arc::new(config.netdisk_store());
    let factory: Arc<dyn NetdiskFactory> = Arc::new(DefaultNetdiskFactory::new(
        store.clone(),
        config.transfer.poll_interval(),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到中断信号，正在取消...");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Run {
            input,
            pan,
            max_transfer,
            max_display,
            temporary,
            output,
        } => {
            let content = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("读取链接文件失败: {}", input.display()))?;
            let items: Vec<CandidateLink> =
                serde_json::from_str(&content).context("解析链接文件失败")?;

            let policy = TransferPolicy {
                max_transfer_count: max_transfer,
                max_display_count: max_display,
                expiration: if temporary {
                    ExpirationClass::Temporary
                } else {
                    ExpirationClass::Permanent
                },
                pan_type: pan,
            };
            let manager = TransferManager::new(factory, config.transfer.clone());

            let result = match output {
                Some(path) => {
                    let persister = JsonlPersister::new(path);
                    manager
                        .transfer_and_save(&items, &policy, &cancel, &persister)
                        .await?
                }
                None => manager.run(&items, &policy, &cancel).await?,
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Test { pan } => {
            let targets = match pan {
                Some(pan) => vec![pan],
                None => PanType::ALL.to_vec(),
            };
            let mut failures = 0;
            for pan in targets {
                let result = match factory.create(pan, cancel.child_token()) {
                    Ok(mut backend) => backend.test_connection().await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => info!("{}连接正常", pan.display_name()),
                    Err(e) => {
                        failures += 1;
                        error!("{}连接失败: {}", pan.display_name(), e);
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{} 个网盘连接失败", failures);
            }
        }
        Commands::Cleanup => {
            let cleaner = TempDirCleaner::new(factory, store);
            if let Some(summary) = cleaner.clean_netdisk_files(&cancel).await? {
                info!("清理完成: 成功={}", summary.succeeded.len());
            }
        }
    }

    Ok(())
}
