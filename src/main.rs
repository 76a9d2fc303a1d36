use clap::Parser;
use frs_notifier::utils::error::{BotError, ErrorSeverity};
use frs_notifier::utils::{logger, validation::Validate};
use frs_notifier::{BotConfig, CliConfig, LocalStorage, MediaWikiClient, NotificationRun};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting frs-notifier");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    // 載入並驗證配置
    let mut config = match BotConfig::from_file(&cli.config).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Configuration failed to load from {}: {}", cli.config, e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };
    if cli.dry_run {
        config.set_dry_run(true);
    }

    let client = MediaWikiClient::new(config.wiki.api_url.clone(), config.user_agent())?;
    tracing::info!("🌐 Using wiki API at {}", client.api_url());
    match config.credentials() {
        Some((username, password)) => {
            if let Err(e) = client.login(username, password).await {
                exit_with(e);
            }
        }
        None => tracing::warn!("⚠️ No credentials configured, editing anonymously"),
    }

    let storage = LocalStorage::new(config.runfile_directory().to_string());
    tracing::debug!("Runfiles are kept in {}", storage.base_path());
    let run = NotificationRun::new(client, storage, config);

    match run.run().await {
        Ok(summary) => {
            tracing::info!(
                "✅ Notified {} user(s) with {} message(s)",
                summary.dispatch.delivered_users,
                summary.dispatch.delivered_messages
            );
            if summary.dispatch.failed_users > 0 {
                tracing::warn!(
                    "⚠️ {} user(s) could not be notified",
                    summary.dispatch.failed_users
                );
            }
        }
        Err(e) => exit_with(e),
    }

    Ok(())
}

fn exit_with(e: BotError) {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ FRS run failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    if e.is_retryable() {
        tracing::warn!("🔁 This error is transient, the next scheduled run should pick up where this one stopped");
    }

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    if exit_code > 0 {
        std::process::exit(exit_code);
    }
}
