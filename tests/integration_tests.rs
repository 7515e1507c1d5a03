//! Integration tests for component interactions.
//!
//! These tests wire the notifier, kill switch, accountant and tamper monitor
//! together the way the daemon does.

use async_trait::async_trait;
use guard_core::config::{KillSwitchConfig, NotifierConfig, RiskConfig, StrategyLimits};
use guard_core::{event_kinds, EscalationSink, GuardConfig, MemorySink, SystemClock, Tier};
use notifier::{DeliveryStatus, EmailChannel, NotificationChannel, Notifier, PanicLog, SlackChannel, TelegramChannel};
use risk_manager::{CircuitBreaker, ConfigIntegrityMonitor, GuardStatus, OverrideOutcome, RiskAccountant};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

fn usd(v: i64) -> Decimal {
    Decimal::new(v, 0)
}

fn panic_lines(dir: &tempfile::TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("PANIC.log"))
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Notifier with no channels configured, so every escalation lands in the PANIC log.
fn offline_notifier(dir: &tempfile::TempDir) -> Arc<Notifier> {
    let config = NotifierConfig {
        panic_log_path: dir.path().join("PANIC.log"),
        timeout_secs: 1,
        ..Default::default()
    };
    Arc::new(Notifier::from_config(&config).unwrap())
}

fn wire(config: RiskConfig, sink: Arc<dyn EscalationSink>) -> Arc<RiskAccountant> {
    let breaker = Arc::new(CircuitBreaker::new(KillSwitchConfig::default(), sink));
    Arc::new(RiskAccountant::new(
        config,
        usd(1000),
        breaker,
        Arc::new(SystemClock),
    ))
}

/// Three losses of 4 against a global max loss of 10 halt the whole bot.
#[tokio::test]
async fn test_global_loss_halts_and_reaches_operators() {
    let dir = tempfile::tempdir().unwrap();
    let accountant = wire(
        RiskConfig {
            max_loss_usd: usd(10),
            ..Default::default()
        },
        offline_notifier(&dir),
    );

    assert!(accountant.record_outcome("arb", usd(-4)).await);
    assert!(accountant.record_outcome("arb", usd(-4)).await);
    assert!(!accountant.record_outcome("arb", usd(-4)).await);

    let breaker = accountant.breaker();
    assert_eq!(breaker.tier(), Tier::Halt);
    assert!(!breaker.is_enabled());
    assert_eq!(accountant.check_trade("other", usd(10)).await, Decimal::ZERO);

    let lines = panic_lines(&dir);
    assert!(lines.iter().any(|l| l.contains("KILL_SWITCH") && l.contains("HALT")));
    assert!(lines.iter().any(|l| l.contains("RISK") && l.contains("arb")));
}

/// Unconfirmed HALT from RUNNING is refused and reported exactly once.
#[tokio::test]
async fn test_unconfirmed_halt_override() {
    let dir = tempfile::tempdir().unwrap();
    let accountant = wire(RiskConfig::default(), offline_notifier(&dir));
    let breaker = accountant.breaker();

    let outcome = breaker
        .manual_override(Tier::Halt, "x", false, "script")
        .await;

    assert_eq!(outcome, OverrideOutcome::Rejected);
    assert_eq!(breaker.tier(), Tier::Running);
    assert_eq!(panic_lines(&dir).len(), 1);
}

/// A strategy breach disables only that strategy, even with workers running concurrently.
#[tokio::test]
async fn test_strategy_isolation_under_concurrent_workers() {
    let sink = Arc::new(MemorySink::new());
    let mut config = RiskConfig {
        max_loss_usd: usd(1000),
        ..Default::default()
    };
    config.per_strategy.insert(
        "alpha1".to_string(),
        StrategyLimits {
            max_loss_usd: Some(usd(5)),
            max_trade_size_usd: None,
        },
    );
    let accountant = wire(config, sink.clone());

    let loser = {
        let accountant = accountant.clone();
        tokio::spawn(async move {
            for _ in 0..2 {
                if accountant.check_trade("alpha1", usd(10)).await > Decimal::ZERO {
                    accountant.record_outcome("alpha1", usd(-3)).await;
                }
            }
        })
    };
    let winners: Vec<_> = (0..4)
        .map(|_| {
            let accountant = accountant.clone();
            tokio::spawn(async move {
                for _ in 0..25 {
                    let size = accountant.check_trade("alpha2", usd(10)).await;
                    assert!(size > Decimal::ZERO);
                    accountant.record_outcome("alpha2", usd(1)).await;
                }
            })
        })
        .collect();

    loser.await.unwrap();
    for worker in winners {
        worker.await.unwrap();
    }

    assert!(!accountant.is_strategy_active("alpha1"));
    assert!(accountant.is_strategy_active("alpha2"));
    assert!(accountant.breaker().is_enabled());
    assert_eq!(sink.count_kind(event_kinds::RISK).await, 1);
    assert_eq!(sink.count_kind(event_kinds::KILL_SWITCH).await, 0);

    let status = GuardStatus::collect(&accountant).await;
    let alpha2 = status.strategies.iter().find(|s| s.name == "alpha2").unwrap();
    assert_eq!(alpha2.stats.trades, 100);
    assert_eq!(status.current_capital, usd(1094));
}

/// Concurrent global breaches from many workers produce one escalation.
#[tokio::test]
async fn test_concurrent_breaches_escalate_once() {
    let sink = Arc::new(MemorySink::new());
    let accountant = wire(
        RiskConfig {
            max_loss_usd: usd(10),
            max_drawdown_pct: usd(50),
            ..Default::default()
        },
        sink.clone(),
    );

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let accountant = accountant.clone();
            tokio::spawn(async move { accountant.record_outcome(&format!("s{i}"), usd(-5)).await })
        })
        .collect();
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(accountant.breaker().tier(), Tier::Halt);
    assert_eq!(sink.count_kind(event_kinds::KILL_SWITCH).await, 1);
}

/// Every real channel pointed at a closed port: one PANIC line with kind and message.
#[tokio::test]
async fn test_all_channels_fail_falls_back_once() {
    let dir = tempfile::tempdir().unwrap();
    let http = reqwest_client();
    let dead = "http://127.0.0.1:9";
    let channels: Vec<Arc<dyn NotificationChannel>> = vec![
        Arc::new(
            TelegramChannel::new(http.clone(), Some("token".into()), Some("1".into())).with_api_base(dead),
        ),
        Arc::new(EmailChannel::new(
            http.clone(),
            dead,
            Some("key".into()),
            Some("guard@example.com".into()),
            Some("ops@example.com".into()),
        )),
        Arc::new(SlackChannel::new(http, Some(format!("{dead}/hook")))),
    ];
    let notifier = Notifier::new(
        channels,
        PanicLog::new(dir.path().join("PANIC.log")),
        Duration::from_secs(2),
    );

    let report = notifier.dispatch("risk", "fail test").await;

    assert!(report.fallback_written);
    assert!(report
        .outcomes
        .iter()
        .all(|(_, status)| matches!(status, DeliveryStatus::Failed(_))));
    let lines = panic_lines(&dir);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("RISK"));
    assert!(lines[0].contains("fail test"));
}

fn reqwest_client() -> notifier::HttpClient {
    notifier::HttpClient::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap()
}

/// Config loaded from disk, then edited while running, forces HALT.
#[tokio::test]
async fn test_config_tamper_halts() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("guard.yaml");
    let secrets_path = dir.path().join("secrets.env");
    std::fs::write(
        &config_path,
        "risk:\n  max_drawdown_pct: 5\n  max_loss_usd: 200\n",
    )
    .unwrap();
    std::fs::write(&secrets_path, "TELEGRAM_BOT_TOKEN=abc\n").unwrap();

    let config = GuardConfig::load(&config_path).unwrap();
    assert_eq!(config.monitor.config_path.as_deref(), Some(config_path.as_path()));

    let sink = Arc::new(MemorySink::new());
    let accountant = wire(config.risk.clone(), sink.clone());
    let mut monitor = ConfigIntegrityMonitor::new(
        &config_path,
        &secrets_path,
        accountant.breaker().clone(),
        sink.clone(),
    )
    .await;

    assert!(!monitor.check().await);
    std::fs::write(&secrets_path, "TELEGRAM_BOT_TOKEN=attacker\n").unwrap();
    assert!(monitor.check().await);
    assert!(!monitor.check().await);

    assert_eq!(accountant.breaker().tier(), Tier::Halt);
    assert_eq!(sink.count_kind(event_kinds::CONFIG_TAMPER).await, 1);
}

/// A notifier that takes a long time to deliver.
struct SlowSink;

#[async_trait]
impl EscalationSink for SlowSink {
    async fn escalate_event(&self, _kind: &str, _message: &str) {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

/// A slow notification never holds up permission checks from other workers.
#[tokio::test]
async fn test_slow_notifier_does_not_block_checks() {
    let accountant = wire(RiskConfig::default(), Arc::new(SlowSink));
    let breaker = accountant.breaker().clone();

    let escalation = tokio::spawn(async move { breaker.record_risk_breach("drawdown").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    assert!(!accountant.breaker().is_trading_allowed());
    assert_eq!(accountant.check_trade("arb", usd(10)).await, Decimal::ZERO);
    let status = tokio::time::timeout(Duration::from_millis(500), accountant.breaker().status())
        .await
        .unwrap();
    assert_eq!(status.tier, Tier::Halt);
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(escalation.await.unwrap(), Tier::Halt);
}
