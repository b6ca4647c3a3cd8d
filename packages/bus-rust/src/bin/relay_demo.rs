//! Banking walk-through on an in-memory ledger.
//!
//! Opens an account, queries it, withdraws within and beyond the limit, and
//! submits an invalid account, then prints the Prometheus rendering of the
//! dispatch metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use dashmap::DashMap;
use relay_bus::telemetry::{init_tracing, install_prometheus_recorder, MetricsFacadeSink};
use relay_bus::{Bus, BusConfig, RegistrationMode, RetryPolicy};
use relay_core::{
    AuthorizationOutcome, ConstraintSet, Correlation, ExecutionContext, Handler, HandlerResult,
    Intent, IntentDescriptor, IntentKind, IntentMeta, SideEffect, SideEffectPublisher,
};
use serde_json::json;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "relay-demo", about = "Dispatch banking intents through a relay bus")]
struct Args {
    /// Skip the authorization stage entirely.
    #[arg(long, env = "RELAY_DISABLE_AUTHORIZATION")]
    disable_authorization: bool,

    /// Reject duplicate handler registrations instead of replacing them.
    #[arg(long, env = "RELAY_STRICT_REGISTRATION")]
    strict_registration: bool,

    /// Default execution bound per attempt, in milliseconds. 0 disables it.
    #[arg(long, env = "RELAY_EXECUTION_TIMEOUT_MS", default_value_t = 30_000)]
    execution_timeout_ms: u64,

    /// Total execution attempts, including the first.
    #[arg(long, env = "RELAY_MAX_ATTEMPTS", default_value_t = 1)]
    max_attempts: u32,

    /// Largest amount a single withdrawal may move.
    #[arg(long, env = "RELAY_WITHDRAW_LIMIT", default_value_t = 50)]
    withdraw_limit: i64,

    #[arg(long, env = "RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    #[arg(long, env = "RELAY_LOG_FILTER", default_value = "info")]
    log_filter: String,
}

impl Args {
    fn bus_config(&self) -> BusConfig {
        BusConfig {
            authorization_enabled: !self.disable_authorization,
            registration_mode: if self.strict_registration {
                RegistrationMode::Strict
            } else {
                RegistrationMode::Permissive
            },
            default_execution_timeout: (self.execution_timeout_ms > 0)
                .then(|| Duration::from_millis(self.execution_timeout_ms)),
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                jitter: true,
                ..RetryPolicy::default()
            },
            log_completions: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Ledger {
    next_id: AtomicU64,
    balances: DashMap<String, i64>,
}

impl Ledger {
    fn open(&self, deposit: i64) -> String {
        let id = format!("A{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.balances.insert(id.clone(), deposit);
        id
    }
}

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

struct OpenAccount {
    meta: IntentMeta,
    name: String,
    deposit: i64,
}

impl Intent for OpenAccount {
    type Output = String;
    const NAME: &'static str = "OpenAccount";

    fn meta(&self) -> &IntentMeta {
        &self.meta
    }

    fn constraints(&self) -> ConstraintSet {
        ConstraintSet::new()
            .not_blank("name", &self.name)
            .message("account holder name is required")
            .non_negative("deposit", self.deposit)
            .message("opening deposit cannot be negative")
    }

    fn side_effect(&self, account_id: &String) -> Option<SideEffect> {
        Some(SideEffect::new(
            "accounts.opened",
            json!({ "account_id": account_id, "holder": self.name, "deposit": self.deposit }),
        ))
    }
}

struct Withdraw {
    meta: IntentMeta,
    account_id: String,
    amount: i64,
}

#[async_trait]
impl Intent for Withdraw {
    type Output = i64;
    const NAME: &'static str = "Withdraw";

    fn meta(&self) -> &IntentMeta {
        &self.meta
    }

    fn constraints(&self) -> ConstraintSet {
        ConstraintSet::new()
            .not_blank("account_id", &self.account_id)
            .positive("amount", self.amount)
    }

    async fn authorize_with_context(
        &self,
        _correlation: &Correlation,
        context: &ExecutionContext,
    ) -> AuthorizationOutcome {
        let limit = context.property_or::<i64>("withdraw_limit", 50);
        if self.amount > limit {
            AuthorizationOutcome::denied(
                "amount",
                format!("withdrawal of {} exceeds the limit of {limit}", self.amount),
                "LIMIT_EXCEEDED",
            )
        } else {
            AuthorizationOutcome::granted()
        }
    }
}

struct GetBalance {
    meta: IntentMeta,
    account_id: String,
}

impl Intent for GetBalance {
    type Output = i64;
    const NAME: &'static str = "GetBalance";
    const KIND: IntentKind = IntentKind::Query;

    fn meta(&self) -> &IntentMeta {
        &self.meta
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

struct OpenAccountHandler(Arc<Ledger>);

#[async_trait]
impl Handler for OpenAccountHandler {
    type Intent = OpenAccount;

    async fn execute(&self, intent: &OpenAccount, _: &Correlation) -> HandlerResult<OpenAccount> {
        Ok(self.0.open(intent.deposit))
    }
}

struct WithdrawHandler(Arc<Ledger>);

#[async_trait]
impl Handler for WithdrawHandler {
    type Intent = Withdraw;

    async fn execute(&self, intent: &Withdraw, _: &Correlation) -> HandlerResult<Withdraw> {
        let mut balance = self
            .0
            .balances
            .get_mut(&intent.account_id)
            .with_context(|| format!("unknown account {}", intent.account_id))?;
        anyhow::ensure!(*balance >= intent.amount, "insufficient funds");
        *balance -= intent.amount;
        Ok(*balance)
    }
}

struct GetBalanceHandler(Arc<Ledger>);

#[async_trait]
impl Handler for GetBalanceHandler {
    type Intent = GetBalance;

    async fn execute(&self, intent: &GetBalance, _: &Correlation) -> HandlerResult<GetBalance> {
        self.0
            .balances
            .get(&intent.account_id)
            .map(|b| *b)
            .with_context(|| format!("unknown account {}", intent.account_id))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(500))
    }
}

/// Publishes side effects to the log.
struct LogPublisher;

#[async_trait]
impl SideEffectPublisher for LogPublisher {
    async fn publish(&self, origin: &IntentDescriptor, effect: &SideEffect) -> anyhow::Result<()> {
        info!(
            topic = %effect.topic,
            intent = %origin.intent_type,
            correlation_id = %origin.correlation_id,
            payload = %effect.payload,
            "side effect published"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_filter, matches!(args.log_format, LogFormat::Json))?;
    let prometheus = install_prometheus_recorder()?;

    let config = args.bus_config();
    info!(config = %serde_json::to_string(&config)?, "starting relay demo");

    let ledger = Arc::new(Ledger::default());
    let bus = Bus::builder()
        .config(config)
        .telemetry(Arc::new(MetricsFacadeSink))
        .side_effect_publisher(Arc::new(LogPublisher))
        .handler(OpenAccountHandler(Arc::clone(&ledger)))
        .handler(WithdrawHandler(Arc::clone(&ledger)))
        .handler(GetBalanceHandler(Arc::clone(&ledger)))
        .build()?;

    let context = Arc::new(
        ExecutionContext::builder()
            .user_id("teller-7")
            .source("relay-demo")
            .property("withdraw_limit", args.withdraw_limit)
            .build(),
    );

    let account_id = bus
        .dispatch_with_context(
            OpenAccount {
                meta: IntentMeta::new().with_initiator("teller-7"),
                name: "Ada".to_string(),
                deposit: 42,
            },
            Arc::clone(&context),
        )
        .await?;

    let balance = bus
        .dispatch_with_context(
            GetBalance {
                meta: IntentMeta::new(),
                account_id: account_id.clone(),
            },
            Arc::clone(&context),
        )
        .await?;
    info!(%account_id, balance, "account opened");

    for amount in [100, 10] {
        let withdrawal = Withdraw {
            meta: IntentMeta::new().with_correlation_id(format!("withdraw-{amount}")),
            account_id: account_id.clone(),
            amount,
        };
        match bus.dispatch_with_context(withdrawal, Arc::clone(&context)).await {
            Ok(remaining) => info!(amount, remaining, "withdrawal accepted"),
            Err(err) => warn!(amount, kind = err.kind().as_str(), error = %err, "withdrawal refused"),
        }
    }

    let invalid = OpenAccount {
        meta: IntentMeta::new(),
        name: String::new(),
        deposit: -5,
    };
    if let Err(err) = bus.dispatch(invalid).await {
        warn!(kind = err.kind().as_str(), error = %err, "account rejected");
    }

    let totals = bus.metrics().totals();
    info!(totals = %serde_json::to_string(&totals)?, "dispatch totals");
    println!("{}", prometheus.render());
    Ok(())
}
