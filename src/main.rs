use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use redsys3ds::application::state_machine::{FlowState, PaymentGateway, Purchase};
use redsys3ds::config::{GatewaySettings, SettingsOverrides};
use redsys3ds::domain::emv3ds::BrowserInfo;
use redsys3ds::domain::merchant::{Amount, CardData, Currency, OrderId, TransactionType};
use redsys3ds::domain::ports::NotificationStoreRef;
use redsys3ds::domain::signature::compute_signature;
use redsys3ds::infrastructure::in_memory::InMemoryNotificationStore;
use redsys3ds::interfaces::rest::codec;
use redsys3ds::telemetry::{LogFormat, init_tracing};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the HMAC_SHA512_V2 signature of an encoded parameters string
    Sign {
        #[arg(long, env = "REDSYS_SECRET_KEY", hide_env_values = true)]
        key: String,
        #[arg(long)]
        order: String,
        /// Base64 merchant parameters, exactly as sent
        params: String,
    },
    /// Decode a Ds_MerchantParameters string into JSON
    Decode { params: String },
    /// Run a full 3DS2 purchase against the gateway
    Pay(PayArgs),
}

#[derive(Args)]
struct PayArgs {
    /// JSON settings file; individual flags and REDSYS_* variables override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, env = "REDSYS_MERCHANT_CODE")]
    merchant_code: Option<String>,
    #[arg(long, env = "REDSYS_TERMINAL")]
    terminal: Option<String>,
    #[arg(long, env = "REDSYS_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,
    #[arg(long, env = "REDSYS_GATEWAY_URL")]
    gateway_url: Option<String>,
    #[arg(long, env = "REDSYS_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Amount in major units, e.g. 12.49
    #[arg(long)]
    amount: Decimal,
    /// ISO-4217 numeric currency code
    #[arg(long, default_value_t = 978)]
    currency: u16,
    /// One-digit transaction type
    #[arg(long, default_value = "0")]
    transaction_type: String,
    /// Do not ask the gateway for SCA exemptions
    #[arg(long)]
    no_sca_exemption: bool,
    /// Order id; generated when omitted
    #[arg(long)]
    order: Option<String>,
    #[arg(long)]
    card: String,
    /// Expiry date as MMYY
    #[arg(long)]
    expiry: String,
    #[arg(long)]
    cvv: String,

    #[arg(long, default_value = "text/html,application/xhtml+xml")]
    accept: String,
    #[arg(long, default_value = "Mozilla/5.0")]
    user_agent: String,

    /// Redis URL for the notification store. In-memory storage is used otherwise.
    #[arg(long)]
    redis_url: Option<String>,
    /// Seconds to wait for the challenge webhook before giving up
    #[arg(long)]
    challenge_timeout: Option<u64>,
}

impl PayArgs {
    fn settings(&self) -> Result<GatewaySettings> {
        let overrides = SettingsOverrides {
            merchant_code: self.merchant_code.clone(),
            terminal: self.terminal.clone(),
            secret_key: self.secret_key.clone(),
            gateway_url: self.gateway_url.clone(),
            public_base_url: self.public_base_url.clone(),
        };
        GatewaySettings::load(self.config.as_deref(), overrides).into_diagnostic()
    }

    async fn store(&self) -> Result<NotificationStoreRef> {
        match &self.redis_url {
            Some(redis_url) => redis_store(redis_url).await,
            None => Ok(Arc::new(InMemoryNotificationStore::new())),
        }
    }
}

#[cfg(feature = "storage-redis")]
async fn redis_store(redis_url: &str) -> Result<NotificationStoreRef> {
    use redsys3ds::infrastructure::redis::RedisNotificationStore;
    let store = RedisNotificationStore::connect(redis_url)
        .await
        .into_diagnostic()?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "storage-redis"))]
async fn redis_store(_redis_url: &str) -> Result<NotificationStoreRef> {
    eprintln!(
        "WARNING: Redis notification store requested via --redis-url, but 'storage-redis' feature is not enabled. Falling back to In-Memory storage."
    );
    Ok(Arc::new(InMemoryNotificationStore::new()))
}

async fn pay(args: PayArgs) -> Result<()> {
    let settings = args.settings()?;
    let store = args.store().await?;
    let gateway = PaymentGateway::new(settings, store).into_diagnostic()?;

    let order = match &args.order {
        Some(order) => OrderId::new(order),
        None => OrderId::generate(12),
    }
    .into_diagnostic()?;
    let mut purchase = Purchase::new(
        order,
        Amount::from_major(args.amount).into_diagnostic()?,
        CardData::new(&args.card, &args.expiry, &args.cvv).into_diagnostic()?,
    )
    .with_currency(Currency::new(args.currency).into_diagnostic()?)
    .with_transaction_type(TransactionType::new(&args.transaction_type).into_diagnostic()?);
    if args.no_sca_exemption {
        purchase = purchase.without_sca_exemptions();
    }
    let browser = BrowserInfo::new(args.accept, args.user_agent);

    let mut flow = gateway.start(purchase);
    flow.run(&browser).await.into_diagnostic()?;
    if let Some(secs) = args.challenge_timeout
        && matches!(flow.state(), FlowState::ChallengeRequired { .. })
    {
        flow.await_challenge(Duration::from_secs(secs))
            .await
            .into_diagnostic()?;
    }

    println!(
        "{}",
        serde_json::to_string_pretty(flow.state()).into_diagnostic()?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(LogFormat::from_env());
    let cli = Cli::parse();

    match cli.command {
        Command::Sign { key, order, params } => {
            let signature =
                compute_signature(&key, order.trim(), params.trim()).into_diagnostic()?;
            println!("{signature}");
        }
        Command::Decode { params } => {
            let decoded = codec::decode(&params).into_diagnostic()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&decoded).into_diagnostic()?
            );
        }
        Command::Pay(args) => pay(args).await?,
    }
    Ok(())
}
