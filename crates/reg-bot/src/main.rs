//! reg-bot binary: wires the NATS bus, JetStream key-value store, system DNS
//! and a UDP SIP socket into a [`BotController`] and runs it until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use infra_common::logging::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
use infra_common::{NatsBus, NatsConfig, NatsKvStore};
use rvoip_reg_bot::{
    BotConfig, BotController, BotIdentity, HickoryDns, UdpSignalingClient, UdpSignalingConfig,
};

#[derive(Parser, Debug)]
#[command(name = "reg-bot")]
#[command(about = "Keeps assigned third-party SIP accounts registered", version)]
struct Args {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    nats_url: String,

    /// NATS username
    #[arg(long, env = "NATS_USER")]
    nats_user: Option<String>,

    /// NATS password
    #[arg(long, env = "NATS_PASSWORD", hide_env_values = true)]
    nats_password: Option<String>,

    /// JetStream key-value bucket for account records
    #[arg(long, env = "KV_BUCKET", default_value = "regbot")]
    kv_bucket: String,

    /// Prefix of every account record key
    #[arg(long, env = "KEY_NAMESPACE", default_value = "regbot.account.")]
    key_namespace: String,

    /// Accounts started per pacing group
    #[arg(long, env = "MAX_PER_CYCLE", default_value_t = 5)]
    max_per_cycle: usize,

    /// Pause between pacing groups, in milliseconds
    #[arg(long, env = "DELAY_BETWEEN_CYCLE", default_value_t = 100)]
    delay_between_cycle: u64,

    /// Local address of the SIP socket
    #[arg(long, env = "SIP_BIND_ADDR", default_value = "0.0.0.0:5060")]
    sip_bind_addr: SocketAddr,

    /// `host:port` advertised in Via; defaults to the Contact host and the
    /// bound port when the socket is bound to a wildcard address
    #[arg(long, env = "SIP_ADVERTISED_ADDR")]
    sip_advertised_addr: Option<String>,

    /// Host placed in the registered Contact
    #[arg(long, env = "CONTACT_HOST", default_value = "localhost")]
    contact_host: String,

    /// Contact hosts recognised as our own binding in a 200 OK
    #[arg(long, env = "LOCAL_CONTACT_HOSTS", value_delimiter = ',', default_value = "127.0.0.1,localhost")]
    local_contact_hosts: Vec<String>,

    /// User-Agent for accounts that carry none
    #[arg(long, env = "USER_AGENT", default_value = "IQMobile")]
    user_agent: String,

    /// Seconds to wait before joining the bus
    #[arg(long, env = "STARTUP_DELAY", default_value_t = 10)]
    startup_delay: u64,

    /// Log level
    #[arg(long, env = "LOGLEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn bot_config(&self) -> BotConfig {
        BotConfig::default()
            .with_max_per_cycle(self.max_per_cycle)
            .with_delay_between_cycle(Duration::from_millis(self.delay_between_cycle))
            .with_key_namespace(self.key_namespace.clone())
            .with_user_agent(self.user_agent.clone())
            .with_contact_host(self.contact_host.clone())
            .with_local_contact_hosts(self.local_contact_hosts.clone())
    }

    fn advertised_addr(&self) -> Option<String> {
        match &self.sip_advertised_addr {
            Some(addr) => Some(addr.clone()),
            None if self.sip_bind_addr.ip().is_unspecified() => {
                Some(format!("{}:{}", self.contact_host, self.sip_bind_addr.port()))
            }
            None => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut logging = LoggingConfig::new(parse_log_level(&args.log_level)?, "reg-bot");
    if args.log_json {
        logging = logging.with_json();
    }
    setup_logging(logging)?;
    log_welcome("reg-bot", env!("CARGO_PKG_VERSION"));

    let identity = BotIdentity::generate();
    let config = args.bot_config();

    if args.startup_delay > 0 {
        info!("Waiting {}s before starting {}", args.startup_delay, identity);
        tokio::time::sleep(Duration::from_secs(args.startup_delay)).await;
    }

    let mut nats = NatsConfig::new(&args.nats_url, identity.channel());
    if let (Some(user), Some(password)) = (&args.nats_user, &args.nats_password) {
        nats = nats.with_credentials(user, password);
    }
    let bus = NatsBus::connect(&nats).await?;
    let store = NatsKvStore::open(bus.client().clone(), &args.kv_bucket).await?;

    let signaling = UdpSignalingClient::bind(UdpSignalingConfig {
        bind_addr: args.sip_bind_addr,
        advertised_addr: args.advertised_addr(),
        ..Default::default()
    })
    .await
    .context("binding SIP socket")?;

    let controller = BotController::new(
        identity,
        config,
        Arc::new(bus),
        Arc::new(store),
        Arc::new(HickoryDns::from_system_conf()),
        Arc::new(signaling),
    )?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                on_signal.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    controller.run(shutdown).await?;
    Ok(())
}
