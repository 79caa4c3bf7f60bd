use {
    crate::price,
    alloy_primitives::Address,
    clap::Parser,
    std::{net::SocketAddr, num::ParseFloatError, time::Duration},
    tracing::level_filters::LevelFilter,
    url::Url,
};

#[derive(Parser)]
pub struct Arguments {
    /// Filter for the tracing subscriber, env_logger syntax.
    #[clap(long, env, default_value = "warn,indexer=debug")]
    pub log_filter: String,

    /// Minimum log level that is additionally mirrored to stderr.
    #[clap(long, env, default_value = "error")]
    pub log_stderr_threshold: LevelFilter,

    /// Address the read API listens on.
    #[clap(long, env, default_value = "0.0.0.0:8080")]
    pub bind_address: SocketAddr,

    /// Seconds between poll cycles. A cycle that takes longer than this
    /// simply delays the next one; cycles never overlap.
    #[clap(long, env, default_value = "30", value_parser = duration_from_seconds)]
    pub poll_interval: Duration,

    /// How many ids past the highest known auction the discovery phase
    /// probes per cycle.
    #[clap(long, env, default_value = "10")]
    pub discovery_lookahead: u64,

    /// How many simulation-reported failures to tolerate before giving up
    /// on settling or distributing an auction.
    #[clap(long, env, default_value = "10")]
    pub max_attempts: u32,

    /// Seconds an auction's cached order list stays valid without being
    /// explicitly invalidated.
    #[clap(long, env, default_value = "15", value_parser = duration_from_seconds)]
    pub order_cache_ttl: Duration,

    /// Simple-price endpoint answering the BTC price in USD.
    #[clap(
        long,
        env,
        default_value = "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd"
    )]
    pub fiat_oracle_url: Url,

    /// Seconds the BTC/USD quote stays fresh.
    #[clap(long, env, default_value = "60", value_parser = duration_from_seconds)]
    pub btc_usd_ttl: Duration,

    /// Seconds the on-ledger pool and router quotes stay fresh.
    #[clap(long, env, default_value = "30", value_parser = duration_from_seconds)]
    pub pool_quote_ttl: Duration,

    /// The base settlement token. USD prices resolve to 0 unless this, the
    /// pool and the router address are all configured.
    #[clap(long, env)]
    pub base_token: Option<Address>,

    /// The liquidity pool pairing the base token with the BTC proxy token.
    #[clap(long, env)]
    pub base_btc_pool: Option<Address>,

    /// The router answering base-token quotes.
    #[clap(long, env)]
    pub quote_router: Option<Address>,

    /// Address settlement and claim transactions are sent from. Automated
    /// settlement and distribution stay disabled without it.
    #[clap(long, env)]
    pub tx_sender: Option<Address>,

    /// Optional gas limit override for submitted transactions.
    #[clap(long, env)]
    pub gas_limit: Option<u64>,
}

impl Arguments {
    /// All three price contracts, or `None` if any is unconfigured.
    pub fn price_contracts(&self) -> Option<price::PriceContracts> {
        Some(price::PriceContracts {
            base_token: self.base_token?,
            pool: self.base_btc_pool?,
            router: self.quote_router?,
        })
    }
}

pub fn duration_from_seconds(s: &str) -> Result<Duration, ParseFloatError> {
    Ok(Duration::from_secs_f64(s.parse()?))
}

impl std::fmt::Display for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "log_filter: {}", self.log_filter)?;
        writeln!(f, "log_stderr_threshold: {}", self.log_stderr_threshold)?;
        writeln!(f, "bind_address: {}", self.bind_address)?;
        writeln!(f, "poll_interval: {:?}", self.poll_interval)?;
        writeln!(f, "discovery_lookahead: {}", self.discovery_lookahead)?;
        writeln!(f, "max_attempts: {}", self.max_attempts)?;
        writeln!(f, "order_cache_ttl: {:?}", self.order_cache_ttl)?;
        writeln!(f, "fiat_oracle_url: {}", self.fiat_oracle_url)?;
        writeln!(f, "btc_usd_ttl: {:?}", self.btc_usd_ttl)?;
        writeln!(f, "pool_quote_ttl: {:?}", self.pool_quote_ttl)?;
        writeln!(f, "base_token: {:?}", self.base_token)?;
        writeln!(f, "base_btc_pool: {:?}", self.base_btc_pool)?;
        writeln!(f, "quote_router: {:?}", self.quote_router)?;
        writeln!(f, "tx_sender: {:?}", self.tx_sender)?;
        writeln!(f, "gas_limit: {:?}", self.gas_limit)?;
        Ok(())
    }
}
