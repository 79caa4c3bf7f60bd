//! Multi-hop USD price resolution.
//!
//! The USD price of a token is the product of three hops:
//! `USD/BTC` (external fiat oracle) x `BTC/base` (on-ledger liquidity pool
//! reserve ratio) x `base/token` (on-ledger router quote for one whole
//! token). Each hop is cached with its own TTL and de-duplicates concurrent
//! refreshes, since the poll cycle and request serving overlap in time.
//! A failed refresh falls back to the last value that was ever fetched
//! successfully; a hop that never succeeded makes the whole price resolve
//! to `0.0`. The resolver never errors.

use {
    alloy_primitives::{Address, U256},
    anyhow::{Context, Result, ensure},
    futures::FutureExt,
    ledger_client::LedgerRead,
    number::u256_ext::U256Ext,
    request_sharing::BoxRequestSharing,
    reqwest::Client,
    serde::Deserialize,
    std::{
        collections::HashMap,
        hash::Hash,
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    },
    token_info::TokenInfoFetching,
    url::Url,
};

pub const DEFAULT_BTC_USD_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_POOL_QUOTE_TTL: Duration = Duration::from_secs(30);

/// Source of the BTC price in USD. The oracle integration is deliberately
/// this narrow; everything else is computed on-ledger.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait FiatOracle: Send + Sync {
    async fn btc_usd(&self) -> Result<f64>;
}

/// Fiat oracle backed by a simple-price style HTTP endpoint returning
/// `{"bitcoin": {"usd": <float>}}`.
pub struct HttpFiatOracle {
    client: Client,
    url: Url,
}

impl HttpFiatOracle {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[derive(Deserialize)]
struct SimplePriceResponse {
    bitcoin: UsdQuote,
}

#[derive(Deserialize)]
struct UsdQuote {
    usd: f64,
}

#[async_trait::async_trait]
impl FiatOracle for HttpFiatOracle {
    async fn btc_usd(&self) -> Result<f64> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .context("fiat oracle request failed")?;
        ensure!(
            response.status().is_success(),
            "fiat oracle returned status {}",
            response.status()
        );
        let parsed: SimplePriceResponse =
            response.json().await.context("malformed fiat oracle response")?;
        let price = parsed.bitcoin.usd;
        ensure!(
            price.is_finite() && price >= 0.,
            "fiat oracle returned invalid price {price}"
        );
        Ok(price)
    }
}

/// The three on-ledger contracts required for price resolution. Prices are
/// disabled wholesale while any of them is unconfigured.
#[derive(Debug, Clone, Copy)]
pub struct PriceContracts {
    /// The base settlement token all router quotes are denominated in.
    pub base_token: Address,
    /// Liquidity pool pairing the base token with the BTC proxy token.
    pub pool: Address,
    /// Router answering `base/token` quotes.
    pub router: Address,
}

/// Integer ratio kept un-divided until the final multiplication to minimize
/// precision loss.
#[derive(Debug, Clone, Copy)]
struct Ratio {
    numerator: U256,
    denominator: U256,
}

impl Ratio {
    const ONE: Self = Self {
        numerator: U256::ONE,
        denominator: U256::ONE,
    };

    fn to_f64(self) -> Option<f64> {
        (!self.denominator.is_zero())
            .then(|| self.numerator.to_f64_lossy() / self.denominator.to_f64_lossy())
    }
}

/// Per-hop cache: fresh values are served directly, refreshes of the same
/// key are shared between concurrent callers, and the last good value is
/// retained indefinitely for stale-on-error fallback.
struct Hop<K, V> {
    label: &'static str,
    ttl: Duration,
    values: Arc<Mutex<HashMap<K, (V, Instant)>>>,
    sharing: BoxRequestSharing<K, Option<V>>,
}

impl<K, V> Hop<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new(label: &'static str, ttl: Duration) -> Self {
        Self {
            label,
            ttl,
            values: Arc::new(Mutex::new(HashMap::new())),
            sharing: BoxRequestSharing::labelled(label.to_string()),
        }
    }

    async fn get_or_fetch<F>(&self, key: K, fetch: F) -> Option<V>
    where
        F: FnOnce(&K) -> futures::future::BoxFuture<'static, Result<V>>,
    {
        {
            let values = self.values.lock().unwrap();
            if let Some((value, stored_at)) = values.get(&key) {
                if stored_at.elapsed() < self.ttl {
                    return Some(value.clone());
                }
            }
        }

        let label = self.label;
        let values = self.values.clone();
        let shared = self.sharing.shared_or_else(key, |key| {
            let fetch = fetch(key);
            let key = key.clone();
            async move {
                match fetch.await {
                    Ok(value) => {
                        values
                            .lock()
                            .unwrap()
                            .insert(key, (value.clone(), Instant::now()));
                        Some(value)
                    }
                    Err(err) => {
                        tracing::warn!(?err, hop = label, "refresh failed, using last known value");
                        values.lock().unwrap().get(&key).map(|(value, _)| value.clone())
                    }
                }
            }
            .boxed()
        });
        let result = shared.await;
        self.sharing.collect_garbage();
        result
    }
}

pub struct PriceResolver {
    oracle: Arc<dyn FiatOracle>,
    ledger: Arc<dyn LedgerRead>,
    token_infos: Arc<dyn TokenInfoFetching>,
    contracts: Option<PriceContracts>,
    btc_usd: Hop<(), f64>,
    base_btc: Hop<(), Ratio>,
    token_base: Hop<Address, Ratio>,
}

impl PriceResolver {
    pub fn new(
        oracle: Arc<dyn FiatOracle>,
        ledger: Arc<dyn LedgerRead>,
        token_infos: Arc<dyn TokenInfoFetching>,
        contracts: Option<PriceContracts>,
        btc_usd_ttl: Duration,
        pool_quote_ttl: Duration,
    ) -> Self {
        if contracts.is_none() {
            tracing::warn!("price contracts not fully configured, all USD prices resolve to 0");
        }
        Self {
            oracle,
            ledger,
            token_infos,
            contracts,
            btc_usd: Hop::new("btc_usd", btc_usd_ttl),
            base_btc: Hop::new("base_btc", pool_quote_ttl),
            token_base: Hop::new("token_base", pool_quote_ttl),
        }
    }

    /// The USD price of one whole token, `0.0` when unavailable for any
    /// reason. Never errors.
    pub async fn price_usd(&self, token: Address) -> f64 {
        let Some(contracts) = self.contracts else {
            return 0.;
        };
        let usd_per_btc = self.usd_per_btc().await;
        let btc_per_base = self.btc_per_base(contracts).await;
        let base_per_token = if token == contracts.base_token {
            // The queried token is the base settlement token itself.
            Some(Ratio::ONE)
        } else {
            self.base_per_token(contracts, token).await
        };

        match (
            usd_per_btc,
            btc_per_base.and_then(Ratio::to_f64),
            base_per_token.and_then(Ratio::to_f64),
        ) {
            (Some(usd), Some(btc_per_base), Some(base_per_token)) => {
                usd * btc_per_base * base_per_token
            }
            _ => 0.,
        }
    }

    async fn usd_per_btc(&self) -> Option<f64> {
        let oracle = self.oracle.clone();
        self.btc_usd
            .get_or_fetch((), move |_| {
                async move { oracle.btc_usd().await }.boxed()
            })
            .await
    }

    async fn btc_per_base(&self, contracts: PriceContracts) -> Option<Ratio> {
        let ledger = self.ledger.clone();
        self.base_btc
            .get_or_fetch((), move |_| {
                async move {
                    let reserves = ledger.pool_reserves(contracts.pool).await?;
                    ensure!(!reserves.base.is_zero(), "pool has zero base reserve");
                    // The pool pairs the wrapped base token with the BTC
                    // proxy token; both carry the same number of decimals
                    // on this ledger, so the raw reserve ratio is the
                    // price.
                    Ok(Ratio {
                        numerator: reserves.btc,
                        denominator: reserves.base,
                    })
                }
                .boxed()
            })
            .await
    }

    async fn base_per_token(&self, contracts: PriceContracts, token: Address) -> Option<Ratio> {
        let ledger = self.ledger.clone();
        let token_infos = self.token_infos.clone();
        self.token_base
            .get_or_fetch(token, move |token| {
                let token = *token;
                async move {
                    let token_decimals = token_infos
                        .get_token_info(token)
                        .await
                        .map_err(anyhow::Error::from)?
                        .decimals
                        .context("unknown token decimals")?;
                    let base_decimals = token_infos
                        .get_token_info(contracts.base_token)
                        .await
                        .map_err(anyhow::Error::from)?
                        .decimals
                        .context("unknown base token decimals")?;
                    // Quote one whole token through the router.
                    let amount_out = ledger
                        .router_quote(
                            contracts.router,
                            token,
                            contracts.base_token,
                            U256Ext::exp10(token_decimals),
                        )
                        .await?;
                    Ok(Ratio {
                        numerator: amount_out,
                        denominator: U256Ext::exp10(base_decimals),
                    })
                }
                .boxed()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        ledger_client::{MockLedgerRead, PoolReserves},
        mockall::predicate::eq,
        token_info::{MockTokenInfoFetching, TokenInfo},
    };

    const TOKEN: Address = Address::with_last_byte(1);
    const BASE: Address = Address::with_last_byte(2);

    fn contracts() -> PriceContracts {
        PriceContracts {
            base_token: BASE,
            pool: Address::with_last_byte(3),
            router: Address::with_last_byte(4),
        }
    }

    fn token_infos() -> MockTokenInfoFetching {
        let mut infos = MockTokenInfoFetching::new();
        infos
            .expect_get_token_info()
            .with(eq(TOKEN))
            .returning(|_| {
                Ok(TokenInfo {
                    decimals: Some(8),
                    ..Default::default()
                })
            });
        infos.expect_get_token_info().with(eq(BASE)).returning(|_| {
            Ok(TokenInfo {
                decimals: Some(18),
                ..Default::default()
            })
        });
        infos
    }

    /// Pool with 1 BTC proxy unit per 2 base units, router paying 2 whole
    /// base tokens per whole queried token.
    fn ledger() -> MockLedgerRead {
        let mut ledger = MockLedgerRead::new();
        ledger.expect_pool_reserves().returning(|_| {
            Ok(PoolReserves {
                base: U256::from(2_000_000_000_000_000_000u128),
                btc: U256::from(1_000_000_000_000_000_000u128),
            })
        });
        ledger.expect_router_quote().returning(|_, _, _, amount_in| {
            assert_eq!(amount_in, U256::from(100_000_000u64));
            Ok(U256::from(2_000_000_000_000_000_000u128))
        });
        ledger
    }

    fn resolver(
        oracle: MockFiatOracle,
        ledger: MockLedgerRead,
        contracts: Option<PriceContracts>,
        ttl: Duration,
    ) -> PriceResolver {
        PriceResolver::new(
            Arc::new(oracle),
            Arc::new(ledger),
            Arc::new(token_infos()),
            contracts,
            ttl,
            ttl,
        )
    }

    #[tokio::test]
    async fn disabled_without_configured_contracts() {
        let resolver = resolver(
            MockFiatOracle::new(),
            MockLedgerRead::new(),
            None,
            DEFAULT_BTC_USD_TTL,
        );
        assert_eq!(resolver.price_usd(TOKEN).await, 0.);
    }

    #[tokio::test]
    async fn multiplies_all_three_hops() {
        let mut oracle = MockFiatOracle::new();
        oracle.expect_btc_usd().times(1).returning(|| Ok(50_000.));
        let resolver = resolver(oracle, ledger(), Some(contracts()), DEFAULT_BTC_USD_TTL);
        // 50_000 USD/BTC * 0.5 BTC/base * 2 base/token
        assert_eq!(resolver.price_usd(TOKEN).await, 50_000.);
    }

    #[tokio::test]
    async fn base_token_skips_the_router_hop() {
        let mut oracle = MockFiatOracle::new();
        oracle.expect_btc_usd().returning(|| Ok(50_000.));
        let mut ledger = MockLedgerRead::new();
        ledger.expect_pool_reserves().returning(|_| {
            Ok(PoolReserves {
                base: U256::from(2u64),
                btc: U256::from(1u64),
            })
        });
        // expect_router_quote is deliberately not set up: calling it panics.
        let resolver = resolver(oracle, ledger, Some(contracts()), DEFAULT_BTC_USD_TTL);
        assert_eq!(resolver.price_usd(BASE).await, 25_000.);
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_last_good_value() {
        let mut oracle = MockFiatOracle::new();
        let mut sequence = mockall::Sequence::new();
        oracle
            .expect_btc_usd()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|| Ok(50_000.));
        oracle
            .expect_btc_usd()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|| Err(anyhow::anyhow!("oracle down")));
        // Zero TTL: every call refreshes.
        let resolver = resolver(oracle, ledger(), Some(contracts()), Duration::ZERO);
        assert_eq!(resolver.price_usd(TOKEN).await, 50_000.);
        assert_eq!(resolver.price_usd(TOKEN).await, 50_000.);
    }

    #[tokio::test]
    async fn never_fetched_hop_resolves_to_zero() {
        let mut oracle = MockFiatOracle::new();
        oracle
            .expect_btc_usd()
            .returning(|| Err(anyhow::anyhow!("oracle down")));
        let resolver = resolver(oracle, ledger(), Some(contracts()), DEFAULT_BTC_USD_TTL);
        assert_eq!(resolver.price_usd(TOKEN).await, 0.);
    }

    #[tokio::test]
    async fn zero_reserve_short_circuits_to_zero() {
        let mut oracle = MockFiatOracle::new();
        oracle.expect_btc_usd().returning(|| Ok(50_000.));
        let mut ledger = MockLedgerRead::new();
        ledger.expect_pool_reserves().returning(|_| {
            Ok(PoolReserves {
                base: U256::ZERO,
                btc: U256::from(1u64),
            })
        });
        ledger.expect_router_quote().returning(|_, _, _, _| {
            Ok(U256::from(2_000_000_000_000_000_000u128))
        });
        let resolver = resolver(oracle, ledger, Some(contracts()), DEFAULT_BTC_USD_TTL);
        assert_eq!(resolver.price_usd(TOKEN).await, 0.);
    }
}
