//! Off-chain batch auction indexer.
//!
//! Polls an external ledger for permissionless batch auctions, reconciles
//! auction, order and clearing state into in-memory maps, automatically
//! settles ended auctions and distributes proceeds of settled ones, and
//! serves the indexed state over a small read-only HTTP API.
//!
//! The concrete RPC transport is an external collaborator: the embedding
//! binary constructs implementations of [`ledger_client::LedgerRead`] and
//! [`ledger_client::LedgerWrite`] and hands them to [`run`].

pub mod api;
pub mod arguments;
pub mod cache;
pub mod domain;
pub mod indexer;
pub mod price;

use {
    crate::{
        api::AppState,
        arguments::Arguments,
        indexer::{Config, Indexer, IndexerState, Submitter},
        price::{HttpFiatOracle, PriceResolver},
    },
    anyhow::Result,
    ledger_client::{LedgerRead, LedgerWrite, TxParameters},
    std::sync::Arc,
    token_info::{CachedTokenInfoFetcher, TokenInfoFetcher, TokenInfoFetching},
};

/// Wires up all components, starts the poll loop and serves the read API
/// until the process exits.
pub async fn run(
    args: Arguments,
    ledger: Arc<dyn LedgerRead>,
    writer: Option<Arc<dyn LedgerWrite>>,
) -> Result<()> {
    observe::tracing::initialize(&args.log_filter, args.log_stderr_threshold);
    observe::metrics::setup_registry_reentrant(Some("auction_indexer".into()), None);
    tracing::info!("running indexer with arguments:\n{args}");

    let token_infos: Arc<dyn TokenInfoFetching> = Arc::new(CachedTokenInfoFetcher::new(Arc::new(
        TokenInfoFetcher {
            ledger: ledger.clone(),
        },
    )));

    let prices = Arc::new(PriceResolver::new(
        Arc::new(HttpFiatOracle::new(
            reqwest::Client::new(),
            args.fiat_oracle_url.clone(),
        )),
        ledger.clone(),
        token_infos.clone(),
        args.price_contracts(),
        args.btc_usd_ttl,
        args.pool_quote_ttl,
    ));

    let submitter = match (writer, args.tx_sender) {
        (Some(write), Some(sender)) => Some(Submitter {
            write,
            params: TxParameters {
                sender,
                gas_limit: args.gas_limit,
            },
        }),
        _ => {
            tracing::warn!("no transaction submitter configured, auto-settlement disabled");
            None
        }
    };

    let indexer = Indexer::new(
        Arc::new(IndexerState::new(args.order_cache_ttl)),
        ledger,
        token_infos.clone(),
        submitter,
        Config {
            poll_interval: args.poll_interval,
            discovery_lookahead: args.discovery_lookahead,
            max_attempts: args.max_attempts,
        },
    );
    indexer.spawn();

    let router = api::handle_all_routes(AppState {
        indexer,
        prices,
        token_infos,
    });
    api::serve(args.bind_address, router).await
}
