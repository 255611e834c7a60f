use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use trading_core::{
    Balances, Market, Order, PortfolioSnapshot, Position, Repository, TradingError, TradingResult,
};

/// Cash per market, cached in memory and written through to the store.
///
/// Every balance mutation goes through the single mutex and only lands in
/// the cache after the repository transaction has committed, so a close from
/// the monitor and a fill from a scan never interleave on the same field.
pub struct PortfolioLedger {
    repo: Arc<dyn Repository>,
    balances: Mutex<Balances>,
}

impl PortfolioLedger {
    /// Load balances from the store, seeding it with `seed` on first start
    pub async fn open(repo: Arc<dyn Repository>, seed: Balances) -> TradingResult<Self> {
        let balances = match repo.load_balances().await? {
            Some(stored) => {
                info!(spot = stored.spot, futures = stored.futures, "Loaded balances from store");
                stored
            }
            None => {
                repo.save_balances(&seed).await?;
                info!(spot = seed.spot, futures = seed.futures, "Seeded balances");
                seed
            }
        };

        Ok(Self {
            repo,
            balances: Mutex::new(balances),
        })
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub async fn balances(&self) -> Balances {
        *self.balances.lock().await
    }

    /// Debit the capital a freshly filled position locks and persist
    /// order, position and balance together
    pub async fn apply_fill(&self, order: &Order, position: &Position) -> TradingResult<Balances> {
        let mut guard = self.balances.lock().await;
        let cost = position.locked_capital();
        let available = guard.get(position.market);
        if cost > available + 1e-9 {
            return Err(TradingError::Validation(format!(
                "insufficient {} balance: need {:.2}, have {:.2}",
                position.market, cost, available
            )));
        }

        let mut next = *guard;
        *next.get_mut(position.market) -= cost;
        self.repo.commit_fill(order, position, &next).await?;
        *guard = next;

        debug!(symbol = %position.symbol, market = %position.market, cost, "fill debited");
        Ok(next)
    }

    /// Credit locked capital plus realised pnl for a position that has just
    /// been closed
    pub async fn apply_close(&self, position: &Position) -> TradingResult<Balances> {
        if position.is_open() {
            return Err(TradingError::Validation(format!(
                "position {} is still open",
                position.id
            )));
        }
        let mut guard = self.balances.lock().await;
        let mut next = *guard;
        *next.get_mut(position.market) += position.locked_capital() + position.realized_pnl;
        self.repo.commit_close(position, &next).await?;
        *guard = next;

        debug!(symbol = %position.symbol, pnl = position.realized_pnl, "close credited");
        Ok(next)
    }

    /// Equity is cash plus capital locked in open positions plus their
    /// unrealised pnl
    pub async fn valuation(&self, open: &[Position]) -> PortfolioSnapshot {
        let cash = self.balances().await;
        let locked: f64 = open.iter().map(Position::locked_capital).sum();
        let unrealized: f64 = open.iter().map(|p| p.unrealized_pnl).sum();
        let margin_used = open
            .iter()
            .filter(|p| p.market == Market::Futures)
            .map(Position::locked_capital)
            .sum();

        PortfolioSnapshot {
            timestamp: Utc::now(),
            equity: cash.total() + locked + unrealized,
            cash_by_market: cash,
            margin_used,
        }
    }
}
