//! Polling live trader: one sequential fetch → reconcile → step → order round
//! trip per tick, driving the same walk-forward `Simulator` used offline.

use crate::bybit_api::{Exchange, ExchangeError};
use crate::config::{LiveConfig, Settings};
use crate::simulation::{SimulationError, Simulator};
use crate::telegram::TelegramBot;
use crate::types::{BotEvent, Candle, ExitReason};

#[derive(Debug, Default, PartialEq)]
pub struct TickReport {
    pub new_bars: usize,
    pub events: Vec<BotEvent>,
    pub orders_sent: usize,
    pub external_close: bool,
}

pub struct LiveTrader<E: Exchange> {
    exchange: E,
    live: LiveConfig,
    simulator: Simulator,
    /// Every closed bar seen since start, so simulator indices never shift.
    history: Vec<Candle>,
    stepped: usize,
    bootstrapped: bool,
    notifier: Option<TelegramBot>,
}

impl<E: Exchange> LiveTrader<E> {
    pub fn new(exchange: E, settings: &Settings) -> Result<Self, SimulationError> {
        settings.validate()?;
        Ok(LiveTrader {
            exchange,
            live: settings.live.clone(),
            simulator: Simulator::new(settings.detector.clone(), settings.bot.clone())?,
            history: Vec::new(),
            stepped: 0,
            bootstrapped: false,
            notifier: None,
        })
    }

    pub fn with_notifier(mut self, notifier: Option<TelegramBot>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn history(&self) -> &[Candle] {
        &self.history
    }

    /// Appends closed bars newer than the last one held. The newest kline from
    /// the exchange is still forming and is never taken.
    fn merge_klines(&mut self, mut klines: Vec<Candle>) -> usize {
        klines.pop();
        let last_time = self.history.last().map(|c| c.time);
        let before = self.history.len();
        self.history
            .extend(klines.into_iter().filter(|c| last_time.map_or(true, |t| c.time > t)));
        self.history.len() - before
    }

    pub async fn tick(&mut self) -> Result<TickReport, ExchangeError> {
        let sym = self.live.symbol.clone();
        let mut report = TickReport::default();

        let klines = self
            .exchange
            .get_klines(&sym, &self.live.interval, self.live.kline_limit)
            .await?;
        report.new_bars = self.merge_klines(klines);

        // First tick replays the fetched history without sending orders.
        if !self.bootstrapped {
            let from = self.simulator.warmup().max(self.stepped);
            for i in from..self.history.len() {
                self.simulator.step(&self.history, i);
            }
            self.stepped = self.history.len();
            self.bootstrapped = true;
            log::info!(
                "[{}] bootstrapped on {} closed bars, {} replayed trades",
                sym, self.history.len(), self.simulator.state().manager().trades().len()
            );
        }

        report.external_close = self.reconcile(&sym).await?;

        let from = self.simulator.warmup().max(self.stepped);
        for i in from..self.history.len() {
            let events = self.simulator.step(&self.history, i);
            self.stepped = i + 1;
            for ev in &events {
                self.execute(&sym, ev).await?;
                report.orders_sent += 1;
            }
            report.events.extend(events);
        }
        self.stepped = self.stepped.max(self.history.len());
        Ok(report)
    }

    /// The exchange is authoritative: a tracked position it no longer holds is
    /// closed locally as `External_Close`.
    async fn reconcile(&mut self, sym: &str) -> Result<bool, ExchangeError> {
        let remote = self.exchange.get_position(sym).await?;
        let local = self.simulator.position().map(|p| (p.side, p.position_size));

        match (local, remote) {
            (Some((side, size)), None) => {
                let Some(last) = self.history.last() else { return Ok(false) };
                let (index, time, fallback) = (self.history.len() - 1, last.time, last.close);
                let price = match self.exchange.get_current_price(sym).await {
                    Ok(p) if p > 0.0 => p,
                    Ok(p) => {
                        log::warn!("[{}] bad price {} from exchange, using last close", sym, p);
                        fallback
                    }
                    Err(e) => {
                        log::warn!("[{}] price fetch failed ({}), using last close", sym, e);
                        fallback
                    }
                };
                log::warn!(
                    "[{}] {} size={:.4} gone on exchange — closing locally @ {:.4}",
                    sym, side, size, price
                );
                if let Some(t) = self.simulator.force_close(price, index, time, ExitReason::ExternalClose) {
                    if let Some(tg) = &self.notifier {
                        tg.notify_trade_close(sym, t.side, t.exit_price, t.pnl, t.reason, false).await;
                    }
                }
                Ok(true)
            }
            (None, Some(info)) => {
                log::warn!(
                    "[{}] untracked {} position on exchange: size={:.4} @ {:.2}",
                    sym, info.side, info.size, info.entry_price
                );
                Ok(false)
            }
            (Some((side, size)), Some(info)) => {
                if info.side != side || (info.size - size).abs() > size * 0.01 {
                    log::warn!(
                        "[{}] position mismatch: local {} {:.4}, exchange {} {:.4}",
                        sym, side, size, info.side, info.size
                    );
                }
                Ok(false)
            }
            (None, None) => Ok(false),
        }
    }

    async fn execute(&self, sym: &str, ev: &BotEvent) -> Result<(), ExchangeError> {
        let result = match *ev {
            BotEvent::Opened { side, price, size, sl, tp1, .. } => {
                log::info!(
                    "[{}] ENTRY {} qty={:.4} @ {:.4} sl={:.4} tp1={:?}",
                    sym, side, size, price, sl, tp1
                );
                let r = self.exchange.open_market_order(sym, side, size).await;
                if r.is_ok() {
                    if let Some(tg) = &self.notifier {
                        tg.notify_trade_open(sym, side, size, price, sl, tp1).await;
                    }
                }
                r
            }
            BotEvent::Closed { side, price, size, pnl, reason, partial } => {
                log::info!(
                    "[{}] EXIT {} {} qty={:.4} @ {:.4} pnl={:+.2}{}",
                    sym, side, reason, size, price, pnl,
                    if partial { " (partial)" } else { "" }
                );
                let r = self.exchange.close_position(sym, size, side).await;
                if r.is_ok() {
                    if let Some(tg) = &self.notifier {
                        tg.notify_trade_close(sym, side, price, pnl, reason, partial).await;
                    }
                }
                r
            }
        };

        match result {
            Ok(order_id) => {
                log::debug!("[{}] order accepted id={}", sym, order_id);
                Ok(())
            }
            Err(e) => {
                log::error!("[{}] order failed: {} — abandoning tick", sym, e);
                if let Some(tg) = &self.notifier {
                    tg.notify_error(sym, &format!("order failed: {e}")).await;
                }
                Err(e)
            }
        }
    }
}
