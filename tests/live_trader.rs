//! Live trader ticks against an in-memory exchange.

mod common;

use common::{w_series, BAR_MS};
use cycle_trader::bybit_api::{Exchange, ExchangeError, ExchangePosition};
use cycle_trader::config::Settings;
use cycle_trader::live::LiveTrader;
use cycle_trader::types::BotEvent;
use cycle_trader::{Candle, ExitReason, Side};
use std::cell::RefCell;

#[derive(Debug, Clone, PartialEq)]
enum Order {
    Open(Side, f64),
    Close(Side, f64),
}

#[derive(Default)]
struct Book {
    klines: Vec<Candle>,
    position: Option<ExchangePosition>,
    orders: Vec<Order>,
    price: f64,
    reject_orders: bool,
}

#[derive(Default)]
struct MockExchange {
    book: RefCell<Book>,
}

impl MockExchange {
    /// Serves `closed` bars plus one still-forming bar after them.
    fn serve(&self, closed: &[Candle]) {
        let mut klines = closed.to_vec();
        if let Some(last) = closed.last() {
            klines.push(Candle { time: last.time + BAR_MS, ..last.clone() });
        }
        self.book.borrow_mut().klines = klines;
    }

    fn orders(&self) -> Vec<Order> {
        self.book.borrow().orders.clone()
    }
}

impl Exchange for MockExchange {
    async fn get_klines(&self, _symbol: &str, _interval: &str, _limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        Ok(self.book.borrow().klines.clone())
    }

    async fn get_position(&self, _symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
        Ok(self.book.borrow().position.clone())
    }

    async fn open_market_order(&self, _symbol: &str, side: Side, qty: f64) -> Result<String, ExchangeError> {
        let mut book = self.book.borrow_mut();
        if book.reject_orders {
            return Err(ExchangeError::Permanent("insufficient margin".into()));
        }
        book.orders.push(Order::Open(side, qty));
        book.position = Some(ExchangePosition { side, size: qty, entry_price: book.price });
        Ok(format!("order-{}", book.orders.len()))
    }

    async fn close_position(&self, _symbol: &str, qty: f64, side: Side) -> Result<String, ExchangeError> {
        let mut book = self.book.borrow_mut();
        book.orders.push(Order::Close(side, qty));
        if let Some(p) = book.position.as_mut() {
            p.size -= qty;
            if p.size <= 1e-9 {
                book.position = None;
            }
        }
        Ok(format!("order-{}", book.orders.len()))
    }

    async fn get_current_price(&self, _symbol: &str) -> Result<f64, ExchangeError> {
        Ok(self.book.borrow().price)
    }
}

fn trader() -> LiveTrader<MockExchange> {
    let exchange = MockExchange::default();
    exchange.book.borrow_mut().price = 108.0;
    LiveTrader::new(exchange, &Settings::default()).unwrap()
}

#[tokio::test]
async fn bootstrap_replays_without_orders() {
    let candles = w_series();
    let mut t = trader();
    t.exchange().serve(&candles[..38]);

    let report = t.tick().await.unwrap();
    assert_eq!(report.new_bars, 38);
    assert_eq!(report.orders_sent, 0);
    assert!(report.events.is_empty());
    assert_eq!(t.history().len(), 38);
    assert!(t.exchange().orders().is_empty());
    assert!(t.simulator().position().is_none());
}

#[tokio::test]
async fn forming_bar_is_never_traded() {
    let candles = w_series();
    let mut t = trader();
    t.exchange().serve(&candles[..38]);
    t.tick().await.unwrap();

    // Same fetch again: nothing new closed.
    let report = t.tick().await.unwrap();
    assert_eq!(report.new_bars, 0);
    assert_eq!(t.history().len(), 38);
}

#[tokio::test]
async fn new_closed_bar_opens_then_takes_profit() {
    let candles = w_series();
    let mut t = trader();
    t.exchange().serve(&candles[..38]);
    t.tick().await.unwrap();

    t.exchange().serve(&candles[..39]);
    let report = t.tick().await.unwrap();
    assert_eq!(report.new_bars, 1);
    assert_eq!(report.orders_sent, 1);
    assert!(matches!(report.events[0], BotEvent::Opened { side: Side::Long, price, .. } if price == 108.0));
    let opened = match t.exchange().orders()[0] {
        Order::Open(Side::Long, qty) => qty,
        ref other => panic!("unexpected order {:?}", other),
    };

    t.exchange().serve(&candles);
    let report = t.tick().await.unwrap();
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, BotEvent::Closed { reason: ExitReason::Tp1Partial, partial: true, .. })));
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, BotEvent::Closed { reason: ExitReason::Tp2Full, partial: false, .. })));

    let closed: f64 = t
        .exchange()
        .orders()
        .iter()
        .filter_map(|o| match o {
            Order::Close(Side::Long, q) => Some(*q),
            _ => None,
        })
        .sum();
    assert!((closed - opened).abs() < 1e-9);
    assert!(t.simulator().position().is_none());
    assert!(t.exchange().book.borrow().position.is_none());
}

#[tokio::test]
async fn vanished_position_is_closed_externally() {
    let candles = w_series();
    let mut t = trader();
    t.exchange().serve(&candles[..38]);
    t.tick().await.unwrap();
    t.exchange().serve(&candles[..39]);
    t.tick().await.unwrap();
    assert!(t.simulator().position().is_some());

    {
        let mut book = t.exchange().book.borrow_mut();
        book.position = None;
        book.price = 109.5;
    }
    let report = t.tick().await.unwrap();
    assert!(report.external_close);
    assert_eq!(report.orders_sent, 0);
    assert!(t.simulator().position().is_none());

    let last = t.simulator().state().manager().trades().last().unwrap().clone();
    assert_eq!(last.reason, ExitReason::ExternalClose);
    assert_eq!(last.exit_price, 109.5);
    assert_eq!(last.side, Side::Long);
}

#[tokio::test]
async fn rejected_order_abandons_the_tick() {
    let candles = w_series();
    let mut t = trader();
    t.exchange().serve(&candles[..38]);
    t.tick().await.unwrap();

    t.exchange().book.borrow_mut().reject_orders = true;
    t.exchange().serve(&candles[..39]);
    let err = t.tick().await.unwrap_err();
    assert!(matches!(err, ExchangeError::Permanent(_)));
    assert!(t.exchange().orders().is_empty());

    // The bar is not replayed; the exchange never saw the entry, so the local
    // position is dropped on the next reconcile.
    t.exchange().book.borrow_mut().reject_orders = false;
    let report = t.tick().await.unwrap();
    assert_eq!(report.new_bars, 0);
    assert!(report.events.is_empty());
    assert!(report.external_close);
    assert!(t.simulator().position().is_none());
}
