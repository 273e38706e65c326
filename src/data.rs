//! Candle CSV input and trade/equity CSV output.

use crate::types::{Candle, EquityPoint, Trade};
use chrono::DateTime;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing column `{0}`")]
    MissingColumn(&'static str),

    #[error("row {row}: cannot parse {column} from {value:?}")]
    Parse { row: usize, column: &'static str, value: String },
}

struct Columns {
    time: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, DataError> {
        let lower: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let find = |names: &[&str]| lower.iter().position(|h| names.contains(&h.as_str()));
        Ok(Columns {
            time: find(&["time", "timestamp", "ts", "ts_ms", "open_time", "start"])
                .ok_or(DataError::MissingColumn("time"))?,
            open: find(&["open", "o"]).ok_or(DataError::MissingColumn("open"))?,
            high: find(&["high", "h"]).ok_or(DataError::MissingColumn("high"))?,
            low: find(&["low", "l"]).ok_or(DataError::MissingColumn("low"))?,
            close: find(&["close", "c"]).ok_or(DataError::MissingColumn("close"))?,
            volume: find(&["volume", "vol", "v"]),
        })
    }
}

fn field<T: std::str::FromStr>(
    record: &csv::StringRecord,
    row: usize,
    idx: usize,
    column: &'static str,
) -> Result<T, DataError> {
    let raw = record.get(idx).unwrap_or("").trim();
    raw.parse().map_err(|_| DataError::Parse { row, column, value: raw.to_string() })
}

/// Reads candles from any CSV source with a header row naming the columns.
/// Second-resolution timestamps are promoted to ms. Output is sorted by time
/// with duplicate timestamps dropped (first one wins).
pub fn read_candles<R: Read>(reader: R) -> Result<Vec<Candle>, DataError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let cols = Columns::from_headers(rdr.headers()?)?;

    let mut out = Vec::new();
    for (row, rec) in rdr.records().enumerate() {
        let rec = rec?;
        if rec.iter().all(|f| f.is_empty()) {
            continue;
        }
        let raw_time: f64 = field(&rec, row, cols.time, "time")?;
        let time = (if raw_time < 1e11 { raw_time * 1000.0 } else { raw_time }) as i64;
        out.push(Candle {
            time,
            open: field(&rec, row, cols.open, "open")?,
            high: field(&rec, row, cols.high, "high")?,
            low: field(&rec, row, cols.low, "low")?,
            close: field(&rec, row, cols.close, "close")?,
            volume: match cols.volume {
                Some(i) => field(&rec, row, i, "volume")?,
                None => 0.0,
            },
        });
    }
    out.sort_by_key(|c| c.time);
    out.dedup_by_key(|c| c.time);
    Ok(out)
}

pub fn load_candles(path: &Path) -> Result<Vec<Candle>, DataError> {
    let file = std::fs::File::open(path)?;
    let candles = read_candles(file)?;
    log::debug!("{}: {} candles", path.display(), candles.len());
    Ok(candles)
}

pub fn ms_to_date(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

// ── Trade log CSV ─────────────────────────────────────────────────────────────

pub fn write_trades<W: Write>(writer: W, trades: &[Trade]) -> Result<(), DataError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "side", "entry_date", "exit_date", "entry_index", "exit_index", "entry", "exit", "size",
        "fraction", "partial", "pnl", "pnl_pct", "fees", "balance_after", "reason", "cycle_start",
        "cycle_end",
    ])?;
    for t in trades {
        let (cs, ce) = t
            .cycle
            .as_ref()
            .map(|c| (c.start_index.to_string(), c.end_index.to_string()))
            .unwrap_or_default();
        wtr.write_record(&[
            t.side.to_string(),
            ms_to_date(t.entry_time),
            ms_to_date(t.exit_time),
            t.entry_index.to_string(),
            t.exit_index.to_string(),
            format!("{:.4}", t.entry_price),
            format!("{:.4}", t.exit_price),
            format!("{:.6}", t.size),
            format!("{:.2}", t.fraction),
            t.partial.to_string(),
            format!("{:.4}", t.pnl),
            format!("{:.4}", t.pnl_percent),
            format!("{:.4}", t.fees),
            format!("{:.2}", t.balance_after),
            t.reason.to_string(),
            cs,
            ce,
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_trades(path: &Path, trades: &[Trade]) -> Result<(), DataError> {
    write_trades(std::fs::File::create(path)?, trades)
}

pub fn save_equity(path: &Path, curve: &[EquityPoint]) -> Result<(), DataError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for p in curve {
        wtr.serialize(p)?;
    }
    wtr.flush()?;
    Ok(())
}
