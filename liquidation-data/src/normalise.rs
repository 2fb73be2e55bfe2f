//! Maps exchange specific symbol & side vocabulary onto the canonical `{BTC, ETH, SOL} x
//! {LONG, SHORT}` domain.
//!
//! Exchanges disagree on what the side of a liquidation message describes. Some report the side
//! of the liquidated *position*, others the side of the forced *order* that closed it (a long
//! position is closed by a sell order). Getting this wrong silently inverts the stats, so every
//! exchange has an explicit entry in [`side_convention`].

use crate::{
    error::NormaliseError,
    event::{Asset, LiquidationEvent, Side},
    exchange::{ContractSizes, ExchangeId, RawLiquidation, RawSide},
};
use chrono::Utc;

/// Contract / margin suffixes removed before the quote currency.
const CONTRACT_SUFFIXES: [&str; 5] = ["-SWAP", "_SWAP", "-PERP", "_PERP", "PERP"];

/// Quote currencies removed from concatenated symbols, longest first.
const QUOTE_SUFFIXES: [&str; 4] = ["USDT", "USDC", "BUSD", "USD"];

const SEPARATORS: [char; 3] = ['-', '_', '/'];

/// What the `Buy` / `Sell` label of an exchange's liquidation message describes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SideConvention {
    /// Label is the side of the liquidated position: `Buy` => a long was liquidated.
    PositionSide,
    /// Label is the side of the forced order closing the position: `Sell` => a long was
    /// liquidated.
    OrderSide,
}

/// Documented liquidation side convention of each exchange.
///
/// * Bybit `allLiquidation`: `"S"` is the position side, "When you receive a Buy update, this
///   means that a long position has been liquidated".
/// * Binance `forceOrder`: `"o.S"` is the side of the liquidation order.
/// * Okx `liquidation-orders`: `"side"` is the order side (`"posSide"` is preferred when set).
/// * Gate.io `futures.public_liquidates`: `"size"` is the signed order size.
pub const fn side_convention(exchange: ExchangeId) -> SideConvention {
    match exchange {
        ExchangeId::BybitPerpetualsUsd => SideConvention::PositionSide,
        ExchangeId::BinanceFuturesUsd => SideConvention::OrderSide,
        ExchangeId::Okx => SideConvention::OrderSide,
        ExchangeId::GateioFuturesUsd => SideConvention::OrderSide,
    }
}

/// Normalise an exchange symbol & side into the tracked `(Asset, Side)` domain.
///
/// Fails with [`NormaliseError::UnsupportedSymbol`] for any underlying other than the tracked
/// assets. The caller drops the event.
pub fn normalise(
    raw_symbol: &str,
    raw_side: &RawSide,
    exchange: ExchangeId,
) -> Result<(Asset, Side), NormaliseError> {
    Ok((
        normalise_symbol(raw_symbol, exchange)?,
        normalise_side(raw_side, exchange)?,
    ))
}

/// Strip contract suffixes, separators and quote currency, eg/ `BTCUSDT`, `BTC-USDT`,
/// `BTC_USDT` and `BTC-USDT-SWAP` all map to [`Asset::Btc`].
pub fn normalise_symbol(raw_symbol: &str, exchange: ExchangeId) -> Result<Asset, NormaliseError> {
    let upper = raw_symbol.trim().to_ascii_uppercase();

    let mut symbol = upper.as_str();
    if let Some(stripped) = CONTRACT_SUFFIXES
        .iter()
        .find_map(|suffix| symbol.strip_suffix(suffix))
    {
        symbol = stripped;
    }

    let base = match symbol.split_once(SEPARATORS) {
        Some((base, _quote)) => base,
        None => QUOTE_SUFFIXES
            .iter()
            .find_map(|quote| symbol.strip_suffix(quote))
            .unwrap_or(symbol),
    };

    Asset::from_base(base).ok_or_else(|| NormaliseError::UnsupportedSymbol {
        exchange,
        symbol: raw_symbol.to_owned(),
    })
}

/// Map an exchange side representation to the side of the liquidated position, applying the
/// exchange's [`SideConvention`].
pub fn normalise_side(raw_side: &RawSide, exchange: ExchangeId) -> Result<Side, NormaliseError> {
    let unsupported = || NormaliseError::UnsupportedSide {
        exchange,
        side: format!("{raw_side:?}"),
    };

    let is_buy = match raw_side {
        RawSide::Position(position) => {
            return match position.to_ascii_lowercase().as_str() {
                "long" => Ok(Side::Long),
                "short" => Ok(Side::Short),
                _ => Err(unsupported()),
            };
        }
        RawSide::Label(label) => match label.to_ascii_lowercase().as_str() {
            "buy" => true,
            "sell" => false,
            _ => return Err(unsupported()),
        },
        RawSide::Signed(size) if *size > 0.0 => true,
        RawSide::Signed(size) if *size < 0.0 => false,
        RawSide::Signed(_) => return Err(unsupported()),
    };

    Ok(match (side_convention(exchange), is_buy) {
        (SideConvention::PositionSide, true) => Side::Long,
        (SideConvention::PositionSide, false) => Side::Short,
        (SideConvention::OrderSide, true) => Side::Short,
        (SideConvention::OrderSide, false) => Side::Long,
    })
}

/// Normalise a decoded exchange liquidation into a validated [`LiquidationEvent`], converting
/// the raw size into base currency using the exchange [`ContractSizes`].
///
/// The raw quantity is taken as is: a sign carrying feed hands over the magnitude, so a
/// negative quantity here is malformed and rejected.
pub fn normalise_liquidation(
    exchange: ExchangeId,
    raw: RawLiquidation,
    contract_sizes: &ContractSizes,
) -> Result<LiquidationEvent, NormaliseError> {
    let (asset, side) = normalise(&raw.symbol, &raw.side, exchange)?;

    LiquidationEvent::new(
        asset,
        side,
        raw.quantity * contract_sizes.get(asset),
        raw.price,
        exchange,
        raw.time.unwrap_or_else(Utc::now),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_symbol() {
        struct TestCase {
            input: &'static str,
            expected: Option<Asset>,
        }

        let tests = vec![
            TestCase {
                // TC0: concatenated quote
                input: "BTCUSDT",
                expected: Some(Asset::Btc),
            },
            TestCase {
                // TC1: dash separated
                input: "BTC-USDT",
                expected: Some(Asset::Btc),
            },
            TestCase {
                // TC2: underscore separated
                input: "ETH_USDT",
                expected: Some(Asset::Eth),
            },
            TestCase {
                // TC3: Okx swap instrument, lower case
                input: "sol-usdt-swap",
                expected: Some(Asset::Sol),
            },
            TestCase {
                // TC4: Bybit USDC perpetual
                input: "ETHPERP",
                expected: Some(Asset::Eth),
            },
            TestCase {
                // TC5: untracked underlying
                input: "XRPUSDT",
                expected: None,
            },
            TestCase {
                // TC6: tracked asset as quote, untracked base
                input: "ETHBTC",
                expected: None,
            },
            TestCase {
                // TC7: prefix of a tracked asset is not a match
                input: "SOLVUSDT",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = normalise_symbol(test.input, ExchangeId::BybitPerpetualsUsd).ok();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_normalise_side_per_exchange_convention() {
        struct TestCase {
            exchange: ExchangeId,
            input: RawSide,
            expected: Option<Side>,
        }

        let tests = vec![
            TestCase {
                // TC0: Bybit Buy position liquidated => LONG
                exchange: ExchangeId::BybitPerpetualsUsd,
                input: RawSide::Label("Buy".to_string()),
                expected: Some(Side::Long),
            },
            TestCase {
                // TC1: Bybit Sell position liquidated => SHORT
                exchange: ExchangeId::BybitPerpetualsUsd,
                input: RawSide::Label("Sell".to_string()),
                expected: Some(Side::Short),
            },
            TestCase {
                // TC2: Binance SELL forced order closes a long
                exchange: ExchangeId::BinanceFuturesUsd,
                input: RawSide::Label("SELL".to_string()),
                expected: Some(Side::Long),
            },
            TestCase {
                // TC3: Binance BUY forced order closes a short
                exchange: ExchangeId::BinanceFuturesUsd,
                input: RawSide::Label("BUY".to_string()),
                expected: Some(Side::Short),
            },
            TestCase {
                // TC4: Okx posSide takes precedence
                exchange: ExchangeId::Okx,
                input: RawSide::Position("short".to_string()),
                expected: Some(Side::Short),
            },
            TestCase {
                // TC5: Okx order side sell closes a long
                exchange: ExchangeId::Okx,
                input: RawSide::Label("sell".to_string()),
                expected: Some(Side::Long),
            },
            TestCase {
                // TC6: Gate.io negative size is a sell order, closing a long
                exchange: ExchangeId::GateioFuturesUsd,
                input: RawSide::Signed(-124.0),
                expected: Some(Side::Long),
            },
            TestCase {
                // TC7: Gate.io positive size is a buy order, closing a short
                exchange: ExchangeId::GateioFuturesUsd,
                input: RawSide::Signed(3.0),
                expected: Some(Side::Short),
            },
            TestCase {
                // TC8: Gate.io zero size is rejected
                exchange: ExchangeId::GateioFuturesUsd,
                input: RawSide::Signed(0.0),
                expected: None,
            },
            TestCase {
                // TC9: unknown label is rejected
                exchange: ExchangeId::BybitPerpetualsUsd,
                input: RawSide::Label("None".to_string()),
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = normalise_side(&test.input, test.exchange).ok();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_long_liquidation_representation_agrees_across_exchanges() {
        // Each exchange's own representation of "a long position was liquidated"
        let long_liquidations = [
            ("BTCUSDT", RawSide::Label("Buy".to_string()), ExchangeId::BybitPerpetualsUsd),
            ("BTCUSDT", RawSide::Label("SELL".to_string()), ExchangeId::BinanceFuturesUsd),
            ("BTC-USDT-SWAP", RawSide::Label("sell".to_string()), ExchangeId::Okx),
            ("BTC-USDT-SWAP", RawSide::Position("long".to_string()), ExchangeId::Okx),
            ("BTC_USDT", RawSide::Signed(-1.0), ExchangeId::GateioFuturesUsd),
        ];

        for (symbol, side, exchange) in long_liquidations {
            assert_eq!(
                normalise(symbol, &side, exchange).unwrap(),
                (Asset::Btc, Side::Long),
                "{exchange} {symbol} {side:?}"
            );
        }

        // The same "buy" label read under one convention is identical after case-folding
        assert_eq!(
            normalise("BTCUSDT", &RawSide::Label("Buy".to_string()), ExchangeId::BinanceFuturesUsd),
            normalise("BTC-USDT", &RawSide::Label("buy".to_string()), ExchangeId::Okx),
        );
    }

    #[test]
    fn test_normalise_liquidation_applies_contract_size() {
        let raw = RawLiquidation {
            symbol: "ETH-USDT-SWAP".to_string(),
            side: RawSide::Position("long".to_string()),
            quantity: 25.0,
            price: 3000.0,
            time: None,
        };

        let event =
            normalise_liquidation(ExchangeId::Okx, raw, &ContractSizes::new(0.01, 0.1, 1.0))
                .unwrap();

        assert_eq!(event.asset, Asset::Eth);
        assert_eq!(event.side, Side::Long);
        assert!((event.quantity - 2.5).abs() < 1e-12);
        assert!((event.notional_value - 7500.0).abs() < 1e-9);
        assert_eq!(event.source_exchange, ExchangeId::Okx);
    }

    #[test]
    fn test_normalise_liquidation_rejects_non_positive_quantity() {
        struct TestCase {
            exchange: ExchangeId,
            input: RawLiquidation,
        }

        let raw = |symbol: &str, side: RawSide, quantity: f64| RawLiquidation {
            symbol: symbol.to_string(),
            side,
            quantity,
            price: 3000.0,
            time: None,
        };

        let tests = vec![
            TestCase {
                // TC0: Bybit negative size
                exchange: ExchangeId::BybitPerpetualsUsd,
                input: raw("ETHUSDT", RawSide::Label("Sell".to_string()), -2.5),
            },
            TestCase {
                // TC1: Binance negative size
                exchange: ExchangeId::BinanceFuturesUsd,
                input: raw("ETHUSDT", RawSide::Label("SELL".to_string()), -1.0),
            },
            TestCase {
                // TC2: Okx negative contracts
                exchange: ExchangeId::Okx,
                input: raw("ETH-USDT-SWAP", RawSide::Position("long".to_string()), -10.0),
            },
            TestCase {
                // TC3: zero size
                exchange: ExchangeId::BybitPerpetualsUsd,
                input: raw("ETHUSDT", RawSide::Label("Buy".to_string()), 0.0),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = normalise_liquidation(test.exchange, test.input, &ContractSizes::UNIT);
            assert!(
                matches!(
                    actual,
                    Err(NormaliseError::InvalidNumber { field: "quantity", .. })
                ),
                "TC{} failed: {:?}",
                index,
                actual
            );
        }
    }

    #[test]
    fn test_normalise_liquidation_gateio_sell_order_magnitude() {
        let raw = RawLiquidation::from(crate::exchange::gateio::GateioLiquidation {
            contract: "BTC_USDT".to_string(),
            price: 60000.0,
            size: -250.0,
            time_ms: None,
        });

        let event = normalise_liquidation(
            ExchangeId::GateioFuturesUsd,
            raw,
            &ContractSizes::new(0.0001, 0.01, 1.0),
        )
        .unwrap();

        assert_eq!(event.side, Side::Long);
        assert!((event.quantity - 0.025).abs() < 1e-12);
        assert!((event.notional_value - 1500.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalise_liquidation_rejects_invalid_price() {
        let raw = RawLiquidation {
            symbol: "BTCUSDT".to_string(),
            side: RawSide::Label("Buy".to_string()),
            quantity: 1.0,
            price: 0.0,
            time: None,
        };

        let actual =
            normalise_liquidation(ExchangeId::BybitPerpetualsUsd, raw, &ContractSizes::UNIT);

        assert!(matches!(
            actual,
            Err(NormaliseError::InvalidNumber { field: "price", .. })
        ));
    }
}
