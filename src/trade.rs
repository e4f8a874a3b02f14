use serde::Deserialize;

/// One normalized trade event.
///
/// Immutable once constructed. Created by the connection manager when it parses an
/// inbound frame; consumed by the aggregation engine; never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub event_timestamp_ms: u64,
    /// Upstream convention: `true` means the buyer was the passive (resting) side, so
    /// the *active* side (a sell) is what gets counted. See `SymbolStats::fold`.
    pub buyer_initiated: bool,
}

impl Trade {
    /// A trade is valid iff the symbol is non-empty, price and quantity are finite and
    /// strictly positive, and the timestamp is strictly positive.
    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty()
            && self.price.is_finite()
            && self.price > 0.0
            && self.quantity.is_finite()
            && self.quantity > 0.0
            && self.event_timestamp_ms > 0
    }

    /// Parse one inbound WS text frame.
    ///
    /// The payload is either a bare trade object or an envelope `{ "data": <trade> }`;
    /// the envelope is unwrapped if present. Field mapping: `s -> symbol`,
    /// `p -> price` (decimal string), `q -> quantity` (decimal string),
    /// `T -> event_timestamp_ms`, `m -> buyer_initiated`.
    ///
    /// Symbol casing is passed through verbatim: the upstream feed delivers
    /// uppercase symbols and the aggregator keys on that form unchanged.
    pub fn parse(raw: &str) -> crate::error::Result<Trade> {
        #[derive(Deserialize)]
        struct Envelope {
            data: Option<RawTrade>,
            s: Option<String>,
            p: Option<String>,
            q: Option<String>,
            #[serde(rename = "T")]
            t: Option<u64>,
            m: Option<bool>,
        }

        #[derive(Deserialize)]
        struct RawTrade {
            s: String,
            p: String,
            q: String,
            #[serde(rename = "T")]
            t: u64,
            m: bool,
        }

        let envelope: Envelope = serde_json::from_str(raw)?;
        let raw_trade = if let Some(inner) = envelope.data {
            inner
        } else {
            RawTrade {
                s: envelope.s.ok_or_else(|| missing_field("s"))?,
                p: envelope.p.ok_or_else(|| missing_field("p"))?,
                q: envelope.q.ok_or_else(|| missing_field("q"))?,
                t: envelope.t.ok_or_else(|| missing_field("T"))?,
                m: envelope.m.ok_or_else(|| missing_field("m"))?,
            }
        };

        let price: f64 = raw_trade
            .p
            .parse()
            .map_err(|_| invalid_number("p", &raw_trade.p))?;
        let quantity: f64 = raw_trade
            .q
            .parse()
            .map_err(|_| invalid_number("q", &raw_trade.q))?;

        Ok(Trade {
            symbol: raw_trade.s,
            price,
            quantity,
            event_timestamp_ms: raw_trade.t,
            buyer_initiated: raw_trade.m,
        })
    }
}

fn missing_field(name: &str) -> crate::error::Error {
    crate::error::Error::WireParse(serde::de::Error::custom(format!(
        "missing required field `{name}`"
    )))
}

fn invalid_number(field: &str, raw: &str) -> crate::error::Error {
    crate::error::Error::WireParse(serde::de::Error::custom(format!(
        "field `{field}` is not a decimal string: {raw}"
    )))
}
