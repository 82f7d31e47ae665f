//! Monitor Configuration Types
//!
//! Immutable snapshot of what the monitor watches and how it alerts.
//!
//! # Design
//!
//! A `MonitorConfig` is never mutated once handed to a connection cycle.
//! Reloads build a whole new snapshot and [`diff`] decides whether the
//! change needs a resubscription (symbol set or endpoint changed) or can
//! be applied in place (thresholds, operators, formats, notify flags,
//! email, debug).

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::expression::Comparator;

// =============================================================================
// Types
// =============================================================================

/// A currency pair id as used in feed channel names (e.g. `btcusdt`).
pub type SymbolId = String;

/// Default display format specification.
pub const DEFAULT_PRICE_FORMAT: &str = ".2f";

/// Largest accepted display precision.
pub const MAX_PRECISION: u32 = 18;

/// Precision used by a bare `f` specification.
const BARE_FIXED_PRECISION: u32 = 6;

/// Fixed-point display format for prices.
///
/// Accepts the specifications the config web UI writes: `.N`, `.Nf`,
/// `.NF`, or a bare `f`/`F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceFormat {
    precision: u32,
}

impl Default for PriceFormat {
    fn default() -> Self {
        Self { precision: 2 }
    }
}

impl PriceFormat {
    /// Create a format with the given number of decimal places.
    #[must_use]
    pub const fn with_precision(precision: u32) -> Self {
        Self { precision }
    }

    /// Parse a format specification such as `.2f`.
    ///
    /// Returns `None` for anything that is not a fixed-point spec.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        let body = spec.strip_suffix(['f', 'F']).unwrap_or(spec);

        if body.is_empty() {
            return (body.len() < spec.len()).then_some(Self::with_precision(BARE_FIXED_PRECISION));
        }

        let digits = body.strip_prefix('.')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let precision: u32 = digits.parse().ok()?;
        (precision <= MAX_PRECISION).then_some(Self::with_precision(precision))
    }

    /// Number of decimal places.
    #[must_use]
    pub const fn precision(&self) -> u32 {
        self.precision
    }

    /// Round a price to this format's precision, halves away from zero.
    #[must_use]
    pub fn round(&self, price: Decimal) -> Decimal {
        price.round_dp_with_strategy(self.precision, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Render a price with exactly `precision` decimal places.
    #[must_use]
    pub fn format(&self, price: Decimal) -> String {
        let precision = self.precision as usize;
        format!("{:.precision$}", self.round(price))
    }
}

/// One alert bound: fires when `price <op> value` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    /// Comparison operator (never `==`).
    pub op: Comparator,
    /// Threshold price.
    pub value: Decimal,
}

impl Threshold {
    /// Create a new threshold.
    ///
    /// # Panics
    ///
    /// In debug builds, if `op` is `==`. Config loading rejects equality
    /// bounds before they get here.
    #[must_use]
    pub const fn new(op: Comparator, value: Decimal) -> Self {
        debug_assert!(op.is_ordering(), "threshold operator must be an ordering");
        Self { op, value }
    }
}

/// Per-symbol monitoring parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolConfig {
    /// Symbol id, unique within a `MonitorConfig`.
    pub symbol: SymbolId,
    /// Display format for ticks.
    pub price_format: PriceFormat,
    /// Lower bound, if any.
    pub low: Option<Threshold>,
    /// Upper bound, if any.
    pub high: Option<Threshold>,
    /// Whether breaches may send mail.
    pub notify: bool,
}

impl SymbolConfig {
    /// Create a config with default format, no bounds, notify enabled.
    #[must_use]
    pub fn new(symbol: impl Into<SymbolId>) -> Self {
        Self {
            symbol: symbol.into(),
            price_format: PriceFormat::default(),
            low: None,
            high: None,
            notify: true,
        }
    }

    /// Set the display format.
    #[must_use]
    pub fn with_price_format(mut self, price_format: PriceFormat) -> Self {
        self.price_format = price_format;
        self
    }

    /// Set the lower bound. `op` must be an ordering operator.
    #[must_use]
    pub fn with_low(mut self, op: Comparator, value: Decimal) -> Self {
        self.low = Some(Threshold::new(op, value));
        self
    }

    /// Set the upper bound. `op` must be an ordering operator.
    #[must_use]
    pub fn with_high(mut self, op: Comparator, value: Decimal) -> Self {
        self.high = Some(Threshold::new(op, value));
        self
    }

    /// Set the notify flag.
    #[must_use]
    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    /// Whether at least one bound is configured.
    #[must_use]
    pub const fn has_bounds(&self) -> bool {
        self.low.is_some() || self.high.is_some()
    }

    /// Feed channel carrying this symbol's ticker detail.
    #[must_use]
    pub fn channel(&self) -> String {
        channel_for(&self.symbol)
    }
}

/// Feed channel name for a symbol.
#[must_use]
pub fn channel_for(symbol: &str) -> String {
    format!("market.{symbol}.detail")
}

/// Extract the symbol id from a `market.<symbol>.detail` channel name.
#[must_use]
pub fn symbol_from_channel(channel: &str) -> Option<&str> {
    channel
        .strip_prefix("market.")?
        .strip_suffix(".detail")
        .filter(|s| !s.is_empty())
}

/// Complete monitor configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Feed endpoint URL.
    pub url: String,
    /// Alert recipient, if any.
    pub email: Option<String>,
    /// Verbose threshold logging.
    pub debug: bool,
    /// Monitored symbols keyed by id.
    pub symbols: BTreeMap<SymbolId, SymbolConfig>,
}

impl MonitorConfig {
    /// Create a config for `url` with no symbols.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            email: None,
            debug: false,
            symbols: BTreeMap::new(),
        }
    }

    /// Set the alert recipient.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the debug flag.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Add or replace a symbol.
    #[must_use]
    pub fn with_symbol(mut self, symbol: SymbolConfig) -> Self {
        self.symbols.insert(symbol.symbol.clone(), symbol);
        self
    }

    /// Look up a symbol's parameters.
    #[must_use]
    pub fn symbol(&self, id: &str) -> Option<&SymbolConfig> {
        self.symbols.get(id)
    }

    /// The set of monitored symbol ids.
    #[must_use]
    pub fn symbol_ids(&self) -> BTreeSet<SymbolId> {
        self.symbols.keys().cloned().collect()
    }
}

// =============================================================================
// Diff
// =============================================================================

/// Difference between two configuration snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// The key sets differ (a symbol was added or removed).
    pub symbol_set_changed: bool,
    /// The feed endpoint changed.
    pub endpoint_changed: bool,
    /// Email or debug flag changed.
    pub globals_changed: bool,
    /// Symbols only in the new snapshot.
    pub added: BTreeSet<SymbolId>,
    /// Symbols only in the old snapshot.
    pub removed: BTreeSet<SymbolId>,
    /// Every symbol whose configuration differs, including added and removed.
    pub changed_symbols: BTreeSet<SymbolId>,
}

impl ConfigDiff {
    /// Whether the live connection has to be torn down and rebuilt.
    #[must_use]
    pub const fn requires_resubscribe(&self) -> bool {
        self.symbol_set_changed || self.endpoint_changed
    }

    /// Whether the snapshots are equivalent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.symbol_set_changed
            && !self.endpoint_changed
            && !self.globals_changed
            && self.changed_symbols.is_empty()
    }
}

/// Compare two snapshots.
#[must_use]
pub fn diff(old: &MonitorConfig, new: &MonitorConfig) -> ConfigDiff {
    let added: BTreeSet<SymbolId> = new
        .symbols
        .keys()
        .filter(|k| !old.symbols.contains_key(*k))
        .cloned()
        .collect();
    let removed: BTreeSet<SymbolId> = old
        .symbols
        .keys()
        .filter(|k| !new.symbols.contains_key(*k))
        .cloned()
        .collect();

    let mut changed_symbols: BTreeSet<SymbolId> = new
        .symbols
        .iter()
        .filter(|(id, cfg)| old.symbols.get(*id).is_some_and(|prev| prev != *cfg))
        .map(|(id, _)| id.clone())
        .collect();
    changed_symbols.extend(added.iter().cloned());
    changed_symbols.extend(removed.iter().cloned());

    ConfigDiff {
        symbol_set_changed: !added.is_empty() || !removed.is_empty(),
        endpoint_changed: old.url != new.url,
        globals_changed: old.email != new.email || old.debug != new.debug,
        added,
        removed,
        changed_symbols,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use test_case::test_case;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "threshold operator must be an ordering")]
    fn equality_bound_is_rejected() {
        let _ = SymbolConfig::new("btcusdt").with_high(Comparator::Eq, Decimal::ONE);
    }

    #[test]
    fn ordering_bounds_are_accepted() {
        let config = SymbolConfig::new("btcusdt")
            .with_low(Comparator::Lt, Decimal::ONE)
            .with_high(Comparator::Ge, Decimal::TEN);
        assert_eq!(config.low.map(|t| t.op), Some(Comparator::Lt));
        assert_eq!(config.high.map(|t| t.op), Some(Comparator::Ge));
    }

    fn base() -> MonitorConfig {
        MonitorConfig::new("wss://api.huobi.pro/ws")
            .with_email("ops@example.com")
            .with_symbol(SymbolConfig::new("btcusdt").with_high(Comparator::Ge, dec("10000")))
            .with_symbol(SymbolConfig::new("ethusdt").with_low(Comparator::Le, dec("150")))
    }

    #[test_case(".2f", Some(2))]
    #[test_case(".2F", Some(2))]
    #[test_case(".0f", Some(0))]
    #[test_case(".8", Some(8))]
    #[test_case(" .4f ", Some(4))]
    #[test_case("f", Some(6))]
    #[test_case("F", Some(6))]
    #[test_case(".19f", None)]
    #[test_case("2f", None)]
    #[test_case(".f", None)]
    #[test_case(".2e", None)]
    #[test_case("", None)]
    #[test_case("{0}", None)]
    fn price_format_parsing(spec: &str, precision: Option<u32>) {
        assert_eq!(PriceFormat::parse(spec).map(|f| f.precision()), precision);
    }

    #[test]
    fn price_format_rounds_half_away_from_zero() {
        let fmt = PriceFormat::with_precision(2);
        assert_eq!(fmt.format(dec("9999.995")), "10000.00");
        assert_eq!(fmt.format(dec("9999.994")), "9999.99");
        assert_eq!(fmt.format(dec("-1.005")), "-1.01");
        assert_eq!(fmt.format(dec("7")), "7.00");
        assert_eq!(PriceFormat::with_precision(0).format(dec("2.5")), "3");
    }

    #[test]
    fn channel_names_round_trip() {
        assert_eq!(channel_for("btcusdt"), "market.btcusdt.detail");
        assert_eq!(symbol_from_channel("market.btcusdt.detail"), Some("btcusdt"));
        assert_eq!(symbol_from_channel("market..detail"), None);
        assert_eq!(symbol_from_channel("market.btcusdt.kline.1min"), None);
        assert_eq!(symbol_from_channel("btcusdt"), None);
    }

    #[test]
    fn adding_a_symbol_changes_the_set() {
        let old = base();
        let new = base().with_symbol(SymbolConfig::new("ltcusdt"));

        let d = diff(&old, &new);
        assert!(d.symbol_set_changed);
        assert!(d.requires_resubscribe());
        assert_eq!(d.added, BTreeSet::from(["ltcusdt".to_string()]));
        assert!(d.removed.is_empty());
        assert!(d.changed_symbols.contains("ltcusdt"));
    }

    #[test]
    fn removing_a_symbol_changes_the_set() {
        let old = base();
        let mut new = base();
        new.symbols.remove("ethusdt");

        let d = diff(&old, &new);
        assert!(d.symbol_set_changed);
        assert_eq!(d.removed, BTreeSet::from(["ethusdt".to_string()]));

        // Detection holds in both directions.
        assert!(diff(&new, &old).symbol_set_changed);
    }

    #[test]
    fn threshold_change_is_applied_in_place() {
        let old = base();
        let new = base()
            .with_symbol(SymbolConfig::new("btcusdt").with_high(Comparator::Ge, dec("12000")));

        let d = diff(&old, &new);
        assert!(!d.symbol_set_changed);
        assert!(!d.requires_resubscribe());
        assert_eq!(d.changed_symbols, BTreeSet::from(["btcusdt".to_string()]));
    }

    #[test]
    fn format_and_notify_changes_are_parameter_changes() {
        let old = base();
        let new = base().with_symbol(
            SymbolConfig::new("ethusdt")
                .with_low(Comparator::Le, dec("150"))
                .with_price_format(PriceFormat::with_precision(4))
                .with_notify(false),
        );

        let d = diff(&old, &new);
        assert!(!d.symbol_set_changed);
        assert_eq!(d.changed_symbols, BTreeSet::from(["ethusdt".to_string()]));
    }

    #[test]
    fn endpoint_change_requires_resubscribe_without_set_change() {
        let old = base();
        let mut new = base();
        new.url = "wss://api.huobi.pro/feed".to_string();

        let d = diff(&old, &new);
        assert!(!d.symbol_set_changed);
        assert!(d.endpoint_changed);
        assert!(d.requires_resubscribe());
    }

    #[test]
    fn global_changes_are_reported() {
        let old = base();
        let new = base().with_debug(true);

        let d = diff(&old, &new);
        assert!(d.globals_changed);
        assert!(!d.requires_resubscribe());
        assert!(!d.is_empty());
    }

    #[test]
    fn identical_snapshots_have_empty_diff() {
        assert!(diff(&base(), &base()).is_empty());
    }

    #[test]
    fn has_bounds() {
        assert!(!SymbolConfig::new("x").has_bounds());
        assert!(SymbolConfig::new("x").with_low(Comparator::Lt, dec("1")).has_bounds());
    }
}
