use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of currencies the dashboard offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Try,
    Gbp,
    Aud,
    Cad,
    Chf,
    Jpy,
    Bgn,
}

impl Currency {
    pub const ALL: [Currency; 9] = [
        Currency::Usd,
        Currency::Eur,
        Currency::Try,
        Currency::Gbp,
        Currency::Aud,
        Currency::Cad,
        Currency::Chf,
        Currency::Jpy,
        Currency::Bgn,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Try => "TRY",
            Currency::Gbp => "GBP",
            Currency::Aud => "AUD",
            Currency::Cad => "CAD",
            Currency::Chf => "CHF",
            Currency::Jpy => "JPY",
            Currency::Bgn => "BGN",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or_else(|| ValidationError::UnsupportedCurrency(s.trim().to_string()))
    }
}

/// Ordered (from, to) pair. Key for cached histories and alarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub from: Currency,
    pub to: Currency,
}

impl CurrencyPair {
    pub fn new(from: Currency, to: Currency) -> Self {
        Self { from, to }
    }

    pub fn parse(from: &str, to: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(from.parse()?, to.parse()?))
    }

    pub fn reversed(self) -> Self {
        Self::new(self.to, self.from)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codes_case_insensitively() {
        assert_eq!(" eur ".parse::<Currency>().unwrap(), Currency::Eur);
        assert_eq!("TRY".parse::<Currency>().unwrap(), Currency::Try);
    }

    #[test]
    fn rejects_codes_outside_the_set() {
        let err = "XAU".parse::<Currency>().unwrap_err();
        assert_eq!(err, ValidationError::UnsupportedCurrency("XAU".to_string()));
    }

    #[test]
    fn serializes_as_iso_code() {
        let json = serde_json::to_string(&CurrencyPair::new(Currency::Usd, Currency::Bgn)).unwrap();
        assert_eq!(json, r#"{"from":"USD","to":"BGN"}"#);
    }

    #[test]
    fn pair_display_and_reverse() {
        let pair = CurrencyPair::parse("usd", "jpy").unwrap();
        assert_eq!(pair.to_string(), "USD/JPY");
        assert_eq!(pair.reversed().to_string(), "JPY/USD");
    }
}
