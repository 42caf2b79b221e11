use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StrategyName {
    #[serde(rename = "Full Address")]
    FullAddress,
    #[serde(rename = "City Only")]
    CityOnly,
    #[serde(rename = "City + Postal Code")]
    CityPostal,
    #[serde(rename = "City + State")]
    CityState,
}

impl StrategyName {
    pub fn default_ladder() -> Vec<StrategyName> {
        vec![
            StrategyName::FullAddress,
            StrategyName::CityOnly,
            StrategyName::CityPostal,
            StrategyName::CityState,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyName::FullAddress => "Full Address",
            StrategyName::CityOnly => "City Only",
            StrategyName::CityPostal => "City + Postal Code",
            StrategyName::CityState => "City + State",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        let key: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "fulladdress" | "full" => Ok(StrategyName::FullAddress),
            "cityonly" | "city" => Ok(StrategyName::CityOnly),
            "citypostalcode" | "citypostal" => Ok(StrategyName::CityPostal),
            "citystate" => Ok(StrategyName::CityState),
            _ => Err(AppError::Config(format!("unknown strategy: {value}"))),
        }
    }

    /// Builds this strategy's query, or `None` when a required field is missing.
    pub fn build_query(&self, fields: &AddressFields) -> Option<String> {
        let address = fields.address.as_deref();
        let city = fields.city.as_deref();
        let state = fields.state.as_deref();
        let postal = fields.postal_code.as_deref();
        match self {
            StrategyName::FullAddress => {
                address.map(|address| join([Some(address), city, state, postal]))
            }
            StrategyName::CityOnly => city.map(|city| join([Some(city), state, postal])),
            StrategyName::CityPostal => match (city, postal) {
                (Some(city), Some(postal)) => Some(join([Some(city), Some(postal)])),
                _ => None,
            },
            StrategyName::CityState => match (city, state) {
                (Some(city), Some(state)) => Some(join([Some(city), Some(state)])),
                _ => None,
            },
        }
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record's query fields after normalization and correction. Empty
/// strings are stored as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressFields {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

impl AddressFields {
    pub fn new(
        address: Option<String>,
        city: Option<String>,
        state: Option<String>,
        postal_code: Option<String>,
    ) -> Self {
        Self {
            address: present(address),
            city: present(city),
            state: present(state),
            postal_code: present(postal_code),
        }
    }
}

/// The same ordered ladder is applied to every record.
pub fn build_ladder(
    ladder: &[StrategyName],
    fields: &AddressFields,
) -> Vec<(StrategyName, Option<String>)> {
    ladder
        .iter()
        .map(|name| (*name, name.build_query(fields)))
        .collect()
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn join<const N: usize>(parts: [Option<&str>; N]) -> String {
    parts.into_iter().flatten().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(
        address: Option<&str>,
        city: Option<&str>,
        state: Option<&str>,
        postal: Option<&str>,
    ) -> AddressFields {
        AddressFields::new(
            address.map(String::from),
            city.map(String::from),
            state.map(String::from),
            postal.map(String::from),
        )
    }

    #[test]
    fn builds_full_ladder_in_order() {
        let record = fields(
            Some("jalan sudirman 1"),
            Some("jakarta"),
            Some("dki"),
            Some("10220"),
        );
        let ladder = build_ladder(&StrategyName::default_ladder(), &record);
        assert_eq!(
            ladder,
            vec![
                (
                    StrategyName::FullAddress,
                    Some("jalan sudirman 1, jakarta, dki, 10220".to_string())
                ),
                (StrategyName::CityOnly, Some("jakarta, dki, 10220".to_string())),
                (StrategyName::CityPostal, Some("jakarta, 10220".to_string())),
                (StrategyName::CityState, Some("jakarta, dki".to_string())),
            ]
        );
    }

    #[test]
    fn optional_strategies_are_absent_without_their_fields() {
        let record = fields(Some("jalan braga 5"), Some("bandung"), None, None);
        let ladder = build_ladder(&StrategyName::default_ladder(), &record);
        assert_eq!(ladder[0].1.as_deref(), Some("jalan braga 5, bandung"));
        assert_eq!(ladder[1].1.as_deref(), Some("bandung"));
        assert_eq!(ladder[2].1, None);
        assert_eq!(ladder[3].1, None);
    }

    #[test]
    fn missing_address_and_city_yields_nothing() {
        let record = fields(Some("  "), None, Some("jawa barat"), Some("40111"));
        let ladder = build_ladder(&StrategyName::default_ladder(), &record);
        assert_eq!(ladder.len(), 4);
        assert!(ladder.iter().all(|(_, query)| query.is_none()));
    }

    #[test]
    fn parses_names_loosely() {
        assert_eq!(
            StrategyName::parse("City + Postal Code").unwrap(),
            StrategyName::CityPostal
        );
        assert_eq!(StrategyName::parse("full_address").unwrap(), StrategyName::FullAddress);
        assert!(StrategyName::parse("nearby").is_err());
        assert_eq!(
            serde_json::to_string(&StrategyName::CityOnly).unwrap(),
            "\"City Only\""
        );
    }
}
