use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Item as returned by the marketplace search API.
///
/// Every field is optional: the API omits fields on some listings and a
/// single malformed entry must not poison the rest of the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawItem {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, alias = "is_promoted")]
    pub promoted: Option<bool>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Either a plain amount (`"12.0"`, `12.0`) or `{amount, currency_code}`.
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub size_title: Option<String>,
    #[serde(default)]
    pub brand_title: Option<String>,
    #[serde(default)]
    pub photo: Option<RawPhoto>,
    #[serde(default)]
    pub user: Option<RawUser>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawPhoto {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub high_resolution: Option<RawHighResolution>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawHighResolution {
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawUser {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
}

impl RawItem {
    pub fn is_promoted(&self) -> bool {
        self.promoted.unwrap_or(false)
    }

    /// Publication time, nested under the listing's main photo.
    pub fn timestamp(&self) -> Option<i64> {
        self.photo
            .as_ref()
            .and_then(|p| p.high_resolution.as_ref())
            .and_then(|h| h.timestamp)
    }

    pub fn image_url(&self) -> Option<&str> {
        self.photo.as_ref().and_then(|p| p.url.as_deref())
    }

    /// Amount and currency code, whichever shape the API used.
    pub fn price_parts(&self) -> Option<(String, Option<String>)> {
        let fallback_currency = self.currency.clone();
        match self.price.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some((s.trim().to_string(), fallback_currency)),
            Value::Number(n) => Some((n.to_string(), fallback_currency)),
            Value::Object(map) => {
                let amount = match map.get("amount")? {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                let currency = map
                    .get("currency_code")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(fallback_currency);
                Some((amount, currency))
            }
            _ => None,
        }
    }
}

/// A listing that passed validation: it has both an id and a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
    pub timestamp: i64,
    /// Whether the id was inserted into the item store while selecting this
    /// listing. Only such registrations may be released again.
    pub registered: bool,
    pub details: RawItem,
}

impl Item {
    pub fn from_raw(raw: RawItem) -> Option<Self> {
        let id = raw.id?;
        let timestamp = raw.timestamp()?;
        Some(Self {
            id,
            timestamp,
            registered: false,
            details: raw,
        })
    }
}
