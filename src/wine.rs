//! Wine list data: what extraction produces, what research adds.
//!
//! Everything here is deserialized from model output, so field decoding is
//! lenient: prices may arrive as numbers, missing values as `"null"`, and
//! ratings as a bare sentence instead of an object.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

static PRICE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d,]+\.?\d*").expect("valid price pattern"));

/// Bottles per glass when estimating a bottle price from a by-the-glass price.
const GLASSES_PER_BOTTLE: f64 = 5.0;

/// One wine as transcribed from the menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub glass_price: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub bottle_price: Option<String>,
    #[serde(default, alias = "type", deserialize_with = "lenient::opt_string")]
    pub wine_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub producer: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub vintage: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Bottle,
    GlassConverted,
    Glass,
    None,
}

/// The single menu price used for research and display.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuPricing {
    pub menu_price: Option<String>,
    pub source: PriceSource,
    pub conversion_note: Option<String>,
}

impl LineItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            glass_price: None,
            bottle_price: None,
            wine_type: None,
            producer: None,
            vintage: None,
            region: None,
            style: None,
        }
    }

    /// Parse the `wines` array of an extraction reply. Entries without a
    /// usable name are dropped. `None` when the reply has no `wines` array.
    pub fn parse_list(reply: &Value) -> Option<Vec<LineItem>> {
        let wines = reply.get("wines")?.as_array()?;
        Some(
            wines
                .iter()
                .filter_map(|w| serde_json::from_value::<LineItem>(w.clone()).ok())
                .filter(|w| !w.name.trim().is_empty())
                .collect(),
        )
    }

    /// Bottle price wins; a glass price alone is scaled to an estimated bottle.
    pub fn menu_pricing(&self) -> MenuPricing {
        if let Some(bottle) = &self.bottle_price {
            return MenuPricing {
                menu_price: Some(bottle.clone()),
                source: PriceSource::Bottle,
                conversion_note: None,
            };
        }
        match &self.glass_price {
            Some(glass) => match parse_price(glass) {
                Some(amount) => MenuPricing {
                    menu_price: Some(format!("${}", amount * GLASSES_PER_BOTTLE)),
                    source: PriceSource::GlassConverted,
                    conversion_note: Some(format!(
                        "Estimated from glass price ({} × {})",
                        glass, GLASSES_PER_BOTTLE
                    )),
                },
                None => MenuPricing {
                    menu_price: Some(glass.clone()),
                    source: PriceSource::Glass,
                    conversion_note: None,
                },
            },
            None => MenuPricing {
                menu_price: None,
                source: PriceSource::None,
                conversion_note: None,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ratings {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub vivino: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub wine_spectator: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub other: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A line item enriched by research.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchedItem {
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub menu_price: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub menu_price_note: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub glass_price: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub bottle_price: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub retail_price: Option<String>,
    #[serde(default, deserialize_with = "lenient::ratings")]
    pub ratings: Option<Ratings>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub tasting_notes: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub food_pairing: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub sources: Vec<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub producer: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub vintage: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub varietal: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub alcohol_content: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub style: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub wine_type: Option<String>,
    /// Fields the model added that have no slot above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResearchedItem {
    /// Fill every field the research reply left empty from the line item.
    /// Values the reply supplied are kept as they are.
    pub fn backfill_from(mut self, item: &LineItem) -> Self {
        fn fill(slot: &mut Option<String>, from: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }

        let pricing = item.menu_pricing();
        if self.name.trim().is_empty() {
            self.name = item.name.clone();
        }
        fill(&mut self.menu_price, &pricing.menu_price);
        fill(&mut self.menu_price_note, &pricing.conversion_note);
        fill(&mut self.glass_price, &item.glass_price);
        fill(&mut self.bottle_price, &item.bottle_price);
        fill(&mut self.producer, &item.producer);
        fill(&mut self.vintage, &item.vintage);
        fill(&mut self.region, &item.region);
        fill(&mut self.style, &item.style);
        fill(&mut self.wine_type, &item.wine_type);
        self
    }

    /// Whether research contributed anything beyond the menu transcription.
    pub fn has_research_detail(&self) -> bool {
        self.retail_price.is_some()
            || self.ratings.is_some()
            || self.tasting_notes.is_some()
            || self.producer.is_some()
    }

    pub fn markup(&self) -> String {
        calculate_markup(self.menu_price.as_deref(), self.retail_price.as_deref())
    }
}

impl From<&LineItem> for ResearchedItem {
    fn from(item: &LineItem) -> Self {
        ResearchedItem::default().backfill_from(item)
    }
}

/// The wines currently on the table, in menu order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WineList {
    pub wines: Vec<ResearchedItem>,
}

impl WineList {
    pub fn new(wines: Vec<ResearchedItem>) -> Self {
        Self { wines }
    }

    pub fn len(&self) -> usize {
        self.wines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wines.is_empty()
    }

    /// Pretty JSON handed to the model as conversation context.
    pub fn to_context_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// First number in a price string: `"$1,250.50 / btl"` → `1250.5`.
pub fn parse_price(price: &str) -> Option<f64> {
    let found = PRICE_NUMBER.find(price)?;
    found.as_str().replace(',', "").parse().ok()
}

/// Restaurant markup over retail, e.g. `+150%`; `N/A` when either side is unusable.
pub fn calculate_markup(menu_price: Option<&str>, retail_price: Option<&str>) -> String {
    let (Some(menu), Some(retail)) = (
        menu_price.and_then(parse_price),
        retail_price.and_then(parse_price),
    ) else {
        return "N/A".to_string();
    };
    if menu == 0.0 || retail == 0.0 {
        return "N/A".to_string();
    }
    let markup = (menu - retail) / retail * 100.0;
    if markup > 0.0 {
        format!("+{:.0}%", markup)
    } else {
        format!("{:.0}%", markup)
    }
}

mod lenient {
    use super::Ratings;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn to_text(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Array(items) => {
                let parts: Vec<String> = items.into_iter().filter_map(to_text).collect();
                (!parts.is_empty()).then(|| parts.join(", "))
            }
            obj @ Value::Object(_) => Some(obj.to_string()),
        }
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Value>::deserialize(d)?.and_then(to_text))
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(opt_string(d)?.unwrap_or_default())
    }

    pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Array(items)) => items.into_iter().filter_map(to_text).collect(),
            Some(other) => to_text(other).into_iter().collect(),
            None => Vec::new(),
        })
    }

    pub fn ratings<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Ratings>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(obj @ Value::Object(_)) => serde_json::from_value(obj).ok(),
            Some(other) => to_text(other).map(|text| Ratings {
                other: Some(text),
                ..Ratings::default()
            }),
            None => None,
        })
    }
}
