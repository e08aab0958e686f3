use crate::config::AppConfig;
use crate::llm::{CallRequest, ParsedReply, ProviderAdapter};
use crate::wine::{LineItem, ResearchedItem};
use futures::future::join_all;
use serde_json::Value;

/// Wines per research call.
pub const BATCH_SIZE: usize = 10;

pub const RESEARCH_SYSTEM_PROMPT: &str = "You are a wine research expert. Look up current, \
accurate information from reputable sources such as Vivino, Wine-Searcher, Wine.com and \
Wine Spectator. Keep the menu pricing you are given next to the retail pricing you find. \
Always answer with a single JSON object.";

/// Research prompt for one group, listing the wines by position.
pub fn research_prompt(group: &[LineItem]) -> String {
    let listing = group
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let pricing = item.menu_pricing();
            let mut entry = format!("{}. {}", i + 1, item.name);
            if let Some(price) = pricing.menu_price {
                entry.push_str(&format!(" (Menu: {}", price));
                if let Some(note) = pricing.conversion_note {
                    entry.push_str(&format!(" - {}", note));
                }
                entry.push(')');
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Research detailed information for these wines. Keep the exact order of the list and include both menu and retail pricing.

Wine list with menu pricing:
{listing}

For each wine, in the same order, find:
1. Current U.S. retail price (Wine-Searcher, Wine.com, Total Wine)
2. Ratings: Vivino crowd rating, Wine Spectator score, other critic scores
3. Tasting notes: flavor profile from Vivino or the winery
4. Food pairing: recommended dishes and cuisines
5. Wine details: producer, vintage, region, varietal, style

Return one wine object per input wine, in the same order, as JSON:
{{
  "wines": [
    {{
      "name": "exact wine name from the list",
      "menu_price": "menu price from the list if given",
      "menu_price_note": "note about glass conversion if given",
      "retail_price": "$XX average retail",
      "ratings": {{
        "vivino": "X.X/5 (XXX reviews)",
        "wine_spectator": "XX points",
        "other": "additional scores"
      }},
      "tasting_notes": "flavor profile summary",
      "food_pairing": "recommended pairings",
      "sources": ["source1", "source2"],
      "producer": "winery name",
      "vintage": "year",
      "region": "wine region",
      "varietal": "grape varieties",
      "alcohol_content": "XX%",
      "style": "wine style description"
    }}
  ]
}}"#
    )
}

/// Researches a wine list in concurrent groups of [`BATCH_SIZE`].
pub struct BatchResearcher<'a> {
    adapter: &'a ProviderAdapter,
    config: &'a AppConfig,
}

impl<'a> BatchResearcher<'a> {
    pub fn new(adapter: &'a ProviderAdapter, config: &'a AppConfig) -> Self {
        Self { adapter, config }
    }

    /// One researched record per input item, in input order. Never fails:
    /// positions a group could not research are filled from the line items.
    pub async fn research(&self, items: &[LineItem]) -> Vec<ResearchedItem> {
        if items.is_empty() {
            return Vec::new();
        }
        let groups: Vec<&[LineItem]> = items.chunks(BATCH_SIZE).collect();
        tracing::info!(
            wines = items.len(),
            groups = groups.len(),
            provider = %self.config.selected_provider,
            "researching wine list"
        );

        // join_all yields results in launch order, whatever order they finish in.
        let replies = join_all(
            groups
                .iter()
                .enumerate()
                .map(|(index, group)| self.research_group(index, group)),
        )
        .await;

        let failed = replies.iter().filter(|r| r.is_empty()).count();
        if failed == groups.len() {
            tracing::warn!("every research group failed, keeping extracted wines");
        }

        groups
            .into_iter()
            .zip(replies)
            .flat_map(|(group, reply)| merge_group(group, reply))
            .collect()
    }

    /// Reply entries for one group; empty when the call or its reply failed.
    async fn research_group(&self, index: usize, group: &[LineItem]) -> Vec<Value> {
        let request = CallRequest::text(RESEARCH_SYSTEM_PROMPT, research_prompt(group));
        let result = self
            .adapter
            .call(self.config, self.config.selected_provider, &request)
            .await
            .and_then(ParsedReply::into_value);

        match result {
            Ok(Value::Object(mut reply)) => match reply.remove("wines") {
                Some(Value::Array(wines)) => {
                    tracing::debug!(group = index + 1, wines = wines.len(), "research group done");
                    wines
                }
                _ => {
                    tracing::warn!(group = index + 1, "research reply has no wines array");
                    Vec::new()
                }
            },
            Ok(_) => {
                tracing::warn!(group = index + 1, "research reply is not an object");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(group = index + 1, error = %err, "research group failed");
                Vec::new()
            }
        }
    }
}

/// Pair reply entries with the group's items by position. Surplus entries
/// are dropped; missing or unusable ones fall back to the line item.
pub fn merge_group(group: &[LineItem], reply: Vec<Value>) -> Vec<ResearchedItem> {
    let mut reply = reply.into_iter();
    group
        .iter()
        .map(|item| {
            reply
                .next()
                .filter(Value::is_object)
                .and_then(|entry| serde_json::from_value::<ResearchedItem>(entry).ok())
                .map(|researched| researched.backfill_from(item))
                .unwrap_or_else(|| ResearchedItem::from(item))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{adapter_with, config_with_key, Scripted, ScriptedClient};
    use crate::llm::CompletionRequest;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn wines(count: usize) -> Vec<LineItem> {
        (0..count)
            .map(|i| LineItem {
                bottle_price: Some(format!("${}", 40 + i)),
                ..LineItem::named(format!("Wine {:02}", i))
            })
            .collect()
    }

    /// Wine names listed in a research prompt.
    fn names_in(request: &CompletionRequest<'_>) -> Vec<String> {
        request
            .call
            .user_prompt
            .lines()
            .filter_map(|line| {
                let (position, rest) = line.split_once(". ")?;
                position.parse::<usize>().ok()?;
                let name = rest.split(" (Menu").next()?;
                name.starts_with("Wine ").then(|| name.to_string())
            })
            .collect()
    }

    fn researched_reply(names: &[String]) -> String {
        let wines: Vec<Value> = names
            .iter()
            .map(|n| json!({ "name": n, "retail_price": format!("retail {n}") }))
            .collect();
        json!({ "wines": wines }).to_string()
    }

    #[tokio::test]
    async fn preserves_order_when_groups_finish_out_of_order() {
        let client = Arc::new(ScriptedClient::new(|request| {
            let names = names_in(request);
            let delay = match names[0].as_str() {
                "Wine 00" => Duration::from_millis(60),
                "Wine 10" => Duration::from_millis(30),
                _ => Duration::ZERO,
            };
            Scripted::reply(researched_reply(&names)).after(delay)
        }));
        let adapter = adapter_with(client.clone());
        let config = config_with_key();

        let items = wines(23);
        let out = BatchResearcher::new(&adapter, &config).research(&items).await;

        assert_eq!(client.calls(), 3);
        assert_eq!(out.len(), 23);
        for (i, wine) in out.iter().enumerate() {
            assert_eq!(wine.name, format!("Wine {:02}", i));
            assert_eq!(wine.retail_price, Some(format!("retail Wine {:02}", i)));
            assert_eq!(wine.menu_price, Some(format!("${}", 40 + i)));
        }
    }

    #[tokio::test]
    async fn failed_group_is_backfilled_in_place() {
        let client = Arc::new(ScriptedClient::new(|request| {
            let names = names_in(request);
            if names[0] == "Wine 10" {
                Scripted::fail(500)
            } else {
                Scripted::reply(researched_reply(&names))
            }
        }));
        let adapter = adapter_with(client);
        let config = config_with_key();

        let items = wines(23);
        let out = BatchResearcher::new(&adapter, &config).research(&items).await;

        assert_eq!(out.len(), 23);
        for (i, wine) in out.iter().enumerate() {
            assert_eq!(wine.name, items[i].name);
            if (10..20).contains(&i) {
                assert_eq!(wine, &ResearchedItem::from(&items[i]));
            } else {
                assert!(wine.retail_price.is_some(), "position {i} lost its research");
            }
        }
    }

    #[tokio::test]
    async fn every_group_failing_returns_line_items() {
        let client = Arc::new(ScriptedClient::new(|_| Scripted::reply("I cannot browse the web.")));
        let adapter = adapter_with(client);
        let config = config_with_key();

        let items = wines(12);
        let out = BatchResearcher::new(&adapter, &config).research(&items).await;
        let expected: Vec<ResearchedItem> = items.iter().map(ResearchedItem::from).collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let client = Arc::new(ScriptedClient::new(|_| Scripted::reply("{}")));
        let adapter = adapter_with(client.clone());
        let config = config_with_key();

        assert!(BatchResearcher::new(&adapter, &config).research(&[]).await.is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn short_reply_is_padded_and_long_reply_trimmed() {
        let items = wines(3);
        let short = merge_group(&items, vec![json!({"name": "Wine 00", "retail_price": "$20"})]);
        assert_eq!(short.len(), 3);
        assert_eq!(short[0].retail_price.as_deref(), Some("$20"));
        assert_eq!(short[2], ResearchedItem::from(&items[2]));

        let long = merge_group(
            &items[..1],
            vec![json!({"retail_price": "$20"}), json!({"name": "Extra"})],
        );
        assert_eq!(long.len(), 1);
        assert_eq!(long[0].name, "Wine 00");
    }

    #[test]
    fn non_object_entries_fall_back() {
        let items = wines(2);
        let out = merge_group(&items, vec![json!("Wine 00"), json!(null)]);
        assert_eq!(out[0], ResearchedItem::from(&items[0]));
        assert_eq!(out[1], ResearchedItem::from(&items[1]));
    }

    #[test]
    fn prompt_lists_wines_with_menu_pricing() {
        let items = vec![
            LineItem {
                bottle_price: Some("$48".into()),
                ..LineItem::named("Rioja Reserva")
            },
            LineItem {
                glass_price: Some("$11".into()),
                ..LineItem::named("Albariño")
            },
            LineItem::named("Port"),
        ];
        let prompt = research_prompt(&items);
        assert!(prompt.contains("1. Rioja Reserva (Menu: $48)"));
        assert!(prompt.contains("2. Albariño (Menu: $55 - Estimated from glass price ($11 × 5))"));
        assert!(prompt.contains("\n3. Port\n"));
        assert!(prompt.contains(r#""wines": ["#));
    }
}
