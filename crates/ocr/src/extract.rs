use regex::Regex;
use tally_core::{Money, ReceiptItem, UNKNOWN_DATE, UNKNOWN_STORE};

use crate::types::{ExtractedFields, MatcherKind, StoreMatcher};

// ── Compiled regex cache ─────────────────────────────────────────────────────

re!(re_total,
    r"(?:合計(?:金額)?|(?i:\btotal\b))\s*[:：]?\s*[¥￥]?\s*([0-9]+(?:,[0-9]{3})*(?:\.[0-9]{1,2})?)(?:\D|$)");

re!(re_date,
    r"((?:19|20)[0-9]{2})\s*(?:年\s*([0-9]{1,2})\s*月\s*([0-9]{1,2})\s*日|[-/]([0-9]{1,2})[-/]([0-9]{1,2}))");

// code (not preceded by a digit) + name + price + optional quantity marker.
// Digit classes are ASCII-only; `\d` would also accept full-width digits.
re!(re_item,
    r"(?:^|[^0-9])([0-9]{6})\s+([^0-9¥￥]+?)\s*[¥￥]([0-9]+(?:,[0-9]{3})*(?:\.[0-9]{1,2})?)(?:\s*(X[0-9]+点|[0-9]+P))?");

// ── Store matchers ───────────────────────────────────────────────────────────

/// A store matcher with its pattern compiled up front.
#[derive(Debug)]
enum CompiledMatcher {
    Literal(String),
    Pattern(Regex),
}

impl CompiledMatcher {
    fn compile(matcher: &StoreMatcher) -> Result<Self, regex::Error> {
        Ok(match &matcher.kind {
            MatcherKind::Literal { name } => CompiledMatcher::Literal(name.clone()),
            MatcherKind::Labeled { label } => CompiledMatcher::Pattern(Regex::new(&format!(
                r"{}\s*[:：]\s*(\S+)",
                regex::escape(label)
            ))?),
            MatcherKind::Regex { pattern } => CompiledMatcher::Pattern(Regex::new(pattern)?),
        })
    }

    fn find(&self, text: &str) -> Option<String> {
        match self {
            CompiledMatcher::Literal(name) => text.contains(name.as_str()).then(|| name.clone()),
            CompiledMatcher::Pattern(re) => {
                let c = re.captures(text)?;
                let m = c.get(1).or_else(|| c.get(0))?;
                let value = m.as_str().trim();
                (!value.is_empty()).then(|| value.to_string())
            }
        }
    }
}

// ── Public extraction API ─────────────────────────────────────────────────────

/// Pattern rules over normalized receipt text.
///
/// Every rule degrades to its documented default instead of failing, so the
/// only hard errors in the pipeline happen at assembly.
#[derive(Debug)]
pub struct Extractor {
    store_matchers: Vec<CompiledMatcher>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(&StoreMatcher::defaults()).expect("default store matchers are valid")
    }
}

impl Extractor {
    /// Matchers are tried by descending priority; ties keep their given order.
    pub fn new(matchers: &[StoreMatcher]) -> Result<Self, regex::Error> {
        let mut ordered: Vec<&StoreMatcher> = matchers.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
        let store_matchers = ordered
            .into_iter()
            .map(CompiledMatcher::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { store_matchers })
    }

    /// Run every rule. All fields come back populated.
    pub fn extract(&self, text: &str) -> ExtractedFields {
        let fields = ExtractedFields {
            store_name: Some(self.store_name(text)),
            total_price: Some(self.total_price(text)),
            date: Some(self.date(text)),
            items: self.items(text),
        };
        tracing::debug!(
            store = ?fields.store_name,
            total = ?fields.total_price,
            date = ?fields.date,
            items = fields.items.len(),
            "fields extracted"
        );
        fields
    }

    // ── Store name ───────────────────────────────────────────────────────────

    pub fn store_name(&self, text: &str) -> String {
        self.store_matchers
            .iter()
            .find_map(|m| m.find(text))
            .unwrap_or_else(|| UNKNOWN_STORE.to_string())
    }

    // ── Total ────────────────────────────────────────────────────────────────

    /// First labeled total in reading order; later subtotals are ignored.
    pub fn total_price(&self, text: &str) -> Money {
        let Some(raw) = re_total().captures(text).and_then(|c| c.get(1)) else {
            tracing::debug!("no total price found");
            return Money::zero();
        };
        raw.as_str().parse::<Money>().unwrap_or_else(|e| {
            tracing::debug!("unusable total price: {e}");
            Money::zero()
        })
    }

    // ── Date ─────────────────────────────────────────────────────────────────

    /// First date in reading order, reordered to `YYYY-MM-DD`.
    pub fn date(&self, text: &str) -> String {
        re_date()
            .captures(text)
            .and_then(|c| {
                let year = c.get(1)?.as_str();
                let month = c.get(2).or_else(|| c.get(4))?.as_str();
                let day = c.get(3).or_else(|| c.get(5))?.as_str();
                Some(format!("{year}-{month:0>2}-{day:0>2}"))
            })
            .unwrap_or_else(|| UNKNOWN_DATE.to_string())
    }

    // ── Line items ───────────────────────────────────────────────────────────

    /// Items in source order. A name is everything between the code and the
    /// next price marker, so it can span what were separate lines.
    pub fn items(&self, text: &str) -> Vec<ReceiptItem> {
        let items: Vec<ReceiptItem> = re_item()
            .captures_iter(text)
            .filter_map(|c| {
                let name = c.get(2)?.as_str().trim();
                if name.is_empty() {
                    return None;
                }
                Some(ReceiptItem {
                    code: c.get(1)?.as_str().to_string(),
                    name: name.to_string(),
                    price: c.get(3)?.as_str().replace(',', ""),
                    quantity: c.get(4).map(|q| q.as_str().to_string()),
                })
            })
            .collect();

        if items.is_empty() {
            tracing::debug!("no line items found");
        }
        items
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
