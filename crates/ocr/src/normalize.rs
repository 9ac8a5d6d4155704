use regex::Captures;

re!(re_whitespace_run, r"\s+");
re!(re_after_currency, r"([¥￥])\s+");
re!(re_after_multiplier, r"([X×])\s+([0-9])");
re!(re_grouped_number, r"[0-9]+(?:,[0-9]+)+");

/// Canonicalize raw OCR text so the extraction patterns see one spelling of
/// each construct. Pure and idempotent.
///
/// The steps run in a fixed order; later ones assume the whitespace has
/// already been collapsed.
pub fn normalize(text: &str) -> String {
    let text = re_whitespace_run().replace_all(text, " ");
    let text = re_after_currency().replace_all(&text, "$1");
    let text = re_after_multiplier().replace_all(&text, "$1$2");
    let text = re_grouped_number().replace_all(&text, strip_thousands_separators);
    let text = text.replace("点 ", "点:");
    text.trim().to_string()
}

// `1,234,567` → `1234567`; `3,14` or `1,23,456` are not thousands groups.
// Only ASCII digits form groups, so full-width digits keep their commas.
fn strip_thousands_separators(caps: &Captures) -> String {
    let token = &caps[0];
    let is_grouped = token.split(',').skip(1).all(|group| group.chars().count() == 3);
    if is_grouped {
        token.replace(',', "")
    } else {
        token.to_string()
    }
}
