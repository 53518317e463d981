use std::collections::BTreeMap;

/// Midpoint of a SteamSpy owners range such as `"20,000 .. 50,000"`.
pub fn owners_midpoint(range: &str) -> Option<i64> {
    let cleaned = range.replace(',', "");
    let (low, high) = cleaned.split_once("..")?;
    let low = low.trim().parse::<i64>().ok()?;
    let high = high.trim().parse::<i64>().ok()?;
    if low < 0 || high < low {
        return None;
    }
    Some(low + (high - low) / 2)
}

/// The `n` heaviest tags, ties broken alphabetically.
pub fn top_tags(tags: &BTreeMap<String, i64>, n: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, &i64)> = tags.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(n).map(|(t, _)| t.clone()).collect()
}
