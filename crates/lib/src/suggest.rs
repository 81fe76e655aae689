//! Quick-access question suggestions filtered as the user types.

/// Built-in suggestions offered for partial input.
pub const SUGGESTIONS: [&str; 8] = [
    "Show me top selling items this month",
    "Analyze customer ABC Corp",
    "Generate sales report for Q1",
    "What's my current stock level?",
    "Show overdue invoices",
    "Create a study on item 000125",
    "List all customers with outstanding balance",
    "Show purchase trends for this year",
];

const MIN_QUERY_CHARS: usize = 2;
const MAX_RESULTS: usize = 3;

/// Suggestions containing `query` (case-insensitive). Queries shorter than
/// two characters yield nothing; at most three results.
pub fn matches(query: &str) -> Vec<&'static str> {
    let query = query.trim().to_lowercase();
    if query.chars().count() < MIN_QUERY_CHARS {
        return Vec::new();
    }
    SUGGESTIONS
        .iter()
        .filter(|s| s.to_lowercase().contains(&query))
        .take(MAX_RESULTS)
        .copied()
        .collect()
}
