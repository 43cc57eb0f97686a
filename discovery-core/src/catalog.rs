use crate::types::AvailableSource;

/// Sources the user can trust or exclude without knowing the exact domain.
const SOURCES: [(&str, &str); 16] = [
    ("Reuters", "reuters.com"),
    ("Associated Press", "ap.org"),
    ("BBC", "bbc.com"),
    ("CNN", "cnn.com"),
    ("The Wall Street Journal", "wsj.com"),
    ("The New York Times", "nytimes.com"),
    ("The Washington Post", "washingtonpost.com"),
    ("Bloomberg", "bloomberg.com"),
    ("Financial Times", "ft.com"),
    ("The Guardian", "theguardian.com"),
    ("NPR", "npr.org"),
    ("Al Jazeera", "aljazeera.com"),
    ("Deutsche Welle", "dw.com"),
    ("Le Monde", "lemonde.fr"),
    ("Der Spiegel", "spiegel.de"),
    ("Ars Technica", "arstechnica.com"),
];

fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut haystack = haystack.chars();
    needle.chars().all(|c| haystack.any(|h| h == c))
}

/// Case-insensitive match on name or domain, substring hits first.
pub fn search(fuzzy_term: &str) -> Vec<AvailableSource> {
    let term = fuzzy_term.trim().to_lowercase();
    if term.is_empty() {
        return vec![];
    }

    let mut substring = Vec::new();
    let mut subsequence = Vec::new();
    for (name, domain) in SOURCES {
        let name_lower = name.to_lowercase();
        let source = AvailableSource {
            name: name.to_string(),
            domain: domain.to_string(),
        };
        if name_lower.contains(&term) || domain.contains(&term) {
            substring.push(source);
        } else if is_subsequence(&term, &name_lower) || is_subsequence(&term, domain) {
            subsequence.push(source);
        }
    }
    substring.extend(subsequence);
    substring
}
