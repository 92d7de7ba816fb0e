/// Tag text with the category vocabulary terms it mentions.
///
/// Matching is a case-insensitive substring test, and the result keeps the
/// vocabulary's order without duplicates. No network or model is involved.
pub fn extract_keywords(text: &str, vocabulary: &[String]) -> Vec<String> {
    let haystack = text.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();

    for term in vocabulary {
        let needle = term.to_lowercase();
        if needle.is_empty() || keywords.iter().any(|k| k.eq_ignore_ascii_case(term)) {
            continue;
        }
        if haystack.contains(&needle) {
            keywords.push(term.clone());
        }
    }

    keywords
}

/// Check if a word is a common stop word
pub fn is_stop_word(word: &str) -> bool {
    matches!(
        word,
        "the" | "and" | "or" | "but" | "in" | "on" | "at" | "to" | "for" | "of" | "with" | "by" |
        "a" | "an" | "is" | "are" | "was" | "were" | "be" | "been" | "have" | "has" | "had" |
        "do" | "does" | "did" | "will" | "would" | "could" | "should" | "may" | "might" | "must" |
        "can" | "this" | "that" | "these" | "those" | "from" | "said" | "says" | "their" | "about"
    )
}

/// Text processing utilities
pub mod text {
    /// Bound `text` to `max_chars` characters without cutting a sentence.
    ///
    /// Whole paragraphs are kept while they fit. If not even the first
    /// paragraph fits, whole sentences of it are kept instead. A single
    /// sentence longer than the budget is cut at a word boundary and marked
    /// with an ellipsis.
    pub fn excerpt(text: &str, max_chars: usize) -> String {
        let text = text.trim();
        if text.chars().count() <= max_chars {
            return text.to_string();
        }

        let mut kept = String::new();
        for paragraph in paragraphs(text) {
            let separator = if kept.is_empty() { 0 } else { 2 };
            if char_len(&kept) + separator + char_len(paragraph) > max_chars {
                break;
            }
            if !kept.is_empty() {
                kept.push_str("\n\n");
            }
            kept.push_str(paragraph);
        }
        if !kept.is_empty() {
            return kept;
        }

        let first = paragraphs(text).next().unwrap_or(text);
        for sentence in sentences(first) {
            let separator = if kept.is_empty() { 0 } else { 1 };
            if char_len(&kept) + separator + char_len(sentence) > max_chars {
                break;
            }
            if !kept.is_empty() {
                kept.push(' ');
            }
            kept.push_str(sentence);
        }
        if !kept.is_empty() {
            return kept;
        }

        truncate_at_word(first, max_chars)
    }

    /// Cut at the last whitespace within `max_chars` and append "…".
    pub fn truncate_at_word(text: &str, max_chars: usize) -> String {
        if char_len(text) <= max_chars {
            return text.to_string();
        }
        let budget = max_chars.saturating_sub(1);
        let cut = text
            .char_indices()
            .nth(budget)
            .map(|(index, _)| index)
            .unwrap_or(text.len());
        let head = &text[..cut];
        let at_boundary = text[cut..].starts_with(char::is_whitespace);
        let head = match head.rfind(char::is_whitespace) {
            Some(space) if space > 0 && !at_boundary => &head[..space],
            _ => head,
        };
        format!("{}…", head.trim_end())
    }

    pub fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
        text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
    }

    /// Split on `.`, `!` or `?` followed by whitespace, keeping the terminator.
    pub fn sentences(text: &str) -> Vec<&str> {
        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = text.char_indices().peekable();

        while let Some((index, c)) = chars.next() {
            if matches!(c, '.' | '!' | '?') {
                let boundary = match chars.peek() {
                    Some((_, next)) => next.is_whitespace(),
                    None => true,
                };
                if boundary {
                    let end = index + c.len_utf8();
                    let sentence = text[start..end].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = end;
                }
            }
        }

        let rest = text[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest);
        }
        sentences
    }

    /// Collapse runs of whitespace inside each paragraph while keeping
    /// paragraph breaks.
    pub fn normalize_text(text: &str) -> String {
        text.replace("\r\n", "\n")
            .split("\n\n")
            .map(|paragraph| paragraph.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|paragraph| !paragraph.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn char_len(text: &str) -> usize {
        text.chars().count()
    }
}

/// URL utilities
pub mod url {
    use url::Url;

    /// Host of a URL, lowercased and without a leading `www.`.
    pub fn extract_domain(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?.to_lowercase();
        Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
    }

    /// True when `domain` equals `trusted` or is one of its subdomains.
    pub fn domain_matches(domain: &str, trusted: &str) -> bool {
        let trusted = trusted.trim_start_matches("www.");
        domain == trusted || domain.ends_with(&format!(".{}", trusted))
    }

    pub fn is_http_url(url_str: &str) -> bool {
        match Url::parse(url_str) {
            Ok(url) => url.scheme() == "http" || url.scheme() == "https",
            Err(_) => false,
        }
    }
}
