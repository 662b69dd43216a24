//! URL helpers.

/// Resolve the public web root used in notification links.
///
/// A non-blank `forced` root wins over `main_url`. Surrounding whitespace
/// and trailing slashes are removed so paths can be appended directly.
pub fn web_root(main_url: &str, forced: Option<&str>) -> String {
    let root = match forced.map(str::trim) {
        Some(forced) if !forced.is_empty() => forced,
        _ => main_url.trim(),
    };
    root.trim_end_matches('/').to_string()
}

/// Build the absolute URL of an object's card page.
///
/// `card_path` is expected to start with `/`; one is inserted otherwise.
pub fn card_url(root: &str, card_path: &str, object_id: i64, entity: i64) -> String {
    let sep = if card_path.starts_with('/') { "" } else { "/" };
    format!("{root}{sep}{card_path}?id={object_id}&entity={entity}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_slashes() {
        assert_eq!(web_root("https://erp.example.com/", None), "https://erp.example.com");
        assert_eq!(web_root(" https://erp.example.com// ", None), "https://erp.example.com");
    }

    #[test]
    fn forced_root_wins() {
        assert_eq!(
            web_root("https://erp.example.com", Some("http://10.0.0.4/erp/")),
            "http://10.0.0.4/erp"
        );
    }

    #[test]
    fn blank_forced_root_ignored() {
        assert_eq!(web_root("https://erp.example.com", Some("  ")), "https://erp.example.com");
    }

    #[test]
    fn builds_card_url() {
        assert_eq!(
            card_url("https://erp.example.com", "/comm/propal/card.php", 42, 1),
            "https://erp.example.com/comm/propal/card.php?id=42&entity=1"
        );
        assert_eq!(
            card_url("https://erp.example.com", "commande/card.php", 7, 2),
            "https://erp.example.com/commande/card.php?id=7&entity=2"
        );
    }
}
