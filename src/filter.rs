//! Recipient allow/deny rules keyed on the last six characters of a phone
//! number.

use chat_store::address::{is_group, local_part};
use chat_store::AddressPatterns;

const SUFFIX_LEN: usize = 6;

/// Allow-list / deny-list evaluation over chat addresses.
///
/// Entries and candidates are both reduced to their suffix, so numbers
/// written with or without a country code compare equal. Group chats are
/// never filtered.
#[derive(Debug, Clone, Default)]
pub struct SuffixFilter {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl SuffixFilter {
    pub fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        Self { allow, deny }
    }

    /// The allow-list wins: when it is non-empty the deny-list is ignored.
    pub fn is_allowed(&self, address: &str) -> bool {
        if is_group(address) {
            return true;
        }

        let candidate = suffix(address);
        if !self.allow.is_empty() {
            return self.allow.iter().any(|entry| suffix(entry) == candidate);
        }
        if !self.deny.is_empty() {
            return !self.deny.iter().any(|entry| suffix(entry) == candidate);
        }
        true
    }

    /// Substring patterns for store queries: `<suffix>@` per entry.
    pub fn patterns(&self) -> AddressPatterns {
        AddressPatterns {
            include: to_patterns(&self.allow),
            exclude: to_patterns(&self.deny),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// Last six characters of the part before `@`, or all of it when shorter.
pub fn suffix(address: &str) -> &str {
    let phone = local_part(address);
    match phone.char_indices().rev().nth(SUFFIX_LEN - 1) {
        Some((start, _)) => &phone[start..],
        None => phone,
    }
}

fn to_patterns(entries: &[String]) -> Option<Vec<String>> {
    if entries.is_empty() {
        return None;
    }
    Some(entries.iter().map(|e| format!("{}@", suffix(e))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn suffix_keeps_last_six() {
        assert_eq!(suffix("1234567890"), "567890");
        assert_eq!(suffix("567890"), "567890");
        assert_eq!(suffix("12345"), "12345");
        assert_eq!(suffix(""), "");
        assert_eq!(suffix("1234567890@s.whatsapp.net"), "567890");
        assert_eq!(suffix("12345@s.whatsapp.net"), "12345");
    }

    #[test]
    fn entries_written_as_addresses_reduce_like_candidates() {
        let address = "1234567890@s.whatsapp.net";
        let f = SuffixFilter::new(list(&[address]), Vec::new());
        assert!(f.is_allowed(address));
        assert!(f.is_allowed("44234567890@s.whatsapp.net"));
        assert!(!f.is_allowed("9876543210@s.whatsapp.net"));
        assert_eq!(f.patterns().include, Some(list(&["567890@"])));

        let f = SuffixFilter::new(Vec::new(), list(&["9876543210@s.whatsapp.net"]));
        assert!(!f.is_allowed("9876543210@s.whatsapp.net"));
        assert!(f.is_allowed(address));
        assert_eq!(f.patterns().exclude, Some(list(&["543210@"])));
    }

    #[test]
    fn no_lists_allows_everything() {
        let f = SuffixFilter::new(Vec::new(), Vec::new());
        assert!(f.is_empty());
        assert!(f.is_allowed("1234567890@s.whatsapp.net"));
        assert!(f.is_allowed("9876543210@s.whatsapp.net"));
        assert!(f.is_allowed("120363123456789012@g.us"));
    }

    #[test]
    fn allow_list_matches_across_country_codes() {
        let f = SuffixFilter::new(list(&["1234567890"]), Vec::new());
        assert!(f.is_allowed("1234567890@s.whatsapp.net"));
        assert!(f.is_allowed("44234567890@s.whatsapp.net"));
        assert!(!f.is_allowed("9876543210@s.whatsapp.net"));
    }

    #[test]
    fn deny_list_blocks_matching_suffix() {
        let f = SuffixFilter::new(Vec::new(), list(&["9876543210"]));
        assert!(f.is_allowed("1234567890@s.whatsapp.net"));
        assert!(!f.is_allowed("9876543210@s.whatsapp.net"));
        assert!(!f.is_allowed("44876543210@s.whatsapp.net"));
    }

    #[test]
    fn allow_list_wins_over_deny_list() {
        let f = SuffixFilter::new(list(&["1234567890"]), list(&["1234567890"]));
        assert!(f.is_allowed("1234567890@s.whatsapp.net"));
        assert!(!f.is_allowed("9876543210@s.whatsapp.net"));
    }

    #[test]
    fn groups_always_pass() {
        let f = SuffixFilter::new(list(&["1234567890"]), Vec::new());
        assert!(f.is_allowed("120363123456789012@g.us"));
        assert!(f.is_allowed("999999999999@g.us"));

        let f = SuffixFilter::new(Vec::new(), list(&["1234567890"]));
        assert!(f.is_allowed("120363123456789012@g.us"));
    }

    #[test]
    fn short_entries_compare_whole() {
        let f = SuffixFilter::new(list(&["12345"]), Vec::new());
        assert!(f.is_allowed("12345@s.whatsapp.net"));
        assert!(!f.is_allowed("9912345@s.whatsapp.net"));
    }

    #[test]
    fn several_allow_entries() {
        let f = SuffixFilter::new(list(&["1234567890", "1112223333"]), Vec::new());
        assert!(f.is_allowed("1234567890@s.whatsapp.net"));
        assert!(f.is_allowed("1112223333@s.whatsapp.net"));
        assert!(!f.is_allowed("9999999999@s.whatsapp.net"));
    }

    #[test]
    fn bare_numbers_are_reduced_too() {
        let f = SuffixFilter::new(list(&["1234567890"]), Vec::new());
        assert!(f.is_allowed("1234567890"));
        assert!(!f.is_allowed("9876543210"));
    }

    #[test]
    fn patterns_append_at_sign() {
        let f = SuffixFilter::new(list(&["1234567890", "12345"]), list(&["9876543210"]));
        let p = f.patterns();
        assert_eq!(p.include, Some(list(&["567890@", "12345@"])));
        assert_eq!(p.exclude, Some(list(&["543210@"])));
    }

    #[test]
    fn empty_lists_produce_no_patterns() {
        let p = SuffixFilter::default().patterns();
        assert_eq!(p.include, None);
        assert_eq!(p.exclude, None);
    }
}
