//! Address (JID) helpers shared by the store and the recipient filter.

/// Domain marker of one-to-one chat addresses.
pub const DIRECT_SUFFIX: &str = "@s.whatsapp.net";

/// Domain marker of group chat addresses.
pub const GROUP_SUFFIX: &str = "@g.us";

pub fn is_group(address: &str) -> bool {
    address.ends_with(GROUP_SUFFIX)
}

/// The part of an address before its `@` domain marker, or the whole
/// string when it has none.
pub fn local_part(address: &str) -> &str {
    match address.find('@') {
        Some(at) => &address[..at],
        None => address,
    }
}

/// Bare phone numbers are direct-chat addresses.
pub fn normalize_recipient(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains('@') {
        raw.to_string()
    } else {
        format!("{raw}{DIRECT_SUFFIX}")
    }
}
