//! Embedding and extraction of the inner app-state key in a URL hash fragment.
//!
//! Three token shapes are recognized, in priority order:
//! - current: `?sap-iapp-state=KEY` or `&sap-iapp-state=KEY`, key ends at `&`
//! - legacy route: `/sap-iapp-state=KEY` inside the route, key ends at `/` or `?`
//! - legacy leading: `sap-iapp-state=KEY` at the very start, key ends at `/` or `?`
//!
//! Encoding always produces the current shape and removes every legacy token.
//! All matching is done by plain scans over the input; nothing is cached
//! between calls.

pub const IAPP_STATE_PARAMETER: &str = "sap-iapp-state";

const TOKEN_PREFIX: &str = "sap-iapp-state=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenFormat {
    Current,
    LegacyRoute,
    LegacyLeading,
}

/// Byte span of one token. `start..end` is the text removed when the token is
/// stripped: it includes the leading `/` of a legacy route token but never the
/// `?`/`&` delimiter of a current token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StateToken {
    format: TokenFormat,
    start: usize,
    value_start: usize,
    end: usize,
}

/// Extract the app-state key from a hash fragment, if one is present.
///
/// A leading `#` is ignored. A current-format token with an empty value is
/// reported as no key.
#[must_use]
pub fn decode_app_state_key(hash: &str) -> Option<String> {
    let (_, body) = split_hash_prefix(hash);
    let token = find_current(body, 0)
        .or_else(|| find_legacy_route(body))
        .or_else(|| find_legacy_leading(body))?;
    let value = &body[token.value_start..token.end];
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

/// Write `key` into the hash fragment as a current-format token.
///
/// An existing current token keeps its position and only its value changes.
/// Legacy tokens are removed and the fresh token is appended to the query part.
#[must_use]
pub fn encode_app_state_key(hash: &str, key: &str) -> String {
    let (prefix, body) = split_hash_prefix(hash);
    let mut body = strip_legacy_tokens(body);

    let Some(first) = find_current(&body, 0) else {
        let separator = if body.contains('?') { '&' } else { '?' };
        return format!("{prefix}{body}{separator}{TOKEN_PREFIX}{key}");
    };

    body.replace_range(first.value_start..first.end, key);
    let resume_at = first.value_start + key.len();
    while let Some(duplicate) = find_current(&body, resume_at) {
        remove_current_token(&mut body, duplicate);
    }
    format!("{prefix}{body}")
}

fn split_hash_prefix(hash: &str) -> (&str, &str) {
    match hash.strip_prefix('#') {
        Some(body) => ("#", body),
        None => ("", hash),
    }
}

fn find_current(body: &str, from: usize) -> Option<StateToken> {
    let bytes = body.as_bytes();
    token_positions(body, from).find_map(|start| {
        if start == 0 || !matches!(bytes[start - 1], b'?' | b'&') {
            return None;
        }
        let value_start = start + TOKEN_PREFIX.len();
        let end = body[value_start..].find('&').map_or(body.len(), |offset| value_start + offset);
        Some(StateToken { format: TokenFormat::Current, start, value_start, end })
    })
}

fn find_legacy_route(body: &str) -> Option<StateToken> {
    let bytes = body.as_bytes();
    token_positions(body, 0).find_map(|start| {
        if start == 0 || bytes[start - 1] != b'/' {
            return None;
        }
        let value_start = start + TOKEN_PREFIX.len();
        let end = legacy_value_end(body, value_start)?;
        Some(StateToken { format: TokenFormat::LegacyRoute, start: start - 1, value_start, end })
    })
}

fn find_legacy_leading(body: &str) -> Option<StateToken> {
    if !body.starts_with(TOKEN_PREFIX) {
        return None;
    }
    let value_start = TOKEN_PREFIX.len();
    let end = legacy_value_end(body, value_start)?;
    Some(StateToken { format: TokenFormat::LegacyLeading, start: 0, value_start, end })
}

/// Legacy values stop at `/` or `?` and must not be empty.
fn legacy_value_end(body: &str, value_start: usize) -> Option<usize> {
    let end = body[value_start..]
        .find(['/', '?'])
        .map_or(body.len(), |offset| value_start + offset);
    (end > value_start).then_some(end)
}

fn token_positions(body: &str, from: usize) -> impl Iterator<Item = usize> + '_ {
    body.match_indices(TOKEN_PREFIX).map(|(index, _)| index).filter(move |index| *index >= from)
}

fn strip_legacy_tokens(body: &str) -> String {
    let mut stripped = body.to_string();
    loop {
        let Some(token) = find_legacy_route(&stripped).or_else(|| find_legacy_leading(&stripped))
        else {
            return stripped;
        };
        debug_assert_ne!(token.format, TokenFormat::Current);
        stripped.replace_range(token.start..token.end, "");
    }
}

/// Remove a current token together with exactly one adjacent delimiter so the
/// remaining query stays well formed.
fn remove_current_token(body: &mut String, token: StateToken) {
    let delimiter = token.start - 1;
    let followed_by_ampersand = body.as_bytes().get(token.end) == Some(&b'&');
    if body.as_bytes()[delimiter] == b'&' || !followed_by_ampersand {
        body.replace_range(delimiter..token.end, "");
    } else {
        body.replace_range(token.start..=token.end, "");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn token_count(hash: &str) -> usize {
        let (_, body) = split_hash_prefix(hash);
        let mut count = 0;
        let mut from = 0;
        while let Some(token) = find_current(body, from) {
            count += 1;
            from = token.end;
        }
        let legacy = strip_legacy_tokens(body);
        count + body.matches(TOKEN_PREFIX).count() - legacy.matches(TOKEN_PREFIX).count()
    }

    // Test IDs: TKEY-001
    #[test]
    fn decode_prefers_current_then_legacy_route_then_leading() {
        assert_eq!(decode_app_state_key("Obj-act?a=1&sap-iapp-state=K1&b=2"), Some("K1".into()));
        assert_eq!(decode_app_state_key("#Obj-act?sap-iapp-state=K1"), Some("K1".into()));
        assert_eq!(decode_app_state_key("Obj-act/route/sap-iapp-state=K2/x"), Some("K2".into()));
        assert_eq!(decode_app_state_key("Obj-act/route/sap-iapp-state=K2?a=1"), Some("K2".into()));
        assert_eq!(decode_app_state_key("sap-iapp-state=K3/route"), Some("K3".into()));
        assert_eq!(
            decode_app_state_key("sap-iapp-state=K3/r/sap-iapp-state=K2?sap-iapp-state=K1"),
            Some("K1".into())
        );
        assert_eq!(
            decode_app_state_key("sap-iapp-state=K3/r/sap-iapp-state=K2"),
            Some("K2".into())
        );
    }

    // Test IDs: TKEY-002
    #[test]
    fn decode_reports_absent_key() {
        assert_eq!(decode_app_state_key(""), None);
        assert_eq!(decode_app_state_key("#"), None);
        assert_eq!(decode_app_state_key("Obj-act/route"), None);
        assert_eq!(decode_app_state_key("Obj-act?x-sap-iapp-state=K"), None);
        assert_eq!(decode_app_state_key("Obj-act?sap-iapp-state="), None);
        assert_eq!(decode_app_state_key("Obj-act/sap-iapp-state=/x"), None);
    }

    // Test IDs: TKEY-003
    #[test]
    fn encode_upgrades_legacy_route_token() {
        assert_eq!(
            encode_app_state_key("#Obj-act/route/sap-iapp-state=OLD1", "NEW2"),
            "#Obj-act/route?sap-iapp-state=NEW2"
        );
        assert_eq!(
            encode_app_state_key("Obj-act/route/sap-iapp-state=OLD1?x=1", "NEW2"),
            "Obj-act/route?x=1&sap-iapp-state=NEW2"
        );
        assert_eq!(
            encode_app_state_key("sap-iapp-state=OLD1/route", "NEW2"),
            "/route?sap-iapp-state=NEW2"
        );
    }

    // Test IDs: TKEY-004
    #[test]
    fn encode_appends_or_replaces_current_token() {
        assert_eq!(encode_app_state_key("", "K"), "?sap-iapp-state=K");
        assert_eq!(encode_app_state_key("Obj-act", "K"), "Obj-act?sap-iapp-state=K");
        assert_eq!(encode_app_state_key("Obj-act?a=1", "K"), "Obj-act?a=1&sap-iapp-state=K");
        assert_eq!(
            encode_app_state_key("Obj-act?sap-iapp-state=OLD&a=1", "K"),
            "Obj-act?sap-iapp-state=K&a=1"
        );
        assert_eq!(
            encode_app_state_key("Obj-act?a=1&sap-iapp-state=", "K"),
            "Obj-act?a=1&sap-iapp-state=K"
        );
    }

    // Test IDs: TKEY-005
    #[test]
    fn encode_collapses_mixed_and_duplicate_tokens() {
        assert_eq!(
            encode_app_state_key("A-b/sap-iapp-state=L1?sap-iapp-state=C1&z=9", "K"),
            "A-b?sap-iapp-state=K&z=9"
        );
        assert_eq!(
            encode_app_state_key("A-b?sap-iapp-state=C1&x=1&sap-iapp-state=C2", "K"),
            "A-b?sap-iapp-state=K&x=1"
        );
    }

    fn hash_strategy() -> impl Strategy<Value = String> {
        let segment = prop_oneof![
            Just("Obj-act".to_string()),
            Just("/route".to_string()),
            Just("/sap-iapp-state=OLD".to_string()),
            Just("sap-iapp-state=LEAD".to_string()),
            Just("?a=1".to_string()),
            Just("&b=2".to_string()),
            Just("?sap-iapp-state=CUR".to_string()),
            Just("&sap-iapp-state=CUR2".to_string()),
            "[a-z]{1,4}",
        ];
        (any::<bool>(), prop::collection::vec(segment, 0..6)).prop_map(|(hashed, parts)| {
            let body = parts.concat();
            if hashed {
                format!("#{body}")
            } else {
                body
            }
        })
    }

    proptest! {
        #[test]
        fn property_decode_inverts_encode(hash in hash_strategy(), key in "[A-Z0-9]{1,26}") {
            let encoded = encode_app_state_key(&hash, &key);
            prop_assert_eq!(decode_app_state_key(&encoded), Some(key));
        }

        #[test]
        fn property_re_encoding_leaves_one_token(
            hash in hash_strategy(),
            first in "[A-Z0-9]{1,26}",
            second in "[A-Z0-9]{1,26}",
        ) {
            let encoded = encode_app_state_key(&encode_app_state_key(&hash, &first), &second);
            prop_assert_eq!(token_count(&encoded), 1);
            prop_assert_eq!(decode_app_state_key(&encoded), Some(second));
        }
    }
}
