pub const MAX_NAME_LEN: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedName {
    pub value: String,
    pub changed: bool,
}

/// Applies the provider's naming rules: letters, digits, space, `-`, `_` and
/// `.` only; runs of whitespace collapse to one space; at most
/// [`MAX_NAME_LEN`] characters. Pure, and idempotent on its own output.
pub fn normalize_name(raw: &str) -> NormalizedName {
    let filtered: String = raw
        .chars()
        .map(|ch| if ch.is_whitespace() { ' ' } else { ch })
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, ' ' | '-' | '_' | '.'))
        .collect();

    let collapsed = filtered.split_whitespace().collect::<Vec<_>>().join(" ");
    let value: String = collapsed.chars().take(MAX_NAME_LEN).collect();
    let value = value.trim_end().to_string();

    NormalizedName { changed: value != raw, value }
}

/// Case-insensitive comparison key used for natural-key uniqueness.
pub fn name_key(name: &str) -> String {
    normalize_name(name).value.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{name_key, normalize_name, MAX_NAME_LEN};

    #[test]
    fn clean_names_pass_through_unchanged() {
        let normalized = normalize_name("Front Desk v2.1_main-line");
        assert_eq!(normalized.value, "Front Desk v2.1_main-line");
        assert!(!normalized.changed);
    }

    #[test]
    fn disallowed_characters_and_whitespace_are_cleaned() {
        let normalized = normalize_name("  Sales\t(EMEA)!!   outbound  ");
        assert_eq!(normalized.value, "Sales EMEA outbound");
        assert!(normalized.changed);
    }

    #[test]
    fn long_names_are_truncated_without_trailing_space() {
        let raw = format!("{} tail", "a".repeat(MAX_NAME_LEN - 1));
        let normalized = normalize_name(&raw);

        assert_eq!(normalized.value.chars().count(), MAX_NAME_LEN - 1);
        assert!(!normalized.value.ends_with(' '));
        assert!(normalized.changed);
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_name("Ünïcode   Agent #1");
        let twice = normalize_name(&once.value);

        assert_eq!(once.value, "Ünïcode Agent 1");
        assert_eq!(twice.value, once.value);
        assert!(!twice.changed);
    }

    #[test]
    fn name_key_ignores_case() {
        assert_eq!(name_key("Front  Desk"), name_key("front desk"));
    }
}
