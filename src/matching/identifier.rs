// src/matching/identifier.rs

/// Minimum number of digits for a core to be worth querying at all.
pub const MIN_USABLE_CORE_DIGITS: usize = 3;

/// Width of a fully-formed core.
pub const CORE_LEN: usize = 6;

/// Written by the backfill for rows whose raw identifier cannot yield a core.
pub const CORE_SENTINEL: &str = "000000";

/// Digits in a cnpj base (the prefix shared by all establishments of one
/// registered company).
pub const CNPJ_BASE_LEN: usize = 8;

/// Derives the 6-digit CPF core from a raw identifier of unknown formatting.
///
/// Strips every non-digit first. An exactly-11-digit string is a complete
/// CPF and the core sits at positions 3..9; any other string with at least
/// 6 digits takes its first 6 (the mask `***XXXXXX**` leaves exactly the
/// core visible, so this covers masked and partial forms alike); shorter
/// inputs return whatever digits remain. This one rule is shared by query
/// time, the scan-path SQL, and the backfill; the lookup silently breaks
/// if the derivations ever diverge.
pub fn extract_cpf_core(identifier: &str) -> String {
    let digits: String = identifier.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 {
        digits[3..9].to_string()
    } else if digits.len() >= CORE_LEN {
        digits[..CORE_LEN].to_string()
    } else {
        digits
    }
}

/// A core below 3 digits cannot identify anything.
pub fn core_is_usable(core: &str) -> bool {
    core.len() >= MIN_USABLE_CORE_DIGITS
}

/// Backfill variant of [`extract_cpf_core`]: rows that cannot yield a full
/// 6-digit core take the fixed sentinel instead of staying invalid, so every
/// processed row leaves the qualifying set and the job always moves forward.
pub fn derive_core_or_sentinel(raw: &str) -> String {
    let core = extract_cpf_core(raw);
    if core.len() == CORE_LEN {
        core
    } else {
        CORE_SENTINEL.to_string()
    }
}

/// First 8 digits of a company identifier, or `None` below 8 digits.
pub fn extract_cnpj_base(identifier: &str) -> Option<String> {
    let digits: String = identifier.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= CNPJ_BASE_LEN {
        Some(digits[..CNPJ_BASE_LEN].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cpf_takes_middle_window() {
        assert_eq!(extract_cpf_core("12345678901"), "456789");
        assert_eq!(extract_cpf_core("123.456.789-01"), "456789");
        assert_eq!(extract_cpf_core(" 123 456 789 01 "), "456789");
    }

    #[test]
    fn test_masked_cpf_takes_first_six() {
        assert_eq!(extract_cpf_core("***331355**"), "331355");
        assert_eq!(extract_cpf_core("***.331.355-**"), "331355");
    }

    #[test]
    fn test_partial_takes_first_six() {
        assert_eq!(extract_cpf_core("3313557"), "331355");
        assert_eq!(extract_cpf_core("331355"), "331355");
        // 14-digit company identifier in the partner column: not a CPF shape.
        assert_eq!(extract_cpf_core("12345678000190"), "123456");
    }

    #[test]
    fn test_short_returns_remainder() {
        assert_eq!(extract_cpf_core("12-3"), "123");
        assert_eq!(extract_cpf_core("ab1c"), "1");
        assert_eq!(extract_cpf_core(""), "");
    }

    #[test]
    fn test_extraction_is_total_and_bounded() {
        for input in ["", "*", "x", "999", "123456789012345678", "1.2.3.4.5.6.7"] {
            let core = extract_cpf_core(input);
            assert!(core.len() <= CORE_LEN);
            assert!(core.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_extraction_is_idempotent_on_its_output() {
        for input in ["123.456.789-01", "***331355**", "12-3", "331355"] {
            let once = extract_cpf_core(input);
            assert_eq!(extract_cpf_core(&once), once);
        }
    }

    #[test]
    fn test_usability_floor() {
        assert!(core_is_usable("123"));
        assert!(core_is_usable("456789"));
        assert!(!core_is_usable("12"));
        assert!(!core_is_usable(""));
    }

    #[test]
    fn test_sentinel_for_irrecoverable_rows() {
        assert_eq!(derive_core_or_sentinel("12-3"), "000000");
        assert_eq!(derive_core_or_sentinel(""), "000000");
        assert_eq!(derive_core_or_sentinel("123.456.789-01"), "456789");
        assert_eq!(derive_core_or_sentinel("***331355**"), "331355");
    }

    #[test]
    fn test_cnpj_base() {
        assert_eq!(extract_cnpj_base("12.345.678/0001-90"), Some("12345678".to_string()));
        assert_eq!(extract_cnpj_base("12345678"), Some("12345678".to_string()));
        assert_eq!(extract_cnpj_base("1234567"), None);
    }
}
