// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

/// Replace every character that is not valid in a waveform name with `_`.
///
/// Names starting with a digit get a leading underscore.
pub fn string_sanitize(input: &str) -> String {
    let mut out: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Bit pattern of a sample with `-0.0` and `NaN` folded to one value each.
pub(crate) fn normalize_f64(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_sanitize() {
        assert_eq!(string_sanitize("awg_1"), "awg_1");
        assert_eq!(string_sanitize("AWG 1.ch-2"), "AWG_1_ch_2");
        assert_eq!(string_sanitize("8gates"), "_8gates");
        assert_eq!(string_sanitize(""), "_");
    }

    #[test]
    fn test_normalize_f64() {
        assert_eq!(normalize_f64(-0.0), normalize_f64(0.0));
        assert_eq!(normalize_f64(f64::NAN), normalize_f64(f64::NAN));
        assert_ne!(normalize_f64(-1.0), normalize_f64(1.0));
    }
}
