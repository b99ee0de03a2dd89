use serde::{Deserialize, Serialize};

/// The fixed subject set offered by the bulk entry form. The direct-edit
/// path stores subject strings unconstrained; the bulk path only ever
/// creates rows for these five.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subject {
    Mathematics,
    Physics,
    Chemistry,
    Biology,
    English,
}

impl Subject {
    pub const ALL: [Subject; 5] = [
        Subject::Mathematics,
        Subject::Physics,
        Subject::Chemistry,
        Subject::Biology,
        Subject::English,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Mathematics => "Mathematics",
            Subject::Physics => "Physics",
            Subject::Chemistry => "Chemistry",
            Subject::Biology => "Biology",
            Subject::English => "English",
        }
    }
}

/// Accepts an integer in [lo, hi] given either as a JSON integer or as a
/// decimal-integer string (the form fields arrive as strings). Fractions,
/// other text, and out-of-range values are invalid. Never panics.
pub fn validate_integer_in_range(
    raw: Option<&serde_json::Value>,
    lo: i64,
    hi: i64,
) -> Option<i64> {
    let value = match raw? {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if (lo..=hi).contains(&value) {
        Some(value)
    } else {
        None
    }
}

pub fn normalize_roll_number(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_integers_across_the_full_range() {
        for v in [0, 1, 50, 99, 100] {
            assert_eq!(
                validate_integer_in_range(Some(&json!(v)), 0, 100),
                Some(v)
            );
            assert_eq!(
                validate_integer_in_range(Some(&json!(v.to_string())), 0, 100),
                Some(v)
            );
        }
    }

    #[test]
    fn rejects_out_of_range_and_non_integers() {
        assert_eq!(validate_integer_in_range(Some(&json!(-1)), 0, 100), None);
        assert_eq!(validate_integer_in_range(Some(&json!(101)), 0, 100), None);
        assert_eq!(validate_integer_in_range(Some(&json!(150)), 0, 100), None);
        assert_eq!(validate_integer_in_range(Some(&json!(55.5)), 0, 100), None);
        assert_eq!(validate_integer_in_range(Some(&json!("88.5")), 0, 100), None);
        assert_eq!(validate_integer_in_range(Some(&json!("abc")), 0, 100), None);
        assert_eq!(validate_integer_in_range(Some(&json!("")), 0, 100), None);
        assert_eq!(validate_integer_in_range(Some(&json!(null)), 0, 100), None);
        assert_eq!(validate_integer_in_range(Some(&json!([1])), 0, 100), None);
        assert_eq!(validate_integer_in_range(None, 0, 100), None);
    }

    #[test]
    fn accepts_padded_numeric_strings() {
        assert_eq!(validate_integer_in_range(Some(&json!(" 75 ")), 0, 100), Some(75));
    }

    #[test]
    fn roll_numbers_are_trimmed_and_uppercased() {
        assert_eq!(normalize_roll_number("  r-101 "), "R-101");
        assert_eq!(normalize_roll_number("A12"), "A12");
    }

    #[test]
    fn names_are_trimmed_only() {
        assert_eq!(normalize_name("  Asha Rao "), "Asha Rao");
        assert_eq!(normalize_name("MiXeD cAsE"), "MiXeD cAsE");
    }

    #[test]
    fn subject_order_is_the_form_order() {
        let names: Vec<&str> = Subject::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            ["Mathematics", "Physics", "Chemistry", "Biology", "English"]
        );
    }
}
