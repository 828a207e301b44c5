use serde::{Deserialize, Serialize};

/// RxNav and E-utilities encode numbers as JSON strings; accept both.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value).filter(|v| v.is_finite()),
            Self::Text(value) => value.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(value) if *value >= 0.0 && value.fract() == 0.0 => Some(*value as u64),
            Self::Number(_) => None,
            Self::Text(value) => value.trim().parse::<u64>().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NumberOrString;

    #[test]
    fn number_or_string_parses_both_encodings() {
        let text: NumberOrString = serde_json::from_value(serde_json::json!("10.5")).unwrap();
        let number: NumberOrString = serde_json::from_value(serde_json::json!(7)).unwrap();
        assert_eq!(text.as_f64(), Some(10.5));
        assert_eq!(number.as_u64(), Some(7));

        let rank: NumberOrString = serde_json::from_value(serde_json::json!(" 3 ")).unwrap();
        assert_eq!(rank.as_u64(), Some(3));

        let junk = NumberOrString::Text("n/a".into());
        assert_eq!(junk.as_f64(), None);
        assert_eq!(junk.as_u64(), None);
    }
}
