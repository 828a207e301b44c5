/// Escapes a user-provided value for Lucene-like query syntaxes (OpenFDA `search=`).
///
/// Every Lucene special character is escaped so a drug name such as
/// `"co-trimoxazole (oral)"` cannot change the meaning of the query.
pub(crate) fn escape_lucene_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' | '+' | '-' | '!' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '"' | '~' | '*'
            | '?' | ':' | '/' | '&' | '|' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_lucene_value;

    #[test]
    fn escapes_lucene_special_characters() {
        let escaped = escape_lucene_value(r#"co-trimoxazole (oral) "DS""#);
        assert_eq!(escaped, r#"co\-trimoxazole \(oral\) \"DS\""#);
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(escape_lucene_value("Metformin"), "Metformin");
        assert_eq!(escape_lucene_value("Valproic Acid"), "Valproic Acid");
    }
}
