use serde_json::Value;

/// Local abbreviation expansions, applied in order as plain substring
/// replacements. Matching is not word-boundary aware.
///
/// Every default pattern ends in a period and no expansion contains one, so a
/// second normalization pass finds nothing left to expand.
pub fn default_abbreviations() -> Vec<(String, String)> {
    [
        ("jl.", "jalan "),
        ("gg.", "gang "),
        ("kec.", "kecamatan "),
        ("kel.", "kelurahan "),
        ("kab.", "kabupaten "),
        ("kav.", "kavling "),
        ("blk.", "blok "),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

#[derive(Debug, Clone)]
pub struct AddressNormalizer {
    abbreviations: Vec<(String, String)>,
}

impl Default for AddressNormalizer {
    fn default() -> Self {
        Self::new(default_abbreviations())
    }
}

impl AddressNormalizer {
    pub fn new(abbreviations: Vec<(String, String)>) -> Self {
        let abbreviations = abbreviations
            .into_iter()
            .filter(|(from, _)| !from.is_empty())
            .map(|(from, to)| (from.to_lowercase(), to))
            .collect();
        Self { abbreviations }
    }

    pub fn normalize(&self, raw: &str) -> String {
        let mut cleaned: String = raw
            .to_lowercase()
            .chars()
            .filter(|c| is_allowed(*c))
            .collect();
        for (from, to) in &self.abbreviations {
            if cleaned.contains(from.as_str()) {
                cleaned = cleaned.replace(from.as_str(), to);
            }
        }
        collapse_whitespace(&cleaned)
    }

    /// Anything but a JSON string normalizes to the empty string, which the
    /// strategy ladder treats as a missing field.
    pub fn normalize_value(&self, value: &Value) -> String {
        match value {
            Value::String(text) => self.normalize(text),
            _ => String::new(),
        }
    }

    pub fn normalize_field(&self, value: Option<&str>) -> Option<String> {
        value.map(|v| self.normalize(v)).filter(|v| !v.is_empty())
    }
}

fn is_allowed(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c.is_whitespace() || matches!(c, ',' | '.' | '-')
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strips_punctuation_and_collapses_whitespace() {
        let normalizer = AddressNormalizer::default();
        assert_eq!(
            normalizer.normalize("  Jl. Sudirman   No.5 (Lt #2)!!  "),
            "jalan sudirman no.5 lt 2"
        );
        assert_eq!(normalizer.normalize("Gg.Mawar, Kec. Menteng"), "gang mawar, kecamatan menteng");
        assert_eq!(normalizer.normalize("\t\n"), "");
    }

    #[test]
    fn replacement_rules_apply_in_order() {
        let normalizer = AddressNormalizer::new(vec![
            ("rd".into(), "road".into()),
            ("road".into(), "jalan".into()),
        ]);
        assert_eq!(normalizer.normalize("Main Rd"), "main jalan");
    }

    #[test]
    fn replacements_ignore_word_boundaries() {
        let normalizer = AddressNormalizer::new(vec![("st".into(), "street".into())]);
        assert_eq!(normalizer.normalize("Stasiun"), "streetasiun");
    }

    #[test]
    fn non_string_cells_become_empty() {
        let normalizer = AddressNormalizer::default();
        assert_eq!(normalizer.normalize_value(&json!(null)), "");
        assert_eq!(normalizer.normalize_value(&json!(12345)), "");
        assert_eq!(normalizer.normalize_value(&json!(["a"])), "");
        assert_eq!(normalizer.normalize_value(&json!("Bandung")), "bandung");
        assert_eq!(normalizer.normalize_field(Some(" ?! ")), None);
        assert_eq!(normalizer.normalize_field(None), None);
    }

    #[test]
    fn normalization_is_idempotent() {
        let normalizer = AddressNormalizer::default();
        let samples = [
            "Jl. Gatot Subroto Kav. 52, Kuningan",
            "gg..jl..kel.",
            "JJL.L. Blk.M  / RT.03",
            "İstanbul caddesi",
            "Rue de l'Église — 12ème",
            "   ",
            "kab.kec.kel.",
            "123 Main St., Apt #4-B",
        ];
        for sample in samples {
            let once = normalizer.normalize(sample);
            assert_eq!(normalizer.normalize(&once), once, "input: {sample:?}");
        }
    }
}
