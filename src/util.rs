use sha2::{Digest, Sha256};

/// Compute a stable fingerprint from key components.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

/// Deterministic id for a derived row: `<prefix>_<24 hex chars>`.
///
/// Same inputs always give the same id, so rebuilding a case from unchanged
/// data writes byte-identical rows.
pub fn derived_id(prefix: &str, parts: &[&str]) -> String {
    let digest = fingerprint(parts);
    format!("{prefix}_{}", &digest[..24])
}

/// Normalize an employer name for fuzzy matching: lower-case, punctuation
/// dropped, legal-form suffixes removed.
pub fn normalize_employer(name: &str) -> String {
    const LEGAL_FORMS: &[&str] = &["ltda", "me", "epp", "eireli", "sa", "s/a", "cia"];

    name.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == '-')
        .filter(|w| !w.is_empty() && !LEGAL_FORMS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let fp1 = fingerprint(&["caso", "c1", "remuneracoes_faltantes"]);
        let fp2 = fingerprint(&["caso", "c1", "remuneracoes_faltantes"]);
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_parts() {
        assert_ne!(fingerprint(&["ab", "c"]), fingerprint(&["a", "bc"]));
    }

    #[test]
    fn test_derived_id_shape() {
        let id = derived_id("vin", &["c1", "1"]);
        assert!(id.starts_with("vin_"));
        assert_eq!(id.len(), 4 + 24);
        assert_eq!(id, derived_id("vin", &["c1", "1"]));
        assert_ne!(id, derived_id("vin", &["c1", "2"]));
    }

    #[test]
    fn test_normalize_employer_drops_legal_forms() {
        assert_eq!(normalize_employer("ABC Ltda."), "abc");
        assert_eq!(normalize_employer("Comércio XYZ S/A"), "comércio xyz");
        assert_eq!(normalize_employer("  Padaria  Pão-Quente ME "), "padaria pão quente");
    }
}
