// Vendor mappings: remembered defaults (contact, account, tax rates) keyed
// by a vendor's tax ID or normalized name, learned from recorded expenses and
// applied to newly read receipts.

use std::cmp::Reverse;

use baht_core::db::Database;
use baht_core::model::{new_id, MatchKind, VendorMapping};
use baht_core::tax::normalize_tax_id;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};

/// Legal-form words removed wherever they appear. Longer forms come first so
/// `ห้างหุ้นส่วนจำกัด` is removed before `จำกัด`.
const THAI_AFFIXES: &[&str] = &[
    "ห้างหุ้นส่วนจำกัด",
    "ห้างหุ้นส่วนสามัญ",
    "ห้างหุ้นส่วน",
    "(มหาชน)",
    "มหาชน",
    "บริษัท",
    "จำกัด",
    "หจก.",
    "บจก.",
    "บมจ.",
];

/// Legal-form words removed when they stand alone.
const ENGLISH_AFFIXES: &[&str] = &[
    "co", "company", "ltd", "limited", "inc", "corp", "corporation", "plc", "pcl", "lp",
];

/// Legal forms whose words are ordinary name words on their own, so they are
/// only removed as a whole phrase.
const ENGLISH_PHRASES: &[&[&str]] = &[
    &["public", "company", "limited"],
    &["public", "co", "ltd"],
    &["limited", "partnership"],
    &["part", "ltd"],
    &["ltd", "part"],
];

/// Substring matches need at least this many characters on both sides.
const MIN_CONTAINS_LEN: usize = 3;

/// Lower-case `name`, drop company-form affixes and punctuation, and collapse
/// whitespace, so "บริษัท สยาม จำกัด" and "Siam Co., Ltd." style variants
/// compare equal to their bare names.
pub fn normalize_vendor_name(name: &str) -> String {
    let mut lowered = name.to_lowercase();
    for affix in THAI_AFFIXES {
        lowered = lowered.replace(affix, " ");
    }
    let spaced: String = lowered
        .chars()
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect();
    let words: Vec<&str> = spaced.split_whitespace().collect();
    let mut kept = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        if let Some(phrase) = ENGLISH_PHRASES.iter().find(|p| words[i..].starts_with(p)) {
            i += phrase.len();
            continue;
        }
        if !ENGLISH_AFFIXES.contains(&words[i]) {
            kept.push(words[i]);
        }
        i += 1;
    }
    kept.join(" ")
}

/// The mapping chosen for a vendor and the rule that picked it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VendorMatch<'a> {
    pub mapping: &'a VendorMapping,
    pub kind: MatchKind,
}

fn match_kind(mapping: &VendorMapping, normalized: &str, tax_id: Option<&str>) -> Option<MatchKind> {
    if let (Some(wanted), Some(have)) = (tax_id, mapping.vendor_tax_id.as_deref()) {
        if wanted == have {
            return Some(MatchKind::TaxId);
        }
    }
    if normalized.is_empty() || mapping.normalized_name.is_empty() {
        return None;
    }
    if mapping.normalized_name == normalized {
        return Some(MatchKind::Exact);
    }
    let long_enough = normalized.chars().count() >= MIN_CONTAINS_LEN
        && mapping.normalized_name.chars().count() >= MIN_CONTAINS_LEN;
    if long_enough
        && (normalized.contains(&mapping.normalized_name)
            || mapping.normalized_name.contains(normalized))
    {
        return Some(MatchKind::Contains);
    }
    None
}

/// Pick the best mapping for a vendor.
///
/// A tax-ID match beats an exact normalized-name match, which beats a
/// substring match. Ties go to the most used mapping, then the most recently
/// used one.
pub fn find_best_match<'a>(
    mappings: &'a [VendorMapping],
    vendor_name: Option<&str>,
    vendor_tax_id: Option<&str>,
) -> Option<VendorMatch<'a>> {
    let normalized = vendor_name.map(normalize_vendor_name).unwrap_or_default();
    let tax_id = vendor_tax_id.and_then(normalize_tax_id);

    mappings
        .iter()
        .filter_map(|m| {
            match_kind(m, &normalized, tax_id.as_deref()).map(|kind| VendorMatch { mapping: m, kind })
        })
        .min_by_key(rank)
}

fn rank(m: &VendorMatch<'_>) -> (MatchKind, Reverse<i64>, Reverse<Option<DateTime<Utc>>>) {
    (
        m.kind,
        Reverse(m.mapping.use_count),
        Reverse(m.mapping.last_used_at),
    )
}

/// What to remember about a vendor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LearnInput {
    pub vendor_name: String,
    pub vendor_tax_id: Option<String>,
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub wht_rate: Option<Decimal>,
    pub description_template: Option<String>,
}

/// Mapping returned to clients, with the rule that matched when it came from
/// a lookup.
#[derive(Debug, Clone, Serialize)]
pub struct VendorSuggestion {
    pub mapping_id: String,
    pub match_kind: MatchKind,
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub wht_rate: Option<Decimal>,
    pub description: Option<String>,
}

impl From<VendorMatch<'_>> for VendorSuggestion {
    fn from(m: VendorMatch<'_>) -> Self {
        VendorSuggestion {
            mapping_id: m.mapping.id.clone(),
            match_kind: m.kind,
            contact_id: m.mapping.contact_id.clone(),
            account_id: m.mapping.account_id.clone(),
            vat_rate: m.mapping.vat_rate,
            wht_rate: m.mapping.wht_rate,
            description: m.mapping.description_template.clone(),
        }
    }
}

/// Remember `input` for the company: insert a new mapping or merge into the
/// one with the same tax ID or normalized name, bumping its use count.
pub fn learn(
    db: &Database,
    company_id: &str,
    input: &LearnInput,
    at: DateTime<Utc>,
) -> ServiceResult<VendorMapping> {
    let vendor_name = input.vendor_name.trim();
    let normalized = normalize_vendor_name(vendor_name);
    let tax_id = input.vendor_tax_id.as_deref().and_then(normalize_tax_id);
    if normalized.is_empty() && tax_id.is_none() {
        return Err(ServiceError::Validation(
            "a vendor mapping needs a name or a 13-digit tax ID".into(),
        ));
    }

    let mapping = VendorMapping {
        id: new_id(),
        company_id: company_id.to_string(),
        vendor_name: vendor_name.to_string(),
        match_kind: if tax_id.is_some() { MatchKind::TaxId } else { MatchKind::Exact },
        vendor_tax_id: tax_id,
        normalized_name: normalized,
        contact_id: input.contact_id.clone(),
        account_id: input.account_id.clone(),
        vat_rate: input.vat_rate,
        wht_rate: input.wht_rate,
        description_template: input.description_template.clone(),
        use_count: 1,
        last_used_at: Some(at),
        created_at: at,
    };
    let stored = db.upsert_vendor_mapping(&mapping)?;
    debug!(
        company_id,
        mapping_id = %stored.id,
        vendor = %stored.vendor_name,
        use_count = stored.use_count,
        "vendor mapping learned"
    );
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use rust_decimal_macros::dec;

    fn mapping(id: &str, name: &str, tax_id: Option<&str>, uses: i64) -> VendorMapping {
        VendorMapping {
            id: id.into(),
            company_id: COMPANY.into(),
            vendor_name: name.into(),
            vendor_tax_id: tax_id.map(String::from),
            normalized_name: normalize_vendor_name(name),
            match_kind: MatchKind::Exact,
            contact_id: None,
            account_id: Some(format!("acct-{id}")),
            vat_rate: None,
            wht_rate: None,
            description_template: None,
            use_count: uses,
            last_used_at: None,
            created_at: at(2024, 1, 1),
        }
    }

    #[test]
    fn normalization_strips_legal_forms() {
        assert_eq!(normalize_vendor_name("บริษัท สยามแม็คโคร จำกัด (มหาชน)"), "สยามแม็คโคร");
        assert_eq!(normalize_vendor_name("ห้างหุ้นส่วนจำกัด ช่างดี"), "ช่างดี");
        assert_eq!(normalize_vendor_name("หจก.ช่างดี"), "ช่างดี");
        assert_eq!(normalize_vendor_name("Siam Makro Public Company Limited"), "siam makro");
        assert_eq!(normalize_vendor_name("  Office-Mate Co.,Ltd. "), "office mate");
        assert_eq!(normalize_vendor_name("Acme, Inc."), "acme");
        assert_eq!(normalize_vendor_name("Chang Dee Part., Ltd."), "chang dee");
    }

    #[test]
    fn normalization_keeps_name_words_that_look_like_forms() {
        assert_eq!(normalize_vendor_name("Auto Part"), "auto part");
        assert_eq!(normalize_vendor_name("Public Warehouse Co., Ltd."), "public warehouse");
        assert_eq!(normalize_vendor_name("Bangkok Auto Part Shop"), "bangkok auto part shop");
    }

    #[test]
    fn tax_id_beats_name() {
        let mappings = vec![
            mapping("by-name", "Siam Makro", None, 50),
            mapping("by-tax", "Makro HQ", Some(VENDOR_TAX_ID), 1),
        ];
        let m = find_best_match(&mappings, Some("บริษัท Siam Makro จำกัด"), Some("0-1055-36112-01-4")).unwrap();
        assert_eq!(m.mapping.id, "by-tax");
        assert_eq!(m.kind, MatchKind::TaxId);
    }

    #[test]
    fn exact_beats_contains_and_use_count_breaks_ties() {
        let mappings = vec![
            mapping("contains", "Siam Makro Rama 4", None, 90),
            mapping("exact-rare", "Siam Makro", None, 2),
            mapping("exact-common", "SIAM MAKRO CO., LTD.", None, 7),
        ];
        let m = find_best_match(&mappings, Some("Siam Makro"), None).unwrap();
        assert_eq!(m.mapping.id, "exact-common");
        assert_eq!(m.kind, MatchKind::Exact);
    }

    #[test]
    fn contains_needs_three_characters() {
        let mappings = vec![mapping("short", "AB", None, 1), mapping("long", "Makro", None, 1)];
        assert!(find_best_match(&mappings, Some("AB Trading"), None).is_none());
        let m = find_best_match(&mappings, Some("Makro Rama 4"), None).unwrap();
        assert_eq!((m.mapping.id.as_str(), m.kind), ("long", MatchKind::Contains));
    }

    #[test]
    fn recency_breaks_remaining_ties() {
        let mut older = mapping("older", "Makro", None, 3);
        older.last_used_at = Some(at(2024, 1, 1));
        let mut newer = mapping("newer", "makro", None, 3);
        newer.last_used_at = Some(at(2024, 3, 1));
        let mappings = vec![older, newer];
        assert_eq!(find_best_match(&mappings, Some("MAKRO"), None).unwrap().mapping.id, "newer");
    }

    #[test]
    fn learn_merges_on_tax_id_and_counts_uses() {
        let db = seeded();
        let supplies = account_id(&db, "5270");
        let first = learn(
            &db,
            COMPANY,
            &LearnInput {
                vendor_name: "บริษัท ออฟฟิศเมท จำกัด".into(),
                vendor_tax_id: Some(VENDOR_TAX_ID.into()),
                account_id: Some(supplies.clone()),
                vat_rate: Some(dec!(7)),
                ..Default::default()
            },
            at(2024, 5, 1),
        )
        .unwrap();
        assert_eq!(first.use_count, 1);
        assert_eq!(first.match_kind, MatchKind::TaxId);

        let second = learn(
            &db,
            COMPANY,
            &LearnInput {
                vendor_name: "OfficeMate".into(),
                vendor_tax_id: Some(VENDOR_TAX_ID.into()),
                wht_rate: Some(dec!(3)),
                ..Default::default()
            },
            at(2024, 5, 2),
        )
        .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.use_count, 2);
        assert_eq!(second.account_id, Some(supplies));
        assert_eq!(second.wht_rate, Some(dec!(3)));
        assert_eq!(db.list_vendor_mappings(COMPANY).unwrap().len(), 1);
    }

    #[test]
    fn learn_needs_a_name_or_tax_id() {
        let db = seeded();
        let err = learn(&db, COMPANY, &LearnInput { vendor_name: "  Co., Ltd. ".into(), ..Default::default() }, at(2024, 5, 1))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
